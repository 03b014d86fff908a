//! Inbound half of the engine: stitches fragments back into whole messages.
//!
//! [`Reassembler`] keeps one slot per `(source, message id)` pair in a fixed
//! pool. Fragments are accepted one receive window at a time and copied
//! straight to their final offset in the slot's buffer. Each completed window
//! (and the final fragment) triggers a window acknowledgment back to the
//! sender. Completed messages stay in the pool as `Acked` so that replayed
//! fragments are absorbed instead of delivered twice; the least recently
//! completed one is reclaimed when a new message needs a slot.

use std::time::Duration;

use bincode::error::DecodeError;
use bytes::Bytes;
use log::{debug, warn};

use super::{
    Acknowledgment,
    FragmentEnvelope,
    FragmentHeader,
    FragmentIndex,
    FragmentationConfig,
    IdleTimeout,
    InboundFragment,
    MessageId,
    ReassemblyError,
    Timer,
    TimerHandle,
    Transport,
    ViolationKind,
    WindowMask,
    WindowSize,
    pool::{Slot, SlotPool},
};
use crate::{
    message::Message,
    metrics::{self, DropReason},
};

/// Lifecycle state of a busy inbound slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReassemblyStatus {
    /// Fragments are still being collected.
    InUse,
    /// A fragment did not fit the buffer; fragments are still acknowledged
    /// but the message will never be delivered.
    PayloadTooLarge,
    /// Every fragment was accounted for and the outcome reported.
    Acked,
}

/// Per-message reassembly state.
#[derive(Debug)]
struct Reassembly<A> {
    source: A,
    message_id: MessageId,
    status: ReassemblyStatus,
    fragment_count: u8,
    fragments_expected: Option<u8>,
    fragments_received: u8,
    window_base: FragmentIndex,
    window_finger: usize,
    window_mask: WindowMask,
    fragment_length: Option<usize>,
    last_fragment_length: Option<usize>,
    /// Window-relative position of a final fragment parked at the buffer tail
    /// until this window's fragment length is known.
    parked_final: Option<usize>,
    overflow_at: Option<usize>,
    ack_age: u32,
    idle_timer: Option<TimerHandle>,
    timer_epoch: u64,
}

impl<A> Reassembly<A> {
    fn new(source: A, message_id: MessageId, fragment_count: u8, window: WindowSize) -> Self {
        Self {
            source,
            message_id,
            status: ReassemblyStatus::InUse,
            fragment_count,
            fragments_expected: None,
            fragments_received: 0,
            window_base: FragmentIndex::zero(),
            window_finger: 0,
            window_mask: WindowMask::open(window.get()),
            fragment_length: None,
            last_fragment_length: None,
            parked_final: None,
            overflow_at: None,
            ack_age: 0,
            idle_timer: None,
            timer_epoch: 0,
        }
    }

    fn slide(&mut self, window: WindowSize) {
        let step = window.get();
        self.window_finger += usize::from(step) * self.fragment_length.unwrap_or(0);
        self.window_base = self.window_base.saturating_add(step);
        self.window_mask = WindowMask::open(
            window.fragments_in_window(self.window_base, self.fragments_expected),
        );
        self.fragment_length = None;
    }

    fn mark_overflow(&mut self, attempted: usize) {
        self.overflow_at.get_or_insert(attempted);
        if self.status == ReassemblyStatus::InUse {
            self.status = ReassemblyStatus::PayloadTooLarge;
        }
    }

    /// Check a non-final fragment's length, learning it when it is the first
    /// one seen in this window.
    fn learn_length(&mut self, buffer: &mut [u8], length: usize) -> Result<(), ViolationKind> {
        match self.fragment_length {
            Some(expected) if expected != length => {
                return Err(ViolationKind::LengthMismatch {
                    expected,
                    found: length,
                });
            }
            Some(_) => return Ok(()),
            None => self.fragment_length = Some(length),
        }

        let Some(relative) = self.parked_final.take() else {
            return Ok(());
        };
        let parked_length = self.last_fragment_length.unwrap_or(0);
        if parked_length > length {
            return Err(ViolationKind::FinalFragmentTooLong {
                limit: length,
                found: parked_length,
            });
        }
        let capacity = buffer.len();
        let start = self.window_finger + relative * length;
        let end = start + parked_length;
        if end > capacity {
            self.mark_overflow(end);
        } else {
            buffer.copy_within(capacity - parked_length..capacity, start);
        }
        Ok(())
    }

    /// Copy a fragment to its place in `buffer` and record it in the window.
    fn store(&mut self, buffer: &mut [u8], header: FragmentHeader, payload: &[u8]) {
        let capacity = buffer.len();
        let relative = header
            .fragment_index()
            .as_usize()
            .saturating_sub(self.window_base.as_usize());
        let length = payload.len();
        let offset = match (relative, self.fragment_length) {
            (0, _) => Some(self.window_finger),
            (_, Some(fragment_length)) => Some(self.window_finger + relative * fragment_length),
            (_, None) => None,
        };

        match offset {
            Some(offset) if offset + length > capacity => self.mark_overflow(offset + length),
            Some(offset) => {
                if let Some(target) = buffer.get_mut(offset..offset + length) {
                    target.copy_from_slice(payload);
                }
                if header.is_last_fragment() {
                    self.last_fragment_length = Some(length);
                }
            }
            // Only a final fragment can arrive before its window's length is
            // known; park it at the tail until a regular fragment arrives.
            None if self.window_finger + length > capacity => {
                self.mark_overflow(self.window_finger + length);
            }
            None => {
                if let Some(target) = buffer.get_mut(capacity - length..) {
                    target.copy_from_slice(payload);
                }
                self.parked_final = Some(relative);
                self.last_fragment_length = Some(length);
            }
        }

        let newly_set = u8::try_from(relative)
            .is_ok_and(|relative| self.window_mask.insert(relative));
        if newly_set {
            self.fragments_received = self.fragments_received.saturating_add(1);
        }
    }

    fn is_complete(&self) -> bool { self.fragments_expected == Some(self.fragments_received) }

    fn total_length(&self) -> usize {
        let in_final_window = self
            .fragments_expected
            .map_or(1, |expected| {
                usize::from(expected).saturating_sub(self.window_base.as_usize())
            })
            .max(1);
        self.window_finger
            + (in_final_window - 1) * self.fragment_length.unwrap_or(0)
            + self.last_fragment_length.unwrap_or(0)
    }

    fn acknowledgment(&self) -> Acknowledgment {
        Acknowledgment {
            message_id: self.message_id,
            window_base: self.window_base,
            received: self.window_mask,
        }
    }
}

/// Inbound slot. The buffer is allocated once at full capacity.
#[derive(Debug)]
struct RxMessage<A> {
    buffer: Vec<u8>,
    active: Option<Reassembly<A>>,
}

impl<A> Slot for RxMessage<A> {
    fn is_vacant(&self) -> bool { self.active.is_none() }
}

/// A fully reassembled inbound message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReassembledMessage<A> {
    source: A,
    message_id: MessageId,
    payload: Bytes,
}

impl<A> ReassembledMessage<A> {
    /// Construct a new [`ReassembledMessage`].
    #[must_use]
    pub fn new(source: A, message_id: MessageId, payload: Bytes) -> Self {
        Self {
            source,
            message_id,
            payload,
        }
    }

    /// Sender of the message.
    #[must_use]
    pub const fn source(&self) -> &A { &self.source }

    /// Sender-assigned identifier shared by the fragments.
    #[must_use]
    pub const fn message_id(&self) -> MessageId { self.message_id }

    /// Borrow the reassembled payload.
    #[must_use]
    pub fn payload(&self) -> &[u8] { &self.payload }

    /// Consume the message, returning the payload bytes.
    #[must_use]
    pub fn into_payload(self) -> Bytes { self.payload }

    /// Decode the payload into a strongly typed message.
    ///
    /// # Errors
    ///
    /// Returns any [`DecodeError`] raised while deserialising the payload.
    pub fn decode<M: Message>(&self) -> Result<M, DecodeError> {
        let (message, _) = M::from_bytes(self.payload())?;
        Ok(message)
    }
}

/// Result of feeding one fragment to the [`Reassembler`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Received<A> {
    /// The fragment was stored, absorbed as a duplicate, or dropped.
    Consumed,
    /// The fragment completed its message.
    Reassembled(ReassembledMessage<A>),
}

enum Step {
    Consumed,
    Violation(ViolationKind),
    Complete,
}

/// Fixed-pool fragment reassembler with stall timeouts and LRU reclamation.
#[derive(Debug)]
pub struct Reassembler<A> {
    window_size: WindowSize,
    timeout: Duration,
    slots: SlotPool<RxMessage<A>>,
    next_epoch: u64,
}

impl<A> Reassembler<A>
where
    A: Clone + PartialEq + std::fmt::Debug,
{
    /// Create a reassembler with `config.max_inbound` slots of
    /// `config.buffer_capacity` bytes each.
    #[must_use]
    pub fn new(config: &FragmentationConfig) -> Self {
        let capacity = config.buffer_capacity.get();
        Self {
            window_size: config.window_size,
            timeout: config.reassembly_timeout,
            slots: SlotPool::new(config.max_inbound.get(), || RxMessage {
                buffer: vec![0; capacity],
                active: None,
            }),
            next_epoch: 0,
        }
    }

    /// Number of reassemblies still collecting fragments.
    #[must_use]
    pub fn active_len(&self) -> usize {
        self.slots
            .iter()
            .filter_map(|slot| slot.active.as_ref())
            .filter(|r| r.status != ReassemblyStatus::Acked)
            .count()
    }

    /// Number of completed messages retained for duplicate suppression.
    #[must_use]
    pub fn acked_len(&self) -> usize {
        self.slots
            .iter()
            .filter_map(|slot| slot.active.as_ref())
            .filter(|r| r.status == ReassemblyStatus::Acked)
            .count()
    }

    /// Status of the slot holding `(source, message_id)`, if any.
    #[must_use]
    pub fn status(&self, source: &A, message_id: MessageId) -> Option<ReassemblyStatus> {
        let index = self.find(source, message_id)?;
        self.slots
            .get(index)
            .and_then(|slot| slot.active.as_ref())
            .map(|r| r.status)
    }

    /// Process one inbound fragment.
    ///
    /// Returns [`Received::Reassembled`] exactly once per message, when the
    /// fragment completes it, and [`Received::Consumed`] otherwise. Fragments
    /// outside the receive window, fragments of already completed messages,
    /// and new messages arriving while every slot is busy are all consumed
    /// without effect.
    ///
    /// # Errors
    ///
    /// Returns [`ReassemblyError::ProtocolViolation`] when the fragment is
    /// inconsistent with the ones before it; the reassembly is abandoned and
    /// its slot freed. Returns [`ReassemblyError::PayloadTooLarge`] instead of
    /// a delivery when every fragment arrived but the message did not fit.
    pub fn on_fragment_received<T, M, E>(
        &mut self,
        transport: &mut T,
        timer: &mut M,
        fragment: InboundFragment<A, E>,
    ) -> Result<Received<A>, ReassemblyError>
    where
        T: Transport<Address = A, Envelope = E>,
        M: Timer,
        E: FragmentEnvelope,
    {
        let InboundFragment {
            source,
            envelope,
            message_id,
            header,
            payload,
        } = fragment;
        let index = header.fragment_index();
        let existing = self.find(&source, message_id);

        if let Err(kind) = check_header(header) {
            match existing {
                Some(slot) if self.is_acked(slot) => {
                    debug!(
                        "ignoring malformed fragment for completed message: \
                         message_id={message_id}, reason={kind}"
                    );
                    return Ok(Received::Consumed);
                }
                Some(slot) => self.free(timer, slot),
                None => {}
            }
            return Err(violation(message_id, kind));
        }

        let slot_index = match existing {
            Some(slot) => slot,
            None if !self.window_size.contains(FragmentIndex::zero(), index) => {
                debug!(
                    "dropping fragment beyond first window of unknown message: \
                     message_id={message_id}, fragment_index={index}"
                );
                metrics::inc_reassembly_dropped(DropReason::OutsideWindow);
                return Ok(Received::Consumed);
            }
            None => {
                let Some(slot) = self.allocate(timer, &source, message_id, header) else {
                    debug!(
                        "dropping fragment; no inbound slot available: source={source:?}, \
                         message_id={message_id}"
                    );
                    metrics::inc_reassembly_dropped(DropReason::PoolExhausted);
                    return Ok(Received::Consumed);
                };
                slot
            }
        };

        let step = self.apply(transport, timer, slot_index, &envelope, header, &payload);
        match step {
            Step::Consumed => Ok(Received::Consumed),
            Step::Violation(kind) => {
                warn!(
                    "abandoning reassembly after protocol violation: source={source:?}, \
                     message_id={message_id}, reason={kind}"
                );
                metrics::inc_reassembly_dropped(DropReason::ProtocolViolation);
                self.free(timer, slot_index);
                Err(violation(message_id, kind))
            }
            Step::Complete => self.complete(timer, slot_index),
        }
    }

    /// Handle a fired stall timer.
    ///
    /// Frees the reassembly the token was armed for, regardless of partial
    /// progress, and returns its `(source, message id)`. Stale tokens are
    /// ignored.
    pub fn on_idle_timeout(&mut self, token: IdleTimeout) -> Option<(A, MessageId)> {
        let slot = self.slots.get_mut(token.slot)?;
        let r = slot.active.as_ref()?;
        if r.timer_epoch != token.epoch || r.status == ReassemblyStatus::Acked {
            return None;
        }
        let stalled = slot.active.take()?;
        warn!(
            "reassembly stalled; freeing slot: source={:?}, message_id={}, received={}",
            stalled.source, stalled.message_id, stalled.fragments_received
        );
        metrics::inc_reassembly_dropped(DropReason::Stalled);
        Some((stalled.source, stalled.message_id))
    }

    /// Free the slot holding `(source, message_id)`, returning whether one
    /// existed.
    pub fn release<M: Timer>(&mut self, timer: &mut M, source: &A, message_id: MessageId) -> bool {
        let Some(index) = self.find(source, message_id) else {
            return false;
        };
        self.free(timer, index);
        true
    }

    /// Free every slot.
    pub fn clear<M: Timer>(&mut self, timer: &mut M) {
        for slot in self.slots.iter_mut() {
            if let Some(handle) = slot.active.take().and_then(|r| r.idle_timer) {
                timer.cancel(handle);
            }
        }
    }

    fn is_acked(&self, slot_index: usize) -> bool {
        self.slots
            .get(slot_index)
            .and_then(|slot| slot.active.as_ref())
            .is_some_and(|r| r.status == ReassemblyStatus::Acked)
    }

    fn find(&self, source: &A, message_id: MessageId) -> Option<usize> {
        self.slots.find_busy(|slot| {
            slot.active
                .as_ref()
                .is_some_and(|r| r.message_id == message_id && r.source == *source)
        })
    }

    /// Claim a vacant slot, or reclaim the least recently completed one.
    fn allocate<M: Timer>(
        &mut self,
        timer: &mut M,
        source: &A,
        message_id: MessageId,
        header: FragmentHeader,
    ) -> Option<usize> {
        let index = match self.slots.find_vacant() {
            Some(index) => index,
            None => {
                let index = self.oldest_acked()?;
                debug!("reclaiming least recently completed inbound slot: slot={index}");
                index
            }
        };

        let slot = self.slots.get_mut(index)?;
        let mut reassembly = Reassembly::new(
            source.clone(),
            message_id,
            header.fragment_count(),
            self.window_size,
        );
        rearm(timer, &mut self.next_epoch, self.timeout, index, &mut reassembly);
        slot.active = Some(reassembly);
        debug!(
            "reassembly started: source={source:?}, message_id={message_id}, \
             fragments={}",
            header.fragment_count()
        );
        Some(index)
    }

    fn oldest_acked(&self) -> Option<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.active.as_ref().map(|r| (index, r)))
            .filter(|(_, r)| r.status == ReassemblyStatus::Acked)
            .max_by_key(|(_, r)| r.ack_age)
            .map(|(index, _)| index)
    }

    /// Run the window, validation, storage, and acknowledgment steps for one
    /// fragment on an existing slot.
    fn apply<T, M, E>(
        &mut self,
        transport: &mut T,
        timer: &mut M,
        slot_index: usize,
        envelope: &E,
        header: FragmentHeader,
        payload: &[u8],
    ) -> Step
    where
        T: Transport<Address = A, Envelope = E>,
        M: Timer,
        E: FragmentEnvelope,
    {
        let window = self.window_size;
        let index = header.fragment_index();
        let Some(RxMessage { buffer, active }) = self.slots.get_mut(slot_index) else {
            return Step::Consumed;
        };
        let Some(r) = active.as_mut() else {
            return Step::Consumed;
        };

        if header.fragment_count() != r.fragment_count {
            // A completed message keeps its slot so replays stay suppressed.
            if r.status == ReassemblyStatus::Acked {
                debug!(
                    "ignoring fragment with changed count for completed message: \
                     message_id={}, fragment_count={}",
                    r.message_id,
                    header.fragment_count()
                );
                return Step::Consumed;
            }
            return Step::Violation(ViolationKind::CountMismatch {
                expected: r.fragment_count,
                found: header.fragment_count(),
            });
        }

        if r.status != ReassemblyStatus::Acked
            && r.window_mask.is_full()
            && index >= r.window_base
            && !window.contains(r.window_base, index)
        {
            r.slide(window);
            rearm(timer, &mut self.next_epoch, self.timeout, slot_index, r);
            debug!(
                "receive window advanced: message_id={}, window_base={}",
                r.message_id, r.window_base
            );
        }

        if !window.contains(r.window_base, index) {
            debug!(
                "dropping fragment outside receive window: message_id={}, fragment_index={index}, \
                 window_base={}",
                r.message_id, r.window_base
            );
            metrics::inc_reassembly_dropped(DropReason::OutsideWindow);
            return Step::Consumed;
        }

        if r.status == ReassemblyStatus::Acked {
            send_ack(transport, &r.source, envelope, r.acknowledgment());
            return Step::Consumed;
        }

        let is_last = header.is_last_fragment();
        if is_last {
            if let Some(limit) = r.fragment_length.filter(|limit| payload.len() > *limit) {
                return Step::Violation(ViolationKind::FinalFragmentTooLong {
                    limit,
                    found: payload.len(),
                });
            }
        } else if let Err(kind) = r.learn_length(buffer, payload.len()) {
            return Step::Violation(kind);
        }

        if index == FragmentIndex::zero() {
            r.fragments_expected = Some(header.fragment_count());
            r.window_mask = r.window_mask.with_padding(
                window.fragments_in_window(r.window_base, r.fragments_expected),
            );
        }

        r.store(buffer, header, payload);

        if is_last || r.window_mask.is_full() {
            send_ack(transport, &r.source, envelope, r.acknowledgment());
        }

        if r.is_complete() {
            Step::Complete
        } else {
            Step::Consumed
        }
    }

    /// Retire a slot whose fragments are all accounted for and report the
    /// outcome.
    fn complete<M: Timer>(
        &mut self,
        timer: &mut M,
        slot_index: usize,
    ) -> Result<Received<A>, ReassemblyError> {
        for slot in self.slots.iter_mut() {
            if let Some(r) = slot.active.as_mut() {
                if r.status == ReassemblyStatus::Acked {
                    r.ack_age = r.ack_age.saturating_add(1);
                }
            }
        }

        let Some(RxMessage { buffer, active }) = self.slots.get_mut(slot_index) else {
            return Ok(Received::Consumed);
        };
        let Some(r) = active.as_mut() else {
            return Ok(Received::Consumed);
        };
        if let Some(handle) = r.idle_timer.take() {
            timer.cancel(handle);
        }
        let overflowed = r.status == ReassemblyStatus::PayloadTooLarge;
        r.status = ReassemblyStatus::Acked;
        r.ack_age = 0;

        if overflowed {
            let attempted = r.overflow_at.unwrap_or(buffer.len());
            warn!(
                "reassembled message exceeds buffer capacity; discarding: source={:?}, \
                 message_id={}, attempted={attempted}, capacity={}",
                r.source,
                r.message_id,
                buffer.len()
            );
            metrics::inc_reassembly_dropped(DropReason::Overflow);
            return Err(ReassemblyError::PayloadTooLarge {
                message_id: r.message_id,
                attempted,
                capacity: buffer.len(),
            });
        }

        let total = r.total_length();
        let payload = Bytes::copy_from_slice(buffer.get(..total).unwrap_or_default());
        debug!(
            "message reassembled: source={:?}, message_id={}, length={total}",
            r.source, r.message_id
        );
        metrics::inc_messages_reassembled();
        Ok(Received::Reassembled(ReassembledMessage::new(
            r.source.clone(),
            r.message_id,
            payload,
        )))
    }

    fn free<M: Timer>(&mut self, timer: &mut M, slot_index: usize) {
        let Some(slot) = self.slots.get_mut(slot_index) else {
            return;
        };
        if let Some(handle) = slot.active.take().and_then(|r| r.idle_timer) {
            timer.cancel(handle);
        }
    }
}

fn check_header(header: FragmentHeader) -> Result<(), ViolationKind> {
    let count = header.fragment_count();
    if count == 0 {
        return Err(ViolationKind::ZeroFragmentCount);
    }
    if header.fragment_index().get() >= count {
        return Err(ViolationKind::IndexOutOfRange {
            index: header.fragment_index(),
            count,
        });
    }
    Ok(())
}

fn violation(message_id: MessageId, kind: ViolationKind) -> ReassemblyError {
    ReassemblyError::ProtocolViolation { message_id, kind }
}

fn rearm<A, M: Timer>(
    timer: &mut M,
    next_epoch: &mut u64,
    timeout: Duration,
    slot: usize,
    reassembly: &mut Reassembly<A>,
) {
    if let Some(handle) = reassembly.idle_timer.take() {
        timer.cancel(handle);
    }
    *next_epoch = next_epoch.wrapping_add(1);
    reassembly.timer_epoch = *next_epoch;
    reassembly.idle_timer = Some(timer.schedule(
        timeout,
        IdleTimeout {
            slot,
            epoch: *next_epoch,
        },
    ));
}

fn send_ack<T: Transport>(
    transport: &mut T,
    source: &T::Address,
    envelope: &T::Envelope,
    ack: Acknowledgment,
) {
    if let Err(err) = transport.send_acknowledgment(source, envelope, ack) {
        warn!(
            "failed to send window acknowledgment: source={source:?}, message_id={}, error={err}",
            ack.message_id
        );
    }
}
