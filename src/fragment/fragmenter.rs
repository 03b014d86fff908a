//! Outbound half of the engine: splits messages and drives them through the
//! transport one window at a time.
//!
//! [`Fragmenter`] owns a fixed pool of outbound slots. [`Fragmenter::begin_send`]
//! copies a message into a free slot and sends its first window of fragments.
//! Every delivery report for the last outstanding fragment of a window slides
//! the window and sends the next batch, until the whole message is confirmed
//! or the first failure aborts it. Either way exactly one [`SendCompletion`]
//! leaves the fragmenter per started send, after the slot has been freed.

use bytes::Bytes;
use log::{debug, warn};

use super::{
    DeliveryReport,
    FragmentEnvelope,
    FragmentHeader,
    FragmentIndex,
    FragmentationConfig,
    FragmentationError,
    MAX_FRAGMENTS,
    MessageId,
    OutboundFragment,
    Transport,
    TransportError,
    WindowMask,
    WindowSize,
    pool::{Slot, SlotPool},
};
use crate::metrics;

/// State of one in-flight fragmented send.
#[derive(Debug)]
struct ActiveSend<A, E> {
    message_id: MessageId,
    destination: A,
    envelope: E,
    fragment_length: usize,
    fragment_count: u8,
    window_base: usize,
    outstanding: WindowMask,
}

/// Outbound slot. The buffer is allocated once and reused by every send
/// the slot carries.
#[derive(Debug)]
struct TxMessage<A, E> {
    buffer: Vec<u8>,
    active: Option<ActiveSend<A, E>>,
}

impl<A, E> Slot for TxMessage<A, E> {
    fn is_vacant(&self) -> bool { self.active.is_none() }
}

/// Final outcome of one fragmented send.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SendCompletion<A> {
    message_id: MessageId,
    destination: A,
    status: Result<(), TransportError>,
    payload: Bytes,
}

impl<A> SendCompletion<A> {
    /// Identifier returned when the send started.
    #[must_use]
    pub const fn message_id(&self) -> MessageId { self.message_id }

    /// Destination the message was sent to.
    #[must_use]
    pub const fn destination(&self) -> &A { &self.destination }

    /// `Ok` once every fragment was confirmed, otherwise the first failure.
    #[must_use]
    pub const fn status(&self) -> &Result<(), TransportError> { &self.status }

    /// Whether every fragment was confirmed.
    #[must_use]
    pub const fn is_success(&self) -> bool { self.status.is_ok() }

    /// The message bytes that were sent.
    #[must_use]
    pub fn payload(&self) -> &[u8] { &self.payload }

    /// Consume the completion, returning the message bytes.
    #[must_use]
    pub fn into_payload(self) -> Bytes { self.payload }
}

/// Progress of a send after the engine handed fragments to the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SendProgress<A> {
    /// Fragments are awaiting delivery reports.
    InFlight,
    /// The send finished without waiting for further reports.
    Complete(SendCompletion<A>),
}

/// Result of a successfully started send.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SendStarted<A> {
    /// Identifier correlating later delivery reports and the completion.
    pub message_id: MessageId,
    /// Outcome of the first window's send attempts.
    pub progress: SendProgress<A>,
}

/// Splits outbound messages into windows of fragments.
#[derive(Debug)]
pub struct Fragmenter<A, E> {
    window_size: WindowSize,
    buffer_capacity: usize,
    slots: SlotPool<TxMessage<A, E>>,
    next_message_id: u64,
}

impl<A, E> Fragmenter<A, E>
where
    A: Clone + PartialEq + std::fmt::Debug,
    E: FragmentEnvelope,
{
    /// Create a fragmenter with `config.max_outbound` slots of
    /// `config.buffer_capacity` bytes each.
    #[must_use]
    pub fn new(config: &FragmentationConfig) -> Self {
        Self::with_starting_id(config, MessageId::new(0))
    }

    /// Create a fragmenter whose first send is tagged `start_at`.
    #[must_use]
    pub fn with_starting_id(config: &FragmentationConfig, start_at: MessageId) -> Self {
        let buffer_capacity = config.buffer_capacity.get();
        Self {
            window_size: config.window_size,
            buffer_capacity,
            slots: SlotPool::new(config.max_outbound.get(), || TxMessage {
                buffer: Vec::with_capacity(buffer_capacity),
                active: None,
            }),
            next_message_id: start_at.get(),
        }
    }

    /// Number of sends currently in flight.
    #[must_use]
    pub fn outstanding_len(&self) -> usize { self.slots.busy_len() }

    /// Number of outbound slots.
    #[must_use]
    pub fn capacity(&self) -> usize { self.slots.capacity() }

    /// Copy `payload` into a free slot and send its first window.
    ///
    /// The caller's buffer is not retained. When the first window already
    /// finishes the send (a synchronous transport failure, for instance) the
    /// completion is returned in [`SendStarted::progress`] and the slot is
    /// free again.
    ///
    /// # Errors
    ///
    /// Returns [`FragmentationError::MessageTooLong`] when `payload` exceeds
    /// the buffer capacity or would need more than [`MAX_FRAGMENTS`]
    /// fragments, [`FragmentationError::TooManyOutstandingSends`] when every
    /// slot is busy, and [`FragmentationError::NoPayloadBudget`] when the
    /// transport offers no room for payload. No slot is allocated in any of
    /// these cases.
    pub fn begin_send<T>(
        &mut self,
        transport: &mut T,
        destination: A,
        mut envelope: E,
        payload: &[u8],
    ) -> Result<SendStarted<A>, FragmentationError>
    where
        T: Transport<Address = A, Envelope = E>,
    {
        let length = payload.len();
        if length > self.buffer_capacity {
            return Err(FragmentationError::MessageTooLong {
                length,
                limit: self.buffer_capacity,
            });
        }
        let Some(index) = self.slots.find_vacant() else {
            return Err(FragmentationError::TooManyOutstandingSends {
                capacity: self.slots.capacity(),
            });
        };

        let fragment_length = transport.max_payload_size(&destination, &envelope);
        if fragment_length == 0 {
            return Err(FragmentationError::NoPayloadBudget);
        }
        let Ok(fragment_count) = u8::try_from(length.div_ceil(fragment_length).max(1)) else {
            return Err(FragmentationError::MessageTooLong {
                length,
                limit: fragment_length
                    .saturating_mul(MAX_FRAGMENTS)
                    .min(self.buffer_capacity),
            });
        };

        let message_id = self.next_message_id();
        envelope.set_fragmented(true);
        let Some(slot) = self.slots.get_mut(index) else {
            return Err(FragmentationError::TooManyOutstandingSends {
                capacity: self.slots.capacity(),
            });
        };
        slot.buffer.clear();
        slot.buffer.extend_from_slice(payload);
        slot.active = Some(ActiveSend {
            message_id,
            destination,
            envelope,
            fragment_length,
            fragment_count,
            window_base: 0,
            outstanding: WindowMask::empty(),
        });
        debug!(
            "fragmented send started: message_id={message_id}, length={length}, \
             fragments={fragment_count}, fragment_length={fragment_length}"
        );

        let progress = self.send_window(transport, index);
        Ok(SendStarted {
            message_id,
            progress,
        })
    }

    /// Apply a transport delivery report.
    ///
    /// Returns the completion when the report finishes the send. Reports for
    /// unknown messages (already completed or aborted) and repeated reports
    /// for the same fragment are ignored.
    pub fn on_fragment_delivered<T>(
        &mut self,
        transport: &mut T,
        report: DeliveryReport,
    ) -> Option<SendCompletion<A>>
    where
        T: Transport<Address = A, Envelope = E>,
    {
        let DeliveryReport {
            message_id,
            fragment_index,
            status,
        } = report;
        let Some(index) = self
            .slots
            .find_busy(|slot| slot.active.as_ref().map(|send| send.message_id) == Some(message_id))
        else {
            debug!("ignoring delivery report for finished message: message_id={message_id}");
            return None;
        };

        let window = self.window_size.get();
        let send = self.slots.get_mut(index)?.active.as_mut()?;
        let offset = fragment_index
            .as_usize()
            .checked_sub(send.window_base)
            .and_then(|offset| u8::try_from(offset).ok())
            .filter(|offset| *offset < window);
        if !offset.is_some_and(|offset| send.outstanding.remove(offset)) {
            debug!(
                "ignoring delivery report for fragment not in flight: message_id={message_id}, \
                 fragment_index={fragment_index}"
            );
            return None;
        }

        if let Err(err) = status {
            warn!(
                "fragment delivery failed; aborting send: message_id={message_id}, \
                 fragment_index={fragment_index}, error={err}"
            );
            return self.finish(index, Err(err));
        }
        if !send.outstanding.is_empty() {
            return None;
        }

        send.window_base += usize::from(window);
        match self.send_window(transport, index) {
            SendProgress::InFlight => None,
            SendProgress::Complete(completion) => Some(completion),
        }
    }

    /// Send every fragment of the current window, then report whether the
    /// message is finished.
    fn send_window<T>(&mut self, transport: &mut T, index: usize) -> SendProgress<A>
    where
        T: Transport<Address = A, Envelope = E>,
    {
        let window = self.window_size.get();
        let Some(TxMessage { buffer, active }) = self.slots.get_mut(index) else {
            return SendProgress::InFlight;
        };
        let Some(send) = active.as_mut() else {
            return SendProgress::InFlight;
        };

        let mut failure = None;
        for offset in 0..window {
            let position = send.window_base + usize::from(offset);
            let Ok(fragment_index) = u8::try_from(position) else {
                break;
            };
            if fragment_index >= send.fragment_count {
                break;
            }

            let start = position * send.fragment_length;
            let end = (start + send.fragment_length).min(buffer.len());
            let payload = buffer.get(start..end).unwrap_or_default();
            let header = FragmentHeader::new(send.fragment_count, FragmentIndex::new(fragment_index));
            let fragment = OutboundFragment::new(send.message_id, header, start, payload);

            if let Err(err) = transport.send_fragment(&send.destination, &send.envelope, fragment) {
                warn!(
                    "transport rejected fragment; aborting send: message_id={}, \
                     fragment_index={fragment_index}, error={err}",
                    send.message_id
                );
                failure = Some(err);
                break;
            }
            send.outstanding.insert(offset);
            metrics::inc_fragments_sent();
        }

        let finished = send.outstanding.is_empty()
            && send.window_base >= usize::from(send.fragment_count);
        let status = match failure {
            Some(err) => Err(err),
            None if finished => Ok(()),
            None => return SendProgress::InFlight,
        };
        self.finish(index, status)
            .map_or(SendProgress::InFlight, SendProgress::Complete)
    }

    /// Free the slot and build its completion.
    fn finish(
        &mut self,
        index: usize,
        status: Result<(), TransportError>,
    ) -> Option<SendCompletion<A>> {
        let slot = self.slots.get_mut(index)?;
        let send = slot.active.take()?;
        let payload = Bytes::copy_from_slice(&slot.buffer);
        slot.buffer.clear();

        metrics::inc_sends_completed(status.is_ok());
        debug!(
            "fragmented send finished: message_id={}, success={}",
            send.message_id,
            status.is_ok()
        );
        Some(SendCompletion {
            message_id: send.message_id,
            destination: send.destination,
            status,
            payload,
        })
    }

    fn next_message_id(&mut self) -> MessageId {
        let id = MessageId::new(self.next_message_id);
        self.next_message_id = self.next_message_id.wrapping_add(1);
        id
    }
}
