//! In-memory collaborators shared by the fragment unit tests.

use std::time::Duration;

use bytes::Bytes;

use super::{
    Acknowledgment,
    DeliveryReport,
    FragmentEnvelope,
    FragmentHeader,
    FragmentationConfig,
    IdleTimeout,
    InboundFragment,
    MessageHandler,
    MessageId,
    OutboundFragment,
    ReassembledMessage,
    SarEngine,
    SendCompletion,
    Timer,
    TimerHandle,
    Transport,
    TransportError,
};

pub(crate) type Address = u8;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct TestEnvelope {
    pub(crate) fragmented: bool,
    pub(crate) priority: u8,
}

impl FragmentEnvelope for TestEnvelope {
    fn set_fragmented(&mut self, fragmented: bool) { self.fragmented = fragmented; }

    fn is_fragmented(&self) -> bool { self.fragmented }
}

/// A fragment captured by [`RecordingTransport`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct SentFragment {
    pub(crate) destination: Address,
    pub(crate) envelope: TestEnvelope,
    pub(crate) message_id: MessageId,
    pub(crate) header: FragmentHeader,
    pub(crate) offset: usize,
    pub(crate) payload: Vec<u8>,
}

impl SentFragment {
    /// Report this fragment as delivered.
    pub(crate) fn delivered(&self) -> DeliveryReport {
        DeliveryReport::delivered(self.message_id, self.header.fragment_index())
    }

    /// View this fragment as it arrives at `destination` from `source`.
    pub(crate) fn inbound(&self, source: Address) -> InboundFragment<Address, TestEnvelope> {
        InboundFragment {
            source,
            envelope: self.envelope.clone(),
            message_id: self.message_id,
            header: self.header,
            payload: Bytes::copy_from_slice(&self.payload),
        }
    }
}

/// Transport recording every fragment and acknowledgment it is handed.
#[derive(Debug)]
pub(crate) struct RecordingTransport {
    pub(crate) max_payload: usize,
    pub(crate) sent: Vec<SentFragment>,
    pub(crate) acks: Vec<(Address, Acknowledgment)>,
    /// Reject every send once this many fragments have been accepted.
    pub(crate) accept_limit: Option<usize>,
}

impl RecordingTransport {
    pub(crate) fn new(max_payload: usize) -> Self {
        Self {
            max_payload,
            sent: Vec::new(),
            acks: Vec::new(),
            accept_limit: None,
        }
    }

    pub(crate) fn rejecting_after(max_payload: usize, accepted: usize) -> Self {
        Self {
            accept_limit: Some(accepted),
            ..Self::new(max_payload)
        }
    }

    pub(crate) fn sent_indices(&self) -> Vec<u8> {
        self.sent
            .iter()
            .map(|fragment| fragment.header.fragment_index().get())
            .collect()
    }

    pub(crate) fn take_sent(&mut self) -> Vec<SentFragment> { std::mem::take(&mut self.sent) }
}

impl Transport for RecordingTransport {
    type Address = Address;
    type Envelope = TestEnvelope;

    fn max_payload_size(&self, _destination: &Address, _envelope: &TestEnvelope) -> usize {
        self.max_payload
    }

    fn send_fragment(
        &mut self,
        destination: &Address,
        envelope: &TestEnvelope,
        fragment: OutboundFragment<'_>,
    ) -> Result<(), TransportError> {
        if self.accept_limit.is_some_and(|limit| self.sent.len() >= limit) {
            return Err(TransportError::Busy);
        }
        self.sent.push(SentFragment {
            destination: *destination,
            envelope: envelope.clone(),
            message_id: fragment.message_id(),
            header: fragment.header(),
            offset: fragment.offset(),
            payload: fragment.payload().to_vec(),
        });
        Ok(())
    }

    fn send_acknowledgment(
        &mut self,
        source: &Address,
        _envelope: &TestEnvelope,
        ack: Acknowledgment,
    ) -> Result<(), TransportError> {
        self.acks.push((*source, ack));
        Ok(())
    }
}

/// Timer that only fires when a test says so.
#[derive(Debug, Default)]
pub(crate) struct ManualTimer {
    next_handle: u64,
    pub(crate) pending: Vec<(TimerHandle, Duration, IdleTimeout)>,
    pub(crate) cancelled: Vec<TimerHandle>,
}

impl ManualTimer {
    /// Token of the most recently armed, still pending timer.
    pub(crate) fn latest(&self) -> Option<IdleTimeout> {
        self.pending.last().map(|(_, _, token)| *token)
    }

    /// Expire the most recently armed timer, returning its token.
    pub(crate) fn fire(&mut self) -> Option<IdleTimeout> {
        self.pending.pop().map(|(_, _, token)| token)
    }
}

impl Timer for ManualTimer {
    fn schedule(&mut self, delay: Duration, token: IdleTimeout) -> TimerHandle {
        self.next_handle += 1;
        let handle = TimerHandle::new(self.next_handle);
        self.pending.push((handle, delay, token));
        handle
    }

    fn cancel(&mut self, handle: TimerHandle) {
        self.pending.retain(|(pending, _, _)| *pending != handle);
        self.cancelled.push(handle);
    }
}

/// Handler collecting every notification.
#[derive(Debug, Default)]
pub(crate) struct RecordingHandler {
    pub(crate) completions: Vec<SendCompletion<Address>>,
    pub(crate) messages: Vec<ReassembledMessage<Address>>,
    pub(crate) too_large: Vec<(Address, MessageId)>,
}

impl MessageHandler<Address> for RecordingHandler {
    fn on_send_complete(&mut self, completion: SendCompletion<Address>) {
        self.completions.push(completion);
    }

    fn on_message_received(&mut self, message: ReassembledMessage<Address>) {
        self.messages.push(message);
    }

    fn on_payload_too_large(&mut self, source: &Address, message_id: MessageId) {
        self.too_large.push((*source, message_id));
    }
}

pub(crate) type TestEngine = SarEngine<RecordingTransport, ManualTimer, RecordingHandler>;

pub(crate) fn engine(config: &FragmentationConfig, max_payload: usize) -> TestEngine {
    SarEngine::new(
        config,
        RecordingTransport::new(max_payload),
        ManualTimer::default(),
        RecordingHandler::default(),
    )
}

/// Move every fragment `sender` has sent into `receiver`, then confirm them
/// to `sender`, until no fragment is left in flight.
///
/// `sender` is known to `receiver` as `source`.
pub(crate) fn pump(sender: &mut TestEngine, receiver: &mut TestEngine, source: Address) {
    loop {
        let batch = sender.transport_mut().take_sent();
        if batch.is_empty() {
            return;
        }
        for fragment in &batch {
            receiver
                .on_fragment_received(fragment.inbound(source))
                .expect("fragment accepted");
        }
        for fragment in &batch {
            sender.on_fragment_delivered(fragment.delivered());
        }
    }
}

pub(crate) fn payload(len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| u8::try_from(i % 251).expect("remainder fits in u8"))
        .collect()
}
