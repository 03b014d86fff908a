//! In-memory transport linking two engines.

use std::collections::VecDeque;

use bytes::Bytes;
use sarframe::{
    Acknowledgment,
    DeliveryReport,
    FragmentEnvelope,
    FragmentationConfig,
    InboundFragment,
    MessageHandler,
    MessageId,
    ReassemblyError,
    SarEngine,
    Transport,
    TransportError,
    fragment::{
        OutboundFragment,
        decode_acknowledgment,
        decode_fragment,
        encode_acknowledgment,
        encode_fragment,
    },
};

use crate::{ManualTimer, RecordingHandler};

/// Address of a node on the loopback link.
pub type NodeAddress = u16;

/// Envelope carried alongside every loopback fragment.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TestEnvelope {
    /// The "fragmented" option bit.
    pub fragmented: bool,
    /// Arbitrary caller data, carried through unchanged.
    pub hop_limit: u8,
}

impl FragmentEnvelope for TestEnvelope {
    fn set_fragmented(&mut self, fragmented: bool) { self.fragmented = fragmented; }

    fn is_fragmented(&self) -> bool { self.fragmented }
}

#[derive(Clone, Debug)]
struct Frame {
    destination: NodeAddress,
    envelope: TestEnvelope,
    message_id: MessageId,
    encoded: Bytes,
}

/// Transport that queues encoded fragments for a peer instead of sending
/// them, and reports every accepted fragment as delivered.
#[derive(Debug)]
pub struct LoopbackTransport {
    local: NodeAddress,
    max_payload: usize,
    frames: VecDeque<Frame>,
    reports: VecDeque<DeliveryReport>,
    acks: Vec<(NodeAddress, Bytes)>,
    rejection: Option<TransportError>,
    sent_total: usize,
}

impl LoopbackTransport {
    /// Create a transport for node `local` carrying at most `max_payload`
    /// bytes per fragment.
    #[must_use]
    pub fn new(local: NodeAddress, max_payload: usize) -> Self {
        Self {
            local,
            max_payload,
            frames: VecDeque::new(),
            reports: VecDeque::new(),
            acks: Vec::new(),
            rejection: None,
            sent_total: 0,
        }
    }

    /// Address of this node.
    #[must_use]
    pub fn local(&self) -> NodeAddress { self.local }

    /// Change the per-fragment payload budget.
    pub fn set_max_payload(&mut self, max_payload: usize) { self.max_payload = max_payload; }

    /// Reject every subsequent fragment with `error`, or accept them again
    /// when `None`.
    pub fn reject_with(&mut self, error: Option<TransportError>) { self.rejection = error; }

    /// Number of fragments accepted since construction.
    #[must_use]
    pub fn sent_total(&self) -> usize { self.sent_total }

    /// Decode and remove every queued fragment, as seen by its destination.
    ///
    /// # Panics
    ///
    /// Panics if a queued frame fails to decode, which would indicate a codec
    /// bug.
    pub fn take_fragments(&mut self) -> Vec<InboundFragment<NodeAddress, TestEnvelope>> {
        let local = self.local;
        self.frames
            .drain(..)
            .map(|frame| {
                let (header, payload) =
                    decode_fragment(frame.encoded).expect("loopback frame decodes");
                debug_assert_ne!(frame.destination, local, "loopback to self");
                InboundFragment {
                    source: local,
                    envelope: frame.envelope,
                    message_id: frame.message_id,
                    header,
                    payload,
                }
            })
            .collect()
    }

    /// Remove every pending delivery report.
    pub fn take_reports(&mut self) -> Vec<DeliveryReport> { self.reports.drain(..).collect() }

    /// Decode every acknowledgment sent so far, with its destination.
    ///
    /// # Panics
    ///
    /// Panics if a recorded acknowledgment fails to decode.
    #[must_use]
    pub fn acks(&self) -> Vec<(NodeAddress, Acknowledgment)> {
        self.acks
            .iter()
            .map(|(to, bytes)| (*to, decode_acknowledgment(bytes).expect("ack decodes")))
            .collect()
    }
}

impl Transport for LoopbackTransport {
    type Address = NodeAddress;
    type Envelope = TestEnvelope;

    fn max_payload_size(&self, _destination: &NodeAddress, _envelope: &TestEnvelope) -> usize {
        self.max_payload
    }

    fn send_fragment(
        &mut self,
        destination: &NodeAddress,
        envelope: &TestEnvelope,
        fragment: OutboundFragment<'_>,
    ) -> Result<(), TransportError> {
        if let Some(error) = &self.rejection {
            return Err(error.clone());
        }
        self.frames.push_back(Frame {
            destination: *destination,
            envelope: envelope.clone(),
            message_id: fragment.message_id(),
            encoded: encode_fragment(fragment.header(), fragment.payload()),
        });
        self.reports.push_back(DeliveryReport::delivered(
            fragment.message_id(),
            fragment.header().fragment_index(),
        ));
        self.sent_total += 1;
        Ok(())
    }

    fn send_acknowledgment(
        &mut self,
        source: &NodeAddress,
        _envelope: &TestEnvelope,
        ack: Acknowledgment,
    ) -> Result<(), TransportError> {
        self.acks.push((*source, encode_acknowledgment(&ack)));
        Ok(())
    }
}

/// Engine wired to a [`LoopbackTransport`] and a [`ManualTimer`].
pub type LoopbackEngine<H> = SarEngine<LoopbackTransport, ManualTimer, H>;

/// Build an engine for node `local` that records every notification.
#[must_use]
pub fn loopback_engine(
    local: NodeAddress,
    config: &FragmentationConfig,
    max_payload: usize,
) -> LoopbackEngine<RecordingHandler<NodeAddress>> {
    SarEngine::new(
        config,
        LoopbackTransport::new(local, max_payload),
        ManualTimer::default(),
        RecordingHandler::default(),
    )
}

/// Drive traffic from `sender` to `receiver` until the link is quiet,
/// returning every error the receiver raised.
pub fn pump<H1, H2>(
    sender: &mut LoopbackEngine<H1>,
    receiver: &mut LoopbackEngine<H2>,
) -> Vec<ReassemblyError>
where
    H1: MessageHandler<NodeAddress>,
    H2: MessageHandler<NodeAddress>,
{
    pump_with(sender, receiver, |_| {})
}

/// Like [`pump`], but lets `reorder` permute (or drop from) each batch of
/// fragments before the receiver sees it.
///
/// A batch holds the fragments sent since the previous batch, which is one
/// window per in-flight message.
pub fn pump_with<H1, H2, F>(
    sender: &mut LoopbackEngine<H1>,
    receiver: &mut LoopbackEngine<H2>,
    mut reorder: F,
) -> Vec<ReassemblyError>
where
    H1: MessageHandler<NodeAddress>,
    H2: MessageHandler<NodeAddress>,
    F: FnMut(&mut Vec<InboundFragment<NodeAddress, TestEnvelope>>),
{
    let mut errors = Vec::new();
    loop {
        let mut batch = sender.transport_mut().take_fragments();
        let reports = sender.transport_mut().take_reports();
        if batch.is_empty() && reports.is_empty() {
            return errors;
        }
        reorder(&mut batch);
        for fragment in batch {
            if let Err(err) = receiver.on_fragment_received(fragment) {
                errors.push(err);
            }
        }
        for report in reports {
            sender.on_fragment_delivered(report);
        }
    }
}
