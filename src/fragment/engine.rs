//! Single entry point tying both halves of the engine to their collaborators.
//!
//! [`SarEngine`] owns a [`Fragmenter`], a [`Reassembler`], the transport, the
//! timer service, and a [`MessageHandler`] receiving upward notifications. Its
//! four entry points (`begin_send`, `on_fragment_delivered`,
//! `on_fragment_received`, `on_idle_timeout`) are synchronous and never block.
//! The engine has no internal synchronisation: a multi-threaded host must
//! serialise calls, for example by running it on one task as
//! [`driver::run`](crate::driver::run) does.

use super::{
    ConfigError,
    DeliveryReport,
    FragmentationConfig,
    FragmentationError,
    Fragmenter,
    IdleTimeout,
    InboundFragment,
    MessageId,
    ReassembledMessage,
    Reassembler,
    ReassemblyError,
    Received,
    SendCompletion,
    SendProgress,
    Timer,
    Transport,
};
use crate::message::Message;

/// Receiver of the engine's upward notifications.
pub trait MessageHandler<A> {
    /// A send finished; called exactly once per started send.
    fn on_send_complete(&mut self, completion: SendCompletion<A>);

    /// A message was fully reassembled; called at most once per message.
    fn on_message_received(&mut self, message: ReassembledMessage<A>);

    /// Every fragment of a message arrived but it did not fit the reassembly
    /// buffer.
    fn on_payload_too_large(&mut self, _source: &A, _message_id: MessageId) {}
}

/// Segmentation and reassembly engine bound to its collaborators.
#[derive(Debug)]
pub struct SarEngine<T: Transport, M, H> {
    fragmenter: Fragmenter<T::Address, T::Envelope>,
    reassembler: Reassembler<T::Address>,
    transport: T,
    timer: M,
    handler: H,
}

impl<T, M, H> SarEngine<T, M, H>
where
    T: Transport,
    M: Timer,
    H: MessageHandler<T::Address>,
{
    /// Build an engine sized by `config`.
    ///
    /// `config` is taken as given; run [`FragmentationConfig::validate`]
    /// first, or use [`SarEngine::try_new`], when it comes from outside the
    /// program. A zero reassembly timeout abandons every reassembly as soon
    /// as its timer is polled.
    #[must_use]
    pub fn new(config: &FragmentationConfig, transport: T, timer: M, handler: H) -> Self {
        Self {
            fragmenter: Fragmenter::new(config),
            reassembler: Reassembler::new(config),
            transport,
            timer,
            handler,
        }
    }

    /// Validate `config`, then build an engine sized by it.
    ///
    /// # Errors
    ///
    /// Returns the [`ConfigError`] raised by [`FragmentationConfig::validate`].
    pub fn try_new(
        config: &FragmentationConfig,
        transport: T,
        timer: M,
        handler: H,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::new(config, transport, timer, handler))
    }

    /// Start a fragmented send of `payload` to `destination`.
    ///
    /// The handler's [`MessageHandler::on_send_complete`] fires exactly once
    /// for every send this method starts, including a send whose first window
    /// already fails.
    ///
    /// # Errors
    ///
    /// Returns the precondition failures of [`Fragmenter::begin_send`], for
    /// which no send is started and the handler is not called. Returns
    /// [`FragmentationError::Transport`] when the transport rejected a
    /// fragment of the first window; the send was aborted and the handler has
    /// already been notified.
    pub fn begin_send(
        &mut self,
        destination: T::Address,
        envelope: T::Envelope,
        payload: &[u8],
    ) -> Result<MessageId, FragmentationError> {
        let started =
            self.fragmenter
                .begin_send(&mut self.transport, destination, envelope, payload)?;
        let SendProgress::Complete(completion) = started.progress else {
            return Ok(started.message_id);
        };

        let failure = completion.status().clone().err();
        self.handler.on_send_complete(completion);
        match failure {
            Some(err) => Err(FragmentationError::Transport(err)),
            None => Ok(started.message_id),
        }
    }

    /// Serialise `message` with bincode and start a fragmented send.
    ///
    /// # Errors
    ///
    /// Returns [`FragmentationError::Encode`] when serialisation fails, and
    /// otherwise the errors of [`SarEngine::begin_send`].
    pub fn send_message<Msg: Message>(
        &mut self,
        destination: T::Address,
        envelope: T::Envelope,
        message: &Msg,
    ) -> Result<MessageId, FragmentationError> {
        let bytes = message.to_bytes()?;
        self.begin_send(destination, envelope, &bytes)
    }

    /// Apply a transport delivery report for an outbound fragment.
    pub fn on_fragment_delivered(&mut self, report: DeliveryReport) {
        if let Some(completion) = self
            .fragmenter
            .on_fragment_delivered(&mut self.transport, report)
        {
            self.handler.on_send_complete(completion);
        }
    }

    /// Feed one inbound fragment to the reassembler.
    ///
    /// # Errors
    ///
    /// Returns the [`ReassemblyError`] raised for the fragment. A
    /// [`ReassemblyError::PayloadTooLarge`] is also reported to
    /// [`MessageHandler::on_payload_too_large`].
    pub fn on_fragment_received(
        &mut self,
        fragment: InboundFragment<T::Address, T::Envelope>,
    ) -> Result<(), ReassemblyError> {
        let source = fragment.source.clone();
        match self
            .reassembler
            .on_fragment_received(&mut self.transport, &mut self.timer, fragment)
        {
            Ok(Received::Consumed) => Ok(()),
            Ok(Received::Reassembled(message)) => {
                self.handler.on_message_received(message);
                Ok(())
            }
            Err(err @ ReassemblyError::PayloadTooLarge { message_id, .. }) => {
                self.handler.on_payload_too_large(&source, message_id);
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Handle a fired stall timer. Returns whether a reassembly was freed.
    pub fn on_idle_timeout(&mut self, token: IdleTimeout) -> bool {
        self.reassembler.on_idle_timeout(token).is_some()
    }

    /// Explicitly free the reassembly of `(source, message_id)`.
    pub fn release(&mut self, source: &T::Address, message_id: MessageId) -> bool {
        self.reassembler
            .release(&mut self.timer, source, message_id)
    }

    /// Free every reassembly slot.
    pub fn clear_reassemblies(&mut self) { self.reassembler.clear(&mut self.timer); }

    /// Outbound half.
    #[must_use]
    pub const fn fragmenter(&self) -> &Fragmenter<T::Address, T::Envelope> { &self.fragmenter }

    /// Inbound half.
    #[must_use]
    pub const fn reassembler(&self) -> &Reassembler<T::Address> { &self.reassembler }

    /// Borrow the transport.
    #[must_use]
    pub const fn transport(&self) -> &T { &self.transport }

    /// Mutably borrow the transport.
    pub const fn transport_mut(&mut self) -> &mut T { &mut self.transport }

    /// Borrow the timer service.
    #[must_use]
    pub const fn timer(&self) -> &M { &self.timer }

    /// Mutably borrow the timer service.
    pub const fn timer_mut(&mut self) -> &mut M { &mut self.timer }

    /// Borrow the handler.
    #[must_use]
    pub const fn handler(&self) -> &H { &self.handler }

    /// Mutably borrow the handler.
    pub const fn handler_mut(&mut self) -> &mut H { &mut self.handler }

    /// Consume the engine, returning its collaborators.
    pub fn into_parts(self) -> (T, M, H) { (self.transport, self.timer, self.handler) }
}
