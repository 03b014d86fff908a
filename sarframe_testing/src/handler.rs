//! Handler recording every engine notification.

use sarframe::{MessageHandler, MessageId, ReassembledMessage, SendCompletion};

/// [`MessageHandler`] that keeps every notification for later assertions.
#[derive(Debug)]
pub struct RecordingHandler<A> {
    /// Finished sends, in completion order.
    pub completions: Vec<SendCompletion<A>>,
    /// Delivered messages, in delivery order.
    pub messages: Vec<ReassembledMessage<A>>,
    /// Messages discarded for exceeding the reassembly buffer.
    pub too_large: Vec<(A, MessageId)>,
}

impl<A> Default for RecordingHandler<A> {
    fn default() -> Self {
        Self {
            completions: Vec::new(),
            messages: Vec::new(),
            too_large: Vec::new(),
        }
    }
}

impl<A: Clone> MessageHandler<A> for RecordingHandler<A> {
    fn on_send_complete(&mut self, completion: SendCompletion<A>) {
        self.completions.push(completion);
    }

    fn on_message_received(&mut self, message: ReassembledMessage<A>) {
        self.messages.push(message);
    }

    fn on_payload_too_large(&mut self, source: &A, message_id: MessageId) {
        self.too_large.push((source.clone(), message_id));
    }
}
