//! Tests for the engine facade and its handler notifications.

use std::{num::NonZeroUsize, time::Duration};

use bincode::{BorrowDecode, Encode};
use rstest::rstest;

use crate::fragment::{
    ConfigError,
    FragmentHeader,
    FragmentIndex,
    FragmentationConfig,
    FragmentationError,
    InboundFragment,
    MessageHandler,
    MessageId,
    ReassembledMessage,
    ReassemblyError,
    SarEngine,
    SendCompletion,
    TransportError,
    WindowSize,
    test_helpers::{
        ManualTimer,
        RecordingHandler,
        RecordingTransport,
        TestEnvelope,
        TestEngine,
        engine,
        payload,
        pump,
    },
};

#[derive(Debug, PartialEq, Encode, BorrowDecode)]
struct Telemetry {
    node: u16,
    readings: Vec<u32>,
    label: String,
}

fn config(window: u8) -> FragmentationConfig {
    FragmentationConfig::default().with_window_size(WindowSize::new(window).expect("valid window"))
}

fn pair(window: u8, max_payload: usize) -> (TestEngine, TestEngine) {
    let config = config(window);
    (engine(&config, max_payload), engine(&config, max_payload))
}

#[rstest]
#[case(1, 64, 130)]
#[case(4, 64, 130)]
#[case(3, 7, 500)]
#[case(8, 1, 255)]
#[case(2, 16, 0)]
fn message_survives_the_round_trip(
    #[case] window: u8,
    #[case] max_payload: usize,
    #[case] length: usize,
) {
    let (mut alice, mut bob) = pair(window, max_payload);
    let bytes = payload(length);
    let id = alice
        .begin_send(2, TestEnvelope::default(), &bytes)
        .expect("send starts");

    pump(&mut alice, &mut bob, 1);

    let [completion] = alice.handler().completions.as_slice() else {
        panic!("exactly one completion expected");
    };
    assert!(completion.is_success());
    assert_eq!(completion.message_id(), id);

    let [message] = bob.handler().messages.as_slice() else {
        panic!("exactly one delivery expected");
    };
    assert_eq!(message.source(), &1);
    assert_eq!(message.message_id(), id);
    assert_eq!(message.payload(), &bytes[..]);
}

#[test]
fn typed_messages_are_encoded_and_decoded() {
    let (mut alice, mut bob) = pair(2, 5);
    let telemetry = Telemetry {
        node: 17,
        readings: vec![3, 1, 4, 1, 5, 9, 2, 6],
        label: "boiler room".to_owned(),
    };
    alice
        .send_message(2, TestEnvelope::default(), &telemetry)
        .expect("send starts");
    pump(&mut alice, &mut bob, 1);

    let message = bob.handler().messages.first().expect("delivered");
    assert_eq!(message.decode::<Telemetry>().expect("decodes"), telemetry);
}

#[test]
fn interleaved_sends_complete_independently() {
    let (mut alice, mut bob) = pair(1, 4);
    let first = payload(12);
    let second = payload(5);
    let first_id = alice
        .begin_send(2, TestEnvelope::default(), &first)
        .expect("first send");
    let second_id = alice
        .begin_send(2, TestEnvelope::default(), &second)
        .expect("second send");
    assert_eq!(alice.fragmenter().outstanding_len(), 2);

    pump(&mut alice, &mut bob, 1);

    let delivered: Vec<_> = bob
        .handler()
        .messages
        .iter()
        .map(|m| (m.message_id(), m.payload().to_vec()))
        .collect();
    assert_eq!(delivered, vec![(second_id, second), (first_id, first)]);
    assert_eq!(alice.handler().completions.len(), 2);
}

#[test]
fn synchronous_failure_notifies_handler_and_caller() {
    let mut alice = SarEngine::new(
        &config(4),
        RecordingTransport::rejecting_after(8, 0),
        ManualTimer::default(),
        RecordingHandler::default(),
    );
    let err = alice
        .begin_send(2, TestEnvelope::default(), &payload(20))
        .expect_err("transport rejects");

    assert!(matches!(err, FragmentationError::Transport(TransportError::Busy)));
    assert_eq!(alice.handler().completions.len(), 1);
    assert_eq!(alice.fragmenter().outstanding_len(), 0);
}

#[test]
fn precondition_failures_do_not_notify_handler() {
    let mut alice = engine(&config(1), 8);
    let err = alice
        .begin_send(2, TestEnvelope::default(), &payload(4096))
        .expect_err("too long");
    assert!(matches!(err, FragmentationError::MessageTooLong { .. }));
    assert!(alice.handler().completions.is_empty());
}

#[test]
fn oversized_message_is_reported_to_handler() {
    let sender_config = config(1).with_buffer_capacity(NonZeroUsize::new(512).expect("non-zero"));
    let receiver_config = config(1).with_buffer_capacity(NonZeroUsize::new(64).expect("non-zero"));
    let mut alice = engine(&sender_config, 32);
    let mut bob = engine(&receiver_config, 32);
    let id = alice
        .begin_send(2, TestEnvelope::default(), &payload(100))
        .expect("send starts");

    let mut errors = Vec::new();
    loop {
        let batch = alice.transport_mut().take_sent();
        if batch.is_empty() {
            break;
        }
        for fragment in &batch {
            if let Err(err) = bob.on_fragment_received(fragment.inbound(1)) {
                errors.push(err);
            }
            alice.on_fragment_delivered(fragment.delivered());
        }
    }

    assert!(matches!(
        errors.as_slice(),
        [ReassemblyError::PayloadTooLarge { message_id, .. }] if *message_id == id
    ));
    assert_eq!(bob.handler().too_large, vec![(1, id)]);
    assert!(bob.handler().messages.is_empty());
    assert!(
        alice.handler().completions.iter().all(|c| c.is_success()),
        "sender still sees every fragment delivered"
    );
}

#[test]
fn idle_timeout_and_release_go_through_the_engine() {
    let mut bob = engine(&config(1), 64);
    let mut alice = engine(&config(1), 4);
    alice
        .begin_send(2, TestEnvelope::default(), &payload(12))
        .expect("send starts");
    let first = alice.transport_mut().take_sent();
    for fragment in &first {
        bob.on_fragment_received(fragment.inbound(1))
            .expect("accepted");
    }

    let token = bob.timer_mut().fire().expect("stall timer armed");
    assert!(bob.on_idle_timeout(token));
    assert!(!bob.on_idle_timeout(token));
    assert_eq!(bob.reassembler().active_len(), 0);

    for fragment in &first {
        bob.on_fragment_received(fragment.inbound(1))
            .expect("accepted");
    }
    assert!(bob.release(&1, MessageId::new(0)));
    bob.clear_reassemblies();
    let (transport, timer, handler) = bob.into_parts();
    assert_eq!(transport.acks.len(), 2);
    assert!(timer.pending.is_empty());
    assert!(handler.messages.is_empty());
}

#[test]
fn try_new_rejects_a_zero_reassembly_timeout() {
    let config = config(2).with_reassembly_timeout(Duration::ZERO);
    let result = SarEngine::try_new(
        &config,
        RecordingTransport::new(8),
        ManualTimer::default(),
        RecordingHandler::default(),
    );
    assert!(matches!(result, Err(ConfigError::ZeroReassemblyTimeout)));

    let engine = SarEngine::try_new(
        &config.with_reassembly_timeout(Duration::from_millis(250)),
        RecordingTransport::new(8),
        ManualTimer::default(),
        RecordingHandler::default(),
    )
    .expect("valid config");
    assert_eq!(engine.reassembler().active_len(), 0);
}

/// Handler relying on the default oversized-message notification.
#[derive(Debug, Default)]
struct DeliveriesOnly {
    delivered: usize,
}

impl MessageHandler<u8> for DeliveriesOnly {
    fn on_send_complete(&mut self, _completion: SendCompletion<u8>) {}

    fn on_message_received(&mut self, _message: ReassembledMessage<u8>) { self.delivered += 1; }
}

#[test]
fn default_oversize_notification_is_a_no_op() {
    let small = config(1).with_buffer_capacity(NonZeroUsize::new(4).expect("non-zero"));
    let mut bob = SarEngine::new(
        &small,
        RecordingTransport::new(8),
        ManualTimer::default(),
        DeliveriesOnly::default(),
    );
    let fragment = InboundFragment {
        source: 1,
        envelope: TestEnvelope::default(),
        message_id: MessageId::new(0),
        header: FragmentHeader::new(1, FragmentIndex::zero()),
        payload: bytes::Bytes::from_static(&[0; 8]),
    };

    let err = bob.on_fragment_received(fragment).expect_err("does not fit");
    assert!(matches!(err, ReassemblyError::PayloadTooLarge { capacity: 4, .. }));
    assert_eq!(bob.handler().delivered, 0);
}
