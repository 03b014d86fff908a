//! Tests for outbound splitting, windowing, and completion.

use std::num::NonZeroUsize;

use rstest::rstest;

use crate::fragment::{
    DeliveryReport,
    FragmentIndex,
    FragmentationConfig,
    FragmentationError,
    Fragmenter,
    MessageId,
    SendCompletion,
    SendProgress,
    TransportError,
    WindowSize,
    test_helpers::{Address, RecordingTransport, TestEnvelope, payload},
};

type TestFragmenter = Fragmenter<Address, TestEnvelope>;

fn config(window: u8) -> FragmentationConfig {
    FragmentationConfig::default().with_window_size(WindowSize::new(window).expect("valid window"))
}

fn delivered(id: MessageId, index: u8) -> DeliveryReport {
    DeliveryReport::delivered(id, FragmentIndex::new(index))
}

fn start(
    fragmenter: &mut TestFragmenter,
    transport: &mut RecordingTransport,
    bytes: &[u8],
) -> MessageId {
    let started = fragmenter
        .begin_send(transport, 7, TestEnvelope::default(), bytes)
        .expect("send starts");
    assert_eq!(started.progress, SendProgress::InFlight);
    started.message_id
}

#[test]
fn stop_and_wait_send_confirms_each_fragment_before_the_next() {
    let mut fragmenter = TestFragmenter::new(&config(1));
    let mut transport = RecordingTransport::new(64);
    let bytes = payload(130);

    let id = start(&mut fragmenter, &mut transport, &bytes);
    assert_eq!(transport.sent_indices(), vec![0]);
    assert_eq!(fragmenter.outstanding_len(), 1);

    assert!(fragmenter.on_fragment_delivered(&mut transport, delivered(id, 0)).is_none());
    assert_eq!(transport.sent_indices(), vec![0, 1]);
    assert!(fragmenter.on_fragment_delivered(&mut transport, delivered(id, 1)).is_none());
    assert_eq!(transport.sent_indices(), vec![0, 1, 2]);

    let completion = fragmenter
        .on_fragment_delivered(&mut transport, delivered(id, 2))
        .expect("final confirmation completes the send");
    assert!(completion.is_success());
    assert_eq!(completion.message_id(), id);
    assert_eq!(completion.destination(), &7);
    assert_eq!(completion.payload(), &bytes[..]);
    assert_eq!(fragmenter.outstanding_len(), 0);

    let lengths: Vec<_> = transport.sent.iter().map(|f| f.payload.len()).collect();
    let offsets: Vec<_> = transport.sent.iter().map(|f| f.offset).collect();
    assert_eq!(lengths, vec![64, 64, 2]);
    assert_eq!(offsets, vec![0, 64, 128]);
    assert!(
        transport
            .sent
            .iter()
            .all(|f| f.header.fragment_count() == 3 && f.destination == 7)
    );
}

#[test]
fn wide_window_sends_every_fragment_at_once() {
    let mut fragmenter = TestFragmenter::new(&config(4));
    let mut transport = RecordingTransport::new(64);
    let id = start(&mut fragmenter, &mut transport, &payload(130));
    assert_eq!(transport.sent_indices(), vec![0, 1, 2]);

    assert!(fragmenter.on_fragment_delivered(&mut transport, delivered(id, 2)).is_none());
    assert!(fragmenter.on_fragment_delivered(&mut transport, delivered(id, 0)).is_none());
    let completion = fragmenter
        .on_fragment_delivered(&mut transport, delivered(id, 1))
        .expect("window drained");
    assert!(completion.is_success());
    assert_eq!(transport.sent.len(), 3, "no fragment is sent twice");
}

#[test]
fn next_window_waits_for_every_confirmation() {
    let mut fragmenter = TestFragmenter::new(&config(2));
    let mut transport = RecordingTransport::new(4);
    let id = start(&mut fragmenter, &mut transport, &payload(18));
    assert_eq!(transport.sent_indices(), vec![0, 1]);

    assert!(fragmenter.on_fragment_delivered(&mut transport, delivered(id, 1)).is_none());
    assert_eq!(transport.sent_indices(), vec![0, 1], "window still has 0 in flight");

    assert!(fragmenter.on_fragment_delivered(&mut transport, delivered(id, 0)).is_none());
    assert_eq!(transport.sent_indices(), vec![0, 1, 2, 3]);

    assert!(fragmenter.on_fragment_delivered(&mut transport, delivered(id, 2)).is_none());
    assert!(fragmenter.on_fragment_delivered(&mut transport, delivered(id, 3)).is_none());
    assert_eq!(transport.sent_indices(), vec![0, 1, 2, 3, 4]);

    let last = transport.sent.last().expect("final fragment sent");
    assert_eq!(last.payload.len(), 2);
    assert!(last.header.is_last_fragment());
    let completion = fragmenter
        .on_fragment_delivered(&mut transport, delivered(id, 4))
        .expect("send completes");
    assert!(completion.is_success());
}

#[test]
fn duplicate_and_foreign_reports_are_ignored() {
    let mut fragmenter = TestFragmenter::new(&config(2));
    let mut transport = RecordingTransport::new(4);
    let id = start(&mut fragmenter, &mut transport, &payload(8));

    assert!(fragmenter.on_fragment_delivered(&mut transport, delivered(id, 0)).is_none());
    assert!(fragmenter.on_fragment_delivered(&mut transport, delivered(id, 0)).is_none());
    assert!(
        fragmenter
            .on_fragment_delivered(&mut transport, delivered(MessageId::new(99), 1))
            .is_none()
    );
    assert!(
        fragmenter
            .on_fragment_delivered(&mut transport, delivered(id, 5))
            .is_none(),
        "index outside the window"
    );
    assert!(fragmenter.on_fragment_delivered(&mut transport, delivered(id, 1)).is_some());
}

#[test]
fn empty_message_is_sent_as_one_empty_fragment() {
    let mut fragmenter = TestFragmenter::new(&config(1));
    let mut transport = RecordingTransport::new(64);
    let id = start(&mut fragmenter, &mut transport, &[]);

    let fragment = transport.sent.first().expect("one fragment").clone();
    assert!(fragment.payload.is_empty());
    assert_eq!(fragment.header.fragment_count(), 1);
    assert!(fragment.header.is_last_fragment());

    let completion = fragmenter
        .on_fragment_delivered(&mut transport, delivered(id, 0))
        .expect("completes");
    assert!(completion.payload().is_empty());
}

#[test]
fn envelope_is_flagged_as_fragmented() {
    let mut fragmenter = TestFragmenter::new(&config(4));
    let mut transport = RecordingTransport::new(16);
    let envelope = TestEnvelope {
        fragmented: false,
        priority: 3,
    };
    fragmenter
        .begin_send(&mut transport, 1, envelope, &payload(40))
        .expect("send starts");

    assert!(
        transport
            .sent
            .iter()
            .all(|f| f.envelope.fragmented && f.envelope.priority == 3)
    );
}

#[test]
fn message_ids_increase_per_send() {
    let mut fragmenter = TestFragmenter::with_starting_id(&config(1), MessageId::new(41));
    let mut transport = RecordingTransport::new(64);
    let first = start(&mut fragmenter, &mut transport, &payload(10));
    let second = start(&mut fragmenter, &mut transport, &payload(10));
    assert_eq!(first, MessageId::new(41));
    assert_eq!(second, MessageId::new(42));
}

#[test]
fn message_longer_than_buffer_is_rejected() {
    let config = config(1).with_buffer_capacity(NonZeroUsize::new(100).expect("non-zero"));
    let mut fragmenter = TestFragmenter::new(&config);
    let mut transport = RecordingTransport::new(64);

    let err = fragmenter
        .begin_send(&mut transport, 1, TestEnvelope::default(), &payload(101))
        .expect_err("too long for the buffer");
    assert!(matches!(
        err,
        FragmentationError::MessageTooLong {
            length: 101,
            limit: 100
        }
    ));
    assert_eq!(fragmenter.outstanding_len(), 0);
    assert!(transport.sent.is_empty());
}

#[rstest]
#[case(2040, true)]
#[case(2041, false)]
fn fragment_count_is_capped(#[case] length: usize, #[case] accepted: bool) {
    let config = config(8).with_buffer_capacity(NonZeroUsize::new(4096).expect("non-zero"));
    let mut fragmenter = TestFragmenter::new(&config);
    let mut transport = RecordingTransport::new(8);

    let result = fragmenter.begin_send(&mut transport, 1, TestEnvelope::default(), &payload(length));
    if accepted {
        let started = result.expect("255 fragments fit");
        assert_eq!(started.progress, SendProgress::InFlight);
        let header = transport.sent.first().expect("first window sent").header;
        assert_eq!(header.fragment_count(), 255);
    } else {
        assert!(matches!(
            result,
            Err(FragmentationError::MessageTooLong { limit: 2040, .. })
        ));
        assert_eq!(fragmenter.outstanding_len(), 0);
    }
}

#[test]
fn sends_beyond_the_pool_are_rejected() {
    let config = config(1).with_slots(
        NonZeroUsize::new(1).expect("non-zero"),
        NonZeroUsize::new(1).expect("non-zero"),
    );
    let mut fragmenter = TestFragmenter::new(&config);
    let mut transport = RecordingTransport::new(64);
    let id = start(&mut fragmenter, &mut transport, &payload(10));

    let err = fragmenter
        .begin_send(&mut transport, 2, TestEnvelope::default(), &payload(10))
        .expect_err("pool exhausted");
    assert!(matches!(err, FragmentationError::TooManyOutstandingSends { capacity: 1 }));

    fragmenter
        .on_fragment_delivered(&mut transport, delivered(id, 0))
        .expect("first send completes");
    start(&mut fragmenter, &mut transport, &payload(10));
}

#[test]
fn zero_payload_budget_is_rejected() {
    let mut fragmenter = TestFragmenter::new(&config(1));
    let mut transport = RecordingTransport::new(0);
    let err = fragmenter
        .begin_send(&mut transport, 1, TestEnvelope::default(), &payload(10))
        .expect_err("no budget");
    assert!(matches!(err, FragmentationError::NoPayloadBudget));
    assert_eq!(fragmenter.outstanding_len(), 0);
}

#[test]
fn synchronous_rejection_completes_the_send_immediately() {
    let mut fragmenter = TestFragmenter::new(&config(4));
    let mut transport = RecordingTransport::rejecting_after(16, 1);

    let started = fragmenter
        .begin_send(&mut transport, 3, TestEnvelope::default(), &payload(40))
        .expect("preconditions hold");
    let SendProgress::Complete(completion) = started.progress else {
        panic!("rejected first window should complete the send");
    };
    assert_eq!(completion.status(), &Err(TransportError::Busy));
    assert_eq!(completion.message_id(), started.message_id);
    assert_eq!(fragmenter.outstanding_len(), 0);

    assert!(
        fragmenter
            .on_fragment_delivered(&mut transport, delivered(started.message_id, 0))
            .is_none(),
        "late report for the accepted fragment is ignored"
    );
}

#[test]
fn first_delivery_failure_completes_once() {
    let mut fragmenter = TestFragmenter::new(&config(4));
    let mut transport = RecordingTransport::new(16);
    let id = start(&mut fragmenter, &mut transport, &payload(40));

    let failed = |index| DeliveryReport::failed(id, FragmentIndex::new(index), TransportError::DeliveryFailed);
    let completion: SendCompletion<Address> = fragmenter
        .on_fragment_delivered(&mut transport, failed(1))
        .expect("first failure completes");
    assert_eq!(completion.status(), &Err(TransportError::DeliveryFailed));

    assert!(fragmenter.on_fragment_delivered(&mut transport, failed(0)).is_none());
    assert!(fragmenter.on_fragment_delivered(&mut transport, delivered(id, 2)).is_none());
    assert_eq!(fragmenter.outstanding_len(), 0);
}

#[test]
fn failure_in_a_later_window_stops_sending() {
    let mut fragmenter = TestFragmenter::new(&config(1));
    let mut transport = RecordingTransport::rejecting_after(4, 2);
    let id = start(&mut fragmenter, &mut transport, &payload(12));

    assert!(fragmenter.on_fragment_delivered(&mut transport, delivered(id, 0)).is_none());
    let completion = fragmenter
        .on_fragment_delivered(&mut transport, delivered(id, 1))
        .expect("third fragment rejected synchronously");
    assert_eq!(completion.status(), &Err(TransportError::Busy));
    assert_eq!(transport.sent_indices(), vec![0, 1]);
}
