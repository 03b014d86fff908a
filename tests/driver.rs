//! Two engines hosted on tokio tasks, linked by hand.

use std::time::Duration;

use bytes::Bytes;
use sarframe::{
    FragmentationConfig,
    SarEngine,
    WindowSize,
    driver::{DelayQueueTimer, EngineHandle, spawn},
};
use sarframe_testing::{LoopbackTransport, NodeAddress, RecordingHandler, TestEnvelope};

type Handle = EngineHandle<LoopbackTransport, RecordingHandler<NodeAddress>>;

fn start(local: NodeAddress, config: &FragmentationConfig) -> Handle {
    let engine = SarEngine::new(
        config,
        LoopbackTransport::new(local, 32),
        DelayQueueTimer::new(),
        RecordingHandler::default(),
    );
    spawn(engine, 64)
}

#[tokio::test(start_paused = true)]
async fn message_crosses_between_driven_engines() {
    let config =
        FragmentationConfig::default().with_window_size(WindowSize::new(8).expect("valid window"));
    let bytes: Vec<u8> = (0..=255).collect();

    let alice = start(1, &config);
    let id = alice
        .send(2, TestEnvelope::default(), Bytes::from(bytes.clone()))
        .await
        .expect("engine running")
        .expect("send starts");
    let mut alice_engine = alice.shutdown().await.expect("alice stops");
    let fragments = alice_engine.transport_mut().take_fragments();
    let reports = alice_engine.transport_mut().take_reports();
    assert_eq!(fragments.len(), 8, "one full window in flight");

    let bob = start(2, &config);
    for fragment in fragments {
        bob.receive(fragment).await.expect("bob running");
    }
    tokio::time::sleep(Duration::from_secs(1)).await;
    let bob_engine = bob.shutdown().await.expect("bob stops");

    let message = bob_engine.handler().messages.first().expect("delivered");
    assert_eq!(message.message_id(), id);
    assert_eq!(message.payload(), &bytes[..]);
    assert_eq!(bob_engine.reassembler().acked_len(), 1);

    for report in reports {
        alice_engine.on_fragment_delivered(report);
    }
    assert!(
        alice_engine
            .handler()
            .completions
            .first()
            .is_some_and(sarframe::SendCompletion::is_success)
    );
}
