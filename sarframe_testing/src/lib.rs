//! Utilities for exercising a [`SarEngine`](sarframe::SarEngine) in tests
//! without a real network.
//!
//! Two engines wired to [`LoopbackTransport`]s can be driven against each
//! other with [`pump`], which moves fragments and delivery reports between
//! them until the link is quiet. Fragments pass through the wire codec on the
//! way, so every exchange also covers encoding and decoding.
//!
//! ```rust
//! use sarframe::FragmentationConfig;
//! use sarframe_testing::{TestEnvelope, loopback_engine, pump};
//!
//! let config = FragmentationConfig::default();
//! let mut alice = loopback_engine(1, &config, 64);
//! let mut bob = loopback_engine(2, &config, 64);
//! alice
//!     .begin_send(2, TestEnvelope::default(), &[7; 130])
//!     .expect("send starts");
//! assert!(pump(&mut alice, &mut bob).is_empty());
//! assert_eq!(bob.handler().messages.len(), 1);
//! ```

pub mod handler;
pub mod logging;
pub mod loopback;
pub mod metrics;
pub mod timer;

pub use handler::RecordingHandler;
pub use logging::{LoggerHandle, logger};
pub use loopback::{
    LoopbackEngine,
    LoopbackTransport,
    NodeAddress,
    TestEnvelope,
    loopback_engine,
    pump,
    pump_with,
};
pub use metrics::{MetricSample, counter_value, debugging_recorder, snapshot};
pub use timer::ManualTimer;
