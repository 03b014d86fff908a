#![doc(html_root_url = "https://docs.rs/sarframe/latest")]
//! Public API for the `sarframe` library.
//!
//! This crate splits messages larger than a transport's packet payload into
//! windows of fragments, and reassembles inbound fragment streams back into
//! whole messages, on top of any point-to-point transport that reports
//! per-fragment delivery.

pub mod driver;
pub mod fragment;
pub mod message;
pub mod metrics;

pub use fragment::{
    Acknowledgment,
    DeliveryReport,
    FragmentEnvelope,
    FragmentHeader,
    FragmentIndex,
    FragmentationConfig,
    FragmentationError,
    Fragmenter,
    InboundFragment,
    MessageHandler,
    MessageId,
    ReassembledMessage,
    Reassembler,
    ReassemblyError,
    SarEngine,
    SendCompletion,
    Timer,
    Transport,
    TransportError,
    WindowSize,
};
pub use message::Message;
pub use metrics::DropReason;
