//! Segmentation and reassembly of messages larger than one transport packet.
//!
//! This module collects the engine's domain types. Each sub-module focuses on
//! a single concept: identifiers and headers, window and slot bookkeeping,
//! the transport and timer contracts, the two halves of the engine, and the
//! [`SarEngine`] that ties them together.

pub mod config;
pub mod engine;
pub mod error;
pub mod fragmenter;
pub mod header;
pub mod id;
pub mod index;
mod pool;
pub mod reassembler;
pub mod timer;
pub mod transport;
pub mod window;
pub mod wire;

pub use config::FragmentationConfig;
pub use engine::{MessageHandler, SarEngine};
pub use error::{ConfigError, FragmentationError, ReassemblyError, ViolationKind};
pub use fragmenter::{Fragmenter, SendCompletion, SendProgress, SendStarted};
pub use header::FragmentHeader;
pub use id::MessageId;
pub use index::{FragmentIndex, MAX_FRAGMENTS};
pub use reassembler::{ReassembledMessage, Reassembler, ReassemblyStatus, Received};
pub use timer::{IdleTimeout, Timer, TimerHandle};
pub use transport::{
    Acknowledgment,
    DeliveryReport,
    FragmentEnvelope,
    InboundFragment,
    OutboundFragment,
    Transport,
    TransportError,
};
pub use window::{WindowMask, WindowSize};
pub use wire::{WireError, decode_acknowledgment, decode_fragment, encode_acknowledgment, encode_fragment};

#[cfg(test)]
pub(crate) mod test_helpers;
