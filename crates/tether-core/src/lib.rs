//! tether-core: protocol types shared by every Tether crate: addressing,
//! transfer policy, chunk codec, frame wire format and configuration.

pub mod address;
pub mod codec;
pub mod config;
pub mod policy;
pub mod wire;

pub use address::{Inbound, Namespace};
pub use codec::{Chunk, Chunks};
pub use policy::{Policy, TransferPolicy, TransferUnit};
