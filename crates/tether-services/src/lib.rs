//! tether-services: the runtime half of Tether: transports, the sender
//! and receiver state machines, and the pieces they share.

pub mod ack;
pub mod hook;
pub mod memory;
pub mod paths;
pub mod reassembly;
pub mod receiver;
pub mod sender;
pub mod tcp;
pub mod transport;

pub use ack::{AckError, AckListener, AckWaiter, PendingAck};
pub use hook::{hook_from_argv, CommandHook, CompletionHook, LogHook};
pub use memory::MemoryBus;
pub use paths::{resolve_destination, write_file, PathError};
pub use reassembly::ReassemblyStore;
pub use receiver::Receiver;
pub use sender::{SendError, Sender, SenderSettings, TransferPlan, TransferReport};
pub use tcp::TcpTransport;
pub use transport::{MessageHandler, Transport, TransportError};
