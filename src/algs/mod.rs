//! Transport and wire encoding shared by the exchange protocols.

pub mod communicator;
pub mod wire;

pub use communicator::{CommTag, Communicator, NoComm, ThreadComm};
pub use wire::WireRegistry;
