//! Networking: wire protocol, the peer-transport seam and the in-memory hub

pub mod memory;
pub mod protocol;
pub mod transport;
