pub mod gateway;
pub mod handshake;

pub use gateway::*;
pub use handshake::*;
