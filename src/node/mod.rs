pub mod channel;
pub mod instance;
pub mod pool;
pub mod reconnect;

pub use channel::*;
pub use instance::*;
pub use pool::*;
pub use reconnect::*;
