//! Transport layer: serial channel abstraction and implementations.

pub mod mock;
pub mod serial;
pub mod traits;

pub use mock::MockChannel;
pub use serial::SerialTransport;
pub use traits::{SerialChannel, TransportError};
