//! UDP datagram transport with a multiplexed wait over socket data and wake signals.

mod buffer;
mod error;
mod socket;
mod transport;
mod waker;

pub use buffer::PacketBuffer;
pub use error::{Result, TransportError};
pub use socket::{SocketBinding, parse_host_port, resolve};
pub use transport::{DatagramTransport, TransportConfig, WakeReason};
pub use waker::Waker;
