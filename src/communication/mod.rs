/// 通信モジュール
pub mod command;
pub mod transport;

#[cfg(feature = "esp")]
pub mod esp_now;

#[cfg(not(feature = "esp"))]
pub mod mock;

pub use command::{CommandChannel, PowerCommand, RetryPolicy};
pub use transport::{Datagram, MessageTransport, SendStatus, TransportError};
