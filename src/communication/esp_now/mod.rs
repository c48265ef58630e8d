//! ESP-NOW 実装 (`esp` フィーチャー時のみ)
pub mod link;
pub mod network_manager;

pub use link::EspNowLink;
pub use network_manager::NetworkManager;
