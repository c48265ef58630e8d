/*!
 * # Tank Monitor Control & Imaging Library
 *
 * 水槽モニタリング装置の 2 ノード構成 (コントローラ / カメラ) のためのライブラリ
 *
 * ## モジュール構成
 * - `core`: デバイス契約、レジストリ、状態レポート、設定、時計
 * - `communication`: ESP-NOW トランスポートとカメラ制御コマンド
 * - `controller`: コントローラノードから見たリモートカメラ
 * - `hardware`: カメラのキャプチャエンジンとフレームストリーミング
 */

// 公開モジュール
pub mod communication;
pub mod controller;
pub mod core;
pub mod hardware;
pub mod mac_address;

// 内部で使用する型をまとめてエクスポート
pub use communication::{CommandChannel, MessageTransport, PowerCommand, RetryPolicy};
pub use controller::RemoteCamera;
pub use core::{AppConfig, ConfigError, DesiredDeviceState, Device, DeviceError, DeviceRegistry, DeviceReport};
pub use hardware::camera::{CameraDevice, CameraOptions, Resolution};
pub use mac_address::MacAddress;

/// ライブラリのバージョン情報
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
