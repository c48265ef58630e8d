use std::net::SocketAddrV4;

use crate::communication::command::RetryPolicy;
use crate::core::config_validation::{
    parse_capture_timing, parse_chunk_size, parse_default_fps, parse_max_frame_size,
    parse_max_retries, parse_peer_mac, parse_resolution, parse_retry_interval_ms,
    parse_stream_endpoint, parse_wifi_channel, ValidationError,
};
use crate::hardware::camera::{CaptureSettings, Resolution, TaskSettings};
use crate::mac_address::MacAddress;

/// アプリケーション設定
///
/// この構造体はビルド時に`cfg.toml`ファイルから読み込まれた設定を保持します。
/// コントローラノードとカメラノードは同じ設定ファイルを共有します。
#[toml_cfg::toml_config]
pub struct Config {
    #[default("11:22:33:44:55:66")]
    controller_mac: &'static str,

    #[default("11:22:33:44:55:66")]
    camera_mac: &'static str,

    #[default(1)]
    wifi_channel: u8,

    #[default("")]
    wifi_ssid: &'static str,

    #[default("")]
    wifi_password: &'static str,

    #[default(5)]
    max_retries: u8,

    #[default(250)]
    retry_interval_ms: u32,

    #[default(1000)]
    send_timeout_ms: u32,

    #[default(1024)]
    frame_chunk_size: u16,

    #[default(40960)] // 40 KiB
    max_frame_size: u32,

    #[default(5)]
    default_fps: u8,

    #[default(1000)]
    capture_timeout_ms: u32,

    #[default(5)]
    capture_poll_interval_ms: u32,

    #[default("192.168.4.2")]
    stream_host: &'static str,

    #[default(5000)]
    stream_port: u16,

    #[default("VGA")]
    resolution: &'static str,

    #[default(3)]
    camera_task_priority: u8,

    #[default(8192)]
    camera_task_stack_size: u32,
}

/// 設定エラー
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} が設定されていません (cfg.toml を確認してください)")]
    MissingPeerMac(&'static str),
    #[error("無効なMACアドレス ({0}): {1}")]
    InvalidPeerMac(&'static str, String),
    #[error("wifi_channel の値が無効です (1-13): {0}")]
    InvalidWifiChannel(u8),
    #[error("max_retries の値が無効です (1-10): {0}")]
    InvalidMaxRetries(u8),
    #[error("retry_interval_ms は 250ms 以上にしてください: {0}")]
    RetryIntervalTooShort(u32),
    #[error("frame_chunk_size の値が無効です: {0}")]
    InvalidChunkSize(u16),
    #[error("max_frame_size の値が無効です: {0}")]
    InvalidMaxFrameSize(u32),
    #[error("default_fps の値が無効です (1-30): {0}")]
    InvalidDefaultFps(i32),
    #[error("キャプチャのタイミング設定が無効です: timeout={timeout_ms}ms poll={poll_interval_ms}ms")]
    InvalidCaptureTiming { timeout_ms: u32, poll_interval_ms: u32 },
    #[error("stream_host が IPv4 アドレスではありません: {0}")]
    InvalidStreamHost(String),
    #[error("stream_port の値が無効です: {0}")]
    InvalidStreamPort(u16),
    #[error("未対応の解像度です: {0}")]
    UnknownResolution(String),
}

fn map_validation_error(err: ValidationError) -> ConfigError {
    match err {
        ValidationError::MissingPeerMac(field) => ConfigError::MissingPeerMac(field),
        ValidationError::InvalidPeerMac(field, value) => ConfigError::InvalidPeerMac(field, value),
        ValidationError::InvalidWifiChannel(v) => ConfigError::InvalidWifiChannel(v),
        ValidationError::InvalidMaxRetries(v) => ConfigError::InvalidMaxRetries(v),
        ValidationError::RetryIntervalTooShort(v) => ConfigError::RetryIntervalTooShort(v),
        ValidationError::InvalidChunkSize(v) => ConfigError::InvalidChunkSize(v),
        ValidationError::InvalidMaxFrameSize(v) => ConfigError::InvalidMaxFrameSize(v),
        ValidationError::InvalidDefaultFps(v) => ConfigError::InvalidDefaultFps(v),
        ValidationError::InvalidCaptureTiming {
            timeout_ms,
            poll_interval_ms,
        } => ConfigError::InvalidCaptureTiming {
            timeout_ms,
            poll_interval_ms,
        },
        ValidationError::InvalidStreamHost(v) => ConfigError::InvalidStreamHost(v),
        ValidationError::InvalidStreamPort(v) => ConfigError::InvalidStreamPort(v),
        ValidationError::UnknownResolution(v) => ConfigError::UnknownResolution(v),
    }
}

/// アプリケーション設定を表す構造体
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// コントローラノードのMACアドレス
    pub controller_mac: MacAddress,

    /// カメラノードのMACアドレス
    pub camera_mac: MacAddress,

    /// ESP-NOW チャンネル
    pub wifi_channel: u8,

    /// カメラノードが UDP 送信に使う WiFi SSID
    pub wifi_ssid: String,

    /// WiFi パスワード
    pub wifi_password: String,

    /// コマンド再送ポリシー
    pub retry_policy: RetryPolicy,

    /// 1 データグラムあたりのフレームチャンクサイズ
    pub frame_chunk_size: usize,

    /// 起動時の fps
    pub default_fps: u8,

    /// キャプチャエンジン設定
    pub capture: CaptureSettings,

    /// フレームの送信先
    pub stream_endpoint: SocketAddrV4,

    /// 解像度プリセット
    pub resolution: Resolution,

    /// キャプチャタスク設定
    pub task: TaskSettings,
}

impl AppConfig {
    /// 設定ファイルから設定をロードします
    pub fn load() -> Result<Self, ConfigError> {
        // toml_cfg によって生成された定数
        Self::from_config(&CONFIG)
    }

    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Self::validate(config).map_err(map_validation_error)
    }

    fn validate(config: &Config) -> Result<Self, ValidationError> {
        let controller_mac = parse_peer_mac("controller_mac", config.controller_mac)?;
        let camera_mac = parse_peer_mac("camera_mac", config.camera_mac)?;
        let wifi_channel = parse_wifi_channel(config.wifi_channel)?;

        let retry_policy = RetryPolicy {
            max_retries: parse_max_retries(config.max_retries)?,
            min_interval_ms: u64::from(parse_retry_interval_ms(config.retry_interval_ms)?),
            completion_timeout_ms: u64::from(config.send_timeout_ms),
        };

        let frame_chunk_size = parse_chunk_size(config.frame_chunk_size)?;
        let max_frame_size = parse_max_frame_size(config.max_frame_size)?;
        let default_fps = parse_default_fps(config.default_fps)?;
        let (timeout_ms, poll_interval_ms) =
            parse_capture_timing(config.capture_timeout_ms, config.capture_poll_interval_ms)?;

        let capture = CaptureSettings {
            max_frame_size,
            burst_chunk_size: frame_chunk_size,
            poll_interval_ms: u64::from(poll_interval_ms),
            timeout_ms: u64::from(timeout_ms),
        };

        let stream_endpoint = parse_stream_endpoint(config.stream_host, config.stream_port)?;
        let resolution = parse_resolution(config.resolution)?;

        let task = TaskSettings {
            priority: config.camera_task_priority,
            stack_size: config.camera_task_stack_size as usize,
            ..TaskSettings::default()
        };

        Ok(AppConfig {
            controller_mac,
            camera_mac,
            wifi_channel,
            wifi_ssid: config.wifi_ssid.to_string(),
            wifi_password: config.wifi_password.to_string(),
            retry_policy,
            frame_chunk_size,
            default_fps,
            capture,
            stream_endpoint,
            resolution,
            task,
        })
    }
}
