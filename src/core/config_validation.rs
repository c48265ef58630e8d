use std::net::{Ipv4Addr, SocketAddrV4};
use std::str::FromStr;

use crate::core::fps::{validate_fps, InvalidFps};
use crate::hardware::camera::Resolution;
use crate::mac_address::MacAddress;

/// cfg.toml に書かれたままのプレースホルダ MAC
const PLACEHOLDER_MAC: &str = "11:22:33:44:55:66";

/// ESP-NOW で使用できるチャンネル範囲
const WIFI_CHANNEL_RANGE: std::ops::RangeInclusive<u8> = 1..=13;
const MAX_RETRIES_RANGE: std::ops::RangeInclusive<u8> = 1..=10;
/// リンクを飽和させないための最小再送間隔
pub const MIN_RETRY_INTERVAL_MS: u32 = 250;
/// UDP 1 データグラムに載せる最大チャンク
pub const MAX_CHUNK_SIZE: u16 = 1460;
/// ArduChip の FIFO 長レジスタは 23 bit
pub const FIFO_LENGTH_LIMIT: u32 = 0x7F_FFFF;

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    MissingPeerMac(&'static str),
    InvalidPeerMac(&'static str, String),
    InvalidWifiChannel(u8),
    InvalidMaxRetries(u8),
    RetryIntervalTooShort(u32),
    InvalidChunkSize(u16),
    InvalidMaxFrameSize(u32),
    InvalidDefaultFps(i32),
    InvalidCaptureTiming { timeout_ms: u32, poll_interval_ms: u32 },
    InvalidStreamHost(String),
    InvalidStreamPort(u16),
    UnknownResolution(String),
}

pub fn parse_peer_mac(field: &'static str, value: &str) -> Result<MacAddress, ValidationError> {
    if value == PLACEHOLDER_MAC || value.is_empty() {
        return Err(ValidationError::MissingPeerMac(field));
    }

    MacAddress::from_str(value).map_err(|_| ValidationError::InvalidPeerMac(field, value.to_string()))
}

pub fn parse_wifi_channel(value: u8) -> Result<u8, ValidationError> {
    if WIFI_CHANNEL_RANGE.contains(&value) {
        Ok(value)
    } else {
        Err(ValidationError::InvalidWifiChannel(value))
    }
}

pub fn parse_max_retries(value: u8) -> Result<u8, ValidationError> {
    if MAX_RETRIES_RANGE.contains(&value) {
        Ok(value)
    } else {
        Err(ValidationError::InvalidMaxRetries(value))
    }
}

pub fn parse_retry_interval_ms(value: u32) -> Result<u32, ValidationError> {
    if value < MIN_RETRY_INTERVAL_MS {
        Err(ValidationError::RetryIntervalTooShort(value))
    } else {
        Ok(value)
    }
}

pub fn parse_chunk_size(value: u16) -> Result<usize, ValidationError> {
    if value == 0 || value > MAX_CHUNK_SIZE {
        Err(ValidationError::InvalidChunkSize(value))
    } else {
        Ok(value as usize)
    }
}

pub fn parse_max_frame_size(value: u32) -> Result<usize, ValidationError> {
    if value == 0 || value > FIFO_LENGTH_LIMIT {
        Err(ValidationError::InvalidMaxFrameSize(value))
    } else {
        Ok(value as usize)
    }
}

pub fn parse_default_fps(value: u8) -> Result<u8, ValidationError> {
    validate_fps(i32::from(value))
        .map_err(|InvalidFps(fps)| ValidationError::InvalidDefaultFps(fps))
}

/// ポーリング間隔は 1ms 以上、タイムアウトはポーリング間隔以上
pub fn parse_capture_timing(
    timeout_ms: u32,
    poll_interval_ms: u32,
) -> Result<(u32, u32), ValidationError> {
    if poll_interval_ms == 0 || timeout_ms < poll_interval_ms {
        return Err(ValidationError::InvalidCaptureTiming {
            timeout_ms,
            poll_interval_ms,
        });
    }
    Ok((timeout_ms, poll_interval_ms))
}

pub fn parse_stream_endpoint(host: &str, port: u16) -> Result<SocketAddrV4, ValidationError> {
    let ip = Ipv4Addr::from_str(host)
        .map_err(|_| ValidationError::InvalidStreamHost(host.to_string()))?;
    if port == 0 {
        return Err(ValidationError::InvalidStreamPort(port));
    }
    Ok(SocketAddrV4::new(ip, port))
}

pub fn parse_resolution(value: &str) -> Result<Resolution, ValidationError> {
    Resolution::from_str(value).map_err(|_| ValidationError::UnknownResolution(value.to_string()))
}
