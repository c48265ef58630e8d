//! 外部アグリゲータから見たデバイス契約
//!
//! ヒートランプやセンサーなど外部のデバイスもカメラも、同じ 5 つの操作で
//! 扱われます: `begin` / `update` / `turn_on`・`turn_off` / `apply_state` /
//! `report_state`。

use serde::{Deserialize, Serialize};

use crate::communication::transport::TransportError;
use crate::core::fps::InvalidFps;

/// 外部ストアから届く「こうあってほしい」状態
///
/// `{"state": true, "fps": 5}` の形の JSON。どちらのキーも省略可能で、
/// 省略された項目は現在の値を維持します。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredDeviceState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fps: Option<i32>,
}

impl DesiredDeviceState {
    pub fn power(on: bool) -> Self {
        Self {
            state: Some(on),
            fps: None,
        }
    }

    pub fn with_fps(mut self, fps: i32) -> Self {
        self.fps = Some(fps);
        self
    }
}

/// デバイスの現在状態
///
/// `error` は `state` と独立しています。「要求により OFF」と
/// 「通信失敗で OFF」を区別するためです。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceReport {
    pub state: bool,
    pub error: bool,
    pub fps: u8,
}

/// デバイス操作のエラー
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("イメージセンサーが見つかりません (I2C アドレス 0x{0:02X})")]
    HardwareNotFound(u8),
    #[error("デバイスが初期化されていません")]
    NotInitialized,
    #[error(transparent)]
    InvalidFps(#[from] InvalidFps),
    #[error("キャプチャタスクの起動に失敗しました: {0}")]
    TaskSpawn(String),
    #[error("キャプチャタスクが異常終了しました")]
    TaskLost,
    #[error("ハードウェアエラー: {0}")]
    Hardware(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// 5 操作のデバイス契約
pub trait Device {
    /// 起動時に一度だけ呼ばれる初期化
    fn begin(&mut self) -> Result<(), DeviceError>;

    /// メインループから 1 秒に 1 回以上呼ばれる
    fn update(&mut self) -> Result<(), DeviceError>;

    fn turn_on(&mut self) -> Result<(), DeviceError>;

    fn turn_off(&mut self) -> Result<(), DeviceError>;

    /// 外部から適用された desired 状態を反映する
    fn apply_state(&mut self, desired: &DesiredDeviceState) -> Result<(), DeviceError>;

    fn report_state(&self) -> DeviceReport;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_desired_state_accepts_partial_json() {
        let desired: DesiredDeviceState = serde_json::from_str(r#"{"state": true}"#).unwrap();
        assert_eq!(desired, DesiredDeviceState::power(true));

        let desired: DesiredDeviceState = serde_json::from_str(r#"{"fps": 12}"#).unwrap();
        assert_eq!(desired.state, None);
        assert_eq!(desired.fps, Some(12));
    }

    #[test]
    fn test_report_serializes_all_fields() {
        let report = DeviceReport {
            state: false,
            error: true,
            fps: 5,
        };
        assert_eq!(
            serde_json::to_string(&report).unwrap(),
            r#"{"state":false,"error":true,"fps":5}"#
        );
    }
}
