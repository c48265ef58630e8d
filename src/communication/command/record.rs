//! カメラ制御コマンドの固定長ワイヤーレコード
//!
//! レイアウト (34 bytes):
//!
//! | offset | size | field                                     |
//! |--------|------|-------------------------------------------|
//! | 0      | 32   | message: デバッグ用タグ (UTF-8, NUL 埋め) |
//! | 32     | 1    | action: 0=OFF, 1=ON, 2=SET_FPS            |
//! | 33     | 1    | fps: 0 = 指定なし                         |

use heapless::String;

pub const MESSAGE_TAG_LEN: usize = 32;
pub const COMMAND_RECORD_SIZE: usize = MESSAGE_TAG_LEN + 2;

const ACTION_OFFSET: usize = MESSAGE_TAG_LEN;
const FPS_OFFSET: usize = MESSAGE_TAG_LEN + 1;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    #[error("コマンドレコード長が不正です: {actual} bytes (期待値 {expected})")]
    InvalidLength { actual: usize, expected: usize },
    #[error("不明なアクション: {0}")]
    UnknownAction(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CameraAction {
    Off = 0,
    On = 1,
    SetFps = 2,
}

impl TryFrom<u8> for CameraAction {
    type Error = RecordError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(CameraAction::Off),
            1 => Ok(CameraAction::On),
            2 => Ok(CameraAction::SetFps),
            other => Err(RecordError::UnknownAction(other)),
        }
    }
}

/// 送信試行ごとに作られる電源/fps コマンド
///
/// `fps` は受信したままの値を保持します。範囲チェックは適用側で行うので、
/// 範囲外の fps を含むレコードもデコード自体は成功します。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PowerCommand {
    pub message: String<MESSAGE_TAG_LEN>,
    pub action: CameraAction,
    pub fps: Option<u8>,
}

impl PowerCommand {
    pub fn new(action: CameraAction, fps: Option<u8>) -> Self {
        let tag = match action {
            CameraAction::Off => "camera off",
            CameraAction::On => "camera on",
            CameraAction::SetFps => "camera set fps",
        };
        Self {
            message: truncated_tag(tag),
            action,
            fps: fps.filter(|&f| f != 0),
        }
    }

    pub fn on(fps: u8) -> Self {
        Self::new(CameraAction::On, Some(fps))
    }

    pub fn off() -> Self {
        Self::new(CameraAction::Off, None)
    }

    pub fn set_fps(fps: u8) -> Self {
        Self::new(CameraAction::SetFps, Some(fps))
    }

    pub fn with_message(mut self, message: &str) -> Self {
        self.message = truncated_tag(message);
        self
    }

    pub fn encode(&self) -> [u8; COMMAND_RECORD_SIZE] {
        let mut buf = [0u8; COMMAND_RECORD_SIZE];
        let tag = self.message.as_bytes();
        buf[..tag.len()].copy_from_slice(tag);
        buf[ACTION_OFFSET] = self.action as u8;
        buf[FPS_OFFSET] = self.fps.unwrap_or(0);
        buf
    }

    /// 受信バイト列をデコードします。長さが `COMMAND_RECORD_SIZE` と一致しない
    /// データは解釈しません。
    pub fn decode(data: &[u8]) -> Result<Self, RecordError> {
        if data.len() != COMMAND_RECORD_SIZE {
            return Err(RecordError::InvalidLength {
                actual: data.len(),
                expected: COMMAND_RECORD_SIZE,
            });
        }

        let action = CameraAction::try_from(data[ACTION_OFFSET])?;
        let raw_tag = &data[..MESSAGE_TAG_LEN];
        let tag_len = raw_tag.iter().position(|&b| b == 0).unwrap_or(MESSAGE_TAG_LEN);
        let tag = std::string::String::from_utf8_lossy(&raw_tag[..tag_len]);

        Ok(Self {
            message: truncated_tag(&tag),
            action,
            fps: Some(data[FPS_OFFSET]).filter(|&f| f != 0),
        })
    }
}

/// 文字境界を壊さずにタグ長へ切り詰める
fn truncated_tag(text: &str) -> String<MESSAGE_TAG_LEN> {
    let mut tag = String::new();
    for ch in text.chars() {
        if tag.push(ch).is_err() {
            break;
        }
    }
    tag
}
