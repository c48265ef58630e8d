//! フレーム FIFO ハードウェアの抽象化
//!
//! キャプチャ 1 回分の JPEG を保持するハードウェアバッファ (ArduChip など) を、
//! キャプチャエンジンが必要とする最小限の操作に絞って表現します。

use std::fmt;
use std::str::FromStr;

/// FIFO / センサー操作のエラー
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FifoError {
    #[error("SPI通信エラー: {0}")]
    Spi(String),
    #[error("チップセレクト制御エラー: {0}")]
    ChipSelect(String),
    #[error("I2C通信エラー: {0}")]
    I2c(String),
    #[error("SPIインターフェースの確認に失敗しました: wrote 0x{wrote:02X}, read 0x{read:02X}")]
    SpiCheckFailed { wrote: u8, read: u8 },
}

/// 解像度プリセット (これ以外の解像度は扱わない)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Resolution {
    Qvga,
    #[default]
    Vga,
    Svga,
    Xga,
    Uxga,
}

impl Resolution {
    /// (幅, 高さ) ピクセル
    pub fn dimensions(self) -> (u16, u16) {
        match self {
            Resolution::Qvga => (320, 240),
            Resolution::Vga => (640, 480),
            Resolution::Svga => (800, 600),
            Resolution::Xga => (1024, 768),
            Resolution::Uxga => (1600, 1200),
        }
    }
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "QVGA" => Ok(Resolution::Qvga),
            "VGA" => Ok(Resolution::Vga),
            "SVGA" => Ok(Resolution::Svga),
            "XGA" => Ok(Resolution::Xga),
            // FULL は UXGA の別名
            "UXGA" | "FULL" => Ok(Resolution::Uxga),
            _ => Err(format!("unknown resolution: {s}")),
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Resolution::Qvga => "QVGA",
            Resolution::Vga => "VGA",
            Resolution::Svga => "SVGA",
            Resolution::Xga => "XGA",
            Resolution::Uxga => "UXGA",
        };
        let (w, h) = self.dimensions();
        write!(f, "{name} ({w}x{h})")
    }
}

/// キャプチャ 1 回分を保持するハードウェア FIFO
pub trait FrameFifo {
    /// イメージセンサーが制御バス上に応答するか
    fn probe_sensor(&mut self) -> Result<bool, FifoError>;

    /// FIFO とセンサーを初期化し、解像度プリセットを設定する
    fn init(&mut self, resolution: Resolution) -> Result<(), FifoError>;

    /// FIFO をフラッシュして完了フラグを落とし、キャプチャを開始する
    fn start_capture(&mut self) -> Result<(), FifoError>;

    /// キャプチャ完了フラグ
    fn capture_done(&mut self) -> Result<bool, FifoError>;

    /// 完了後に FIFO に溜まっているバイト数 (長さレジスタの値)
    fn fifo_length(&mut self) -> Result<usize, FifoError>;

    /// チップを選択してバースト読み出しを開始する
    fn begin_burst(&mut self) -> Result<(), FifoError>;

    /// バースト中に `buf` を埋める
    fn read_burst(&mut self, buf: &mut [u8]) -> Result<(), FifoError>;

    /// バーストを終えてチップ選択を解除する。選択されていなくても安全に呼べること。
    fn end_burst(&mut self) -> Result<(), FifoError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_parse() {
        assert_eq!("vga".parse::<Resolution>(), Ok(Resolution::Vga));
        assert_eq!("FULL".parse::<Resolution>(), Ok(Resolution::Uxga));
        assert!("HD".parse::<Resolution>().is_err());
        assert_eq!(Resolution::default(), Resolution::Vga);
    }

    #[test]
    fn test_resolution_display() {
        assert_eq!(Resolution::Qvga.to_string(), "QVGA (320x240)");
    }
}
