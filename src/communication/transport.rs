//! 2 ピア間の信頼性のないデータグラムリンク
//!
//! `send` が `Ok` を返しても届いたとは限りません。物理送信の成否は後から
//! 非同期に `poll_send_status` で届きます。重複や順序入れ替わりも起こり得るので、
//! 上位層は冪等なコマンドで収束させます。

use crate::mac_address::MacAddress;

/// ESP-NOW の 1 フレームあたりの最大ペイロード
pub const MAX_DATAGRAM_SIZE: usize = 250;

/// 送信エラー (ローカルのキュー投入失敗)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("送信キューへの投入に失敗しました: {0}")]
    SendFailed(String),
    #[error("ピアが登録されていません: {0}")]
    PeerNotRegistered(MacAddress),
    #[error("ペイロードが大きすぎます: {0} bytes (最大 {max})", max = MAX_DATAGRAM_SIZE)]
    PayloadTooLarge(usize),
    #[error("ドライバエラー: {0}")]
    Driver(String),
}

/// 物理送信の結果 (送信完了コールバックの唯一の情報)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    Success,
    Failure,
}

impl SendStatus {
    pub fn is_success(self) -> bool {
        self == SendStatus::Success
    }
}

/// 受信したデータグラム
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub src: MacAddress,
    pub data: Vec<u8>,
}

/// ポイントツーポイントのメッセージトランスポート
pub trait MessageTransport {
    /// ローカルの送信キューに積みます。`Ok` は配送を意味しません。
    fn send(&self, peer: &MacAddress, data: &[u8]) -> Result<(), TransportError>;

    /// 送信完了コールバックで届いた結果を 1 件取り出します
    fn poll_send_status(&self) -> Option<SendStatus>;

    /// 受信コールバックで届いたデータグラムを 1 件取り出します
    fn poll_received(&self) -> Option<Datagram>;
}

impl<T: MessageTransport + ?Sized> MessageTransport for &T {
    fn send(&self, peer: &MacAddress, data: &[u8]) -> Result<(), TransportError> {
        (**self).send(peer, data)
    }

    fn poll_send_status(&self) -> Option<SendStatus> {
        (**self).poll_send_status()
    }

    fn poll_received(&self) -> Option<Datagram> {
        (**self).poll_received()
    }
}

impl<T: MessageTransport + ?Sized> MessageTransport for std::sync::Arc<T> {
    fn send(&self, peer: &MacAddress, data: &[u8]) -> Result<(), TransportError> {
        (**self).send(peer, data)
    }

    fn poll_send_status(&self) -> Option<SendStatus> {
        (**self).poll_send_status()
    }

    fn poll_received(&self) -> Option<Datagram> {
        (**self).poll_received()
    }
}
