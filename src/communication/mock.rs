use super::transport::{Datagram, MessageTransport, SendStatus, TransportError};
use crate::mac_address::MacAddress;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

type Inbox = Arc<Mutex<VecDeque<Datagram>>>;

/// テスト用のトランスポートモック
///
/// 実際の無線を使わずに ESP-NOW リンクをシミュレートします。
/// 送信結果 (キュー投入の成否) と送信完了コールバックの結果を台本どおりに返し、
/// 送信されたデータを記録します。`pair` で作った 2 つのモックは互いに配送します。
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    /// 送信キューに受け付けられたデータの記録
    pub sent: Arc<Mutex<Vec<(MacAddress, Vec<u8>)>>>,
    /// `send` が呼ばれた回数 (拒否も含む)
    attempts: Arc<Mutex<usize>>,
    /// `send` の即時結果の台本 (空なら成功)
    send_results: Arc<Mutex<VecDeque<Result<(), TransportError>>>>,
    /// 受け付けた送信ごとの完了結果の台本
    completions: Arc<Mutex<VecDeque<SendStatus>>>,
    /// 台本が空のときの完了結果。`None` なら完了通知を出さない
    auto_completion: Arc<Mutex<Option<SendStatus>>>,
    pending_status: Arc<Mutex<VecDeque<SendStatus>>>,
    inbox: Inbox,
    /// `pair` 用: 自分のアドレスと相手の受信箱
    local: Option<MacAddress>,
    remote_inbox: Option<Inbox>,
}

impl MockTransport {
    /// 完了通知なしのモックを作成します
    pub fn new() -> Self {
        Self::default()
    }

    /// 受け付けた送信すべてに `status` の完了通知を返すモック
    pub fn with_auto_completion(status: SendStatus) -> Self {
        let mock = Self::new();
        *mock.auto_completion.lock().unwrap() = Some(status);
        mock
    }

    /// 互いに配送し合う 2 つのモックを作成します
    pub fn pair(a: MacAddress, b: MacAddress) -> (Self, Self) {
        let mut left = Self::with_auto_completion(SendStatus::Success);
        let mut right = Self::with_auto_completion(SendStatus::Success);
        left.local = Some(a);
        left.remote_inbox = Some(right.inbox.clone());
        right.local = Some(b);
        right.remote_inbox = Some(left.inbox.clone());
        (left, right)
    }

    /// テスト用: 次回以降の `send` の即時結果を積む
    pub fn script_send_results<I>(&self, results: I)
    where
        I: IntoIterator<Item = Result<(), TransportError>>,
    {
        self.send_results.lock().unwrap().extend(results);
    }

    /// テスト用: 次回以降に受け付けた送信の完了結果を積む
    pub fn script_completions<I>(&self, statuses: I)
    where
        I: IntoIterator<Item = SendStatus>,
    {
        self.completions.lock().unwrap().extend(statuses);
    }

    pub fn set_auto_completion(&self, status: Option<SendStatus>) {
        *self.auto_completion.lock().unwrap() = status;
    }

    /// テスト用: 完了コールバックを手動で発火させる
    pub fn complete(&self, status: SendStatus) {
        self.pending_status.lock().unwrap().push_back(status);
    }

    /// テスト用: 受信コールバックを発火させる
    pub fn deliver(&self, src: MacAddress, data: &[u8]) {
        self.inbox.lock().unwrap().push_back(Datagram {
            src,
            data: data.to_vec(),
        });
    }

    pub fn attempts(&self) -> usize {
        *self.attempts.lock().unwrap()
    }

    pub fn sent_payloads(&self) -> Vec<Vec<u8>> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, data)| data.clone())
            .collect()
    }

    pub fn clear_sent(&self) {
        self.sent.lock().unwrap().clear();
    }
}

impl MessageTransport for MockTransport {
    fn send(&self, peer: &MacAddress, data: &[u8]) -> Result<(), TransportError> {
        *self.attempts.lock().unwrap() += 1;

        if let Some(result) = self.send_results.lock().unwrap().pop_front() {
            result?;
        }

        self.sent.lock().unwrap().push((*peer, data.to_vec()));

        let completion = self
            .completions
            .lock()
            .unwrap()
            .pop_front()
            .or(*self.auto_completion.lock().unwrap());

        if let Some(status) = completion {
            self.pending_status.lock().unwrap().push_back(status);
        }

        // 物理送信に失敗したフレームは相手に届かない
        if completion != Some(SendStatus::Failure) {
            if let (Some(local), Some(remote)) = (self.local, &self.remote_inbox) {
                remote.lock().unwrap().push_back(Datagram {
                    src: local,
                    data: data.to_vec(),
                });
            }
        }

        Ok(())
    }

    fn poll_send_status(&self) -> Option<SendStatus> {
        self.pending_status.lock().unwrap().pop_front()
    }

    fn poll_received(&self) -> Option<Datagram> {
        self.inbox.lock().unwrap().pop_front()
    }
}
