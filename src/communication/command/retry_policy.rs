/// コマンド再送ポリシー
///
/// 指数バックオフは使わず、最小再送間隔だけでリンクの飽和を防ぎます。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 1 回の状態遷移あたりの送信試行回数の上限 (初回送信を含む)
    pub max_retries: u8,
    /// 送信試行どうしの最小間隔
    pub min_interval_ms: u64,
    /// 送信完了コールバックを待つ上限。超えた送信は失敗扱い。
    pub completion_timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            min_interval_ms: 250,
            completion_timeout_ms: 1000,
        }
    }
}

impl RetryPolicy {
    /// 前回の試行から最小間隔が経過しているか
    pub fn interval_elapsed(&self, last_attempt_ms: Option<u64>, now_ms: u64) -> bool {
        match last_attempt_ms {
            Some(last) => now_ms.saturating_sub(last) >= self.min_interval_ms,
            None => true,
        }
    }

    /// 完了通知を待ち切ったか
    pub fn completion_timed_out(&self, sent_at_ms: u64, now_ms: u64) -> bool {
        now_ms.saturating_sub(sent_at_ms) >= self.completion_timeout_ms
    }
}
