//! 単調時計の抽象化
//!
//! リトライ間隔・キャプチャのタイムアウト・フレームペーシングはすべて
//! この `Clock` を通して時刻を読み、待機します。ホストテストでは
//! `ManualClock` で時間を手動で進めます。

use std::time::{Duration, Instant};

#[cfg(not(feature = "esp"))]
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

/// ミリ秒単位の単調時計
pub trait Clock: Send + Sync {
    /// 任意の基準点からの経過ミリ秒
    fn now_ms(&self) -> u64;

    /// 現在のタスクを `ms` ミリ秒ブロックする
    fn sleep_ms(&self, ms: u64);
}

/// `std::time::Instant` ベースの時計 (ESP-IDF の std 環境でもそのまま動作)
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    fn sleep_ms(&self, ms: u64) {
        if ms > 0 {
            std::thread::sleep(Duration::from_millis(ms));
        }
    }
}

/// テスト用の手動時計。`sleep_ms` は実際には眠らず時刻を進めるだけ。
#[cfg(not(feature = "esp"))]
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

#[cfg(not(feature = "esp"))]
impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(ms: u64) -> Self {
        let clock = Self::default();
        clock.now.store(ms, Ordering::SeqCst);
        clock
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

#[cfg(not(feature = "esp"))]
impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    fn sleep_ms(&self, ms: u64) {
        self.advance(ms);
    }
}
