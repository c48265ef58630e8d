//! キャプチャ状態機械
//!
//! ```text
//! Idle ──trigger──▶ Capturing ──done & 1..=max──▶ FrameReady ──with_frame──▶ Idle
//!                      │                              │
//!                      └── len 0 / len > max / timeout / FIFO エラー ──▶ Corrupted ──rearm──▶ Idle
//! ```
//!
//! エンジンはハードウェアのフレームバッファを単独で所有します。`Capturing` 中に
//! 他から FIFO に触れる手段はなく、`trigger` は進行中のキャプチャがあれば何もしません。

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use log::{debug, error, warn};

use super::fifo::{FifoError, FrameFifo};
use crate::core::clock::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CaptureState {
    Idle = 0,
    Capturing = 1,
    FrameReady = 2,
    Corrupted = 3,
}

impl CaptureState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => CaptureState::Capturing,
            2 => CaptureState::FrameReady,
            3 => CaptureState::Corrupted,
            _ => CaptureState::Idle,
        }
    }
}

/// 他タスクから状態を問い合わせるための共有ビュー
#[derive(Debug, Clone, Default)]
pub struct SharedCaptureState(Arc<AtomicU8>);

impl SharedCaptureState {
    pub fn get(&self) -> CaptureState {
        CaptureState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: CaptureState) {
        self.0.store(state as u8, Ordering::Release);
    }

    pub fn is_capturing(&self) -> bool {
        self.get() == CaptureState::Capturing
    }

    pub fn is_frame_ready(&self) -> bool {
        self.get() == CaptureState::FrameReady
    }

    pub fn is_corrupted(&self) -> bool {
        self.get() == CaptureState::Corrupted
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSettings {
    /// これを超える長さのフレームは破損扱い
    pub max_frame_size: usize,
    /// バースト読み出し 1 回あたりのバイト数
    pub burst_chunk_size: usize,
    /// 完了フラグのポーリング間隔
    pub poll_interval_ms: u64,
    /// 完了フラグを待つ上限
    pub timeout_ms: u64,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            max_frame_size: 40 * 1024,
            burst_chunk_size: 1024,
            poll_interval_ms: 5,
            timeout_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    #[error(transparent)]
    Fifo(#[from] FifoError),
    #[error("フレーム長が不正です: {length} bytes (上限 {max})")]
    CorruptedFrame { length: usize, max: usize },
    #[error("キャプチャが {0} ms 以内に完了しませんでした")]
    Timeout(u64),
    #[error("フレームが準備できていません (状態: {0:?})")]
    NotReady(CaptureState),
}

/// `poll` 1 回分の結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// キャプチャしていない
    Idle,
    /// まだ完了していない
    Pending,
    Ready(usize),
    /// 長さが 0 または上限超え
    Corrupted(usize),
    TimedOut,
}

/// `wait_for_frame` の結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Ready(usize),
    Corrupted,
    /// 停止要求で待機を打ち切った
    Aborted,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub captures_started: u32,
    pub frames_ready: u32,
    pub corrupted: u32,
    pub timeouts: u32,
}

pub struct CaptureEngine<F, C> {
    fifo: F,
    clock: C,
    settings: CaptureSettings,
    state: CaptureState,
    shared: SharedCaptureState,
    buffer: Vec<u8>,
    frame_len: usize,
    started_at_ms: u64,
    stats: CaptureStats,
    last_error: Option<CaptureError>,
}

impl<F: FrameFifo, C: Clock> CaptureEngine<F, C> {
    pub fn new(fifo: F, clock: C, settings: CaptureSettings) -> Self {
        Self {
            fifo,
            clock,
            buffer: Vec::with_capacity(settings.max_frame_size),
            settings,
            state: CaptureState::Idle,
            shared: SharedCaptureState::default(),
            frame_len: 0,
            started_at_ms: 0,
            stats: CaptureStats::default(),
            last_error: None,
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn shared_state(&self) -> SharedCaptureState {
        self.shared.clone()
    }

    pub fn is_capturing(&self) -> bool {
        self.state == CaptureState::Capturing
    }

    pub fn is_frame_ready(&self) -> bool {
        self.state == CaptureState::FrameReady
    }

    pub fn is_corrupted(&self) -> bool {
        self.state == CaptureState::Corrupted
    }

    pub fn settings(&self) -> &CaptureSettings {
        &self.settings
    }

    pub fn stats(&self) -> CaptureStats {
        self.stats
    }

    /// 直近でフレームを破棄した理由
    pub fn last_error(&self) -> Option<&CaptureError> {
        self.last_error.as_ref()
    }

    /// 初期化用。キャプチャ中に FIFO を触らないこと。
    pub fn fifo_mut(&mut self) -> &mut F {
        &mut self.fifo
    }

    fn set_state(&mut self, state: CaptureState) {
        self.state = state;
        self.shared.set(state);
    }

    fn mark_corrupted(&mut self, reason: CaptureError) {
        self.stats.corrupted += 1;
        self.frame_len = 0;
        self.set_state(CaptureState::Corrupted);
        warn!("フレームを破棄しました: {}", reason);
        self.last_error = Some(reason);
    }

    /// キャプチャを開始します。既に進行中なら `false` を返して何もしません。
    pub fn trigger(&mut self) -> Result<bool, CaptureError> {
        match self.state {
            CaptureState::Capturing | CaptureState::FrameReady => return Ok(false),
            CaptureState::Idle | CaptureState::Corrupted => {}
        }

        if let Err(e) = self.fifo.start_capture() {
            error!("キャプチャ開始に失敗: {}", e);
            self.set_state(CaptureState::Idle);
            return Err(e.into());
        }

        self.started_at_ms = self.clock.now_ms();
        self.frame_len = 0;
        self.stats.captures_started += 1;
        self.set_state(CaptureState::Capturing);
        Ok(true)
    }

    /// 完了フラグを 1 回確認し、必要なら状態を進めます
    pub fn poll(&mut self) -> Result<PollOutcome, CaptureError> {
        match self.state {
            CaptureState::Capturing => {}
            CaptureState::Idle => return Ok(PollOutcome::Idle),
            CaptureState::FrameReady => return Ok(PollOutcome::Ready(self.frame_len)),
            CaptureState::Corrupted => return Ok(PollOutcome::Corrupted(self.frame_len)),
        }

        let done = match self.fifo.capture_done() {
            Ok(done) => done,
            Err(e) => {
                self.mark_corrupted(e.clone().into());
                return Err(e.into());
            }
        };

        if !done {
            let elapsed = self.clock.now_ms().saturating_sub(self.started_at_ms);
            if elapsed >= self.settings.timeout_ms {
                self.stats.timeouts += 1;
                self.mark_corrupted(CaptureError::Timeout(elapsed));
                return Ok(PollOutcome::TimedOut);
            }
            return Ok(PollOutcome::Pending);
        }

        let length = match self.fifo.fifo_length() {
            Ok(length) => length,
            Err(e) => {
                self.mark_corrupted(e.clone().into());
                return Err(e.into());
            }
        };

        if length == 0 || length > self.settings.max_frame_size {
            self.mark_corrupted(CaptureError::CorruptedFrame {
                length,
                max: self.settings.max_frame_size,
            });
            return Ok(PollOutcome::Corrupted(length));
        }

        self.frame_len = length;
        self.stats.frames_ready += 1;
        self.set_state(CaptureState::FrameReady);
        debug!("Frame ready: {} bytes", length);
        Ok(PollOutcome::Ready(length))
    }

    /// 完了までポーリングします。タイムアウトがあるので必ず有限時間で戻ります。
    pub fn wait_for_frame(&mut self, stop: &AtomicBool) -> Result<WaitOutcome, CaptureError> {
        loop {
            if stop.load(Ordering::Acquire) {
                return Ok(WaitOutcome::Aborted);
            }
            match self.poll()? {
                PollOutcome::Ready(length) => return Ok(WaitOutcome::Ready(length)),
                PollOutcome::Corrupted(_) | PollOutcome::TimedOut => {
                    return Ok(WaitOutcome::Corrupted)
                }
                PollOutcome::Idle => return Err(CaptureError::NotReady(CaptureState::Idle)),
                PollOutcome::Pending => self.clock.sleep_ms(self.settings.poll_interval_ms),
            }
        }
    }

    /// FIFO からフレームを読み出して `f` に貸し出し、終わったら `Idle` に戻ります。
    ///
    /// 読み出しに失敗したフレームは `f` に渡さず `Corrupted` にします。
    pub fn with_frame<R>(&mut self, f: impl FnOnce(&[u8]) -> R) -> Result<R, CaptureError> {
        if self.state != CaptureState::FrameReady {
            return Err(CaptureError::NotReady(self.state));
        }

        let length = self.frame_len;
        let chunk = self.settings.burst_chunk_size.max(1);
        if let Err(e) = burst_read(&mut self.fifo, &mut self.buffer, length, chunk) {
            self.mark_corrupted(e.clone().into());
            return Err(e.into());
        }

        let result = f(&self.buffer[..length]);
        self.frame_len = 0;
        self.set_state(CaptureState::Idle);
        Ok(result)
    }

    /// `Corrupted` から `Idle` に戻します
    pub fn rearm(&mut self) -> bool {
        if self.state == CaptureState::Corrupted {
            self.set_state(CaptureState::Idle);
            true
        } else {
            false
        }
    }

    /// どの状態からでもキャプチャを打ち切って `Idle` に戻し、チップ選択を解除します
    pub fn abort(&mut self) {
        if let Err(e) = self.fifo.end_burst() {
            error!("チップ選択の解除に失敗: {}", e);
        }
        self.frame_len = 0;
        self.set_state(CaptureState::Idle);
    }
}

/// バースト読み出し。途中で失敗しても `Drop` でチップ選択を解除します。
struct Burst<'a, F: FrameFifo> {
    fifo: &'a mut F,
    open: bool,
}

impl<'a, F: FrameFifo> Burst<'a, F> {
    fn open(fifo: &'a mut F) -> Result<Self, FifoError> {
        let burst = Burst { fifo, open: true };
        burst.fifo.begin_burst()?;
        Ok(burst)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<(), FifoError> {
        self.fifo.read_burst(buf)
    }

    fn close(mut self) -> Result<(), FifoError> {
        self.open = false;
        self.fifo.end_burst()
    }
}

impl<F: FrameFifo> Drop for Burst<'_, F> {
    fn drop(&mut self) {
        if self.open {
            if let Err(e) = self.fifo.end_burst() {
                error!("チップ選択の解除に失敗: {}", e);
            }
        }
    }
}

fn burst_read<F: FrameFifo>(
    fifo: &mut F,
    buffer: &mut Vec<u8>,
    length: usize,
    chunk: usize,
) -> Result<(), FifoError> {
    buffer.clear();
    buffer.resize(length, 0);

    let mut burst = Burst::open(fifo)?;
    for piece in buffer.chunks_mut(chunk) {
        burst.read(piece)?;
    }
    burst.close()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use crate::hardware::camera::mock::{MockFrame, MockFrameFifo};

    fn engine(fifo: &MockFrameFifo) -> (CaptureEngine<MockFrameFifo, ManualClock>, ManualClock) {
        let clock = ManualClock::new();
        let settings = CaptureSettings {
            max_frame_size: 4096,
            burst_chunk_size: 512,
            poll_interval_ms: 5,
            timeout_ms: 100,
        };
        (CaptureEngine::new(fifo.clone(), clock.clone(), settings), clock)
    }

    #[test]
    fn test_full_cycle_hands_frame_out() {
        let fifo = MockFrameFifo::new();
        let data: Vec<u8> = (0..1500u32).map(|i| i as u8).collect();
        fifo.push_frame(MockFrame::new(data.clone()).done_after(3));
        let (mut engine, _clock) = engine(&fifo);
        let shared = engine.shared_state();

        assert!(engine.trigger().unwrap());
        assert!(shared.is_capturing());
        assert_eq!(engine.poll().unwrap(), PollOutcome::Pending);
        assert_eq!(engine.poll().unwrap(), PollOutcome::Pending);
        assert_eq!(engine.poll().unwrap(), PollOutcome::Ready(1500));
        assert!(shared.is_frame_ready());

        let copied = engine.with_frame(|frame| frame.to_vec()).unwrap();
        assert_eq!(copied, data);
        assert_eq!(engine.state(), CaptureState::Idle);
        assert!(!fifo.is_selected());
    }

    #[test]
    fn test_single_flight_guard() {
        let fifo = MockFrameFifo::new();
        fifo.push_frame(MockFrame::new(vec![1; 10]).done_after(2));
        let (mut engine, _clock) = engine(&fifo);

        assert!(engine.trigger().unwrap());
        assert!(!engine.trigger().unwrap());
        assert_eq!(fifo.capture_starts(), 1);

        engine.poll().unwrap();
        engine.poll().unwrap();
        assert!(engine.is_frame_ready());
        assert!(!engine.trigger().unwrap());
        assert_eq!(fifo.capture_starts(), 1);
    }

    #[test]
    fn test_zero_length_is_corrupted() {
        let fifo = MockFrameFifo::new();
        fifo.push_frame(MockFrame::new(Vec::new()));
        let (mut engine, _clock) = engine(&fifo);

        engine.trigger().unwrap();
        assert_eq!(engine.poll().unwrap(), PollOutcome::Corrupted(0));
        assert!(engine.is_corrupted());
        assert!(matches!(
            engine.with_frame(|_| ()),
            Err(CaptureError::NotReady(CaptureState::Corrupted))
        ));
        assert!(engine.rearm());
        assert_eq!(engine.state(), CaptureState::Idle);
        assert_eq!(engine.stats().corrupted, 1);
    }

    #[test]
    fn test_oversized_length_is_corrupted() {
        let fifo = MockFrameFifo::new();
        fifo.push_frame(MockFrame::new(vec![0; 16]).with_length(4097));
        let (mut engine, _clock) = engine(&fifo);

        engine.trigger().unwrap();
        assert_eq!(engine.poll().unwrap(), PollOutcome::Corrupted(4097));
        assert_eq!(
            engine.last_error(),
            Some(&CaptureError::CorruptedFrame { length: 4097, max: 4096 })
        );
        // Corrupted からは再トリガーできる
        fifo.push_frame(MockFrame::new(vec![0; 16]));
        assert!(engine.trigger().unwrap());
        assert_eq!(engine.poll().unwrap(), PollOutcome::Ready(16));
    }

    #[test]
    fn test_wait_for_frame_times_out() {
        let fifo = MockFrameFifo::new();
        fifo.push_frame(MockFrame::stalled());
        let (mut engine, clock) = engine(&fifo);
        let stop = AtomicBool::new(false);

        engine.trigger().unwrap();
        assert_eq!(engine.wait_for_frame(&stop).unwrap(), WaitOutcome::Corrupted);
        assert!(clock.now_ms() >= 100);
        assert_eq!(engine.stats().timeouts, 1);
        assert!(matches!(engine.last_error(), Some(CaptureError::Timeout(ms)) if *ms >= 100));
        assert!(engine.is_corrupted());
    }

    #[test]
    fn test_wait_for_frame_honours_stop() {
        let fifo = MockFrameFifo::new();
        fifo.push_frame(MockFrame::stalled());
        let (mut engine, _clock) = engine(&fifo);
        let stop = AtomicBool::new(true);

        engine.trigger().unwrap();
        assert_eq!(engine.wait_for_frame(&stop).unwrap(), WaitOutcome::Aborted);
        engine.abort();
        assert_eq!(engine.state(), CaptureState::Idle);
    }

    #[test]
    fn test_burst_failure_deselects_and_corrupts() {
        let fifo = MockFrameFifo::new();
        fifo.push_frame(MockFrame::new(vec![9; 2000]));
        let (mut engine, _clock) = engine(&fifo);

        engine.trigger().unwrap();
        engine.poll().unwrap();
        fifo.fail_next_burst_read();

        let mut called = false;
        assert!(engine.with_frame(|_| called = true).is_err());
        assert!(!called);
        assert!(!fifo.is_selected());
        assert!(engine.is_corrupted());
    }

    #[test]
    fn test_poll_without_trigger_is_idle() {
        let fifo = MockFrameFifo::new();
        let (mut engine, _clock) = engine(&fifo);
        assert_eq!(engine.poll().unwrap(), PollOutcome::Idle);
        assert!(engine.wait_for_frame(&AtomicBool::new(false)).is_err());
    }
}
