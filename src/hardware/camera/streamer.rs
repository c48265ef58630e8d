//! フレームの分割送信とペーシング

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};

use super::pacer::{sleep_unless_stopped, FramePacer};
use super::sink::{FrameSink, SinkError};
use crate::core::clock::Clock;
use crate::core::fps::{frame_interval_ms, validate_fps, InvalidFps, DEFAULT_FPS, MAX_FPS, MIN_FPS};

/// デフォルトのチャンクサイズ
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("空のフレームは送信しません")]
    EmptyFrame,
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error(transparent)]
    InvalidFps(#[from] InvalidFps),
}

/// ストリーミング統計
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub frames_sent: u32,
    pub chunks_sent: u32,
    pub bytes_sent: u32,
    pub send_errors: u32,
    pub corrupted_frames: u32,
}

/// キャプチャタスクと他タスクで共有する制御ブロック
///
/// 停止フラグ・目標 fps・統計をアトミックに保持します。fps はタスク実行中でも
/// 更新でき、次のフレームのペーシングから反映されます。
#[derive(Debug)]
pub struct StreamControl {
    stop: AtomicBool,
    fps: AtomicU8,
    interval_ms: AtomicU32,
    frames_sent: AtomicU32,
    chunks_sent: AtomicU32,
    bytes_sent: AtomicU32,
    send_errors: AtomicU32,
    corrupted_frames: AtomicU32,
}

impl Default for StreamControl {
    fn default() -> Self {
        Self::new(DEFAULT_FPS)
    }
}

impl StreamControl {
    pub fn new(fps: u8) -> Self {
        let fps = fps.clamp(MIN_FPS, MAX_FPS);
        Self {
            stop: AtomicBool::new(false),
            fps: AtomicU8::new(fps),
            interval_ms: AtomicU32::new(frame_interval_ms(fps)),
            frames_sent: AtomicU32::new(0),
            chunks_sent: AtomicU32::new(0),
            bytes_sent: AtomicU32::new(0),
            send_errors: AtomicU32::new(0),
            corrupted_frames: AtomicU32::new(0),
        }
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub fn clear_stop(&self) {
        self.stop.store(false, Ordering::Release);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    pub fn stop_flag(&self) -> &AtomicBool {
        &self.stop
    }

    pub fn fps(&self) -> u8 {
        self.fps.load(Ordering::Acquire)
    }

    pub fn interval_ms(&self) -> u32 {
        self.interval_ms.load(Ordering::Acquire)
    }

    /// 目標 fps を更新し、新しいフレーム周期を返します。
    /// 範囲外は拒否して前の値を維持します。
    pub fn set_target_fps(&self, fps: i32) -> Result<u32, InvalidFps> {
        match validate_fps(fps) {
            Ok(fps) => {
                let interval = frame_interval_ms(fps);
                self.fps.store(fps, Ordering::Release);
                self.interval_ms.store(interval, Ordering::Release);
                info!("Target fps set to {} ({} ms/frame)", fps, interval);
                Ok(interval)
            }
            Err(e) => {
                warn!("{} を拒否しました (現在 {} fps)", e, self.fps());
                Err(e)
            }
        }
    }

    pub fn record_corrupted(&self) {
        self.corrupted_frames.fetch_add(1, Ordering::Relaxed);
    }

    fn record_frame(&self, chunks: u32, bytes: u32) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.chunks_sent.fetch_add(chunks, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
    }

    fn record_send_error(&self) {
        self.send_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> StreamStats {
        StreamStats {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            chunks_sent: self.chunks_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
            corrupted_frames: self.corrupted_frames.load(Ordering::Relaxed),
        }
    }
}

/// `chunk_size` ごとに分割します。空のデータからはチャンクを作りません。
pub fn split_into_chunks(data: &[u8], chunk_size: usize) -> std::slice::Chunks<'_, u8> {
    data.chunks(chunk_size.max(1))
}

/// 受信側の再構成 (到着順に連結するだけ)
pub fn reassemble_chunks<I, B>(chunks: I) -> Vec<u8>
where
    I: IntoIterator<Item = B>,
    B: AsRef<[u8]>,
{
    let mut frame = Vec::new();
    for chunk in chunks {
        frame.extend_from_slice(chunk.as_ref());
    }
    frame
}

/// 準備できたフレームを分割して送り、次のフレームまでペーシングします
pub struct FrameStreamer<S, C> {
    sink: S,
    clock: C,
    control: Arc<StreamControl>,
    chunk_size: usize,
    pacer: FramePacer,
}

impl<S: FrameSink, C: Clock> FrameStreamer<S, C> {
    pub fn new(sink: S, clock: C, control: Arc<StreamControl>, chunk_size: usize) -> Self {
        Self {
            sink,
            clock,
            control,
            chunk_size: chunk_size.max(1),
            pacer: FramePacer::new(),
        }
    }

    pub fn control(&self) -> &Arc<StreamControl> {
        &self.control
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// シンクの上限で切り詰めた実際のチャンクサイズ
    pub fn effective_chunk_size(&self) -> usize {
        self.chunk_size.min(self.sink.max_payload()).max(1)
    }

    /// 消費者が 1 つ以上接続しているか (ループ毎に確認する)
    pub fn has_consumers(&self) -> bool {
        self.sink.consumer_count() > 0
    }

    /// フレームを借りて分割送信し、送ったチャンク数を返します。
    /// フレームへの参照はこの呼び出しの間だけ使い、保持しません。
    pub fn transmit(&mut self, frame: &[u8]) -> Result<usize, StreamError> {
        if frame.is_empty() {
            return Err(StreamError::EmptyFrame);
        }

        let chunk_size = self.effective_chunk_size();
        let mut chunks = 0;
        for chunk in split_into_chunks(frame, chunk_size) {
            if let Err(e) = self.sink.send_chunk(chunk) {
                self.control.record_send_error();
                return Err(e.into());
            }
            chunks += 1;
        }
        if let Err(e) = self.sink.end_frame() {
            self.control.record_send_error();
            return Err(e.into());
        }

        self.control.record_frame(chunks as u32, frame.len() as u32);
        debug!("Frame sent: {} bytes in {} chunks", frame.len(), chunks);
        Ok(chunks)
    }

    /// 次のフレーム周期まで眠ります (停止要求で中断)
    pub fn pace(&mut self) -> u64 {
        let period = u64::from(self.control.interval_ms());
        self.pacer
            .wait_next(&self.clock, period, self.control.stop_flag())
    }

    /// ペーシングの基準時刻を現在に置き直します
    pub fn restart_pacing(&mut self) {
        self.pacer.start(self.clock.now_ms());
    }

    /// 停止要求まで最大 `ms` 待ちます
    pub fn idle(&self, ms: u64) -> u64 {
        sleep_unless_stopped(&self.clock, ms, self.control.stop_flag())
    }
}
