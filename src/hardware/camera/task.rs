//! キャプチャ → 送信 → ペーシングを回す専用タスク
//!
//! パイプライン (エンジン + ストリーマー) はタスクに move され、停止時に
//! `JoinHandle` 経由で呼び出し側へ返ってきます。実行中にハードウェアへ
//! 触れられるのはこのタスクだけです。

use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};

use log::{debug, error, info, warn};

use super::capture::{CaptureEngine, WaitOutcome};
use super::fifo::FrameFifo;
use super::sink::FrameSink;
use super::streamer::{FrameStreamer, StreamControl};
use crate::core::clock::Clock;
use crate::core::device::DeviceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskSettings {
    pub name: &'static str,
    pub priority: u8,
    pub stack_size: usize,
    /// 消費者がいないときの待機時間
    pub idle_wait_ms: u64,
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            name: "CameraCaptureTask",
            priority: 3,
            stack_size: 8192,
            idle_wait_ms: 100,
        }
    }
}

/// 1 サイクルの結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// 消費者がいないのでキャプチャしなかった
    NoConsumers,
    /// 前のキャプチャが残っていた
    Busy,
    Streamed { chunks: usize },
    Corrupted,
    Aborted,
    Failed,
}

pub struct CameraPipeline<F, S, C> {
    pub engine: CaptureEngine<F, C>,
    pub streamer: FrameStreamer<S, C>,
    idle_wait_ms: u64,
    was_idle: bool,
}

impl<F, S, C> CameraPipeline<F, S, C>
where
    F: FrameFifo,
    S: FrameSink,
    C: Clock,
{
    pub fn new(engine: CaptureEngine<F, C>, streamer: FrameStreamer<S, C>, idle_wait_ms: u64) -> Self {
        Self {
            engine,
            streamer,
            idle_wait_ms,
            was_idle: false,
        }
    }

    pub fn control(&self) -> &Arc<StreamControl> {
        self.streamer.control()
    }

    /// キャプチャ 1 回分。ペーシングの待機も含みます。
    pub fn run_cycle(&mut self) -> CycleOutcome {
        let control = Arc::clone(self.streamer.control());
        if control.stop_requested() {
            return CycleOutcome::Aborted;
        }

        if !self.streamer.has_consumers() {
            if !self.was_idle {
                debug!("No consumers, capture paused");
                self.was_idle = true;
            }
            self.streamer.idle(self.idle_wait_ms);
            return CycleOutcome::NoConsumers;
        }
        if self.was_idle {
            self.was_idle = false;
            self.streamer.restart_pacing();
        }

        match self.engine.trigger() {
            Ok(true) => {}
            Ok(false) => {
                warn!("前回のキャプチャが残っています。破棄します");
                self.engine.abort();
                return CycleOutcome::Busy;
            }
            Err(e) => {
                error!("キャプチャを開始できません: {}", e);
                self.streamer.pace();
                return CycleOutcome::Failed;
            }
        }

        let outcome = match self.engine.wait_for_frame(control.stop_flag()) {
            Ok(WaitOutcome::Ready(_)) => {
                let streamer = &mut self.streamer;
                match self.engine.with_frame(|frame| streamer.transmit(frame)) {
                    Ok(Ok(chunks)) => CycleOutcome::Streamed { chunks },
                    Ok(Err(e)) => {
                        warn!("フレーム送信に失敗: {}", e);
                        CycleOutcome::Failed
                    }
                    Err(e) => {
                        warn!("フレーム読み出しに失敗: {}", e);
                        control.record_corrupted();
                        self.engine.rearm();
                        CycleOutcome::Corrupted
                    }
                }
            }
            Ok(WaitOutcome::Corrupted) => {
                control.record_corrupted();
                self.engine.rearm();
                CycleOutcome::Corrupted
            }
            Ok(WaitOutcome::Aborted) => {
                self.engine.abort();
                return CycleOutcome::Aborted;
            }
            Err(e) => {
                error!("キャプチャ中のエラー: {}", e);
                control.record_corrupted();
                if !self.engine.rearm() {
                    self.engine.abort();
                }
                CycleOutcome::Corrupted
            }
        };

        self.streamer.pace();
        outcome
    }

    /// 停止要求までサイクルを回し、終わったら自身を返します
    pub fn run(mut self) -> Self {
        info!(
            "Capture loop started ({} fps, {} ms/frame)",
            self.control().fps(),
            self.control().interval_ms()
        );
        self.was_idle = false;
        self.streamer.restart_pacing();

        while !self.control().stop_requested() {
            self.run_cycle();
        }

        self.engine.abort();
        let stats = self.control().stats();
        info!(
            "Capture loop stopped: {} frames, {} chunks, {} corrupted",
            stats.frames_sent, stats.chunks_sent, stats.corrupted_frames
        );
        self
    }
}

/// 起動に失敗したとき、エラーと一緒にパイプラインを返す
pub type SpawnFailure<F, S, C> = (DeviceError, CameraPipeline<F, S, C>);

/// 実行中のキャプチャタスク
pub struct StreamTask<F, S, C> {
    handle: JoinHandle<Option<CameraPipeline<F, S, C>>>,
    control: Arc<StreamControl>,
}

impl<F, S, C> StreamTask<F, S, C> {
    pub fn control(&self) -> &Arc<StreamControl> {
        &self.control
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl<F, S, C> StreamTask<F, S, C>
where
    F: FrameFifo + Send + 'static,
    S: FrameSink + Send + 'static,
    C: Clock + 'static,
{
    /// パイプラインを専用スレッドに移して起動します。
    ///
    /// パイプラインはスレッドの起動が確定してからチャネルで渡すので、
    /// 起動に失敗しても呼び出し側に戻ります。
    pub fn spawn(
        pipeline: CameraPipeline<F, S, C>,
        settings: &TaskSettings,
    ) -> Result<Self, SpawnFailure<F, S, C>> {
        let control = Arc::clone(pipeline.control());
        control.clear_stop();

        #[cfg(feature = "esp")]
        if let Err(e) = apply_spawn_configuration(settings) {
            return Err((e, pipeline));
        }

        let (handoff_tx, handoff_rx) = mpsc::sync_channel::<CameraPipeline<F, S, C>>(1);
        let spawned = thread::Builder::new()
            .name(settings.name.into())
            .stack_size(settings.stack_size)
            .spawn(move || handoff_rx.recv().ok().map(CameraPipeline::run));

        #[cfg(feature = "esp")]
        restore_spawn_configuration();

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                error!("{} の起動に失敗: {}", settings.name, e);
                return Err((DeviceError::TaskSpawn(e.to_string()), pipeline));
            }
        };
        if let Err(mpsc::SendError(pipeline)) = handoff_tx.send(pipeline) {
            // 受け取る前にスレッドが終わった
            let _ = handle.join();
            return Err((DeviceError::TaskSpawn("handoff failed".into()), pipeline));
        }

        info!(
            "{} started (priority {}, stack {} bytes)",
            settings.name, settings.priority, settings.stack_size
        );
        Ok(Self { handle, control })
    }

    /// 停止を要求してタスクの終了を待ち、パイプラインを取り戻します
    pub fn stop(self) -> Result<CameraPipeline<F, S, C>, DeviceError> {
        self.control.request_stop();
        match self.handle.join() {
            Ok(Some(pipeline)) => Ok(pipeline),
            _ => Err(DeviceError::TaskLost),
        }
    }
}

#[cfg(feature = "esp")]
fn apply_spawn_configuration(settings: &TaskSettings) -> Result<(), DeviceError> {
    use esp_idf_hal::task::thread::ThreadSpawnConfiguration;

    ThreadSpawnConfiguration {
        stack_size: settings.stack_size,
        priority: settings.priority,
        ..Default::default()
    }
    .set()
    .map_err(|e| DeviceError::TaskSpawn(e.to_string()))
}

#[cfg(feature = "esp")]
fn restore_spawn_configuration() {
    use esp_idf_hal::task::thread::ThreadSpawnConfiguration;

    if let Err(e) = ThreadSpawnConfiguration::default().set() {
        error!("スレッド設定の復元に失敗: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use crate::hardware::camera::capture::CaptureSettings;
    use crate::hardware::camera::mock::{MockFrame, MockFrameFifo, RecordingSink};

    type TestPipeline = CameraPipeline<MockFrameFifo, RecordingSink, ManualClock>;

    fn pipeline(fifo: &MockFrameFifo, sink: &RecordingSink) -> (TestPipeline, ManualClock) {
        let clock = ManualClock::new();
        let settings = CaptureSettings {
            max_frame_size: 4096,
            burst_chunk_size: 256,
            poll_interval_ms: 5,
            timeout_ms: 50,
        };
        let engine = CaptureEngine::new(fifo.clone(), clock.clone(), settings);
        let control = Arc::new(StreamControl::new(10));
        let streamer = FrameStreamer::new(sink.clone(), clock.clone(), control, 100);
        (CameraPipeline::new(engine, streamer, 100), clock)
    }

    #[test]
    fn test_cycle_streams_ready_frame() {
        let fifo = MockFrameFifo::new();
        let sink = RecordingSink::default();
        fifo.push_frame(MockFrame::new(vec![7; 250]));
        let (mut pipeline, clock) = pipeline(&fifo, &sink);
        pipeline.streamer.restart_pacing();

        assert_eq!(pipeline.run_cycle(), CycleOutcome::Streamed { chunks: 3 });
        assert_eq!(sink.chunk_lengths(), vec![100, 100, 50]);
        assert_eq!(sink.frames(), vec![vec![7; 250]]);
        // 10 fps のペーシング
        assert_eq!(clock.now_ms(), 100);
    }

    #[test]
    fn test_cycle_skips_capture_without_consumers() {
        let fifo = MockFrameFifo::new();
        let sink = RecordingSink::default();
        sink.set_consumers(0);
        let (mut pipeline, _clock) = pipeline(&fifo, &sink);

        assert_eq!(pipeline.run_cycle(), CycleOutcome::NoConsumers);
        assert_eq!(fifo.capture_starts(), 0);
    }

    #[test]
    fn test_corrupted_frame_is_dropped_and_loop_continues() {
        let fifo = MockFrameFifo::new();
        let sink = RecordingSink::default();
        fifo.push_frame(MockFrame::new(vec![1; 16]).with_length(0));
        fifo.push_frame(MockFrame::new(vec![2; 16]));
        let (mut pipeline, _clock) = pipeline(&fifo, &sink);

        assert_eq!(pipeline.run_cycle(), CycleOutcome::Corrupted);
        assert_eq!(pipeline.run_cycle(), CycleOutcome::Streamed { chunks: 1 });
        assert_eq!(sink.frames(), vec![vec![2; 16]]);
        assert_eq!(pipeline.control().stats().corrupted_frames, 1);
    }

    #[test]
    fn test_cycle_aborts_when_stopped() {
        let fifo = MockFrameFifo::new();
        let sink = RecordingSink::default();
        let (mut pipeline, _clock) = pipeline(&fifo, &sink);
        pipeline.control().request_stop();

        assert_eq!(pipeline.run_cycle(), CycleOutcome::Aborted);
        assert_eq!(fifo.capture_starts(), 0);
    }

    #[test]
    fn test_task_returns_pipeline_on_stop() {
        let fifo = MockFrameFifo::new();
        let sink = RecordingSink::default();
        fifo.set_repeating_frame(MockFrame::new(vec![3; 64]));
        let (pipeline, _clock) = pipeline(&fifo, &sink);

        let task = StreamTask::spawn(pipeline, &TaskSettings::default())
            .map_err(|(e, _)| e)
            .unwrap();
        let pipeline = task.stop().unwrap();

        assert!(pipeline.control().stop_requested());
        assert!(!fifo.is_selected());
        assert!(!pipeline.engine.is_capturing());
    }

    #[test]
    fn test_failed_spawn_hands_pipeline_back() {
        let fifo = MockFrameFifo::new();
        let sink = RecordingSink::default();
        fifo.set_repeating_frame(MockFrame::new(vec![4; 64]));
        let (pipeline, _clock) = pipeline(&fifo, &sink);

        let oversized = TaskSettings {
            stack_size: usize::MAX / 2,
            ..TaskSettings::default()
        };
        let Err((error, pipeline)) = StreamTask::spawn(pipeline, &oversized) else {
            panic!("spawn with an impossible stack should fail");
        };
        assert!(matches!(error, DeviceError::TaskSpawn(_)));

        // 戻ってきたパイプラインでそのまま起動し直せる
        let task = StreamTask::spawn(pipeline, &TaskSettings::default())
            .map_err(|(e, _)| e)
            .unwrap();
        let pipeline = task.stop().unwrap();
        assert!(!pipeline.engine.is_capturing());
    }
}
