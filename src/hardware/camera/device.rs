//! カメラノードのデバイス実装
//!
//! `CameraDevice` はキャプチャパイプラインを所有し、電源 ON でキャプチャ
//! タスクを起動、OFF で停止してパイプラインを取り戻します。コントローラから
//! 届いたコマンドレコードは `handle_datagram` で検証してから適用します。

use std::sync::Arc;

use log::{debug, error, info, warn};

use super::capture::{CaptureEngine, CaptureSettings, CaptureState, SharedCaptureState};
use super::fifo::{FrameFifo, Resolution};
use super::ov2640_sequence::OV2640_I2C_ADDR;
use super::sink::FrameSink;
use super::streamer::{FrameStreamer, StreamControl, StreamStats, DEFAULT_CHUNK_SIZE};
use super::task::{CameraPipeline, StreamTask, TaskSettings};
use crate::communication::command::{CameraAction, PowerCommand};
use crate::communication::transport::Datagram;
use crate::core::clock::Clock;
use crate::core::config::AppConfig;
use crate::core::device::{DesiredDeviceState, Device, DeviceError, DeviceReport};
use crate::core::fps::DEFAULT_FPS;
use crate::mac_address::MacAddress;

/// 統計ログの出力間隔
const STATS_LOG_INTERVAL_MS: u64 = 10_000;

#[derive(Debug, Clone, Copy)]
pub struct CameraOptions {
    pub resolution: Resolution,
    pub capture: CaptureSettings,
    pub chunk_size: usize,
    pub default_fps: u8,
    pub task: TaskSettings,
    /// `Some` の場合、このアドレス以外からのコマンドは無視する
    pub controller: Option<MacAddress>,
}

impl Default for CameraOptions {
    fn default() -> Self {
        Self {
            resolution: Resolution::default(),
            capture: CaptureSettings::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            default_fps: DEFAULT_FPS,
            task: TaskSettings::default(),
            controller: None,
        }
    }
}

impl CameraOptions {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            resolution: config.resolution,
            capture: config.capture,
            chunk_size: config.frame_chunk_size,
            default_fps: config.default_fps,
            task: config.task,
            controller: Some(config.controller_mac),
        }
    }
}

enum TaskSlot<F, S, C> {
    /// 停止中。パイプラインはここにある
    Parked(CameraPipeline<F, S, C>),
    Running(StreamTask<F, S, C>),
    /// タスクが異常終了してパイプラインを失った
    Lost,
}

pub struct CameraDevice<F, S, C> {
    slot: TaskSlot<F, S, C>,
    control: Arc<StreamControl>,
    capture_state: SharedCaptureState,
    clock: C,
    resolution: Resolution,
    task: TaskSettings,
    controller: Option<MacAddress>,
    initialized: bool,
    /// begin でセンサーが応答しなかった
    sensor_missing: bool,
    last_stats_log_ms: u64,
}

impl<F, S, C> CameraDevice<F, S, C>
where
    F: FrameFifo + Send + 'static,
    S: FrameSink + Send + 'static,
    C: Clock + Clone + 'static,
{
    pub fn new(fifo: F, sink: S, clock: C, options: CameraOptions) -> Self {
        let control = Arc::new(StreamControl::new(options.default_fps));
        let engine = CaptureEngine::new(fifo, clock.clone(), options.capture);
        let capture_state = engine.shared_state();
        let streamer = FrameStreamer::new(sink, clock.clone(), Arc::clone(&control), options.chunk_size);
        let pipeline = CameraPipeline::new(engine, streamer, options.task.idle_wait_ms);

        Self {
            slot: TaskSlot::Parked(pipeline),
            control,
            capture_state,
            last_stats_log_ms: clock.now_ms(),
            clock,
            resolution: options.resolution,
            task: options.task,
            controller: options.controller,
            initialized: false,
            sensor_missing: false,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn is_on(&self) -> bool {
        matches!(self.slot, TaskSlot::Running(_))
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn control(&self) -> &Arc<StreamControl> {
        &self.control
    }

    pub fn stats(&self) -> StreamStats {
        self.control.stats()
    }

    pub fn capture_state(&self) -> CaptureState {
        self.capture_state.get()
    }

    pub fn is_capturing(&self) -> bool {
        self.capture_state.is_capturing()
    }

    pub fn is_frame_ready(&self) -> bool {
        self.capture_state.is_frame_ready()
    }

    pub fn is_corrupted(&self) -> bool {
        self.capture_state.is_corrupted()
    }

    /// 目標 fps を変更します。ストリーミング中でも次のフレームから反映されます。
    pub fn set_fps(&mut self, fps: i32) -> Result<(), DeviceError> {
        self.control.set_target_fps(fps)?;
        Ok(())
    }

    /// デコード済みコマンドを適用します
    ///
    /// ON に範囲外の fps が付いていても、fps だけを無視して電源は ON にします。
    pub fn handle_command(&mut self, command: &PowerCommand) -> Result<(), DeviceError> {
        debug!("コマンド受信: {:?} fps={:?} ({})", command.action, command.fps, command.message);
        match command.action {
            CameraAction::On => {
                if let Some(fps) = command.fps {
                    if let Err(e) = self.set_fps(i32::from(fps)) {
                        warn!("ON コマンドの fps を無視します: {}", e);
                    }
                }
                self.turn_on()
            }
            CameraAction::Off => self.turn_off(),
            CameraAction::SetFps => match command.fps {
                Some(fps) => self.set_fps(i32::from(fps)),
                None => {
                    warn!("fps のない SET_FPS コマンドを無視します");
                    Ok(())
                }
            },
        }
    }

    /// 受信データグラムを検証して適用します。適用した場合は `true`。
    pub fn handle_datagram(&mut self, datagram: &Datagram) -> Result<bool, DeviceError> {
        if let Some(controller) = self.controller {
            if datagram.src != controller {
                warn!("未知の送信元からのデータを破棄: {}", datagram.src);
                return Ok(false);
            }
        }

        let command = match PowerCommand::decode(&datagram.data) {
            Ok(command) => command,
            Err(e) => {
                warn!("不正なコマンドレコードを破棄 ({}): {}", datagram.src, e);
                return Ok(false);
            }
        };

        self.handle_command(&command)?;
        Ok(true)
    }

    fn log_stats_if_due(&mut self) {
        let now = self.clock.now_ms();
        if now.saturating_sub(self.last_stats_log_ms) < STATS_LOG_INTERVAL_MS {
            return;
        }
        self.last_stats_log_ms = now;

        if self.is_on() {
            let stats = self.control.stats();
            info!(
                "Stream stats: {} frames, {} chunks, {} bytes, {} send errors, {} corrupted ({} fps)",
                stats.frames_sent,
                stats.chunks_sent,
                stats.bytes_sent,
                stats.send_errors,
                stats.corrupted_frames,
                self.control.fps()
            );
        }
    }
}

impl<F, S, C> Device for CameraDevice<F, S, C>
where
    F: FrameFifo + Send + 'static,
    S: FrameSink + Send + 'static,
    C: Clock + Clone + 'static,
{
    fn begin(&mut self) -> Result<(), DeviceError> {
        let pipeline = match &mut self.slot {
            TaskSlot::Parked(pipeline) => pipeline,
            TaskSlot::Running(_) => return Ok(()),
            TaskSlot::Lost => return Err(DeviceError::TaskLost),
        };
        let fifo = pipeline.engine.fifo_mut();

        match fifo.probe_sensor() {
            Ok(true) => {}
            Ok(false) => {
                error!("OV2640 が見つかりません (I2C 0x{:02X})", OV2640_I2C_ADDR);
                self.initialized = false;
                self.sensor_missing = true;
                return Err(DeviceError::HardwareNotFound(OV2640_I2C_ADDR));
            }
            Err(e) => {
                error!("センサーの確認に失敗: {}", e);
                self.initialized = false;
                return Err(DeviceError::Hardware(e.to_string()));
            }
        }

        if let Err(e) = fifo.init(self.resolution) {
            error!("カメラの初期化に失敗: {}", e);
            self.initialized = false;
            return Err(DeviceError::Hardware(e.to_string()));
        }

        self.initialized = true;
        self.sensor_missing = false;
        info!("カメラ初期化完了: {}", self.resolution);
        Ok(())
    }

    fn update(&mut self) -> Result<(), DeviceError> {
        if let TaskSlot::Running(task) = &self.slot {
            if task.is_finished() {
                let slot = std::mem::replace(&mut self.slot, TaskSlot::Lost);
                if let TaskSlot::Running(task) = slot {
                    match task.stop() {
                        Ok(pipeline) => {
                            warn!("キャプチャタスクが停止していました");
                            self.slot = TaskSlot::Parked(pipeline);
                        }
                        Err(e) => {
                            error!("{}", e);
                            return Err(e);
                        }
                    }
                }
            }
        }

        self.log_stats_if_due();
        Ok(())
    }

    fn turn_on(&mut self) -> Result<(), DeviceError> {
        if !self.initialized {
            warn!("未初期化のカメラは ON にできません");
            return Err(DeviceError::NotInitialized);
        }

        match std::mem::replace(&mut self.slot, TaskSlot::Lost) {
            TaskSlot::Running(task) => {
                self.slot = TaskSlot::Running(task);
                Ok(())
            }
            TaskSlot::Parked(pipeline) => match StreamTask::spawn(pipeline, &self.task) {
                Ok(task) => {
                    self.slot = TaskSlot::Running(task);
                    info!("Camera ON ({} fps)", self.control.fps());
                    Ok(())
                }
                Err((e, pipeline)) => {
                    // 次の turn_on で再試行できるよう戻しておく
                    self.slot = TaskSlot::Parked(pipeline);
                    Err(e)
                }
            },
            TaskSlot::Lost => Err(DeviceError::TaskLost),
        }
    }

    fn turn_off(&mut self) -> Result<(), DeviceError> {
        match std::mem::replace(&mut self.slot, TaskSlot::Lost) {
            TaskSlot::Running(task) => {
                let pipeline = task.stop()?;
                self.slot = TaskSlot::Parked(pipeline);
                info!("Camera OFF");
                Ok(())
            }
            other => {
                self.slot = other;
                Ok(())
            }
        }
    }

    fn apply_state(&mut self, desired: &DesiredDeviceState) -> Result<(), DeviceError> {
        // fps が不正でも電源操作は止めない
        let fps_result = match desired.fps {
            Some(fps) => self.set_fps(fps),
            None => Ok(()),
        };

        match desired.state {
            Some(true) => self.turn_on()?,
            Some(false) => self.turn_off()?,
            None => {}
        }

        fps_result
    }

    fn report_state(&self) -> DeviceReport {
        DeviceReport {
            state: self.is_on(),
            error: self.sensor_missing,
            fps: self.control.fps(),
        }
    }
}

impl<F, S, C> Drop for CameraDevice<F, S, C> {
    fn drop(&mut self) {
        if let TaskSlot::Running(task) = &self.slot {
            task.control().request_stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use crate::core::fps::InvalidFps;
    use crate::hardware::camera::mock::{MockFrame, MockFrameFifo, RecordingSink};

    const CONTROLLER: MacAddress = MacAddress::new([0x24, 0x0a, 0xc4, 0, 0, 1]);

    fn camera(fifo: &MockFrameFifo) -> CameraDevice<MockFrameFifo, RecordingSink, ManualClock> {
        let options = CameraOptions {
            controller: Some(CONTROLLER),
            ..CameraOptions::default()
        };
        CameraDevice::new(fifo.clone(), RecordingSink::default(), ManualClock::new(), options)
    }

    #[test]
    fn test_begin_fails_fast_without_sensor() {
        let fifo = MockFrameFifo::without_sensor();
        let mut camera = camera(&fifo);

        assert!(matches!(camera.begin(), Err(DeviceError::HardwareNotFound(0x30))));
        assert!(!camera.is_initialized());
        assert!(camera.report_state().error);
        assert!(matches!(camera.turn_on(), Err(DeviceError::NotInitialized)));
        assert!(!camera.is_on());
    }

    #[test]
    fn test_begin_applies_resolution() {
        let fifo = MockFrameFifo::new();
        let mut camera = camera(&fifo);
        camera.begin().unwrap();
        assert_eq!(fifo.resolution(), Some(Resolution::Vga));
        assert!(!camera.report_state().error);
    }

    #[test]
    fn test_turn_on_and_off_are_idempotent() {
        let fifo = MockFrameFifo::new();
        fifo.set_repeating_frame(MockFrame::new(vec![1; 32]));
        let mut camera = camera(&fifo);
        camera.begin().unwrap();

        camera.turn_on().unwrap();
        camera.turn_on().unwrap();
        assert!(camera.report_state().state);

        camera.turn_off().unwrap();
        camera.turn_off().unwrap();
        assert!(!camera.report_state().state);
        assert!(!fifo.is_selected());
        assert_eq!(camera.capture_state(), CaptureState::Idle);
    }

    #[test]
    fn test_on_with_invalid_fps_still_turns_on() {
        let fifo = MockFrameFifo::new();
        let mut camera = camera(&fifo);
        camera.begin().unwrap();

        let datagram = Datagram {
            src: CONTROLLER,
            data: PowerCommand::on(40).encode().to_vec(),
        };
        assert!(camera.handle_datagram(&datagram).unwrap());
        assert!(camera.is_on());
        assert_eq!(camera.report_state().fps, DEFAULT_FPS);
        camera.turn_off().unwrap();
    }

    #[test]
    fn test_datagram_from_unknown_sender_is_ignored() {
        let fifo = MockFrameFifo::new();
        let mut camera = camera(&fifo);
        camera.begin().unwrap();

        let datagram = Datagram {
            src: MacAddress::new([9; 6]),
            data: PowerCommand::on(5).encode().to_vec(),
        };
        assert!(!camera.handle_datagram(&datagram).unwrap());
        assert!(!camera.is_on());
    }

    #[test]
    fn test_truncated_datagram_is_ignored() {
        let fifo = MockFrameFifo::new();
        let mut camera = camera(&fifo);
        camera.begin().unwrap();

        let datagram = Datagram {
            src: CONTROLLER,
            data: PowerCommand::on(5).encode()[..20].to_vec(),
        };
        assert!(!camera.handle_datagram(&datagram).unwrap());
        assert!(!camera.is_on());
    }

    #[test]
    fn test_set_fps_command_changes_rate() {
        let fifo = MockFrameFifo::new();
        let mut camera = camera(&fifo);

        camera.handle_command(&PowerCommand::set_fps(12)).unwrap();
        assert_eq!(camera.control().fps(), 12);
        assert_eq!(camera.control().interval_ms(), 83);

        assert!(matches!(
            camera.handle_command(&PowerCommand::set_fps(31)),
            Err(DeviceError::InvalidFps(InvalidFps(31)))
        ));
        assert_eq!(camera.control().fps(), 12);
    }

    #[test]
    fn test_apply_state_rejects_fps_but_keeps_power() {
        let fifo = MockFrameFifo::new();
        let mut camera = camera(&fifo);
        camera.begin().unwrap();

        let result = camera.apply_state(&DesiredDeviceState::power(true).with_fps(0));
        assert!(matches!(result, Err(DeviceError::InvalidFps(InvalidFps(0)))));
        assert!(camera.is_on());
        assert_eq!(camera.control().fps(), DEFAULT_FPS);

        camera.apply_state(&DesiredDeviceState::power(false)).unwrap();
        assert!(!camera.is_on());
    }

    #[test]
    fn test_failed_task_start_keeps_camera_usable() {
        let fifo = MockFrameFifo::new();
        let options = CameraOptions {
            task: TaskSettings {
                stack_size: usize::MAX / 2,
                ..TaskSettings::default()
            },
            ..CameraOptions::default()
        };
        let mut camera = CameraDevice::new(fifo.clone(), RecordingSink::default(), ManualClock::new(), options);
        camera.begin().unwrap();

        assert!(matches!(camera.turn_on(), Err(DeviceError::TaskSpawn(_))));
        // 再試行しても TaskLost にはならない
        assert!(matches!(camera.turn_on(), Err(DeviceError::TaskSpawn(_))));
        assert!(!camera.is_on());
        assert_eq!(camera.report_state(), DeviceReport { state: false, error: false, fps: DEFAULT_FPS });

        // パイプラインは手元に残っているので begin もやり直せる
        camera.begin().unwrap();
        camera.turn_off().unwrap();
    }

    #[test]
    fn test_sensor_io_error_is_not_reported_as_missing_sensor() {
        let fifo = MockFrameFifo::new();
        fifo.fail_next_sensor_check();
        let mut camera = camera(&fifo);

        assert!(matches!(camera.begin(), Err(DeviceError::Hardware(_))));
        assert!(!camera.is_initialized());
        assert!(!camera.report_state().error);

        camera.begin().unwrap();
        assert!(camera.is_initialized());
    }
}
