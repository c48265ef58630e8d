use super::fifo::{FifoError, FrameFifo, Resolution};
use super::sink::{FrameSink, SinkError};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// 台本化された 1 キャプチャ分の FIFO 内容
#[derive(Debug, Clone)]
pub struct MockFrame {
    pub data: Vec<u8>,
    /// 長さレジスタが返す値。`None` なら `data.len()`
    pub reported_length: Option<usize>,
    /// 何回目のポーリングで完了フラグが立つか。`None` なら立たない
    pub done_after_polls: Option<u32>,
}

impl MockFrame {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            reported_length: None,
            done_after_polls: Some(1),
        }
    }

    pub fn with_length(mut self, length: usize) -> Self {
        self.reported_length = Some(length);
        self
    }

    pub fn done_after(mut self, polls: u32) -> Self {
        self.done_after_polls = Some(polls);
        self
    }

    /// 完了フラグが立たないキャプチャ
    pub fn stalled() -> Self {
        Self {
            data: Vec::new(),
            reported_length: None,
            done_after_polls: None,
        }
    }
}

#[derive(Debug, Default)]
struct MockFifoState {
    sensor_missing: bool,
    resolution: Option<Resolution>,
    frames: VecDeque<MockFrame>,
    repeating: Option<MockFrame>,
    current: Option<MockFrame>,
    polls: u32,
    selected: bool,
    burst_offset: usize,
    capture_starts: usize,
    fail_next_burst_read: bool,
    fail_next_sensor_check: bool,
}

/// テスト用のフレーム FIFO モック
///
/// クローンは状態を共有するので、エンジンに渡した後もテスト側から観測できます。
#[derive(Debug, Clone, Default)]
pub struct MockFrameFifo {
    state: Arc<Mutex<MockFifoState>>,
}

impl MockFrameFifo {
    pub fn new() -> Self {
        Self::default()
    }

    /// センサーが応答しないハードウェア
    pub fn without_sensor() -> Self {
        let mock = Self::new();
        mock.state.lock().unwrap().sensor_missing = true;
        mock
    }

    pub fn push_frame(&self, frame: MockFrame) {
        self.state.lock().unwrap().frames.push_back(frame);
    }

    /// 台本が尽きた後に毎回返すフレーム
    pub fn set_repeating_frame(&self, frame: MockFrame) {
        self.state.lock().unwrap().repeating = Some(frame);
    }

    /// 次回のセンサー確認で I2C エラーを返す
    pub fn fail_next_sensor_check(&self) {
        self.state.lock().unwrap().fail_next_sensor_check = true;
    }

    pub fn fail_next_burst_read(&self) {
        self.state.lock().unwrap().fail_next_burst_read = true;
    }

    pub fn is_selected(&self) -> bool {
        self.state.lock().unwrap().selected
    }

    pub fn capture_starts(&self) -> usize {
        self.state.lock().unwrap().capture_starts
    }

    pub fn resolution(&self) -> Option<Resolution> {
        self.state.lock().unwrap().resolution
    }
}

impl FrameFifo for MockFrameFifo {
    fn probe_sensor(&mut self) -> Result<bool, FifoError> {
        let mut state = self.state.lock().unwrap();
        if std::mem::take(&mut state.fail_next_sensor_check) {
            return Err(FifoError::I2c("simulated NACK".into()));
        }
        Ok(!state.sensor_missing)
    }

    fn init(&mut self, resolution: Resolution) -> Result<(), FifoError> {
        self.state.lock().unwrap().resolution = Some(resolution);
        Ok(())
    }

    fn start_capture(&mut self) -> Result<(), FifoError> {
        let mut state = self.state.lock().unwrap();
        let next = state.frames.pop_front().or_else(|| state.repeating.clone());
        state.current = next;
        state.polls = 0;
        state.capture_starts += 1;
        Ok(())
    }

    fn capture_done(&mut self) -> Result<bool, FifoError> {
        let mut state = self.state.lock().unwrap();
        state.polls += 1;
        let polls = state.polls;
        Ok(state
            .current
            .as_ref()
            .and_then(|frame| frame.done_after_polls)
            .is_some_and(|after| polls >= after))
    }

    fn fifo_length(&mut self) -> Result<usize, FifoError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .current
            .as_ref()
            .map(|frame| frame.reported_length.unwrap_or(frame.data.len()))
            .unwrap_or(0))
    }

    fn begin_burst(&mut self) -> Result<(), FifoError> {
        let mut state = self.state.lock().unwrap();
        state.selected = true;
        state.burst_offset = 0;
        Ok(())
    }

    fn read_burst(&mut self, buf: &mut [u8]) -> Result<(), FifoError> {
        let mut state = self.state.lock().unwrap();
        if std::mem::take(&mut state.fail_next_burst_read) {
            return Err(FifoError::Spi("simulated burst read failure".into()));
        }
        let offset = state.burst_offset;
        let data = state.current.as_ref().map(|f| f.data.as_slice()).unwrap_or(&[]);
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte = data.get(offset + i).copied().unwrap_or(0);
        }
        state.burst_offset += buf.len();
        Ok(())
    }

    fn end_burst(&mut self) -> Result<(), FifoError> {
        self.state.lock().unwrap().selected = false;
        Ok(())
    }
}

/// 送信されたチャンクを記録するシンク
#[derive(Debug, Clone)]
pub struct RecordingSink {
    pub chunks: Arc<Mutex<Vec<Vec<u8>>>>,
    pub frames: Arc<Mutex<Vec<Vec<u8>>>>,
    consumers: Arc<Mutex<usize>>,
    max_payload: usize,
    fail_sends: Arc<Mutex<bool>>,
    current: Vec<u8>,
}

impl Default for RecordingSink {
    fn default() -> Self {
        Self::new(usize::MAX)
    }
}

impl RecordingSink {
    /// 消費者 1 つが接続済みのシンク
    pub fn new(max_payload: usize) -> Self {
        Self {
            chunks: Arc::new(Mutex::new(Vec::new())),
            frames: Arc::new(Mutex::new(Vec::new())),
            consumers: Arc::new(Mutex::new(1)),
            max_payload,
            fail_sends: Arc::new(Mutex::new(false)),
            current: Vec::new(),
        }
    }

    pub fn set_consumers(&self, count: usize) {
        *self.consumers.lock().unwrap() = count;
    }

    pub fn set_fail_sends(&self, fail: bool) {
        *self.fail_sends.lock().unwrap() = fail;
    }

    pub fn chunk_lengths(&self) -> Vec<usize> {
        self.chunks.lock().unwrap().iter().map(Vec::len).collect()
    }

    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.frames.lock().unwrap().clone()
    }
}

impl FrameSink for RecordingSink {
    fn consumer_count(&self) -> usize {
        *self.consumers.lock().unwrap()
    }

    fn max_payload(&self) -> usize {
        self.max_payload
    }

    fn send_chunk(&mut self, chunk: &[u8]) -> Result<(), SinkError> {
        if *self.fail_sends.lock().unwrap() {
            return Err(SinkError::Io(std::io::Error::other("simulated send failure")));
        }
        self.chunks.lock().unwrap().push(chunk.to_vec());
        self.current.extend_from_slice(chunk);
        Ok(())
    }

    fn end_frame(&mut self) -> Result<(), SinkError> {
        let frame = std::mem::take(&mut self.current);
        self.frames.lock().unwrap().push(frame);
        Ok(())
    }
}
