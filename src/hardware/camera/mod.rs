//! カメラノード: フレーム FIFO のキャプチャとストリーミング
pub mod arduchip;
pub mod capture;
pub mod device;
pub mod fifo;
pub mod ov2640_sequence;
pub mod pacer;
pub mod sink;
pub mod streamer;
pub mod task;

#[cfg(not(feature = "esp"))]
pub mod mock;

pub use arduchip::ArduChip;
pub use capture::{CaptureEngine, CaptureError, CaptureSettings, CaptureState, SharedCaptureState};
pub use device::{CameraDevice, CameraOptions};
pub use fifo::{FifoError, FrameFifo, Resolution};
pub use sink::{ChannelSink, FrameSink, SinkError, UdpFrameSink};
pub use streamer::{FrameStreamer, StreamControl, StreamError, StreamStats};
pub use task::{CameraPipeline, CycleOutcome, SpawnFailure, StreamTask, TaskSettings};
