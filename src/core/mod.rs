/// コアシステムモジュール
pub mod clock;
pub mod config;
pub mod config_validation;
pub mod device;
pub mod fps;
pub mod registry;
pub mod state_report;

pub use clock::{Clock, SystemClock};
#[cfg(not(feature = "esp"))]
pub use clock::ManualClock;
pub use config::{AppConfig, ConfigError};
pub use device::{DesiredDeviceState, Device, DeviceError, DeviceReport};
pub use fps::{frame_interval_ms, validate_fps, InvalidFps, DEFAULT_FPS, MAX_FPS, MIN_FPS};
pub use registry::{DeviceRegistry, RegistryError, SharedDevice};
pub use state_report::{ReportError, StatePublisher, StateReportingAdapter};
