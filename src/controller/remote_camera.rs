//! コントローラ側から見たカメラ
//!
//! `Device` 契約の裏で `CommandChannel` を動かします。`turn_on` などは意図を
//! 更新して 1 回送るだけで、収束は `update` (= `tick`) に任せます。

use log::{info, warn};

use crate::communication::command::{
    ActualState, CommandChannel, CommandError, DesiredState, RetryPolicy, TickOutcome,
};
use crate::communication::transport::MessageTransport;
use crate::core::clock::Clock;
use crate::core::device::{DesiredDeviceState, Device, DeviceError, DeviceReport};
use crate::mac_address::MacAddress;

pub struct RemoteCamera<T, C> {
    channel: CommandChannel<T, C>,
    last_outcome: TickOutcome,
}

impl<T: MessageTransport, C: Clock> RemoteCamera<T, C> {
    pub fn new(transport: T, peer: MacAddress, clock: C, policy: RetryPolicy) -> Self {
        Self::from_channel(CommandChannel::new(transport, peer, clock, policy))
    }

    pub fn from_channel(channel: CommandChannel<T, C>) -> Self {
        Self {
            channel,
            last_outcome: TickOutcome::Idle,
        }
    }

    pub fn channel(&self) -> &CommandChannel<T, C> {
        &self.channel
    }

    pub fn desired(&self) -> DesiredState {
        self.channel.desired()
    }

    pub fn actual(&self) -> ActualState {
        self.channel.actual()
    }

    pub fn last_outcome(&self) -> TickOutcome {
        self.last_outcome
    }

    fn apply(&mut self, on: bool, fps: i32) -> Result<(), DeviceError> {
        self.channel.apply_desired(on, fps).map_err(into_device_error)
    }
}

fn into_device_error(e: CommandError) -> DeviceError {
    match e {
        CommandError::InvalidFps(e) => DeviceError::InvalidFps(e),
        CommandError::Transport(e) => DeviceError::Transport(e),
    }
}

impl<T: MessageTransport, C: Clock> Device for RemoteCamera<T, C> {
    fn begin(&mut self) -> Result<(), DeviceError> {
        info!("Remote camera at {}", self.channel.peer());
        Ok(())
    }

    fn update(&mut self) -> Result<(), DeviceError> {
        let outcome = self.channel.tick();
        if outcome != self.last_outcome {
            match outcome {
                TickOutcome::RetryExhausted => {
                    warn!("カメラへのコマンドを諦めました ({})", self.channel.peer())
                }
                TickOutcome::Converged => info!("Camera state converged: {:?}", self.channel.actual()),
                _ => {}
            }
        }
        self.last_outcome = outcome;
        Ok(())
    }

    fn turn_on(&mut self) -> Result<(), DeviceError> {
        let fps = self.channel.desired().target_fps;
        self.apply(true, i32::from(fps))
    }

    fn turn_off(&mut self) -> Result<(), DeviceError> {
        let fps = self.channel.desired().target_fps;
        self.apply(false, i32::from(fps))
    }

    fn apply_state(&mut self, desired: &DesiredDeviceState) -> Result<(), DeviceError> {
        if desired.state.is_none() && desired.fps.is_none() {
            return Ok(());
        }
        let current = self.channel.desired();
        let on = desired.state.unwrap_or(current.should_be_on);
        let fps = desired.fps.unwrap_or(i32::from(current.target_fps));
        self.apply(on, fps)
    }

    fn report_state(&self) -> DeviceReport {
        let desired = self.channel.desired();
        let actual = self.channel.actual();
        DeviceReport {
            state: actual.is_on,
            error: desired.error,
            fps: actual.fps.unwrap_or(desired.target_fps),
        }
    }
}
