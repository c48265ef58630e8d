//! desired 状態を損失のあるリンク越しにカメラノードへ収束させるチャネル
//!
//! - `apply_desired` で意図を更新し、即座に 1 回送信します
//! - `tick` をメインループから (1 秒に 1 回以上) 呼ぶと、収束していなければ
//!   最小間隔を空けて再送し、上限に達したら `error` を立てて止まります
//! - `ActualState` は送信完了コールバックが成功を返したときだけ更新します
//! - 送信中のコマンドは常に 1 つだけです。完了前に `apply_desired` が来たら
//!   送信を保留し、完了 (またはタイムアウト) 後に `tick` が送ります
//!
//! 完了通知にはどの送信のものかを示す情報がありません。ESP-NOW の送信完了
//! コールバックは送信順に 1 回ずつ呼ばれるので、同時に 1 つしか送らなければ
//! 届いた完了は送信中のコマンドのものです。タイムアウトで見切った送信の
//! 完了が後から届いた場合は、その件数分だけ読み捨てます。
//!
//! 送信完了の成功は「物理的に送れた」ことしか意味せず、カメラノードが
//! 実際に適用したことの確認ではありません。アプリケーションレベルの ACK が
//! ない以上、`ActualState` は楽観的な推定値です。

use log::{debug, error, info, warn};

use super::record::{CameraAction, PowerCommand};
use super::retry_policy::RetryPolicy;
use crate::communication::transport::{MessageTransport, SendStatus, TransportError};
use crate::core::clock::Clock;
use crate::core::fps::{validate_fps, InvalidFps, DEFAULT_FPS};
use crate::mac_address::MacAddress;

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error(transparent)]
    InvalidFps(#[from] InvalidFps),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// 外部から与えられた意図と、その送信の進み具合
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DesiredState {
    pub should_be_on: bool,
    pub target_fps: u8,
    pub retry_count: u8,
    pub sending: bool,
    /// 送信回数上限に達したら立ち、次の `apply_desired` まで残る
    pub error: bool,
}

impl Default for DesiredState {
    fn default() -> Self {
        Self {
            should_be_on: false,
            target_fps: DEFAULT_FPS,
            retry_count: 0,
            sending: false,
            error: false,
        }
    }
}

/// コントローラ側の推定状態
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActualState {
    pub is_on: bool,
    /// 最後に送信成功したコマンドが運んだ fps
    pub fps: Option<u8>,
}

/// `tick` 1 回分の結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// 送信中の遷移がない
    Idle,
    /// 推定状態が desired に一致した
    Converged,
    /// 送信完了通知を待っている
    AwaitingCompletion,
    /// 保留していた送信を行った
    Sent,
    /// 最小再送間隔が未経過
    Throttled,
    /// 再送を送信キューに積んだ
    Retried,
    /// 再送したが送信キューが拒否した
    SendRejected,
    /// 上限に達して諦めた
    RetryExhausted,
}

#[derive(Debug, Clone)]
struct InFlight {
    command: PowerCommand,
    sent_at_ms: u64,
}

pub struct CommandChannel<T, C> {
    transport: T,
    peer: MacAddress,
    clock: C,
    policy: RetryPolicy,
    desired: DesiredState,
    actual: ActualState,
    in_flight: Option<InFlight>,
    /// 送信中に `apply_desired` が来て、まだ送っていない
    deferred: bool,
    /// タイムアウトで見切った送信のうち、完了通知がまだ届いていない数
    stale_completions: u32,
    last_attempt_ms: Option<u64>,
    total_attempts: u32,
}

impl<T: MessageTransport, C: Clock> CommandChannel<T, C> {
    pub fn new(transport: T, peer: MacAddress, clock: C, policy: RetryPolicy) -> Self {
        Self {
            transport,
            peer,
            clock,
            policy,
            desired: DesiredState::default(),
            actual: ActualState::default(),
            in_flight: None,
            deferred: false,
            stale_completions: 0,
            last_attempt_ms: None,
            total_attempts: 0,
        }
    }

    pub fn desired(&self) -> DesiredState {
        self.desired
    }

    pub fn actual(&self) -> ActualState {
        self.actual
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn peer(&self) -> MacAddress {
        self.peer
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// 起動からの送信試行の累計 (キュー拒否を含む)
    pub fn total_attempts(&self) -> u32 {
        self.total_attempts
    }

    /// 送信完了を待っているコマンドがあるか
    pub fn has_command_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// 新しい意図を適用し、即座に 1 回送信します。
    ///
    /// 前のコマンドの完了待ちなら送信は保留され、次の `tick` 以降で送られます。
    /// `fps` が `[1,30]` の外なら `target_fps` は据え置き、on/off 部分だけ適用した上で
    /// `CommandError::InvalidFps` を返します。
    pub fn apply_desired(&mut self, on: bool, fps: i32) -> Result<(), CommandError> {
        let fps_result = validate_fps(fps);
        self.drain_completions();

        self.desired.should_be_on = on;
        match fps_result {
            Ok(fps) => self.desired.target_fps = fps,
            Err(ref e) => warn!("{} (前回値 {} fps を維持)", e, self.desired.target_fps),
        }
        self.desired.retry_count = 0;
        self.desired.sending = true;
        self.desired.error = false;

        info!(
            "Desired camera state: on={} fps={}",
            self.desired.should_be_on, self.desired.target_fps
        );

        if let Some(in_flight) = &self.in_flight {
            debug!("{:?} の完了待ちのため送信を保留", in_flight.command.action);
            self.deferred = true;
        } else {
            self.deferred = false;
            let command = self.next_command();
            if let Err(e) = self.attempt_send(command) {
                // tick の再送に任せる
                debug!("initial send rejected: {}", e);
            }
        }

        fps_result.map(|_| ()).map_err(CommandError::from)
    }

    /// コマンドをトランスポートに渡してすぐ戻ります。結果は完了コールバックで観測します。
    pub fn attempt_send(&mut self, command: PowerCommand) -> Result<(), CommandError> {
        let now = self.clock.now_ms();
        self.last_attempt_ms = Some(now);
        self.total_attempts += 1;

        match self.transport.send(&self.peer, &command.encode()) {
            Ok(()) => {
                debug!(
                    "ESP-NOW command queued: {:?} fps={:?} (retry {})",
                    command.action, command.fps, self.desired.retry_count
                );
                self.in_flight = Some(InFlight {
                    command,
                    sent_at_ms: now,
                });
                Ok(())
            }
            Err(e) => {
                warn!("コマンド送信キュー投入失敗: {}", e);
                self.in_flight = None;
                Err(e.into())
            }
        }
    }

    /// 送信完了コールバックの結果を反映します
    pub fn on_send_complete(&mut self, status: SendStatus) {
        if self.stale_completions > 0 {
            self.stale_completions -= 1;
            debug!("Dropping late send status {:?} of an abandoned command", status);
            return;
        }
        let Some(in_flight) = self.in_flight.take() else {
            debug!("Ignoring send status {:?} with no command in flight", status);
            return;
        };

        match status {
            SendStatus::Success => {
                self.record_transmitted(&in_flight.command);
                if self.desired.sending && self.converged() {
                    self.desired.sending = false;
                    info!(
                        "Camera command delivered: on={} fps={:?} (retries {})",
                        self.actual.is_on, self.actual.fps, self.desired.retry_count
                    );
                }
            }
            SendStatus::Failure => {
                warn!(
                    "コマンドの配送に失敗しました: {:?} (retry {})",
                    in_flight.command.action, self.desired.retry_count
                );
            }
        }
    }

    /// メインループから定期的に呼びます。ブロックしません。
    pub fn tick(&mut self) -> TickOutcome {
        self.drain_completions();

        if !self.desired.sending {
            return TickOutcome::Idle;
        }

        let now = self.clock.now_ms();
        if let Some(in_flight) = &self.in_flight {
            if self.policy.completion_timed_out(in_flight.sent_at_ms, now) {
                warn!("送信完了通知がタイムアウトしました: {:?}", in_flight.command.action);
                self.in_flight = None;
                self.stale_completions += 1;
            } else if !self.keeps_converged(&in_flight.command) {
                return TickOutcome::AwaitingCompletion;
            }
        }

        if self.converged() {
            self.desired.sending = false;
            self.deferred = false;
            return TickOutcome::Converged;
        }
        if self.in_flight.is_some() {
            return TickOutcome::AwaitingCompletion;
        }

        if self.deferred {
            // apply_desired の初回送信の代わりなので retry_count は増やさない
            self.deferred = false;
            let command = self.next_command();
            return match self.attempt_send(command) {
                Ok(()) => TickOutcome::Sent,
                Err(_) => TickOutcome::SendRejected,
            };
        }

        if !self.policy.interval_elapsed(self.last_attempt_ms, now) {
            return TickOutcome::Throttled;
        }

        self.desired.retry_count += 1;
        if self.desired.retry_count >= self.policy.max_retries {
            self.desired.sending = false;
            self.desired.error = true;
            // 以降の完了通知は送信中のものがないので読み捨てられる
            self.stale_completions = 0;
            error!(
                "最大送信回数 ({}) に達しました: on={} fps={}",
                self.policy.max_retries, self.desired.should_be_on, self.desired.target_fps
            );
            return TickOutcome::RetryExhausted;
        }

        let command = self.next_command();
        match self.attempt_send(command) {
            Ok(()) => TickOutcome::Retried,
            Err(_) => TickOutcome::SendRejected,
        }
    }

    /// 推定状態が desired と一致しているか
    pub fn converged(&self) -> bool {
        self.matches_desired(&self.actual)
    }

    fn matches_desired(&self, actual: &ActualState) -> bool {
        if actual.is_on != self.desired.should_be_on {
            return false;
        }
        !self.desired.should_be_on || actual.fps == Some(self.desired.target_fps)
    }

    fn drain_completions(&mut self) {
        while let Some(status) = self.transport.poll_send_status() {
            self.on_send_complete(status);
        }
    }

    /// `command` の送信成功が反映されても desired と一致したままか
    fn keeps_converged(&self, command: &PowerCommand) -> bool {
        let mut after = self.actual;
        apply_transmitted(&mut after, command);
        self.matches_desired(&after)
    }

    fn next_command(&self) -> PowerCommand {
        if !self.desired.should_be_on {
            PowerCommand::off()
        } else if self.actual.is_on && self.actual.fps != Some(self.desired.target_fps) {
            PowerCommand::set_fps(self.desired.target_fps)
        } else {
            PowerCommand::on(self.desired.target_fps)
        }
    }

    fn record_transmitted(&mut self, command: &PowerCommand) {
        apply_transmitted(&mut self.actual, command);
    }
}

fn apply_transmitted(actual: &mut ActualState, command: &PowerCommand) {
    match command.action {
        CameraAction::Off => actual.is_on = false,
        CameraAction::On => {
            actual.is_on = true;
            if command.fps.is_some() {
                actual.fps = command.fps;
            }
        }
        CameraAction::SetFps => {
            if command.fps.is_some() {
                actual.fps = command.fps;
            }
        }
    }
}
