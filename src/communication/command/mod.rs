//! カメラ制御コマンド (ワイヤーレコード・再送ポリシー・コマンドチャネル)
pub mod channel;
pub mod record;
pub mod retry_policy;

pub use channel::{ActualState, CommandChannel, CommandError, DesiredState, TickOutcome};
pub use record::{CameraAction, PowerCommand, RecordError, COMMAND_RECORD_SIZE};
pub use retry_policy::RetryPolicy;
