//! 固定の基準時刻から計算する周期ウェイク (`xTaskDelayUntil` 相当)
//!
//! 「送信後に固定時間スリープ」だとキャプチャ・送信にかかった時間の分だけ
//! 周期がずれていくので、前回のウェイク予定時刻に周期を足した時刻まで眠ります。

use std::sync::atomic::{AtomicBool, Ordering};

use crate::core::clock::Clock;

/// 停止フラグを確認する間隔
pub const STOP_CHECK_SLICE_MS: u64 = 20;

#[derive(Debug, Default)]
pub struct FramePacer {
    anchor_ms: Option<u64>,
}

impl FramePacer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 基準時刻を現在に置き直す
    pub fn start(&mut self, now_ms: u64) {
        self.anchor_ms = Some(now_ms);
    }

    pub fn reset(&mut self) {
        self.anchor_ms = None;
    }

    pub fn anchor_ms(&self) -> Option<u64> {
        self.anchor_ms
    }

    /// 次のウェイク時刻まで眠り、眠った時間を返します。
    ///
    /// 1 周期以上遅れていたら追いつこうとせず、現在時刻を新しい基準にします。
    pub fn wait_next<C: Clock>(&mut self, clock: &C, period_ms: u64, stop: &AtomicBool) -> u64 {
        let now = clock.now_ms();
        let anchor = *self.anchor_ms.get_or_insert(now);
        let next_wake = anchor + period_ms;

        if now < next_wake {
            self.anchor_ms = Some(next_wake);
            sleep_unless_stopped(clock, next_wake - now, stop)
        } else if now - next_wake >= period_ms {
            self.anchor_ms = Some(now);
            0
        } else {
            self.anchor_ms = Some(next_wake);
            0
        }
    }
}

/// `ms` ミリ秒眠ります。停止フラグが立てば途中で戻ります。
pub fn sleep_unless_stopped<C: Clock>(clock: &C, ms: u64, stop: &AtomicBool) -> u64 {
    let mut slept = 0;
    while slept < ms {
        if stop.load(Ordering::Acquire) {
            break;
        }
        let slice = (ms - slept).min(STOP_CHECK_SLICE_MS);
        clock.sleep_ms(slice);
        slept += slice;
    }
    slept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;

    #[test]
    fn test_wake_times_do_not_drift() {
        let clock = ManualClock::new();
        let stop = AtomicBool::new(false);
        let mut pacer = FramePacer::new();
        pacer.start(clock.now_ms());

        let mut wakes = Vec::new();
        for work_ms in [50, 120, 10, 199] {
            clock.advance(work_ms);
            pacer.wait_next(&clock, 200, &stop);
            wakes.push(clock.now_ms());
        }
        assert_eq!(wakes, vec![200, 400, 600, 800]);
    }

    #[test]
    fn test_small_overrun_keeps_schedule() {
        let clock = ManualClock::new();
        let stop = AtomicBool::new(false);
        let mut pacer = FramePacer::new();
        pacer.start(0);

        clock.advance(230);
        assert_eq!(pacer.wait_next(&clock, 200, &stop), 0);
        assert_eq!(pacer.anchor_ms(), Some(200));

        clock.advance(20);
        assert_eq!(pacer.wait_next(&clock, 200, &stop), 150);
        assert_eq!(clock.now_ms(), 400);
    }

    #[test]
    fn test_large_overrun_reanchors() {
        let clock = ManualClock::new();
        let stop = AtomicBool::new(false);
        let mut pacer = FramePacer::new();
        pacer.start(0);

        clock.advance(700);
        assert_eq!(pacer.wait_next(&clock, 200, &stop), 0);
        assert_eq!(pacer.anchor_ms(), Some(700));
    }

    #[test]
    fn test_stop_interrupts_sleep() {
        let clock = ManualClock::new();
        let stop = AtomicBool::new(true);
        assert_eq!(sleep_unless_stopped(&clock, 1000, &stop), 0);
        assert_eq!(clock.now_ms(), 0);
    }
}
