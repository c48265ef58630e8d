#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use proptest::prelude::*;
    use tank_monitor::core::ManualClock;
    use tank_monitor::hardware::camera::capture::{PollOutcome, WaitOutcome};
    use tank_monitor::hardware::camera::mock::{MockFrame, MockFrameFifo};
    use tank_monitor::hardware::camera::{CaptureEngine, CaptureSettings, CaptureState};

    const MAX_FRAME: usize = 2048;

    fn settings() -> CaptureSettings {
        CaptureSettings {
            max_frame_size: MAX_FRAME,
            burst_chunk_size: 128,
            poll_interval_ms: 5,
            timeout_ms: 200,
        }
    }

    fn scripted_frame(length: usize, done_after: Option<u32>) -> MockFrame {
        match done_after {
            None => MockFrame::stalled(),
            Some(polls) => {
                let data: Vec<u8> = (0..length.min(MAX_FRAME)).map(|i| (i % 251) as u8).collect();
                MockFrame::new(data).with_length(length).done_after(polls)
            }
        }
    }

    proptest! {
        #[test]
        fn test_never_ready_with_invalid_length(
            script in prop::collection::vec(
                (0usize..=MAX_FRAME * 2, prop::option::weighted(0.9, 1u32..6)),
                1..24,
            )
        ) {
            let fifo = MockFrameFifo::new();
            let mut engine = CaptureEngine::new(fifo.clone(), ManualClock::new(), settings());
            let shared = engine.shared_state();
            let stop = AtomicBool::new(false);

            for (length, done_after) in script {
                fifo.push_frame(scripted_frame(length, done_after));
                prop_assert!(engine.trigger().unwrap());

                let outcome = engine.wait_for_frame(&stop).unwrap();
                let valid = done_after.is_some() && (1..=MAX_FRAME).contains(&length);

                if shared.is_frame_ready() {
                    prop_assert!(valid);
                }

                if valid {
                    prop_assert_eq!(outcome, WaitOutcome::Ready(length));
                    let read = engine.with_frame(|frame| frame.len()).unwrap();
                    prop_assert_eq!(read, length);
                } else {
                    prop_assert_eq!(outcome, WaitOutcome::Corrupted);
                    prop_assert_eq!(engine.state(), CaptureState::Corrupted);
                    prop_assert!(engine.rearm());
                }

                // どの入力でも 1 サイクルで Idle に戻る
                prop_assert_eq!(engine.state(), CaptureState::Idle);
                prop_assert!(!fifo.is_selected());
            }
        }
    }

    #[test]
    fn test_frame_bytes_survive_burst_chunking() {
        let fifo = MockFrameFifo::new();
        let data: Vec<u8> = (0..1000u32).map(|i| (i * 7) as u8).collect();
        fifo.push_frame(MockFrame::new(data.clone()));
        let mut engine = CaptureEngine::new(fifo.clone(), ManualClock::new(), settings());

        engine.trigger().unwrap();
        assert_eq!(engine.poll().unwrap(), PollOutcome::Ready(1000));
        let copied = engine.with_frame(<[u8]>::to_vec).unwrap();
        assert_eq!(copied, data);
    }

    #[test]
    fn test_max_length_frame_is_accepted() {
        let fifo = MockFrameFifo::new();
        fifo.push_frame(MockFrame::new(vec![0xAB; MAX_FRAME]));
        fifo.push_frame(MockFrame::new(vec![0xAB; 8]).with_length(MAX_FRAME + 1));
        let mut engine = CaptureEngine::new(fifo.clone(), ManualClock::new(), settings());

        engine.trigger().unwrap();
        assert_eq!(engine.poll().unwrap(), PollOutcome::Ready(MAX_FRAME));
        engine.with_frame(|_| ()).unwrap();

        engine.trigger().unwrap();
        assert_eq!(engine.poll().unwrap(), PollOutcome::Corrupted(MAX_FRAME + 1));
        assert_eq!(engine.stats().corrupted, 1);
        assert_eq!(engine.stats().frames_ready, 1);
    }
}
