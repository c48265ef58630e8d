#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use tank_monitor::communication::command::PowerCommand;
    use tank_monitor::communication::Datagram;
    use tank_monitor::core::{DesiredDeviceState, Device, DeviceError, ManualClock, DEFAULT_FPS};
    use tank_monitor::hardware::camera::mock::{MockFrame, MockFrameFifo, RecordingSink};
    use tank_monitor::hardware::camera::{CameraDevice, CameraOptions, CaptureState, Resolution};
    use tank_monitor::MacAddress;

    const CONTROLLER: MacAddress = MacAddress::new([0x24, 0x0a, 0xc4, 0x00, 0x00, 0x01]);

    type TestCamera = CameraDevice<MockFrameFifo, RecordingSink, ManualClock>;

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn camera(fifo: &MockFrameFifo, sink: &RecordingSink) -> TestCamera {
        let options = CameraOptions {
            resolution: Resolution::Svga,
            controller: Some(CONTROLLER),
            ..CameraOptions::default()
        };
        CameraDevice::new(fifo.clone(), sink.clone(), ManualClock::new(), options)
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        condition()
    }

    fn command(record: PowerCommand) -> Datagram {
        Datagram {
            src: CONTROLLER,
            data: record.encode().to_vec(),
        }
    }

    #[test]
    fn test_scenario_b_on_with_invalid_fps() {
        init_logger();
        let fifo = MockFrameFifo::new();
        let sink = RecordingSink::default();
        fifo.set_repeating_frame(MockFrame::new(vec![0x5A; 700]));
        let mut camera = camera(&fifo, &sink);
        camera.begin().unwrap();

        assert!(camera.handle_datagram(&command(PowerCommand::on(40))).unwrap());

        let report = camera.report_state();
        assert!(report.state);
        assert!(!report.error);
        assert_eq!(report.fps, DEFAULT_FPS);
        assert!(wait_until(|| !sink.frames().is_empty()));

        camera.turn_off().unwrap();
    }

    #[test]
    fn test_begin_without_sensor_reports_hardware_not_found() {
        init_logger();
        let fifo = MockFrameFifo::without_sensor();
        let sink = RecordingSink::default();
        let mut camera = camera(&fifo, &sink);

        assert!(matches!(camera.begin(), Err(DeviceError::HardwareNotFound(_))));
        assert!(camera.report_state().error);

        // ON コマンドは拒否され、キャプチャは始まらない
        assert!(matches!(
            camera.handle_datagram(&command(PowerCommand::on(5))),
            Err(DeviceError::NotInitialized)
        ));
        assert!(!camera.report_state().state);
        assert_eq!(fifo.capture_starts(), 0);
    }

    #[test]
    fn test_begin_configures_resolution_preset() {
        let fifo = MockFrameFifo::new();
        let sink = RecordingSink::default();
        let mut camera = camera(&fifo, &sink);

        camera.begin().unwrap();
        assert_eq!(fifo.resolution(), Some(Resolution::Svga));
        assert_eq!(camera.resolution(), Resolution::Svga);
    }

    #[test]
    fn test_turn_off_stops_capture_and_deselects() {
        init_logger();
        let fifo = MockFrameFifo::new();
        let sink = RecordingSink::default();
        fifo.set_repeating_frame(MockFrame::new(vec![1; 3000]));
        let mut camera = camera(&fifo, &sink);
        camera.begin().unwrap();

        camera.turn_on().unwrap();
        assert!(wait_until(|| sink.frames().len() >= 3));

        camera.turn_off().unwrap();
        assert!(!camera.report_state().state);
        assert!(!fifo.is_selected());
        assert_eq!(camera.capture_state(), CaptureState::Idle);

        let starts = fifo.capture_starts();
        let frames = sink.frames().len();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(fifo.capture_starts(), starts);
        assert_eq!(sink.frames().len(), frames);

        // 再び ON にできる
        camera.turn_on().unwrap();
        assert!(wait_until(|| sink.frames().len() > frames));
        camera.turn_off().unwrap();
    }

    #[test]
    fn test_no_capture_without_consumers() {
        let fifo = MockFrameFifo::new();
        let sink = RecordingSink::default();
        sink.set_consumers(0);
        fifo.set_repeating_frame(MockFrame::new(vec![1; 64]));
        let mut camera = camera(&fifo, &sink);
        camera.begin().unwrap();

        camera.turn_on().unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(fifo.capture_starts(), 0);

        sink.set_consumers(1);
        assert!(wait_until(|| fifo.capture_starts() > 0));
        camera.turn_off().unwrap();
    }

    #[test]
    fn test_fps_updates_apply_while_streaming() {
        let fifo = MockFrameFifo::new();
        let sink = RecordingSink::default();
        fifo.set_repeating_frame(MockFrame::new(vec![1; 64]));
        let mut camera = camera(&fifo, &sink);
        camera.begin().unwrap();
        camera.turn_on().unwrap();

        assert!(camera.handle_datagram(&command(PowerCommand::set_fps(20))).unwrap());
        assert_eq!(camera.control().fps(), 20);
        assert_eq!(camera.control().interval_ms(), 50);

        let result = camera.apply_state(&DesiredDeviceState::default().with_fps(31));
        assert!(matches!(result, Err(DeviceError::InvalidFps(_))));
        assert_eq!(camera.report_state().fps, 20);
        assert!(camera.report_state().state);

        camera.turn_off().unwrap();
    }

    #[test]
    fn test_corrupted_frames_are_counted_not_streamed() {
        let fifo = MockFrameFifo::new();
        let sink = RecordingSink::default();
        fifo.push_frame(MockFrame::new(Vec::new()));
        fifo.push_frame(MockFrame::new(vec![0; 8]).with_length(1 << 20));
        fifo.set_repeating_frame(MockFrame::new(vec![9; 100]));
        let mut camera = camera(&fifo, &sink);
        camera.begin().unwrap();

        camera.turn_on().unwrap();
        assert!(wait_until(|| !sink.frames().is_empty()));
        camera.turn_off().unwrap();

        assert_eq!(camera.stats().corrupted_frames, 2);
        assert!(sink.frames().iter().all(|frame| frame == &vec![9; 100]));
    }
}
