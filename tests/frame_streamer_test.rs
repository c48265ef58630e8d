#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tank_monitor::core::{frame_interval_ms, ManualClock, MAX_FPS, MIN_FPS};
    use tank_monitor::hardware::camera::mock::RecordingSink;
    use tank_monitor::hardware::camera::streamer::{reassemble_chunks, StreamError};
    use tank_monitor::hardware::camera::{ChannelSink, FrameStreamer, StreamControl};

    const CHUNK: usize = 1024;

    fn streamer(sink: RecordingSink) -> FrameStreamer<RecordingSink, ManualClock> {
        FrameStreamer::new(sink, ManualClock::new(), Arc::new(StreamControl::default()), CHUNK)
    }

    #[test]
    fn test_chunking_round_trip() {
        for length in [1, CHUNK - 1, CHUNK, CHUNK + 1, 10 * CHUNK] {
            let sink = RecordingSink::default();
            let mut streamer = streamer(sink.clone());
            let frame: Vec<u8> = (0..length).map(|i| (i % 253) as u8).collect();

            let chunks = streamer.transmit(&frame).unwrap();

            assert_eq!(chunks, length.div_ceil(CHUNK), "length {}", length);
            let lengths = sink.chunk_lengths();
            assert_eq!(lengths.len(), chunks);
            assert!(lengths.iter().all(|&l| (1..=CHUNK).contains(&l)));
            let chunk_data = sink.chunks.lock().unwrap().clone();
            assert_eq!(reassemble_chunks(chunk_data), frame);
            assert_eq!(sink.frames(), vec![frame]);
        }
    }

    #[test]
    fn test_empty_frame_is_never_fragmented() {
        let sink = RecordingSink::default();
        let mut streamer = streamer(sink.clone());

        assert!(matches!(streamer.transmit(&[]), Err(StreamError::EmptyFrame)));
        assert!(sink.chunk_lengths().is_empty());
        assert!(sink.frames().is_empty());
    }

    #[test]
    fn test_stats_count_frames_and_bytes() {
        let sink = RecordingSink::default();
        let mut streamer = streamer(sink);

        streamer.transmit(&[1; 3000]).unwrap();
        streamer.transmit(&[2; 10]).unwrap();

        let stats = streamer.control().stats();
        assert_eq!(stats.frames_sent, 2);
        assert_eq!(stats.chunks_sent, 4);
        assert_eq!(stats.bytes_sent, 3010);
        assert_eq!(stats.send_errors, 0);
    }

    #[test]
    fn test_fps_range_sets_rounded_interval() {
        let control = StreamControl::default();
        for fps in MIN_FPS..=MAX_FPS {
            let interval = control.set_target_fps(i32::from(fps)).unwrap();
            let expected = (1000.0 / f64::from(fps)).round() as u32;
            assert_eq!(interval, expected, "fps {}", fps);
            assert_eq!(frame_interval_ms(fps), expected);
            assert_eq!(control.interval_ms(), expected);
        }

        for fps in [0, 31, 40, -5] {
            assert!(control.set_target_fps(fps).is_err());
            assert_eq!(control.fps(), MAX_FPS);
        }
    }

    #[test]
    fn test_channel_sink_delivers_whole_frames_to_subscriber() {
        let sink = ChannelSink::new(64 * 1024, 4);
        let handle = sink.handle();
        let mut streamer = FrameStreamer::new(sink, ManualClock::new(), Arc::new(StreamControl::default()), CHUNK);

        assert!(!streamer.has_consumers());
        let subscription = handle.attach();
        assert!(streamer.has_consumers());

        let frame: Vec<u8> = (0..5000u32).map(|i| i as u8).collect();
        streamer.transmit(&frame).unwrap();
        let received = subscription.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(received, frame);

        drop(subscription);
        assert!(!streamer.has_consumers());
    }
}
