//! フレームの送信先
//!
//! - `UdpFrameSink`: 固定の `host:port` へチャンクごとに 1 データグラム。
//!   シーケンス番号はなく、受信側は連結して再構成します。
//! - `ChannelSink`: 接続中の消費者へプッシュするチャネル。消費者が 1 つも
//!   いなければフレーム生成自体を止めます。

use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TryRecvError, TrySendError};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info, warn};

/// IPv4/UDP で分割されずに届くペイロードの上限
pub const UDP_MAX_PAYLOAD: usize = 1472;

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("送信エラー: {0}")]
    Io(#[from] std::io::Error),
    #[error("送信先に届いたのは {sent}/{expected} bytes だけでした")]
    Truncated { sent: usize, expected: usize },
    #[error("消費者が接続されていません")]
    NoConsumers,
}

pub trait FrameSink {
    /// 接続中の消費者数。0 の間はフレームを生成しない
    fn consumer_count(&self) -> usize;

    /// 1 回の送信に載せられる最大バイト数
    fn max_payload(&self) -> usize;

    fn send_chunk(&mut self, chunk: &[u8]) -> Result<(), SinkError>;

    /// フレームの最後のチャンクの後に呼ばれる
    fn end_frame(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// 固定宛先への UDP データグラムストリーム
#[derive(Debug)]
pub struct UdpFrameSink {
    socket: UdpSocket,
    destination: SocketAddr,
}

impl UdpFrameSink {
    pub fn new(destination: impl Into<SocketAddr>) -> Result<Self, SinkError> {
        let destination = destination.into();
        let socket = UdpSocket::bind(("0.0.0.0", 0))?;
        info!("UDP frame stream -> {}", destination);
        Ok(Self {
            socket,
            destination,
        })
    }

    pub fn destination(&self) -> SocketAddr {
        self.destination
    }
}

impl FrameSink for UdpFrameSink {
    /// 宛先は固定なので常に 1 (受信側の存在は確認できない)
    fn consumer_count(&self) -> usize {
        1
    }

    fn max_payload(&self) -> usize {
        UDP_MAX_PAYLOAD
    }

    fn send_chunk(&mut self, chunk: &[u8]) -> Result<(), SinkError> {
        let sent = self.socket.send_to(chunk, self.destination)?;
        if sent != chunk.len() {
            return Err(SinkError::Truncated {
                sent,
                expected: chunk.len(),
            });
        }
        Ok(())
    }
}

struct Consumer {
    tx: SyncSender<Vec<u8>>,
    attached: Arc<AtomicBool>,
}

/// `ChannelSink` の購読側。drop すると切断扱いになります。
pub struct FrameSubscription {
    rx: Receiver<Vec<u8>>,
    attached: Arc<AtomicBool>,
}

impl FrameSubscription {
    pub fn try_recv(&self) -> Result<Vec<u8>, TryRecvError> {
        self.rx.try_recv()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<Vec<u8>, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }
}

impl Drop for FrameSubscription {
    fn drop(&mut self) {
        self.attached.store(false, Ordering::Release);
    }
}

/// 接続中の消費者へフレームをプッシュするシンク
///
/// チャンクは `max_payload` に達するかフレームが終わるまで溜めてから送るので、
/// `max_payload` がフレームより大きければ 1 フレーム 1 メッセージになります。
/// 受信が追いつかない消費者にはそのメッセージを落とします (キャプチャは止めない)。
pub struct ChannelSink {
    consumers: Arc<Mutex<Vec<Consumer>>>,
    max_payload: usize,
    queue_depth: usize,
    pending: Vec<u8>,
}

/// 別タスク (Web サーバーなど) から消費者を接続するためのハンドル
#[derive(Clone)]
pub struct ChannelSinkHandle {
    consumers: Arc<Mutex<Vec<Consumer>>>,
    queue_depth: usize,
}

impl ChannelSinkHandle {
    pub fn attach(&self) -> FrameSubscription {
        let (tx, rx) = mpsc::sync_channel(self.queue_depth);
        let attached = Arc::new(AtomicBool::new(true));
        let mut consumers = self.consumers.lock().unwrap_or_else(|e| e.into_inner());
        consumers.push(Consumer {
            tx,
            attached: attached.clone(),
        });
        debug!("Frame consumer attached ({} total)", consumers.len());
        FrameSubscription { rx, attached }
    }
}

impl ChannelSink {
    pub fn new(max_payload: usize, queue_depth: usize) -> Self {
        Self {
            consumers: Arc::new(Mutex::new(Vec::new())),
            max_payload: max_payload.max(1),
            queue_depth: queue_depth.max(1),
            pending: Vec::new(),
        }
    }

    pub fn handle(&self) -> ChannelSinkHandle {
        ChannelSinkHandle {
            consumers: self.consumers.clone(),
            queue_depth: self.queue_depth,
        }
    }

    pub fn attach(&self) -> FrameSubscription {
        self.handle().attach()
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let message = std::mem::take(&mut self.pending);
        let mut consumers = self.consumers.lock().unwrap_or_else(|e| e.into_inner());
        consumers.retain(|c| {
            if !c.attached.load(Ordering::Acquire) {
                return false;
            }
            match c.tx.try_send(message.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    warn!("frame consumer is lagging, dropping message");
                    true
                }
                Err(TrySendError::Disconnected(_)) => false,
            }
        });
        if consumers.is_empty() {
            return Err(SinkError::NoConsumers);
        }
        Ok(())
    }
}

impl FrameSink for ChannelSink {
    fn consumer_count(&self) -> usize {
        let mut consumers = self.consumers.lock().unwrap_or_else(|e| e.into_inner());
        consumers.retain(|c| c.attached.load(Ordering::Acquire));
        consumers.len()
    }

    fn max_payload(&self) -> usize {
        self.max_payload
    }

    fn send_chunk(&mut self, chunk: &[u8]) -> Result<(), SinkError> {
        self.pending.extend_from_slice(chunk);
        if self.pending.len() >= self.max_payload {
            self.flush()?;
        }
        Ok(())
    }

    fn end_frame(&mut self) -> Result<(), SinkError> {
        self.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_sink_tracks_attachment() {
        let sink = ChannelSink::new(usize::MAX, 4);
        assert_eq!(sink.consumer_count(), 0);

        let first = sink.attach();
        let second = sink.handle().attach();
        assert_eq!(sink.consumer_count(), 2);

        drop(first);
        assert_eq!(sink.consumer_count(), 1);
        drop(second);
        assert_eq!(sink.consumer_count(), 0);
    }

    #[test]
    fn test_channel_sink_whole_frame_message() {
        let mut sink = ChannelSink::new(usize::MAX, 4);
        let sub = sink.attach();

        sink.send_chunk(b"abc").unwrap();
        sink.send_chunk(b"def").unwrap();
        assert!(sub.try_recv().is_err());
        sink.end_frame().unwrap();
        assert_eq!(sub.try_recv().unwrap(), b"abcdef");
    }

    #[test]
    fn test_channel_sink_respects_payload_limit() {
        let mut sink = ChannelSink::new(4, 8);
        let sub = sink.attach();

        sink.send_chunk(b"abcd").unwrap();
        sink.send_chunk(b"ef").unwrap();
        sink.end_frame().unwrap();
        assert_eq!(sub.try_recv().unwrap(), b"abcd");
        assert_eq!(sub.try_recv().unwrap(), b"ef");
    }

    #[test]
    fn test_channel_sink_reports_no_consumers() {
        let mut sink = ChannelSink::new(usize::MAX, 1);
        let sub = sink.attach();
        drop(sub);
        sink.send_chunk(b"x").unwrap();
        assert!(matches!(sink.end_frame(), Err(SinkError::NoConsumers)));
    }

    #[test]
    fn test_udp_sink_delivers_datagrams() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let mut sink = UdpFrameSink::new(receiver.local_addr().unwrap()).unwrap();

        sink.send_chunk(&[1, 2, 3]).unwrap();
        let mut buf = [0u8; 16];
        let (n, _) = receiver.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[1, 2, 3]);
        assert_eq!(sink.consumer_count(), 1);
    }
}
