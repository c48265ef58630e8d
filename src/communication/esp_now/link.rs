use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Mutex;

use esp_idf_svc::espnow::{EspNow, PeerInfo, ReceiveInfo, SendStatus as EspSendStatus};
use log::{debug, error, info, warn};

use crate::communication::transport::{
    Datagram, MessageTransport, SendStatus, TransportError, MAX_DATAGRAM_SIZE,
};
use crate::mac_address::MacAddress;

/// コールバックからメインループへ渡すキューの深さ
const CALLBACK_QUEUE_DEPTH: usize = 16;

/// ESP-NOW による 1 対 1 リンク
///
/// 送信完了・受信の両コールバックは WiFi タスク上で動くため、
/// 中では `try_send` でキューに積むだけにしてブロックしません。
pub struct EspNowLink {
    esp_now: EspNow<'static>,
    peer: MacAddress,
    status_rx: Mutex<Receiver<SendStatus>>,
    datagram_rx: Mutex<Receiver<Datagram>>,
}

impl EspNowLink {
    /// ESP-NOW を初期化し、暗号化なしでピアを登録します。
    ///
    /// `channel` が 0 の場合は現在の WiFi チャンネルを使います。
    pub fn new(peer: MacAddress, channel: u8) -> Result<Self, TransportError> {
        let esp_now = EspNow::take().map_err(|e| {
            error!("ESP-NOW初期化に失敗: {:?}", e);
            TransportError::Driver(format!("{e:?}"))
        })?;

        let (status_tx, status_rx) = mpsc::sync_channel(CALLBACK_QUEUE_DEPTH);
        let (datagram_tx, datagram_rx) = mpsc::sync_channel(CALLBACK_QUEUE_DEPTH);

        esp_now
            .register_send_cb(move |_mac: &[u8], status: EspSendStatus| {
                let status = match status {
                    EspSendStatus::SUCCESS => SendStatus::Success,
                    _ => SendStatus::Failure,
                };
                enqueue(&status_tx, status, "send status");
            })
            .map_err(|e| TransportError::Driver(format!("{e:?}")))?;

        esp_now
            .register_recv_cb(move |info: &ReceiveInfo, data: &[u8]| {
                let Ok(src) = MacAddress::from_slice(&info.src_addr[..]) else {
                    return;
                };
                if src != peer {
                    debug!("未登録ピアからのフレームを破棄: {}", src);
                    return;
                }
                enqueue(
                    &datagram_tx,
                    Datagram {
                        src,
                        data: data.to_vec(),
                    },
                    "datagram",
                );
            })
            .map_err(|e| TransportError::Driver(format!("{e:?}")))?;

        let peer_info = PeerInfo {
            peer_addr: *peer.as_bytes(),
            channel,
            ifidx: esp_idf_svc::wifi::WifiDeviceId::Sta.into(),
            encrypt: false,
            ..Default::default()
        };
        esp_now.add_peer(peer_info).map_err(|e| {
            error!("ESP-NOWピア追加失敗: {:?}", e);
            TransportError::PeerNotRegistered(peer)
        })?;

        info!("ESP-NOW link ready: peer={} channel={}", peer, channel);

        Ok(Self {
            esp_now,
            peer,
            status_rx: Mutex::new(status_rx),
            datagram_rx: Mutex::new(datagram_rx),
        })
    }

    pub fn peer(&self) -> MacAddress {
        self.peer
    }
}

fn enqueue<T>(tx: &SyncSender<T>, item: T, what: &str) {
    match tx.try_send(item) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => warn!("ESP-NOW {} queue full, dropping", what),
        Err(TrySendError::Disconnected(_)) => {}
    }
}

impl MessageTransport for EspNowLink {
    fn send(&self, peer: &MacAddress, data: &[u8]) -> Result<(), TransportError> {
        if data.len() > MAX_DATAGRAM_SIZE {
            return Err(TransportError::PayloadTooLarge(data.len()));
        }
        if *peer != self.peer {
            return Err(TransportError::PeerNotRegistered(*peer));
        }
        self.esp_now
            .send(*peer.as_bytes(), data)
            .map_err(|e| TransportError::SendFailed(format!("{e:?}")))
    }

    fn poll_send_status(&self) -> Option<SendStatus> {
        self.status_rx.lock().ok()?.try_recv().ok()
    }

    fn poll_received(&self) -> Option<Datagram> {
        self.datagram_rx.lock().ok()?.try_recv().ok()
    }
}
