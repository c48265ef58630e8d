use esp_idf_svc::hal::modem::Modem;
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    nvs::EspDefaultNvsPartition,
    wifi::{AuthMethod, BlockingWifi, ClientConfiguration, Configuration, EspWifi},
};
use log::info;

use super::EspNowLink;
use crate::core::config::AppConfig;
use crate::mac_address::MacAddress;

/// WiFiとESP-NOWの初期化を管理するモジュール
pub struct NetworkManager;

impl NetworkManager {
    /// WiFi を STA モードで起動します。
    ///
    /// `join_ap` が真なら cfg.toml の SSID に接続し (カメラノードの UDP 送信用)、
    /// ESP-NOW は AP のチャンネルに従います。偽なら接続せず `wifi_channel` に固定します。
    pub fn start_wifi(
        modem: Modem,
        sysloop: &EspSystemEventLoop,
        nvs_partition: &EspDefaultNvsPartition,
        config: &AppConfig,
        join_ap: bool,
    ) -> anyhow::Result<BlockingWifi<EspWifi<'static>>> {
        let mut wifi = BlockingWifi::wrap(
            EspWifi::new(modem, sysloop.clone(), Some(nvs_partition.clone()))?,
            sysloop.clone(),
        )?;

        let client = if join_ap {
            ClientConfiguration {
                ssid: config
                    .wifi_ssid
                    .as_str()
                    .try_into()
                    .map_err(|_| anyhow::anyhow!("SSIDが長すぎます: {}", config.wifi_ssid))?,
                password: config
                    .wifi_password
                    .as_str()
                    .try_into()
                    .map_err(|_| anyhow::anyhow!("WiFiパスワードが長すぎます"))?,
                auth_method: if config.wifi_password.is_empty() {
                    AuthMethod::None
                } else {
                    AuthMethod::WPA2Personal
                },
                ..Default::default()
            }
        } else {
            ClientConfiguration::default()
        };

        wifi.set_configuration(&Configuration::Client(client))?;
        wifi.start()?;

        if join_ap {
            info!("WiFi接続中: {}", config.wifi_ssid);
            wifi.connect()?;
            wifi.wait_netif_up()?;
            info!("WiFi接続完了: {:?}", wifi.wifi().sta_netif().get_ip_info()?);
        } else {
            esp_idf_svc::sys::esp!(unsafe {
                esp_idf_svc::sys::esp_wifi_set_channel(
                    config.wifi_channel,
                    esp_idf_svc::sys::wifi_second_chan_t_WIFI_SECOND_CHAN_NONE,
                )
            })?;
            info!("WiFiをESP-NOW専用で起動しました (channel {})", config.wifi_channel);
        }

        // ESP-NOW の取りこぼしを減らすため省電力を無効化
        esp_idf_svc::sys::esp!(unsafe {
            esp_idf_svc::sys::esp_wifi_set_ps(esp_idf_svc::sys::wifi_ps_type_t_WIFI_PS_NONE)
        })?;

        Ok(wifi)
    }

    /// ピアへの ESP-NOW リンクを開きます
    pub fn open_link(peer: MacAddress, joined_ap: bool, config: &AppConfig) -> anyhow::Result<EspNowLink> {
        // AP 接続時はチャンネル 0 (= 現在のチャンネル) で登録する
        let channel = if joined_ap { 0 } else { config.wifi_channel };
        EspNowLink::new(peer, channel).map_err(|e| anyhow::anyhow!("ESP-NOW初期化に失敗: {}", e))
    }
}
