use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::{
        delay::Delay,
        gpio::PinDriver,
        i2c::{I2cConfig, I2cDriver},
        peripherals::Peripherals,
        prelude::*,
        spi::{config::Config as SpiConfig, SpiBusDriver, SpiDriver, SpiDriverConfig},
    },
    nvs::EspDefaultNvsPartition,
};
use log::{error, info, warn};

use tank_monitor::communication::esp_now::NetworkManager;
use tank_monitor::communication::MessageTransport;
use tank_monitor::core::{AppConfig, Device, SystemClock};
use tank_monitor::hardware::camera::{ArduChip, CameraDevice, CameraOptions, UdpFrameSink};

/// メインループの周期
const LOOP_INTERVAL_MS: u64 = 20;

/// カメラノードのメインエントリーポイント
fn main() -> anyhow::Result<()> {
    // ESP-IDFの基本初期化
    esp_idf_svc::sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();
    info!("tank-monitor camera node v{}", tank_monitor::VERSION);

    // 設定ファイル読み込み
    let app_config = AppConfig::load().map_err(|e| {
        error!("設定ファイルの読み込みに失敗しました: {}", e);
        anyhow::anyhow!("設定ファイルの読み込みエラー: {}", e)
    })?;

    info!("ペリフェラルを初期化しています");
    let peripherals = Peripherals::take()?;
    let sysloop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let pins = peripherals.pins;

    // フレーム送信のため AP に接続し、ESP-NOW は AP のチャンネルに乗る
    let _wifi = NetworkManager::start_wifi(peripherals.modem, &sysloop, &nvs_partition, &app_config, true)?;
    let link = NetworkManager::open_link(app_config.controller_mac, true, &app_config)?;
    info!("ESP-NOW peer: controller {}", app_config.controller_mac);

    // ArduCAM: SPI (SCK 18 / MOSI 23 / MISO 19 / CS 5), SCCB (SDA 21 / SCL 22)
    let spi_driver = SpiDriver::new(
        peripherals.spi2,
        pins.gpio18,
        pins.gpio23,
        Some(pins.gpio19),
        &SpiDriverConfig::new(),
    )?;
    let spi = SpiBusDriver::new(spi_driver, &SpiConfig::new().baudrate(8.MHz().into()))?;
    let cs = PinDriver::output(pins.gpio5)?;
    let i2c = I2cDriver::new(
        peripherals.i2c0,
        pins.gpio21,
        pins.gpio22,
        &I2cConfig::new().baudrate(100.kHz().into()),
    )?;
    let chip = ArduChip::new(spi, cs, i2c, Delay::new_default());

    let sink = UdpFrameSink::new(app_config.stream_endpoint)?;
    info!("フレーム送信先: {}", app_config.stream_endpoint);

    let options = CameraOptions::from_app_config(&app_config);
    let mut camera = CameraDevice::new(chip, sink, SystemClock::new(), options);

    // センサーがなければ起動しない
    camera.begin().map_err(|e| {
        error!("カメラの初期化に失敗しました: {}", e);
        anyhow::anyhow!("カメラ初期化エラー: {}", e)
    })?;

    info!("コマンド待機中 ({} fps)", camera.control().fps());
    loop {
        while let Some(datagram) = link.poll_received() {
            if let Err(e) = camera.handle_datagram(&datagram) {
                warn!("コマンドの適用に失敗しました: {}", e);
            }
        }

        if let Err(e) = camera.update() {
            error!("カメラ更新エラー: {}", e);
        }

        std::thread::sleep(std::time::Duration::from_millis(LOOP_INTERVAL_MS));
    }
}
