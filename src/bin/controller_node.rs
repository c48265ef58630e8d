use std::io::BufRead;
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};

use esp_idf_svc::{
    eventloop::EspSystemEventLoop, hal::peripherals::Peripherals, nvs::EspDefaultNvsPartition,
};
use log::{error, info, warn};

use tank_monitor::communication::esp_now::NetworkManager;
use tank_monitor::core::{
    AppConfig, Clock, DeviceRegistry, ReportError, StatePublisher, StateReportingAdapter,
    SystemClock,
};
use tank_monitor::RemoteCamera;

const CAMERA_DEVICE_NAME: &str = "camera";
const LOOP_INTERVAL_MS: u64 = 100;
const REPORT_INTERVAL_MS: u64 = 1000;

/// reported 状態をシリアルコンソールに書き出すパブリッシャ
struct ConsolePublisher;

impl StatePublisher for ConsolePublisher {
    fn publish(&mut self, path: &str, json: &str) -> Result<(), ReportError> {
        println!("{} {}", path, json);
        Ok(())
    }
}

/// `/devices/<name>/desired {"state": true, "fps": 5}` 形式の行をコンソールから読みます
fn spawn_console_reader() -> anyhow::Result<Receiver<(String, String)>> {
    let (tx, rx) = mpsc::channel();
    std::thread::Builder::new()
        .name("console".into())
        .stack_size(4096)
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match line.split_once(char::is_whitespace) {
                    Some((path, payload)) => {
                        if tx.send((path.to_string(), payload.trim().to_string())).is_err() {
                            break;
                        }
                    }
                    None => warn!("入力形式: <path> <json>"),
                }
            }
        })?;
    Ok(rx)
}

/// コントローラノードのメインエントリーポイント
fn main() -> anyhow::Result<()> {
    // ESP-IDFの基本初期化
    esp_idf_svc::sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();
    info!("tank-monitor controller node v{}", tank_monitor::VERSION);

    // 設定ファイル読み込み
    let app_config = AppConfig::load().map_err(|e| {
        error!("設定ファイルの読み込みに失敗しました: {}", e);
        anyhow::anyhow!("設定ファイルの読み込みエラー: {}", e)
    })?;

    let peripherals = Peripherals::take()?;
    let sysloop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;

    // コントローラは AP に接続せず、固定チャンネルで ESP-NOW のみ使う
    let _wifi = NetworkManager::start_wifi(peripherals.modem, &sysloop, &nvs_partition, &app_config, false)?;
    let link = NetworkManager::open_link(app_config.camera_mac, false, &app_config)?;

    let clock = SystemClock::new();
    let camera = Arc::new(Mutex::new(RemoteCamera::new(
        link,
        app_config.camera_mac,
        clock,
        app_config.retry_policy,
    )));

    let mut registry = DeviceRegistry::new();
    registry.register(CAMERA_DEVICE_NAME, &camera);
    for e in registry.begin_all() {
        error!("{}", e);
    }

    let mut adapter = StateReportingAdapter::new();
    let mut publisher = ConsolePublisher;
    let desired_updates = spawn_console_reader()?;
    info!(
        "desired 状態の入力待ち: {} {{\"state\": true, \"fps\": 5}}",
        StateReportingAdapter::desired_path(CAMERA_DEVICE_NAME)
    );

    let mut last_report_ms = 0;
    loop {
        while let Ok((path, payload)) = desired_updates.try_recv() {
            if let Err(e) = adapter.apply_desired_update(&registry, &path, &payload) {
                warn!("{}", e);
            }
        }

        for e in registry.update_all() {
            error!("{}", e);
        }

        let now = clock.now_ms();
        if now.saturating_sub(last_report_ms) >= REPORT_INTERVAL_MS {
            last_report_ms = now;
            if let Err(e) = adapter.publish_reported_states(&registry, &mut publisher) {
                warn!("{}", e);
            }
        }

        std::thread::sleep(std::time::Duration::from_millis(LOOP_INTERVAL_MS));
    }
}
