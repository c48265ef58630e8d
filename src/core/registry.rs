//! 名前 → デバイスの明示的なレジストリ
//!
//! グローバルなテーブルは持たず、必要なコンポーネントに参照で渡します。
//! 値は `Weak` で保持するので、レジストリはデバイスの所有権を持ちません。
//! 所有者が `Arc` を落とした時点でエントリは自然に無効になり、次の参照時に
//! 取り除かれます。

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use log::{debug, error, warn};

use crate::core::device::{DesiredDeviceState, Device, DeviceError, DeviceReport};

/// レジストリに登録できる共有デバイス
pub type SharedDevice = Arc<Mutex<dyn Device + Send>>;
type WeakDevice = Weak<Mutex<dyn Device + Send>>;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("デバイスが登録されていません: {0}")]
    UnknownDevice(String),
    #[error("desired 状態の JSON が不正です: {0}")]
    InvalidPayload(#[from] serde_json::Error),
    #[error("デバイスのロックが破損しています: {0}")]
    Poisoned(String),
    #[error("{name}: {source}")]
    Device {
        name: String,
        #[source]
        source: DeviceError,
    },
}

#[derive(Default)]
pub struct DeviceRegistry {
    devices: BTreeMap<String, WeakDevice>,
}

impl fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("devices", &self.devices.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// デバイスを登録します。同名の登録があれば置き換え、`true` を返します。
    pub fn register<D>(&mut self, name: impl Into<String>, device: &Arc<Mutex<D>>) -> bool
    where
        D: Device + Send + 'static,
    {
        let name = name.into();
        let shared: SharedDevice = device.clone();
        let replaced = self
            .devices
            .insert(name.clone(), Arc::downgrade(&shared))
            .is_some();
        if replaced {
            warn!("デバイス '{}' の登録を置き換えました", name);
        } else {
            debug!("Registered device '{}'", name);
        }
        replaced
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.devices.remove(name).is_some()
    }

    /// 生存しているデバイスを取得します。破棄済みなら `None`。
    pub fn get(&self, name: &str) -> Option<SharedDevice> {
        self.devices.get(name).and_then(Weak::upgrade)
    }

    /// 所有者が破棄したエントリを取り除き、その数を返します
    pub fn prune(&mut self) -> usize {
        let before = self.devices.len();
        self.devices.retain(|_, weak| weak.strong_count() > 0);
        before - self.devices.len()
    }

    /// 生存しているデバイス名 (昇順)
    pub fn names(&self) -> Vec<String> {
        self.live().map(|(name, _)| name.to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.live().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn apply_desired(
        &self,
        name: &str,
        desired: &DesiredDeviceState,
    ) -> Result<(), RegistryError> {
        let device = self
            .get(name)
            .ok_or_else(|| RegistryError::UnknownDevice(name.to_string()))?;
        let mut guard = lock(name, &device)?;
        guard
            .apply_state(desired)
            .map_err(|source| RegistryError::Device {
                name: name.to_string(),
                source,
            })
    }

    /// `{"state": bool, "fps": int}` 形式の JSON を適用します
    pub fn apply_desired_json(&self, name: &str, payload: &str) -> Result<(), RegistryError> {
        let desired: DesiredDeviceState = serde_json::from_str(payload)?;
        self.apply_desired(name, &desired)
    }

    /// 全デバイスの `begin` を呼びます。失敗したデバイスはログに残して続行します。
    pub fn begin_all(&self) -> Vec<RegistryError> {
        self.for_each_device(|device| device.begin())
    }

    pub fn update_all(&self) -> Vec<RegistryError> {
        self.for_each_device(|device| device.update())
    }

    pub fn reports(&self) -> Vec<(String, DeviceReport)> {
        self.live()
            .filter_map(|(name, device)| {
                let report = match lock(name, &device) {
                    Ok(guard) => guard.report_state(),
                    Err(e) => {
                        error!("{}", e);
                        return None;
                    }
                };
                Some((name.to_string(), report))
            })
            .collect()
    }

    fn for_each_device<F>(&self, mut op: F) -> Vec<RegistryError>
    where
        F: FnMut(&mut (dyn Device + Send)) -> Result<(), DeviceError>,
    {
        let mut failures = Vec::new();
        for (name, device) in self.live() {
            let result = lock(name, &device).and_then(|mut guard| {
                op(&mut *guard).map_err(|source| RegistryError::Device {
                    name: name.to_string(),
                    source,
                })
            });
            if let Err(e) = result {
                error!("{}", e);
                failures.push(e);
            }
        }
        failures
    }

    fn live(&self) -> impl Iterator<Item = (&str, SharedDevice)> + '_ {
        self.devices
            .iter()
            .filter_map(|(name, weak)| weak.upgrade().map(|device| (name.as_str(), device)))
    }
}

fn lock<'a>(
    name: &str,
    device: &'a SharedDevice,
) -> Result<MutexGuard<'a, dyn Device + Send + 'static>, RegistryError> {
    device
        .lock()
        .map_err(|_| RegistryError::Poisoned(name.to_string()))
}
