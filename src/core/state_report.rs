//! デバイス状態を外部ステートストアへ公開するアダプタ
//!
//! ストア本体 (Firebase など) は外部協調者で、`StatePublisher` 越しに
//! パスと JSON を受け取るだけです。

use std::collections::HashMap;

use log::{debug, info, warn};

use crate::core::device::DeviceReport;
use crate::core::registry::{DeviceRegistry, RegistryError};

const DEVICES_ROOT: &str = "/devices";

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("状態の公開に失敗しました ({path}): {reason}")]
    Publish { path: String, reason: String },
    #[error("JSON への変換に失敗しました: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("desired パスが不正です: {0}")]
    InvalidPath(String),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// JSON ドキュメントをパスに書き込む外部ストア
pub trait StatePublisher {
    fn publish(&mut self, path: &str, json: &str) -> Result<(), ReportError>;
}

/// `/devices/<name>/reported` への書き込みと `/devices/<name>/desired` の振り分け
#[derive(Debug, Default)]
pub struct StateReportingAdapter {
    last_published: HashMap<String, DeviceReport>,
}

impl StateReportingAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reported_path(name: &str) -> String {
        format!("{DEVICES_ROOT}/{name}/reported")
    }

    pub fn desired_path(name: &str) -> String {
        format!("{DEVICES_ROOT}/{name}/desired")
    }

    /// 前回から変化したデバイスの状態だけを公開し、公開した件数を返します。
    /// 失敗したデバイスは次回また公開対象になります。
    pub fn publish_reported_states<P: StatePublisher>(
        &mut self,
        registry: &DeviceRegistry,
        publisher: &mut P,
    ) -> Result<usize, ReportError> {
        let mut published = 0;
        let mut first_error = None;

        for (name, report) in registry.reports() {
            if self.last_published.get(&name) == Some(&report) {
                continue;
            }
            let path = Self::reported_path(&name);
            let json = serde_json::to_string(&report)?;
            match publisher.publish(&path, &json) {
                Ok(()) => {
                    debug!("Published {} -> {}", path, json);
                    self.last_published.insert(name, report);
                    published += 1;
                }
                Err(e) => {
                    warn!("{}", e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(published),
        }
    }

    /// 次回の `publish_reported_states` ですべてのデバイスを再送させます
    /// (ストアへの再接続後など)
    pub fn invalidate(&mut self) {
        self.last_published.clear();
    }

    /// ストアから届いた desired 更新をレジストリのデバイスへ振り分けます。
    ///
    /// `path` は `/devices/<name>/desired` でも、ストリームが返す相対形式
    /// `/<name>/desired` でも受け付けます。
    pub fn apply_desired_update(
        &self,
        registry: &DeviceRegistry,
        path: &str,
        payload: &str,
    ) -> Result<String, ReportError> {
        let name = device_name_from_desired_path(path)
            .ok_or_else(|| ReportError::InvalidPath(path.to_string()))?;
        registry.apply_desired_json(name, payload)?;
        info!("desired 状態を適用しました: {} {}", name, payload);
        Ok(name.to_string())
    }
}

fn device_name_from_desired_path(path: &str) -> Option<&str> {
    let relative = path.strip_prefix(DEVICES_ROOT).unwrap_or(path);
    let mut segments = relative.trim_matches('/').split('/');
    match (segments.next(), segments.next(), segments.next()) {
        (Some(name), Some("desired"), None) if !name.is_empty() => Some(name),
        _ => None,
    }
}
