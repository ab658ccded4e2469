//! CLI 配置文件
//!
//! ```toml
//! [hub]
//! name = "contoso"
//! suffix = "azure-devices.net"
//! provider = "mock"
//!
//! [pump]
//! interval_ms = 1
//!
//! [[devices]]
//! id = "sensor-1"
//! key = "a2V5"
//!
//! [[devices]]
//! id = "sensor-2"
//! connection_string = "HostName=contoso.azure-devices.net;DeviceId=sensor-2;SharedAccessKey=a2V5"
//! ```

use anyhow::{Context, Result, anyhow, bail};
use iothub_sdk::prelude::*;
use iothub_sdk::transport::mock::MockProvider;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// 默认配置文件路径（`<config_dir>/iothub/config.toml`）
pub fn default_path() -> Result<PathBuf> {
    let mut path = dirs::config_dir().ok_or_else(|| anyhow!("cannot determine config directory"))?;
    path.push("iothub");
    path.push("config.toml");
    Ok(path)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HubSection {
    pub name: String,
    pub suffix: String,
    /// 协议提供者（目前只有 `mock`）
    #[serde(default = "default_provider")]
    pub provider: String,
}

fn default_provider() -> String {
    "mock".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PumpSection {
    pub interval_ms: u64,
}

impl Default for PumpSection {
    fn default() -> Self {
        Self {
            interval_ms: PumpConfig::default().interval_ms,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceSection {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sas_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_string: Option<String>,
}

/// CLI 配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CliConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hub: Option<HubSection>,
    #[serde(default)]
    pub pump: PumpSection,
    #[serde(default)]
    pub devices: Vec<DeviceSection>,
}

impl CliConfig {
    /// 加载配置；文件不存在时返回默认配置
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).context("failed to create config directory")?;
        }
        let content = toml::to_string_pretty(self).context("failed to serialize config")?;
        fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))
    }

    pub fn pump_config(&self) -> PumpConfig {
        PumpConfig {
            interval_ms: self.pump.interval_ms,
        }
    }

    pub fn hub(&self) -> Result<&HubSection> {
        self.hub.as_ref().ok_or_else(|| anyhow!("no [hub] section configured"))
    }

    /// 查找设备；`None` 取第一个
    pub fn device(&self, id: Option<&str>) -> Result<&DeviceSection> {
        match id {
            Some(id) => self
                .devices
                .iter()
                .find(|d| d.id == id)
                .ok_or_else(|| anyhow!("device `{}` not found in config", id)),
            None => self.devices.first().ok_or_else(|| anyhow!("no [[devices]] configured")),
        }
    }

    /// 设备的完整客户端配置
    pub fn client_config(&self, device: &DeviceSection) -> Result<ClientConfig> {
        if let Some(cs) = &device.connection_string {
            let parsed = ConnectionString::parse(cs)
                .with_context(|| format!("invalid connection string for `{}`", device.id))?;
            return Ok(parsed.into_config());
        }

        let hub = self.hub()?;
        let mut config = ClientConfig::new(&hub.name, &hub.suffix, &device.id);
        config.device_key = device.key.clone();
        config.device_sas_token = device.sas_token.clone();
        if config.device_key.is_none() && config.device_sas_token.is_none() {
            bail!("device `{}` has no key, sas_token or connection_string", device.id);
        }
        Ok(config)
    }

    /// 插入或替换同 ID 的设备
    pub fn upsert_device(&mut self, device: DeviceSection) {
        match self.devices.iter_mut().find(|d| d.id == device.id) {
            Some(existing) => *existing = device,
            None => self.devices.push(device),
        }
    }
}

/// 按名称选择协议提供者
pub fn provider(name: &str) -> Result<Arc<dyn TransportProvider>> {
    match name {
        "mock" => Ok(Arc::new(MockProvider::new())),
        other => bail!("unsupported transport provider `{}` (available: mock)", other),
    }
}
