//! 配置管理命令
//!
//! 用于管理 CLI 配置（IoT Hub、泵间隔、设备凭据）

use crate::config::{CliConfig, DeviceSection, HubSection};
use anyhow::{Result, bail};
use clap::Subcommand;
use std::path::Path;

/// 配置命令
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// 设置 Hub 与泵参数
    Set {
        /// IoT Hub 名称
        #[arg(long)]
        hub_name: Option<String>,

        /// IoT Hub 域名后缀（如 azure-devices.net）
        #[arg(long)]
        hub_suffix: Option<String>,

        /// 协议提供者
        #[arg(long)]
        provider: Option<String>,

        /// 工作泵轮询间隔（毫秒）
        #[arg(long)]
        interval_ms: Option<u64>,
    },

    /// 添加或替换设备
    AddDevice {
        /// 设备 ID
        #[arg(long)]
        id: String,

        /// 设备密钥
        #[arg(long)]
        key: Option<String>,

        /// SAS 令牌
        #[arg(long)]
        sas_token: Option<String>,

        /// 完整连接字符串
        #[arg(long, conflicts_with_all = ["key", "sas_token"])]
        connection_string: Option<String>,
    },

    /// 获取配置项
    Get {
        /// 配置项名称（hub、pump、devices 或 all）
        #[arg(default_value = "all")]
        key: String,
    },

    /// 检查每个设备能否解析为客户端配置
    Check,

    /// 打印配置文件路径
    Path,
}

impl ConfigCommand {
    pub fn execute(self, path: &Path) -> Result<()> {
        match self {
            ConfigCommand::Set {
                hub_name,
                hub_suffix,
                provider,
                interval_ms,
            } => Self::set_(path, hub_name, hub_suffix, provider, interval_ms),

            ConfigCommand::AddDevice {
                id,
                key,
                sas_token,
                connection_string,
            } => Self::add_device_(
                path,
                DeviceSection {
                    id,
                    key,
                    sas_token,
                    connection_string,
                },
            ),

            ConfigCommand::Get { key } => Self::get_(path, &key),

            ConfigCommand::Check => Self::check_(path),

            ConfigCommand::Path => {
                println!("{}", path.display());
                Ok(())
            },
        }
    }

    fn set_(
        path: &Path,
        hub_name: Option<String>,
        hub_suffix: Option<String>,
        provider: Option<String>,
        interval_ms: Option<u64>,
    ) -> Result<()> {
        let mut config = CliConfig::load(path)?;

        if hub_name.is_some() || hub_suffix.is_some() || provider.is_some() {
            let hub = config.hub.get_or_insert_with(|| HubSection {
                provider: "mock".to_string(),
                ..Default::default()
            });
            if let Some(name) = hub_name {
                println!("✅ 设置 Hub 名称: {}", name);
                hub.name = name;
            }
            if let Some(suffix) = hub_suffix {
                println!("✅ 设置 Hub 后缀: {}", suffix);
                hub.suffix = suffix;
            }
            if let Some(provider) = provider {
                crate::config::provider(&provider)?;
                println!("✅ 设置协议提供者: {}", provider);
                hub.provider = provider;
            }
        }

        if let Some(interval_ms) = interval_ms {
            if interval_ms == 0 {
                bail!("interval-ms must be greater than zero");
            }
            println!("✅ 设置泵间隔: {} ms", interval_ms);
            config.pump.interval_ms = interval_ms;
        }

        config.save(path)
    }

    fn add_device_(path: &Path, device: DeviceSection) -> Result<()> {
        if device.id.is_empty() {
            bail!("device id must not be empty");
        }
        if device.key.is_none() && device.sas_token.is_none() && device.connection_string.is_none()
        {
            bail!("one of --key, --sas-token or --connection-string is required");
        }

        let mut config = CliConfig::load(path)?;
        println!("✅ 保存设备: {}", device.id);
        config.upsert_device(device);
        config.save(path)
    }

    fn get_(path: &Path, key: &str) -> Result<()> {
        let config = CliConfig::load(path)?;

        match key {
            "hub" => match &config.hub {
                Some(hub) => println!("{}.{} ({})", hub.name, hub.suffix, hub.provider),
                None => println!("(未设置)"),
            },

            "pump" => println!("interval_ms = {}", config.pump.interval_ms),

            "devices" => {
                for device in &config.devices {
                    println!("{}", device.id);
                }
            },

            _ => {
                println!("IoT Hub CLI 配置:");
                match &config.hub {
                    Some(hub) => println!("  Hub: {}.{} ({})", hub.name, hub.suffix, hub.provider),
                    None => println!("  Hub: (未设置)"),
                }
                println!("  泵间隔: {} ms", config.pump.interval_ms);
                println!("  设备数: {}", config.devices.len());
            },
        }

        Ok(())
    }

    fn check_(path: &Path) -> Result<()> {
        let config = CliConfig::load(path)?;

        println!("配置文件: {}", path.display());
        let mut broken = 0;
        for device in &config.devices {
            match config.client_config(device) {
                Ok(client_config) => println!("  ✅ {} -> {}", device.id, client_config.hostname()),
                Err(e) => {
                    broken += 1;
                    println!("  ❌ {}: {:#}", device.id, e);
                },
            }
        }

        if broken > 0 {
            bail!("{} device(s) have invalid configuration", broken);
        }
        Ok(())
    }
}
