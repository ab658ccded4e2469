//! 命令定义和实现

pub mod config;
pub mod run;
pub mod send;
pub mod shared;
pub mod upload;

pub use config::ConfigCommand;
pub use run::RunCommand;
pub use send::SendCommand;
pub use shared::SharedCommand;
pub use upload::UploadCommand;

use crate::config::{self as cli_config, CliConfig, DeviceSection};
use anyhow::Result;
use iothub_sdk::prelude::*;
use std::sync::Arc;

/// 配置中选择的协议提供者名称（默认 `mock`）
pub(crate) fn provider_name(config: &CliConfig) -> &str {
    config.hub.as_ref().map_or("mock", |h| h.provider.as_str())
}

/// 为配置中的设备创建私有客户端
pub(crate) fn connect(config: &CliConfig, device: &DeviceSection) -> Result<ClientHandle> {
    connect_with(config, device, cli_config::provider(provider_name(config))?)
}

/// 使用指定的协议提供者创建私有客户端
pub(crate) fn connect_with(
    config: &CliConfig,
    device: &DeviceSection,
    provider: Arc<dyn TransportProvider>,
) -> Result<ClientHandle> {
    let client = ClientHandle::builder()
        .config(config.client_config(device)?)
        .provider(provider)
        .pump_config(config.pump_config())
        .build()?;

    let device_id = device.id.clone();
    client.set_connection_status_callback(Some(Box::new(move |status, reason| {
        tracing::info!("{}: {:?} ({:?})", device_id, status, reason);
    })))?;
    Ok(client)
}
