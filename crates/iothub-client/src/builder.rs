//! Builder 模式 API
//!
//! `ClientBuilder` / `TransportBuilder` 提供链式构造，并允许注入线程 API
//! 与工作泵配置（测试中用于计数线程、注入创建失败）。

use crate::client::ClientHandle;
use crate::error::ClientError;
use crate::transport::TransportHandle;
use iothub_driver::{OsThreads, PumpConfig, ThreadApi};
use iothub_transport::{ClientConfig, ConnectionString, TransportProvider};
use std::sync::Arc;

/// 客户端 Builder
///
/// 三种来源三选一：`config`、`connection_string`（二者需配合 `provider`），
/// 或 `transport`（attach 到共享传输，只使用配置中的设备部分）。
///
/// # Example
///
/// ```no_run
/// use iothub_client::ClientHandle;
/// # fn provider() -> std::sync::Arc<dyn iothub_transport::TransportProvider> { unimplemented!() }
///
/// let client = ClientHandle::builder()
///     .connection_string("HostName=contoso.azure-devices.net;DeviceId=d1;SharedAccessKey=a2V5")
///     .provider(provider())
///     .build()?;
/// # Ok::<(), iothub_client::ClientError>(())
/// ```
#[derive(Default)]
pub struct ClientBuilder {
    config: Option<ClientConfig>,
    connection_string: Option<String>,
    provider: Option<Arc<dyn TransportProvider>>,
    transport: Option<TransportHandle>,
    threads: Option<Arc<dyn ThreadApi>>,
    pump_config: Option<PumpConfig>,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn connection_string(mut self, connection_string: impl Into<String>) -> Self {
        self.connection_string = Some(connection_string.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn TransportProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// attach 到共享传输（使用其锁与工作泵）
    pub fn transport(mut self, transport: &TransportHandle) -> Self {
        self.transport = Some(transport.clone());
        self
    }

    pub fn threads(mut self, threads: Arc<dyn ThreadApi>) -> Self {
        self.threads = Some(threads);
        self
    }

    /// 私有工作泵配置（不能与 `transport` 同时使用）
    pub fn pump_config(mut self, config: PumpConfig) -> Self {
        self.pump_config = Some(config);
        self
    }

    /// 构建客户端
    ///
    /// # 错误
    /// - `ClientError::InvalidArg`: 来源缺失、冲突或必填字段为空；
    ///   `transport` 与 `provider`/`pump_config` 同时给出
    /// - `ClientError::ConnectionString`: 连接字符串无法解析
    /// - `ClientError::LowerLayer`: 下层创建/注册失败（原样透传）
    /// - `ClientError::Driver`: 获取传输锁失败
    pub fn build(self) -> Result<ClientHandle, ClientError> {
        let config = match (self.config, self.connection_string) {
            (Some(_), Some(_)) => {
                return Err(ClientError::InvalidArg(
                    "both config and connection string given".into(),
                ));
            },
            (Some(config), None) => config,
            (None, Some(cs)) => ConnectionString::parse(&cs)?.into_config(),
            (None, None) => {
                return Err(ClientError::InvalidArg(
                    "no config or connection string given".into(),
                ));
            },
        };

        if let Some(transport) = self.transport {
            // 共享传输自带协议与工作泵
            if self.provider.is_some() || self.pump_config.is_some() {
                return Err(ClientError::InvalidArg(
                    "provider and pump_config cannot be combined with a shared transport".into(),
                ));
            }
            if config.device_id.is_empty() {
                return Err(ClientError::InvalidArg("device_id is empty".into()));
            }
            let threads = self.threads.unwrap_or_else(|| transport.threads());
            return ClientHandle::attach(&transport, &config, threads);
        }

        if let Some(field) = config.missing_field() {
            return Err(ClientError::InvalidArg(format!("{} is empty", field)));
        }
        let provider = self
            .provider
            .ok_or_else(|| ClientError::InvalidArg("no transport provider given".into()))?;
        let threads = self.threads.unwrap_or_else(|| Arc::new(OsThreads));
        ClientHandle::private(
            &config,
            provider.as_ref(),
            threads,
            self.pump_config.unwrap_or_default(),
        )
    }
}

/// 共享传输 Builder
pub struct TransportBuilder {
    provider: Arc<dyn TransportProvider>,
    hub_name: String,
    hub_suffix: String,
    threads: Option<Arc<dyn ThreadApi>>,
    pump_config: Option<PumpConfig>,
}

impl TransportBuilder {
    pub fn new(provider: Arc<dyn TransportProvider>) -> Self {
        Self {
            provider,
            hub_name: String::new(),
            hub_suffix: String::new(),
            threads: None,
            pump_config: None,
        }
    }

    pub fn hub(mut self, hub_name: impl Into<String>, hub_suffix: impl Into<String>) -> Self {
        self.hub_name = hub_name.into();
        self.hub_suffix = hub_suffix.into();
        self
    }

    pub fn threads(mut self, threads: Arc<dyn ThreadApi>) -> Self {
        self.threads = Some(threads);
        self
    }

    pub fn pump_config(mut self, config: PumpConfig) -> Self {
        self.pump_config = Some(config);
        self
    }

    pub fn build(self) -> Result<TransportHandle, ClientError> {
        if self.hub_name.is_empty() {
            return Err(ClientError::InvalidArg("hub name is empty".into()));
        }
        if self.hub_suffix.is_empty() {
            return Err(ClientError::InvalidArg("hub suffix is empty".into()));
        }

        let lower_layer = self
            .provider
            .create_transport(&self.hub_name, &self.hub_suffix)?;
        Ok(TransportHandle::from_parts(
            self.provider.name(),
            lower_layer,
            self.threads.unwrap_or_else(|| Arc::new(OsThreads)),
            self.pump_config.unwrap_or_default(),
        ))
    }
}
