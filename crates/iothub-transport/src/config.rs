//! 客户端配置与连接字符串解析
//!
//! 连接字符串格式：
//!
//! ```text
//! HostName=<hub>.<suffix>;DeviceId=<id>;SharedAccessKey=<key>[;GatewayHostName=<gw>]
//! HostName=<hub>.<suffix>;DeviceId=<id>;SharedAccessSignature=<sas>
//! ```

use crate::error::ConnectionStringError;

const HOSTNAME_KEY: &str = "HostName";
const DEVICE_ID_KEY: &str = "DeviceId";
const DEVICE_KEY_KEY: &str = "SharedAccessKey";
const SAS_TOKEN_KEY: &str = "SharedAccessSignature";
const GATEWAY_KEY: &str = "GatewayHostName";

/// 单设备客户端配置
///
/// # Example
///
/// ```
/// use iothub_transport::ClientConfig;
///
/// let config = ClientConfig::new("contoso", "azure-devices.net", "sensor-1")
///     .with_device_key("c2VjcmV0");
/// assert_eq!(config.hostname(), "contoso.azure-devices.net");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClientConfig {
    /// IoT hub 名称（主机名第一段）
    pub hub_name: String,
    /// IoT hub 后缀（如 `azure-devices.net`）
    pub hub_suffix: String,
    /// 设备 ID
    pub device_id: String,
    /// 设备对称密钥
    #[cfg_attr(feature = "serde", serde(default))]
    pub device_key: Option<String>,
    /// 预先签发的 SAS token
    #[cfg_attr(feature = "serde", serde(default))]
    pub device_sas_token: Option<String>,
    /// 协议网关主机名（可选）
    #[cfg_attr(feature = "serde", serde(default))]
    pub gateway_hostname: Option<String>,
}

impl ClientConfig {
    pub fn new(
        hub_name: impl Into<String>,
        hub_suffix: impl Into<String>,
        device_id: impl Into<String>,
    ) -> Self {
        Self {
            hub_name: hub_name.into(),
            hub_suffix: hub_suffix.into(),
            device_id: device_id.into(),
            ..Default::default()
        }
    }

    pub fn with_device_key(mut self, key: impl Into<String>) -> Self {
        self.device_key = Some(key.into());
        self
    }

    pub fn with_sas_token(mut self, token: impl Into<String>) -> Self {
        self.device_sas_token = Some(token.into());
        self
    }

    pub fn with_gateway(mut self, gateway: impl Into<String>) -> Self {
        self.gateway_hostname = Some(gateway.into());
        self
    }

    /// 完整主机名 `<hub_name>.<hub_suffix>`
    pub fn hostname(&self) -> String {
        format!("{}.{}", self.hub_name, self.hub_suffix)
    }

    /// 共享连接场景下注册到传输层所需的设备部分
    pub fn device_config(&self) -> DeviceConfig {
        DeviceConfig {
            device_id: self.device_id.clone(),
            device_key: self.device_key.clone(),
            device_sas_token: self.device_sas_token.clone(),
        }
    }

    /// 返回第一个为空的必填字段名
    pub fn missing_field(&self) -> Option<&'static str> {
        if self.hub_name.is_empty() {
            Some("hub_name")
        } else if self.hub_suffix.is_empty() {
            Some("hub_suffix")
        } else if self.device_id.is_empty() {
            Some("device_id")
        } else {
            None
        }
    }
}

/// 注册到共享传输的设备凭据
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceConfig {
    pub device_id: String,
    pub device_key: Option<String>,
    pub device_sas_token: Option<String>,
}

/// 解析后的设备连接字符串
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionString {
    pub hub_name: String,
    pub hub_suffix: String,
    pub device_id: String,
    pub device_key: Option<String>,
    pub device_sas_token: Option<String>,
    pub gateway_hostname: Option<String>,
}

impl ConnectionString {
    /// 解析连接字符串
    ///
    /// - 键值对以 `;` 分隔，允许末尾多余的 `;`
    /// - 只在第一个 `=` 处拆分，SAS token 的值本身可以包含 `=`
    /// - HostName 在第一个 `.` 处拆分为 name 与 suffix
    pub fn parse(input: &str) -> Result<Self, ConnectionStringError> {
        let mut host = None;
        let mut device_id = None;
        let mut device_key = None;
        let mut sas = None;
        let mut gateway = None;

        for pair in input.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| ConnectionStringError::MalformedPair(pair.to_string()))?;
            let value = value.to_string();
            match key {
                HOSTNAME_KEY => host = Some(value),
                DEVICE_ID_KEY => device_id = Some(value),
                DEVICE_KEY_KEY => device_key = Some(value),
                SAS_TOKEN_KEY => sas = Some(value),
                GATEWAY_KEY => gateway = Some(value),
                other => tracing::debug!("Ignoring unknown connection string key `{}`", other),
            }
        }

        let host = host
            .filter(|h| !h.is_empty())
            .ok_or(ConnectionStringError::MissingKey(HOSTNAME_KEY))?;
        let device_id = device_id
            .filter(|d| !d.is_empty())
            .ok_or(ConnectionStringError::MissingKey(DEVICE_ID_KEY))?;
        if device_key.is_none() && sas.is_none() {
            return Err(ConnectionStringError::MissingCredential);
        }

        let (hub_name, hub_suffix) = match host.split_once('.') {
            Some((name, suffix)) if !name.is_empty() && !suffix.is_empty() => {
                (name.to_string(), suffix.to_string())
            },
            _ => return Err(ConnectionStringError::InvalidHostName(host)),
        };

        Ok(Self {
            hub_name,
            hub_suffix,
            device_id,
            device_key,
            device_sas_token: sas,
            gateway_hostname: gateway,
        })
    }

    /// 转换为 `ClientConfig`
    pub fn into_config(self) -> ClientConfig {
        ClientConfig {
            hub_name: self.hub_name,
            hub_suffix: self.hub_suffix,
            device_id: self.device_id,
            device_key: self.device_key,
            device_sas_token: self.device_sas_token,
            gateway_hostname: self.gateway_hostname,
        }
    }
}

impl std::str::FromStr for ConnectionString {
    type Err = ConnectionStringError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
