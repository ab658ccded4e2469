//! 设备侧消息、状态与回调类型
//!
//! 这些类型在 façade 与协议实现之间原样传递，本层不解释其内容。

use bytes::Bytes;
use std::fmt;

/// 设备到云（D2C）或云到设备（C2D）消息
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    body: Bytes,
    message_id: Option<String>,
    correlation_id: Option<String>,
    properties: Vec<(String, String)>,
}

impl Message {
    /// 以任意字节内容创建消息
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            ..Default::default()
        }
    }

    /// 以 UTF-8 字符串创建消息
    pub fn from_text(text: &str) -> Self {
        Self::new(Bytes::copy_from_slice(text.as_bytes()))
    }

    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// 追加一个应用属性（同名属性会被覆盖）
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();
        match self.properties.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.properties.push((key, value)),
        }
        self
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn message_id(&self) -> Option<&str> {
        self.message_id.as_deref()
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn properties(&self) -> &[(String, String)] {
        &self.properties
    }
}

/// 事件发送确认结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationResult {
    /// 服务端已确认
    Ok,
    /// 客户端销毁时仍未确认
    BecauseDestroy,
    /// 超时
    MessageTimeout,
    /// 发送失败
    Error,
}

/// C2D 消息处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDisposition {
    Accepted,
    Rejected,
    Abandoned,
}

/// 发送队列状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    /// 无待发送事件
    Idle,
    /// 仍有事件在队列中
    Busy,
}

/// 连接认证状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Authenticated,
    Unauthenticated,
}

/// 连接状态变化原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatusReason {
    ExpiredSasToken,
    DeviceDisabled,
    BadCredential,
    RetryExpired,
    NoNetwork,
    CommunicationError,
    ConnectionOk,
}

/// 设备孪生更新类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TwinUpdateState {
    /// 完整文档
    Complete,
    /// 仅 desired 属性的增量
    Partial,
}

/// 重连重试策略
///
/// 默认值为 `ExponentialBackoffWithJitter`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum RetryPolicy {
    None,
    Immediate,
    Interval,
    LinearBackoff,
    ExponentialBackoff,
    #[default]
    ExponentialBackoffWithJitter,
    Random,
}

impl RetryPolicy {
    /// 所有策略（按协议定义顺序）
    pub const ALL: [RetryPolicy; 7] = [
        RetryPolicy::None,
        RetryPolicy::Immediate,
        RetryPolicy::Interval,
        RetryPolicy::LinearBackoff,
        RetryPolicy::ExponentialBackoff,
        RetryPolicy::ExponentialBackoffWithJitter,
        RetryPolicy::Random,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RetryPolicy::None => "none",
            RetryPolicy::Immediate => "immediate",
            RetryPolicy::Interval => "interval",
            RetryPolicy::LinearBackoff => "linear_backoff",
            RetryPolicy::ExponentialBackoff => "exponential_backoff",
            RetryPolicy::ExponentialBackoffWithJitter => "exponential_backoff_with_jitter",
            RetryPolicy::Random => "random",
        }
    }
}

impl fmt::Display for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RetryPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RetryPolicy::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown retry policy `{}`", s))
    }
}

/// 重试策略及其总超时（秒，0 表示不限）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetrySettings {
    pub policy: RetryPolicy,
    pub timeout_limit_secs: u64,
}

/// 直接方法调用的应答
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodResponse {
    pub status: i32,
    pub payload: Bytes,
}

impl MethodResponse {
    pub fn new(status: i32, payload: impl Into<Bytes>) -> Self {
        Self {
            status,
            payload: payload.into(),
        }
    }
}

/// 文件上传结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileUploadResult {
    Ok,
    Error,
}

/// `set_option` 的取值
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl From<bool> for OptionValue {
    fn from(v: bool) -> Self {
        OptionValue::Bool(v)
    }
}

impl From<i64> for OptionValue {
    fn from(v: i64) -> Self {
        OptionValue::Int(v)
    }
}

impl From<u32> for OptionValue {
    fn from(v: u32) -> Self {
        OptionValue::Int(i64::from(v))
    }
}

impl From<&str> for OptionValue {
    fn from(v: &str) -> Self {
        OptionValue::Str(v.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(v: String) -> Self {
        OptionValue::Str(v)
    }
}

/// 事件确认回调（每个事件恰好调用一次）
pub type EventConfirmationCallback = Box<dyn FnOnce(ConfirmationResult) + Send>;
/// C2D 消息回调
pub type MessageCallback = Box<dyn FnMut(&Message) -> MessageDisposition + Send>;
/// 连接状态回调
pub type ConnectionStatusCallback =
    Box<dyn FnMut(ConnectionStatus, ConnectionStatusReason) + Send>;
/// 设备孪生回调（payload 为 JSON 文本字节）
pub type DeviceTwinCallback = Box<dyn FnMut(TwinUpdateState, &[u8]) + Send>;
/// 直接方法回调：(method_name, payload) -> 应答
pub type DeviceMethodCallback = Box<dyn FnMut(&str, &[u8]) -> MethodResponse + Send>;
/// reported 属性确认回调（参数为服务端状态码）
pub type ReportedStateCallback = Box<dyn FnOnce(i32) + Send>;
/// 文件上传完成回调（在上传线程上调用，不持有任何锁）
pub type FileUploadCallback = Box<dyn FnOnce(FileUploadResult) + Send>;
