//! 下层（协议层）错误类型定义

use thiserror::Error;

/// 下层客户端/传输返回的结果码
///
/// 对应协议实现报告的四类结果。上层（façade）对这些错误原样透传，不做改写。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LowerLayerError {
    /// 参数无效（空字符串、缺失字段等）
    #[error("Invalid argument: {0}")]
    InvalidArg(String),

    /// 协议层一般性失败
    #[error("Lower layer error: {0}")]
    Error(String),

    /// 数据大小不合法
    #[error("Invalid size")]
    InvalidSize,

    /// 时间不确定（例如尚未收到任何消息）
    #[error("Indefinite time")]
    IndefiniteTime,
}

impl LowerLayerError {
    /// 便捷构造：一般性错误
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(message.into())
    }

    /// 便捷构造：参数无效
    pub fn invalid_arg(message: impl Into<String>) -> Self {
        Self::InvalidArg(message.into())
    }
}

/// 连接字符串解析错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStringError {
    /// 缺少必需的键
    #[error("Connection string is missing required key `{0}`")]
    MissingKey(&'static str),

    /// 键值对格式错误（缺少 `=`）
    #[error("Malformed key/value pair: `{0}`")]
    MalformedPair(String),

    /// HostName 无法拆分为 name + suffix
    #[error("HostName `{0}` must be of the form <name>.<suffix>")]
    InvalidHostName(String),

    /// 同时缺少 SharedAccessKey 与 SharedAccessSignature
    #[error("Connection string must carry SharedAccessKey or SharedAccessSignature")]
    MissingCredential,
}

impl From<ConnectionStringError> for LowerLayerError {
    fn from(err: ConnectionStringError) -> Self {
        LowerLayerError::InvalidArg(err.to_string())
    }
}
