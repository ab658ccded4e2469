//! 客户端层错误类型定义

use iothub_driver::DriverError;
use iothub_transport::{ConnectionStringError, LowerLayerError};
use thiserror::Error;

/// 客户端层错误类型
#[derive(Error, Debug)]
pub enum ClientError {
    /// 参数无效（空的必填字符串、空文档等），不获取锁、不产生副作用
    #[error("Invalid argument: {0}")]
    InvalidArg(String),

    /// 驱动层错误（锁失败、线程创建/join 失败）
    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    /// 下层返回的错误，原样透传
    #[error("Lower layer error: {0}")]
    LowerLayer(#[from] LowerLayerError),

    /// 连接字符串无效
    #[error("Invalid connection string: {0}")]
    ConnectionString(#[from] ConnectionStringError),
}

/// 扁平化结果码
///
/// 便于跨 FFI 或日志中以固定取值报告操作结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    Ok,
    InvalidArg,
    Error,
    InvalidSize,
    IndefiniteTime,
}

impl ClientError {
    pub fn result_code(&self) -> ResultCode {
        match self {
            ClientError::InvalidArg(_) | ClientError::ConnectionString(_) => ResultCode::InvalidArg,
            ClientError::Driver(_) => ResultCode::Error,
            ClientError::LowerLayer(e) => match e {
                LowerLayerError::InvalidArg(_) => ResultCode::InvalidArg,
                LowerLayerError::Error(_) => ResultCode::Error,
                LowerLayerError::InvalidSize => ResultCode::InvalidSize,
                LowerLayerError::IndefiniteTime => ResultCode::IndefiniteTime,
            },
        }
    }
}

impl ResultCode {
    pub fn of<T>(result: &Result<T, ClientError>) -> Self {
        match result {
            Ok(_) => ResultCode::Ok,
            Err(e) => e.result_code(),
        }
    }
}
