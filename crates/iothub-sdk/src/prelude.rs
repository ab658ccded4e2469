//! Prelude - 常用类型的便捷导入
//!
//! ```rust
//! use iothub_sdk::prelude::*;
//! ```

// 客户端层
pub use crate::client::{ClientBuilder, ClientHandle, ClientId, TransportBuilder, TransportHandle};

// 配置与消息
pub use crate::transport::{
    ClientConfig, ConfirmationResult, ConnectionStatus, ConnectionStatusReason, ConnectionString,
    FileUploadResult, Message, MessageDisposition, MethodResponse, OptionValue, RetryPolicy,
    RetrySettings, SendStatus, TwinUpdateState,
};

// 协议层 trait
pub use crate::transport::{BlobUploader, LowerLayerClient, LowerLayerTransport, TransportProvider};

// 驱动层配置
pub use crate::driver::{PumpConfig, PumpState};

// 错误类型
pub use crate::client::{ClientError, ResultCode};
pub use crate::driver::DriverError;
pub use crate::transport::LowerLayerError;
