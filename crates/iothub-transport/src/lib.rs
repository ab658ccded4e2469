//! # IoT Hub Lower-Layer Contracts
//!
//! 协议层抽象，提供统一的下层客户端/共享传输接口。
//!
//! 具体的线上协议（HTTP/MQTT/AMQP）实现不在本 crate 内，
//! 它们只需实现这里的 trait 即可被线程安全的 façade 复用。
//!
//! 所有 `LowerLayerClient` / `LowerLayerTransport` 方法都是单线程语义：
//! 调用方必须在持有所属锁的情况下调用。唯一的例外是 [`BlobUploader`]，
//! 它在独立的上传线程上、不持锁地执行。

use std::sync::Arc;
use std::time::SystemTime;

mod config;
mod error;
mod types;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use config::{ClientConfig, ConnectionString, DeviceConfig};
pub use error::{ConnectionStringError, LowerLayerError};
pub use types::*;

/// 下层结果别名
pub type LowerLayerResult<T> = Result<T, LowerLayerError>;

/// 单设备下层客户端
///
/// 销毁即 `Drop`。
pub trait LowerLayerClient: Send {
    /// 推进协议状态机（发送排队事件、处理收到的消息、触发回调）
    fn do_work(&mut self);

    fn send_event_async(
        &mut self,
        message: Message,
        on_confirmation: Option<EventConfirmationCallback>,
    ) -> LowerLayerResult<()>;

    fn set_message_callback(&mut self, callback: Option<MessageCallback>) -> LowerLayerResult<()>;

    fn set_connection_status_callback(
        &mut self,
        callback: Option<ConnectionStatusCallback>,
    ) -> LowerLayerResult<()>;

    fn set_device_twin_callback(
        &mut self,
        callback: Option<DeviceTwinCallback>,
    ) -> LowerLayerResult<()>;

    fn set_device_method_callback(
        &mut self,
        callback: Option<DeviceMethodCallback>,
    ) -> LowerLayerResult<()>;

    fn send_reported_state(
        &mut self,
        reported_state: &[u8],
        on_reported: Option<ReportedStateCallback>,
    ) -> LowerLayerResult<()>;

    fn get_send_status(&self) -> LowerLayerResult<SendStatus>;

    /// 最近一次收到 C2D 消息的时间；尚未收到时返回 `IndefiniteTime`
    fn get_last_message_receive_time(&self) -> LowerLayerResult<SystemTime>;

    fn set_option(&mut self, name: &str, value: &OptionValue) -> LowerLayerResult<()>;

    fn set_retry_policy(&mut self, settings: RetrySettings) -> LowerLayerResult<()>;

    fn get_retry_policy(&self) -> LowerLayerResult<RetrySettings>;

    /// 取得一个可在其他线程上使用的 blob 上传器
    fn blob_uploader(&self) -> LowerLayerResult<Arc<dyn BlobUploader>>;
}

/// 多设备共享的下层传输连接
pub trait LowerLayerTransport: Send {
    /// 推进整个连接；设备级分发在实现内部完成
    fn do_work(&mut self);

    fn set_option(&mut self, name: &str, value: &OptionValue) -> LowerLayerResult<()>;

    /// 在该连接上注册一个设备，返回该设备的下层客户端
    fn register_device(
        &mut self,
        config: &DeviceConfig,
    ) -> LowerLayerResult<Box<dyn LowerLayerClient>>;

    /// 注销设备；在销毁该设备的下层客户端之前调用，之后可用同一 ID 重新注册
    fn unregister_device(&mut self, device_id: &str);

    fn hostname(&self) -> &str;
}

/// Blob 上传器
///
/// 不保存跨调用状态，因此可以在不持锁的情况下并发使用。
pub trait BlobUploader: Send + Sync {
    fn upload(&self, destination: &str, payload: &[u8]) -> LowerLayerResult<()>;
}

/// 协议提供者：负责创建下层客户端与共享传输
pub trait TransportProvider: Send + Sync {
    /// 协议名称（用于日志）
    fn name(&self) -> &'static str;

    fn create_client(&self, config: &ClientConfig) -> LowerLayerResult<Box<dyn LowerLayerClient>>;

    fn create_transport(
        &self,
        hub_name: &str,
        hub_suffix: &str,
    ) -> LowerLayerResult<Box<dyn LowerLayerTransport>>;
}
