//! IoT Hub Device SDK
//!
//! 设备端 IoT hub 客户端核心：在非线程安全的协议层之上提供线程安全的阻塞 API。
//!
//! # 架构设计
//!
//! 本 SDK 采用分层架构，从底层到高层：
//!
//! - **协议层** (`transport`): 下层客户端/共享传输 trait、消息与配置类型
//! - **驱动层** (`driver`): 串行化锁、工作泵线程、上传任务登记表
//! - **客户端层** (`client`): `ClientHandle` 与 `TransportHandle`
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use iothub_sdk::prelude::*;
//! # fn provider() -> std::sync::Arc<dyn TransportProvider> { unimplemented!() }
//!
//! iothub_sdk::init_logger!();
//!
//! let client = ClientHandle::create_from_connection_string(
//!     "HostName=contoso.azure-devices.net;DeviceId=sensor-1;SharedAccessKey=a2V5",
//!     provider(),
//! )?;
//! client.send_event_async(Message::from_text("hello"), None)?;
//! # Ok::<(), ClientError>(())
//! ```

pub use iothub_client as client;
pub use iothub_driver as driver;
pub use iothub_transport as transport;

pub mod prelude;

// 客户端层（推荐入口）
pub use client::{
    ClientBuilder, ClientError, ClientHandle, ClientId, ResultCode, TransportBuilder,
    TransportHandle,
};

// 驱动层
pub use driver::{DriverError, PumpConfig, PumpState};

// 协议层常用类型
pub use transport::{
    ClientConfig, ConnectionString, LowerLayerClient, LowerLayerError, LowerLayerTransport,
    Message, TransportProvider,
};

// 日志宏重导出，供 `init_logger!` 使用
#[doc(hidden)]
pub use tracing_log as __tracing_log;
#[doc(hidden)]
pub use tracing_subscriber as __tracing_subscriber;

/// 初始化日志
///
/// 基于 `tracing-subscriber`，级别由 `RUST_LOG` 控制（默认 `info`），
/// 并通过 `tracing-log` 桥接 `log` crate 的记录。重复调用是安全的。
///
/// ```rust,no_run
/// iothub_sdk::init_logger!();
/// iothub_sdk::init_logger!("iothub_client=debug");
/// ```
#[macro_export]
macro_rules! init_logger {
    () => {
        $crate::init_logger!("info")
    };
    ($default:expr) => {{
        use $crate::__tracing_subscriber::EnvFilter;
        use $crate::__tracing_subscriber::util::SubscriberInitExt;

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new($default));
        let _ = $crate::__tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_thread_names(true)
            .finish()
            .try_init();
        // 已由 subscriber 安装时返回错误，忽略即可
        let _ = $crate::__tracing_log::LogTracer::init();
    }};
}
