//! # IoT Hub Client
//!
//! 线程安全的设备客户端 façade：
//!
//! - [`ClientHandle`]：包装单个下层客户端，私有工作泵或共享传输的工作泵
//! - [`TransportHandle`]：多个客户端共用一条连接与一个工作泵
//! - [`ClientBuilder`] / [`TransportBuilder`]：可注入线程 API 与泵配置的构造器
//!
//! # 示例
//!
//! ```no_run
//! use iothub_client::ClientHandle;
//! use iothub_transport::{ClientConfig, Message};
//! # fn provider() -> std::sync::Arc<dyn iothub_transport::TransportProvider> { unimplemented!() }
//!
//! let config = ClientConfig::new("contoso", "azure-devices.net", "sensor-1")
//!     .with_device_key("a2V5");
//! let client = ClientHandle::create(&config, provider())?;
//! client.send_event_async(Message::from_text("{\"temp\":21.5}"), None)?;
//! client.destroy();
//! # Ok::<(), iothub_client::ClientError>(())
//! ```

mod builder;
mod client;
mod error;
mod transport;

pub use builder::{ClientBuilder, TransportBuilder};
pub use client::{ClientHandle, ClientId};
pub use error::{ClientError, ResultCode};
pub use transport::{SharedLowerLayerTransport, TransportHandle};
