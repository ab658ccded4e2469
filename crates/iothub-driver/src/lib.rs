//! 驱动层模块
//!
//! 本模块提供客户端 façade 之下的线程与生命周期原语：
//! - 串行化锁（`SerialLock`，失败语义 = 锁中毒）
//! - 线程 API 抽象（`ThreadApi`，便于注入失败与计数）
//! - 周期性工作泵（`WorkerPump`：持锁 tick + 无锁协作式取消）
//! - 异步上传任务登记表（`UploadTaskRegistry`）
//!
//! # 使用场景
//!
//! 大多数用户应该使用 `iothub-client` 提供的 `ClientHandle` / `TransportHandle`，
//! 这里的类型是它们的构件。

mod error;
mod lock;
pub mod pump;
pub mod thread;
pub mod upload;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use error::DriverError;
pub use lock::{SerialGuard, SerialLock};
pub use pump::{
    PumpConfig, PumpMetrics, PumpMetricsSnapshot, PumpState, StopSignal, WorkerPump, pump_loop,
};
pub use thread::{OsThreads, ThreadApi};
pub use upload::{UploadRequest, UploadTaskRegistry};
