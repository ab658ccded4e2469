//! 线程 API 抽象
//!
//! 工作泵和上传任务都通过 [`ThreadApi`] 创建、join 线程以及休眠，
//! 测试中可替换为可计数、可注入失败的实现（见 `mock` 模块）。

use crate::error::DriverError;
use std::thread::JoinHandle;
use std::time::Duration;

/// 线程原语
pub trait ThreadApi: Send + Sync {
    /// 创建一个具名线程
    fn spawn(
        &self,
        name: &str,
        body: Box<dyn FnOnce() + Send + 'static>,
    ) -> Result<JoinHandle<()>, DriverError>;

    /// 等待线程结束
    ///
    /// 线程以 panic 结束时返回 `DriverError::ThreadPanicked`。
    fn join(&self, handle: JoinHandle<()>) -> Result<(), DriverError> {
        let name = handle.thread().name().unwrap_or("<unnamed>").to_string();
        handle.join().map_err(|_| DriverError::ThreadPanicked(name))
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// 基于 `std::thread` 的默认实现
#[derive(Debug, Clone, Copy, Default)]
pub struct OsThreads;

impl ThreadApi for OsThreads {
    fn spawn(
        &self,
        name: &str,
        body: Box<dyn FnOnce() + Send + 'static>,
    ) -> Result<JoinHandle<()>, DriverError> {
        std::thread::Builder::new()
            .name(name.to_string())
            .spawn(body)
            .map_err(|source| DriverError::ThreadSpawn {
                name: name.to_string(),
                source,
            })
    }
}
