//! 串行化锁
//!
//! 与下层客户端/传输配套的"门闩"锁：它本身不携带数据，只负责串行化
//! 所有对下层的调用以及工作泵的 tick。被保护的数据放在各自的单元中，
//! 且只在持有本锁时访问（因此这些单元永远不会发生争用）。
//!
//! 获取失败的唯一来源是锁中毒：某个线程在持锁期间 panic。
//! 中毒后所有后续获取都会失败，调用方按"锁失败"语义处理。

use crate::error::DriverError;
use std::sync::{Mutex, MutexGuard};

/// 持锁凭证，drop 即释放
pub type SerialGuard<'a> = MutexGuard<'a, ()>;

/// 串行化锁
#[derive(Debug, Default)]
pub struct SerialLock {
    inner: Mutex<()>,
}

impl SerialLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取锁
    ///
    /// # 错误
    /// - `DriverError::PoisonedLock`: 之前的持锁线程 panic
    pub fn acquire(&self) -> Result<SerialGuard<'_>, DriverError> {
        self.inner.lock().map_err(|_| DriverError::PoisonedLock)
    }

    pub fn is_poisoned(&self) -> bool {
        self.inner.is_poisoned()
    }

    /// 清除中毒标记，之后的获取重新成功
    pub fn clear_poison(&self) {
        self.inner.clear_poison();
    }
}

#[cfg(test)]
pub(crate) fn poison(lock: &std::sync::Arc<SerialLock>) {
    let lock = lock.clone();
    let _ = std::thread::spawn(move || {
        let _guard = lock.acquire().unwrap();
        panic!("poisoning serial lock for test");
    })
    .join();
}
