//! 驱动层错误类型定义

use thiserror::Error;

/// 驱动层错误类型
#[derive(Error, Debug)]
pub enum DriverError {
    /// 锁被毒化（持锁线程 panic）
    #[error("Poisoned lock (thread panic)")]
    PoisonedLock,

    /// 线程创建失败
    #[error("Failed to spawn thread `{name}`: {source}")]
    ThreadSpawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// 被 join 的线程以 panic 结束
    #[error("Thread `{0}` panicked")]
    ThreadPanicked(String),

    /// 工作泵已经启动过（生命周期内只允许启动一次）
    #[error("Worker pump `{0}` already started")]
    AlreadyStarted(String),
}

#[cfg(test)]
mod tests {
    use super::DriverError;
    use std::error::Error as _;

    /// 测试 DriverError 的 Display 实现
    #[test]
    fn test_driver_error_display() {
        assert_eq!(
            DriverError::PoisonedLock.to_string(),
            "Poisoned lock (thread panic)"
        );

        let err = DriverError::ThreadSpawn {
            name: "iothub-upload-3".into(),
            source: std::io::Error::other("out of threads"),
        };
        let msg = err.to_string();
        assert!(msg.contains("iothub-upload-3") && msg.contains("out of threads"));
        assert!(err.source().is_some());

        assert_eq!(
            DriverError::ThreadPanicked("pump".into()).to_string(),
            "Thread `pump` panicked"
        );
        assert!(DriverError::AlreadyStarted("pump".into()).to_string().contains("already started"));
    }
}
