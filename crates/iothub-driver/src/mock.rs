//! 可计数、可注入失败的线程 API（测试替身）

use crate::error::DriverError;
use crate::thread::{OsThreads, ThreadApi};
use parking_lot::Mutex;
use std::thread::JoinHandle;

/// 记录每次 spawn / join 的线程名，并可让名称匹配的 spawn 失败
#[derive(Debug, Default)]
pub struct CountingThreads {
    spawned: Mutex<Vec<String>>,
    joined: Mutex<Vec<String>>,
    fail_spawn_prefix: Mutex<Option<String>>,
}

impl CountingThreads {
    pub fn new() -> Self {
        Self::default()
    }

    /// 之后所有以 `prefix` 开头的线程创建都失败；`None` 取消注入
    pub fn fail_spawn_matching(&self, prefix: Option<&str>) {
        *self.fail_spawn_prefix.lock() = prefix.map(str::to_string);
    }

    pub fn spawned(&self) -> Vec<String> {
        self.spawned.lock().clone()
    }

    pub fn joined(&self) -> Vec<String> {
        self.joined.lock().clone()
    }

    pub fn spawned_matching(&self, prefix: &str) -> usize {
        self.spawned.lock().iter().filter(|n| n.starts_with(prefix)).count()
    }

    pub fn joined_matching(&self, prefix: &str) -> usize {
        self.joined.lock().iter().filter(|n| n.starts_with(prefix)).count()
    }
}

impl ThreadApi for CountingThreads {
    fn spawn(
        &self,
        name: &str,
        body: Box<dyn FnOnce() + Send + 'static>,
    ) -> Result<JoinHandle<()>, DriverError> {
        if let Some(prefix) = self.fail_spawn_prefix.lock().as_deref()
            && name.starts_with(prefix)
        {
            return Err(DriverError::ThreadSpawn {
                name: name.to_string(),
                source: std::io::Error::other("injected spawn failure"),
            });
        }
        let handle = OsThreads.spawn(name, body)?;
        self.spawned.lock().push(name.to_string());
        Ok(handle)
    }

    fn join(&self, handle: JoinHandle<()>) -> Result<(), DriverError> {
        let name = handle.thread().name().unwrap_or("<unnamed>").to_string();
        let result = OsThreads.join(handle);
        self.joined.lock().push(name);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counting_threads_records_and_fails() {
        let threads = CountingThreads::new();
        let h = threads.spawn("iothub-upload-0", Box::new(|| {})).unwrap();
        threads.join(h).unwrap();

        threads.fail_spawn_matching(Some("iothub-upload"));
        assert!(matches!(
            threads.spawn("iothub-upload-1", Box::new(|| {})),
            Err(DriverError::ThreadSpawn { .. })
        ));
        let h = threads.spawn("iothub-client-1", Box::new(|| {})).unwrap();
        threads.join(h).unwrap();

        assert_eq!(threads.spawned_matching("iothub-upload"), 1);
        assert_eq!(threads.joined_matching("iothub-"), 2);
        assert_eq!(threads.spawned(), vec!["iothub-upload-0", "iothub-client-1"]);
    }
}
