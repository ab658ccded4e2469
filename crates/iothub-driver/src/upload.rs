//! 异步上传任务登记表
//!
//! 每个异步 blob 上传都在自己的线程上运行，线程结束前设置"已完成"标志。
//! 登记表记录所有尚未回收的任务：`reap_once` 回收（join）已完成的任务，
//! `drain_all` 阻塞直到所有任务都被回收。
//!
//! 上传线程不持有串行化锁；登记表本身由所属客户端的锁保护。

use crate::error::DriverError;
use crate::thread::ThreadApi;
use bytes::Bytes;
use iothub_transport::{BlobUploader, FileUploadCallback, FileUploadResult};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, warn};

/// 上传请求（目标名 + 载荷的私有副本）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub destination: String,
    pub payload: Bytes,
}

impl UploadRequest {
    /// 复制调用方的载荷，调用返回后原缓冲区即可释放
    pub fn new(destination: &str, payload: &[u8]) -> Self {
        Self {
            destination: destination.to_string(),
            payload: Bytes::copy_from_slice(payload),
        }
    }
}

/// 线程退出时（包括 panic 展开）设置完成标志
struct CompletionFlag(Arc<AtomicBool>);

impl Drop for CompletionFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Release);
    }
}

struct UploadTask {
    id: u64,
    destination: String,
    handle: JoinHandle<()>,
    completed: Arc<AtomicBool>,
}

impl UploadTask {
    fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }
}

/// 上传任务登记表
pub struct UploadTaskRegistry {
    threads: Arc<dyn ThreadApi>,
    tasks: Vec<UploadTask>,
    next_id: u64,
    total_reaped: u64,
    poll_interval: Duration,
}

impl std::fmt::Debug for UploadTaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadTaskRegistry")
            .field("pending", &self.tasks.len())
            .field("total_submitted", &self.next_id)
            .field("total_reaped", &self.total_reaped)
            .finish()
    }
}

impl UploadTaskRegistry {
    pub fn new(threads: Arc<dyn ThreadApi>) -> Self {
        Self {
            threads,
            tasks: Vec::new(),
            next_id: 0,
            total_reaped: 0,
            poll_interval: Duration::from_millis(1),
        }
    }

    /// 设置 `drain_all` 的轮询间隔
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// 尚未回收的任务数
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn total_submitted(&self) -> u64 {
        self.next_id
    }

    pub fn total_reaped(&self) -> u64 {
        self.total_reaped
    }

    /// 提交一个上传任务
    ///
    /// 上传线程依次执行：调用 `uploader.upload`（不持锁）、
    /// 调用 `on_complete`（若有）、设置完成标志。
    ///
    /// 线程创建失败时不登记任何任务，请求与回调随之释放，回调不会被调用。
    pub fn submit(
        &mut self,
        request: UploadRequest,
        uploader: Arc<dyn BlobUploader>,
        on_complete: Option<FileUploadCallback>,
    ) -> Result<(), DriverError> {
        let id = self.next_id;
        let name = format!("iothub-upload-{}", id);
        let destination = request.destination.clone();
        let completed = Arc::new(AtomicBool::new(false));
        let flag = CompletionFlag(completed.clone());

        let body = move || {
            let _flag = flag;
            let result = match uploader.upload(&request.destination, &request.payload) {
                Ok(()) => FileUploadResult::Ok,
                Err(e) => {
                    error!("Upload of `{}` failed: {}", request.destination, e);
                    FileUploadResult::Error
                },
            };
            if let Some(on_complete) = on_complete {
                on_complete(result);
            }
        };

        let handle = self.threads.spawn(&name, Box::new(body))?;

        self.next_id += 1;
        self.tasks.push(UploadTask {
            id,
            destination,
            handle,
            completed,
        });
        debug!("Upload task {} submitted ({} pending)", id, self.tasks.len());
        Ok(())
    }

    /// 回收所有已完成的任务，返回本次回收数
    ///
    /// 不会等待未完成的任务。
    pub fn reap_once(&mut self) -> usize {
        if self.tasks.is_empty() {
            return 0;
        }

        let (done, pending): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.tasks).into_iter().partition(UploadTask::is_completed);
        self.tasks = pending;

        let reaped = done.len();
        for task in done {
            if let Err(e) = self.threads.join(task.handle) {
                warn!("Upload task {} (`{}`) ended abnormally: {}", task.id, task.destination, e);
            }
        }
        self.total_reaped += reaped as u64;
        reaped
    }

    /// 阻塞直到所有任务都被回收，返回回收总数
    pub fn drain_all(&mut self) -> usize {
        let mut reaped = 0;
        loop {
            reaped += self.reap_once();
            if self.tasks.is_empty() {
                break;
            }
            self.threads.sleep(self.poll_interval);
        }
        if reaped > 0 {
            debug!("Drained {} upload task(s)", reaped);
        }
        reaped
    }
}

impl Drop for UploadTaskRegistry {
    fn drop(&mut self) {
        if !self.tasks.is_empty() {
            warn!("Upload registry dropped with {} pending task(s), waiting", self.tasks.len());
            self.drain_all();
        }
    }
}
