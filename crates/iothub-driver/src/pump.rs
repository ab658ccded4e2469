//! 工作泵（Worker Pump）
//!
//! 后台周期线程：每一轮先获取串行化锁，若未收到停止信号则执行一次 tick
//! （下层 `do_work` 等），释放锁后检查停止信号并休眠一个间隔。
//!
//! 停止信号是一个无锁的原子标志（Release 写 / Acquire 读），
//! 因此请求停止永远不会阻塞在串行化锁上。
//!
//! # 注意
//!
//! `join` 与 `Drop` 会等待泵线程退出，而泵线程每一轮都需要拿到锁，
//! 因此**不得在持有同一把串行化锁时 join 或 drop 工作泵**。

use crate::error::DriverError;
use crate::lock::SerialLock;
use crate::thread::{OsThreads, ThreadApi};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, trace, warn};

/// 工作泵配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PumpConfig {
    /// 两次 tick 之间的休眠（毫秒）
    pub interval_ms: u64,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self { interval_ms: 1 }
    }
}

impl PumpConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// 工作泵生命周期
///
/// `Unstarted → Running → StopSignaled → Joined`，只会单向推进。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpState {
    Unstarted,
    Running,
    StopSignaled,
    Joined,
}

/// 协作式停止标志
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// 工作泵运行计数
#[derive(Debug, Default)]
pub struct PumpMetrics {
    /// 实际执行的 tick 次数
    pub ticks_run: AtomicU64,
    /// 因获取锁失败而跳过的轮次
    pub ticks_skipped_lock: AtomicU64,
    /// 拿到锁后发现已请求停止而跳过的轮次
    pub ticks_skipped_stop: AtomicU64,
}

/// `PumpMetrics` 的一次性快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpMetricsSnapshot {
    pub ticks_run: u64,
    pub ticks_skipped_lock: u64,
    pub ticks_skipped_stop: u64,
}

impl PumpMetrics {
    pub fn snapshot(&self) -> PumpMetricsSnapshot {
        PumpMetricsSnapshot {
            ticks_run: self.ticks_run.load(Ordering::Relaxed),
            ticks_skipped_lock: self.ticks_skipped_lock.load(Ordering::Relaxed),
            ticks_skipped_stop: self.ticks_skipped_stop.load(Ordering::Relaxed),
        }
    }
}

/// 泵循环
///
/// 每一轮：
/// 1. 获取锁；失败则本轮不做任何工作（计入 `ticks_skipped_lock`）
/// 2. 持锁期间检查停止信号，未请求停止时执行 `tick`
/// 3. 释放锁后再次检查停止信号，已请求则退出
/// 4. 休眠 `interval`
pub fn pump_loop<F>(
    lock: &SerialLock,
    stop: &StopSignal,
    mut tick: F,
    threads: &dyn ThreadApi,
    interval: Duration,
    metrics: &PumpMetrics,
) where
    F: FnMut(),
{
    let mut lock_failure_reported = false;

    loop {
        match lock.acquire() {
            Ok(_guard) => {
                if stop.is_requested() {
                    metrics.ticks_skipped_stop.fetch_add(1, Ordering::Relaxed);
                } else {
                    tick();
                    metrics.ticks_run.fetch_add(1, Ordering::Relaxed);
                }
            },
            Err(e) => {
                metrics.ticks_skipped_lock.fetch_add(1, Ordering::Relaxed);
                if !lock_failure_reported {
                    warn!("Worker pump cannot acquire lock, skipping work: {}", e);
                    lock_failure_reported = true;
                } else {
                    trace!("Worker pump lock still unavailable");
                }
            },
        }

        if stop.is_requested() {
            break;
        }
        threads.sleep(interval);
    }
}

/// 工作泵
///
/// 每个实例最多启动一次；启动后的线程在收到停止信号并完成当前轮次后退出。
pub struct WorkerPump {
    name: String,
    threads: Arc<dyn ThreadApi>,
    config: PumpConfig,
    stop: StopSignal,
    metrics: Arc<PumpMetrics>,
    handle: Option<JoinHandle<()>>,
    started: bool,
    joined: bool,
}

impl std::fmt::Debug for WorkerPump {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPump")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

impl WorkerPump {
    pub fn new(name: impl Into<String>, threads: Arc<dyn ThreadApi>, config: PumpConfig) -> Self {
        Self {
            name: name.into(),
            threads,
            config,
            stop: StopSignal::new(),
            metrics: Arc::new(PumpMetrics::default()),
            handle: None,
            started: false,
            joined: false,
        }
    }

    /// 使用 `std::thread` 与默认配置
    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, Arc::new(OsThreads), PumpConfig::default())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> PumpState {
        if self.joined {
            PumpState::Joined
        } else if !self.started {
            PumpState::Unstarted
        } else if self.stop.is_requested() {
            PumpState::StopSignaled
        } else {
            PumpState::Running
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == PumpState::Running
    }

    /// 停止标志的克隆，可在不持有泵的情况下请求停止
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn metrics(&self) -> PumpMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// 启动泵线程
    ///
    /// # 错误
    /// - `DriverError::AlreadyStarted`: 该实例已经启动过
    /// - `DriverError::ThreadSpawn`: 线程创建失败（状态保持 `Unstarted`）
    pub fn start<F>(&mut self, lock: Arc<SerialLock>, tick: F) -> Result<(), DriverError>
    where
        F: FnMut() + Send + 'static,
    {
        if self.started {
            return Err(DriverError::AlreadyStarted(self.name.clone()));
        }

        let stop = self.stop.clone();
        let metrics = self.metrics.clone();
        let threads = self.threads.clone();
        let interval = self.config.interval();

        let handle = self.threads.spawn(
            &self.name,
            Box::new(move || {
                pump_loop(&lock, &stop, tick, threads.as_ref(), interval, &metrics);
            }),
        )?;

        self.handle = Some(handle);
        self.started = true;
        debug!("Worker pump `{}` started", self.name);
        Ok(())
    }

    /// 请求停止（不阻塞）
    pub fn signal_stop(&self) {
        self.stop.request();
    }

    /// 等待泵线程退出
    ///
    /// 未启动或已经 join 过时直接返回 `Ok(())`。
    /// 调用方必须已经请求停止，且不能持有泵所用的锁。
    pub fn join(&mut self) -> Result<(), DriverError> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        if !self.stop.is_requested() {
            debug!("Joining worker pump `{}` without stop request", self.name);
        }
        self.joined = true;
        let result = self.threads.join(handle);
        debug!("Worker pump `{}` joined", self.name);
        result
    }
}

impl Drop for WorkerPump {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stop.request();
            if let Err(e) = self.join() {
                error!("Worker pump `{}` exited abnormally: {}", self.name, e);
            }
        }
    }
}
