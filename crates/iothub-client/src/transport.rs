//! 共享传输多路复用器
//!
//! 多个 `ClientHandle` 共用一条下层连接、一把串行化锁和一个工作泵。
//! 工作泵在第一个客户端 attach 时启动；最后一个客户端 detach 时，
//! `signal_end_worker_thread` 返回 `true`，由调用方负责 join。
//!
//! 注册表（已 attach 的客户端集合与泵）有自己的锁，与串行化锁相互独立，
//! 因此客户端可以在持有串行化锁时 attach。

use crate::builder::TransportBuilder;
use crate::client::ClientId;
use crate::error::ClientError;
use iothub_driver::{PumpConfig, PumpMetricsSnapshot, PumpState, SerialLock, ThreadApi, WorkerPump};
use iothub_transport::{LowerLayerTransport, OptionValue, TransportProvider};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error, info};

/// 共享的下层传输（只在持有串行化锁时访问）
pub type SharedLowerLayerTransport = Arc<Mutex<Box<dyn LowerLayerTransport>>>;

struct Workers {
    clients: Vec<ClientId>,
    pump: WorkerPump,
    /// 已请求停止、等待 join 的泵
    retiring: Vec<WorkerPump>,
}

struct TransportInner {
    provider: &'static str,
    hostname: String,
    gate: Arc<SerialLock>,
    lower_layer: SharedLowerLayerTransport,
    workers: Mutex<Workers>,
    threads: Arc<dyn ThreadApi>,
    pump_config: PumpConfig,
    generation: AtomicU64,
}

impl TransportInner {
    fn next_pump(&self) -> WorkerPump {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        WorkerPump::new(
            format!("iothub-transport-{}", generation),
            self.threads.clone(),
            self.pump_config,
        )
    }
}

impl Drop for TransportInner {
    fn drop(&mut self) {
        let pumps = {
            let _guard = self
                .gate
                .acquire()
                .inspect_err(|e| error!("Could not acquire lock while destroying transport: {}", e))
                .ok();
            let mut workers = self.workers.lock();
            if !workers.clients.is_empty() {
                error!(
                    "Transport `{}` destroyed with {} client(s) still attached",
                    self.hostname,
                    workers.clients.len()
                );
                workers.clients.clear();
            }
            workers.pump.signal_stop();
            let mut pumps = std::mem::take(&mut workers.retiring);
            let current = std::mem::replace(&mut workers.pump, self.next_pump());
            pumps.push(current);
            pumps
        };

        for mut pump in pumps {
            if let Err(e) = pump.join() {
                error!("Transport worker thread ended abnormally: {}", e);
            }
        }
        debug!("Transport `{}` ({}) destroyed", self.hostname, self.provider);
    }
}

/// 共享传输句柄
///
/// `Clone` 只复制引用；每个 attach 的客户端持有一份。
/// 最后一份引用释放时：请求泵停止、join、销毁下层传输。
#[derive(Clone)]
pub struct TransportHandle {
    inner: Arc<TransportInner>,
}

impl std::fmt::Debug for TransportHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportHandle")
            .field("provider", &self.inner.provider)
            .field("hostname", &self.inner.hostname)
            .field("attached_clients", &self.attached_clients())
            .finish()
    }
}

impl TransportHandle {
    /// 创建共享传输
    ///
    /// # 错误
    /// - `ClientError::InvalidArg`: hub 名称或后缀为空
    /// - `ClientError::LowerLayer`: 下层传输创建失败（原样透传）
    pub fn create(
        provider: Arc<dyn TransportProvider>,
        hub_name: &str,
        hub_suffix: &str,
    ) -> Result<Self, ClientError> {
        TransportBuilder::new(provider).hub(hub_name, hub_suffix).build()
    }

    /// 可注入线程 API 与泵配置的构造器
    pub fn builder(provider: Arc<dyn TransportProvider>) -> TransportBuilder {
        TransportBuilder::new(provider)
    }

    pub(crate) fn from_parts(
        provider: &'static str,
        lower_layer: Box<dyn LowerLayerTransport>,
        threads: Arc<dyn ThreadApi>,
        pump_config: PumpConfig,
    ) -> Self {
        let hostname = lower_layer.hostname().to_string();
        let first_pump = WorkerPump::new("iothub-transport-0", threads.clone(), pump_config);
        info!("Transport `{}` created ({})", hostname, provider);
        Self {
            inner: Arc::new(TransportInner {
                provider,
                hostname,
                gate: Arc::new(SerialLock::new()),
                lower_layer: Arc::new(Mutex::new(lower_layer)),
                workers: Mutex::new(Workers {
                    clients: Vec::new(),
                    pump: first_pump,
                    retiring: Vec::new(),
                }),
                threads,
                pump_config,
                generation: AtomicU64::new(1),
            }),
        }
    }

    /// 串行化锁（所有 attach 的客户端共用）
    pub fn get_lock(&self) -> Arc<SerialLock> {
        self.inner.gate.clone()
    }

    /// 下层共享传输
    pub fn get_lower_layer_transport(&self) -> SharedLowerLayerTransport {
        self.inner.lower_layer.clone()
    }

    pub fn hostname(&self) -> &str {
        &self.inner.hostname
    }

    pub(crate) fn threads(&self) -> Arc<dyn ThreadApi> {
        self.inner.threads.clone()
    }

    /// 登记客户端并在需要时启动共享泵
    ///
    /// 同一客户端重复调用是幂等的。泵启动失败时不登记。
    pub fn start_worker_thread(&self, client: ClientId) -> Result<(), ClientError> {
        let mut workers = self.inner.workers.lock();
        if workers.clients.contains(&client) {
            return Ok(());
        }

        if workers.pump.state() == PumpState::Unstarted {
            let lower_layer = self.inner.lower_layer.clone();
            workers
                .pump
                .start(self.inner.gate.clone(), move || lower_layer.lock().do_work())
                .inspect_err(|e| error!("Could not start transport worker thread: {}", e))?;
            info!(
                "Transport worker thread `{}` started for `{}`",
                workers.pump.name(),
                self.inner.hostname
            );
        }

        workers.clients.push(client);
        debug!("{} attached ({} client(s))", client, workers.clients.len());
        Ok(())
    }

    /// 注销客户端
    ///
    /// 返回 `true` 当且仅当注销前注册表非空、注销后为空；此时共享泵已被请求停止，
    /// 调用方负责调用 [`join_worker_thread`](Self::join_worker_thread)。
    /// 客户端未登记时返回 `false`，不做任何事。
    pub fn signal_end_worker_thread(&self, client: ClientId) -> bool {
        let mut workers = self.inner.workers.lock();
        let Some(position) = workers.clients.iter().position(|c| *c == client) else {
            debug!("No worker thread registered for {}", client);
            return false;
        };
        workers.clients.remove(position);
        debug!("{} detached ({} client(s) left)", client, workers.clients.len());

        if !workers.clients.is_empty() {
            return false;
        }

        workers.pump.signal_stop();
        let fresh = self.inner.next_pump();
        let signaled = std::mem::replace(&mut workers.pump, fresh);
        workers.retiring.push(signaled);
        true
    }

    /// join 已请求停止的共享泵；没有待 join 的泵时什么也不做
    ///
    /// 不得在持有串行化锁时调用。
    pub fn join_worker_thread(&self, client: ClientId) {
        let retiring = std::mem::take(&mut self.inner.workers.lock().retiring);
        for mut pump in retiring {
            match pump.join() {
                Ok(()) => debug!("{} joined transport worker thread `{}`", client, pump.name()),
                Err(e) => error!("Transport worker thread ended abnormally: {}", e),
            }
        }
    }

    /// 在持锁情况下设置下层传输选项
    pub fn set_option(&self, name: &str, value: &OptionValue) -> Result<(), ClientError> {
        if name.is_empty() {
            return Err(ClientError::InvalidArg("option name is empty".into()));
        }
        let _guard = self
            .inner
            .gate
            .acquire()
            .inspect_err(|e| error!("Could not acquire transport lock: {}", e))?;
        self.inner.lower_layer.lock().set_option(name, value)?;
        Ok(())
    }

    pub fn attached_clients(&self) -> usize {
        self.inner.workers.lock().clients.len()
    }

    /// 当前这一代共享泵的状态
    pub fn worker_state(&self) -> PumpState {
        self.inner.workers.lock().pump.state()
    }

    pub fn worker_metrics(&self) -> PumpMetricsSnapshot {
        self.inner.workers.lock().pump.metrics()
    }

    /// 释放本句柄
    ///
    /// 仍有其他引用（例如已 attach 的客户端）时，实际销毁推迟到最后一份引用释放。
    pub fn destroy(self) {
        let others = Arc::strong_count(&self.inner) - 1;
        if others > 0 {
            debug!(
                "Transport `{}` still referenced {} time(s); teardown deferred",
                self.inner.hostname, others
            );
        }
    }
}
