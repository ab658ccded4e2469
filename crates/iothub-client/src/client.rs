//! 线程安全的设备客户端句柄
//!
//! `ClientHandle` 把一个非线程安全的下层客户端包装成可跨线程共享的阻塞 API。
//! 每次调用都遵循同一流程：
//!
//! 1. 获取串行化锁（私有锁，或 attach 时共享传输的锁）；失败则直接返回错误
//! 2. 需要异步推进的调用：按需启动工作泵（私有泵，或在共享传输上登记）
//! 3. 转发给下层客户端，结果原样透传
//! 4. 释放锁
//!
//! 工作泵只在第一次需要时启动。私有泵的每次 tick 执行下层 `do_work`
//! 并回收已完成的上传任务。

use crate::builder::ClientBuilder;
use crate::error::ClientError;
use crate::transport::TransportHandle;
use iothub_driver::{
    PumpConfig, PumpMetricsSnapshot, PumpState, SerialLock, ThreadApi, UploadRequest,
    UploadTaskRegistry, WorkerPump,
};
use iothub_transport::{
    ClientConfig, ConnectionStatusCallback, DeviceMethodCallback, DeviceTwinCallback,
    EventConfirmationCallback, FileUploadCallback, LowerLayerClient, LowerLayerError,
    LowerLayerResult, Message, MessageCallback, OptionValue, ReportedStateCallback, RetrySettings,
    SendStatus, TransportProvider,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;
use tracing::{debug, error, info, warn};

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// 客户端标识（进程内唯一，单调分配）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl ClientId {
    /// 分配一个新的标识
    pub fn next() -> Self {
        Self(NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// 受串行化锁保护的可变状态
///
/// 只在持有 `ClientHandle::gate` 时访问。
struct ClientCore {
    lower_layer: Option<Box<dyn LowerLayerClient>>,
    uploads: UploadTaskRegistry,
}

enum ThreadMode {
    Private(Mutex<WorkerPump>),
    Shared(TransportHandle),
}

/// 设备客户端句柄
///
/// `Send + Sync`，所有方法都只需 `&self`，可放进 `Arc` 在多个线程间共享。
/// 销毁即 `Drop`（或显式 [`destroy`](Self::destroy)）。
pub struct ClientHandle {
    id: ClientId,
    device_id: String,
    gate: Arc<SerialLock>,
    core: Arc<Mutex<ClientCore>>,
    mode: ThreadMode,
}

impl std::fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientHandle")
            .field("id", &self.id)
            .field("device_id", &self.device_id)
            .field("shared", &self.is_shared())
            .finish()
    }
}

impl ClientHandle {
    /// 使用配置创建（私有锁、私有工作泵）
    pub fn create(
        config: &ClientConfig,
        provider: Arc<dyn TransportProvider>,
    ) -> Result<Self, ClientError> {
        ClientBuilder::new()
            .config(config.clone())
            .provider(provider)
            .build()
    }

    /// 使用设备连接字符串创建
    pub fn create_from_connection_string(
        connection_string: &str,
        provider: Arc<dyn TransportProvider>,
    ) -> Result<Self, ClientError> {
        ClientBuilder::new()
            .connection_string(connection_string)
            .provider(provider)
            .build()
    }

    /// attach 到共享传输创建
    pub fn create_with_transport(
        transport: &TransportHandle,
        config: &ClientConfig,
    ) -> Result<Self, ClientError> {
        ClientBuilder::new()
            .config(config.clone())
            .transport(transport)
            .build()
    }

    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    pub(crate) fn private(
        config: &ClientConfig,
        provider: &dyn TransportProvider,
        threads: Arc<dyn ThreadApi>,
        pump_config: PumpConfig,
    ) -> Result<Self, ClientError> {
        let lower_layer = provider
            .create_client(config)
            .inspect_err(|e| error!("Could not create lower layer client: {}", e))?;

        let id = ClientId::next();
        let pump = WorkerPump::new(format!("iothub-{}", id), threads.clone(), pump_config);
        info!(
            "{} created for `{}` on {} ({})",
            id,
            config.device_id,
            config.hostname(),
            provider.name()
        );

        Ok(Self {
            id,
            device_id: config.device_id.clone(),
            gate: Arc::new(SerialLock::new()),
            core: Arc::new(Mutex::new(ClientCore {
                lower_layer: Some(lower_layer),
                uploads: UploadTaskRegistry::new(threads)
                    .with_poll_interval(pump_config.interval()),
            })),
            mode: ThreadMode::Private(Mutex::new(pump)),
        })
    }

    pub(crate) fn attach(
        transport: &TransportHandle,
        config: &ClientConfig,
        threads: Arc<dyn ThreadApi>,
    ) -> Result<Self, ClientError> {
        let gate = transport.get_lock();
        let lower_layer = {
            let _guard = gate
                .acquire()
                .inspect_err(|e| error!("Could not acquire transport lock: {}", e))?;
            let shared = transport.get_lower_layer_transport();
            let registered = shared.lock().register_device(&config.device_config());
            registered.inspect_err(|e| {
                error!("Could not register `{}` with transport: {}", config.device_id, e)
            })?
        };

        let id = ClientId::next();
        info!(
            "{} created for `{}` on shared transport {}",
            id,
            config.device_id,
            transport.hostname()
        );

        Ok(Self {
            id,
            device_id: config.device_id.clone(),
            gate,
            core: Arc::new(Mutex::new(ClientCore {
                lower_layer: Some(lower_layer),
                uploads: UploadTaskRegistry::new(threads),
            })),
            mode: ThreadMode::Shared(transport.clone()),
        })
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// 是否 attach 在共享传输上
    pub fn is_shared(&self) -> bool {
        matches!(self.mode, ThreadMode::Shared(_))
    }

    /// 本客户端所用工作泵的状态
    pub fn worker_state(&self) -> PumpState {
        match &self.mode {
            ThreadMode::Private(pump) => pump.lock().state(),
            ThreadMode::Shared(transport) => transport.worker_state(),
        }
    }

    pub fn worker_metrics(&self) -> PumpMetricsSnapshot {
        match &self.mode {
            ThreadMode::Private(pump) => pump.lock().metrics(),
            ThreadMode::Shared(transport) => transport.worker_metrics(),
        }
    }

    /// 尚未回收的上传任务数
    pub fn pending_uploads(&self) -> Result<usize, ClientError> {
        let _guard = self.gate.acquire()?;
        Ok(self.core.lock().uploads.len())
    }

    /// 按需启动工作泵（调用方必须持有串行化锁）
    fn ensure_worker(&self) -> Result<(), ClientError> {
        match &self.mode {
            ThreadMode::Private(pump) => {
                let mut pump = pump.lock();
                if pump.state() != PumpState::Unstarted {
                    return Ok(());
                }
                let core = self.core.clone();
                pump.start(self.gate.clone(), move || {
                    let mut core = core.lock();
                    if let Some(lower_layer) = core.lower_layer.as_mut() {
                        lower_layer.do_work();
                    }
                    core.uploads.reap_once();
                })
                .inspect_err(|e| error!("Could not start worker thread for {}: {}", self.id, e))?;
                debug!("{} started its worker thread", self.id);
                Ok(())
            },
            ThreadMode::Shared(transport) => transport
                .start_worker_thread(self.id)
                .inspect_err(|e| error!("Could not attach {} to transport worker: {}", self.id, e)),
        }
    }

    /// 持锁转发到下层客户端
    fn forward<T>(
        &self,
        operation: &'static str,
        start_worker: bool,
        call: impl FnOnce(&mut dyn LowerLayerClient) -> LowerLayerResult<T>,
    ) -> Result<T, ClientError> {
        let _guard = self
            .gate
            .acquire()
            .inspect_err(|e| error!("{}: could not acquire lock: {}", operation, e))?;

        if start_worker {
            self.ensure_worker()?;
        }

        let mut core = self.core.lock();
        let Some(lower_layer) = core.lower_layer.as_mut() else {
            return Err(LowerLayerError::error("lower layer client released").into());
        };
        call(&mut **lower_layer).map_err(|e| {
            debug!("{}: lower layer returned {}", operation, e);
            ClientError::LowerLayer(e)
        })
    }

    /// 异步发送一条设备到云的事件，确认结果经回调送达
    pub fn send_event_async(
        &self,
        message: Message,
        on_confirmation: Option<EventConfirmationCallback>,
    ) -> Result<(), ClientError> {
        self.forward("send_event_async", true, |ll| {
            ll.send_event_async(message, on_confirmation)
        })
    }

    pub fn set_message_callback(&self, callback: Option<MessageCallback>) -> Result<(), ClientError> {
        self.forward("set_message_callback", true, |ll| ll.set_message_callback(callback))
    }

    pub fn set_connection_status_callback(
        &self,
        callback: Option<ConnectionStatusCallback>,
    ) -> Result<(), ClientError> {
        self.forward("set_connection_status_callback", true, |ll| {
            ll.set_connection_status_callback(callback)
        })
    }

    pub fn set_device_twin_callback(
        &self,
        callback: Option<DeviceTwinCallback>,
    ) -> Result<(), ClientError> {
        self.forward("set_device_twin_callback", true, |ll| {
            ll.set_device_twin_callback(callback)
        })
    }

    pub fn set_device_method_callback(
        &self,
        callback: Option<DeviceMethodCallback>,
    ) -> Result<(), ClientError> {
        self.forward("set_device_method_callback", true, |ll| {
            ll.set_device_method_callback(callback)
        })
    }

    /// 上报 reported 属性文档（不能为空）
    pub fn send_reported_state(
        &self,
        reported_state: &[u8],
        on_reported: Option<ReportedStateCallback>,
    ) -> Result<(), ClientError> {
        if reported_state.is_empty() {
            return Err(ClientError::InvalidArg("reported state is empty".into()));
        }
        self.forward("send_reported_state", true, |ll| {
            ll.send_reported_state(reported_state, on_reported)
        })
    }

    pub fn set_retry_policy(&self, settings: RetrySettings) -> Result<(), ClientError> {
        self.forward("set_retry_policy", true, |ll| ll.set_retry_policy(settings))
    }

    pub fn get_retry_policy(&self) -> Result<RetrySettings, ClientError> {
        self.forward("get_retry_policy", true, |ll| ll.get_retry_policy())
    }

    pub fn get_send_status(&self) -> Result<SendStatus, ClientError> {
        self.forward("get_send_status", false, |ll| ll.get_send_status())
    }

    pub fn get_last_message_receive_time(&self) -> Result<SystemTime, ClientError> {
        self.forward("get_last_message_receive_time", false, |ll| {
            ll.get_last_message_receive_time()
        })
    }

    pub fn set_option(&self, name: &str, value: &OptionValue) -> Result<(), ClientError> {
        if name.is_empty() {
            return Err(ClientError::InvalidArg("option name is empty".into()));
        }
        self.forward("set_option", false, |ll| ll.set_option(name, value))
    }

    /// 在独立线程上把 `payload` 上传到 `destination`
    ///
    /// 载荷在返回前被复制。上传结果只通过 `on_complete` 报告；
    /// 本调用只在本地资源不足（锁、线程）时失败。
    pub fn upload_to_blob_async(
        &self,
        destination: &str,
        payload: &[u8],
        on_complete: Option<FileUploadCallback>,
    ) -> Result<(), ClientError> {
        if destination.is_empty() {
            return Err(ClientError::InvalidArg("destination name is empty".into()));
        }
        let request = UploadRequest::new(destination, payload);

        let _guard = self
            .gate
            .acquire()
            .inspect_err(|e| error!("upload_to_blob_async: could not acquire lock: {}", e))?;
        self.ensure_worker()?;

        let mut core = self.core.lock();
        let uploader = match core.lower_layer.as_ref() {
            Some(lower_layer) => lower_layer.blob_uploader()?,
            None => return Err(LowerLayerError::error("lower layer client released").into()),
        };
        core.uploads
            .submit(request, uploader, on_complete)
            .inspect_err(|e| error!("Could not start upload thread for {}: {}", self.id, e))?;
        // 共享模式没有私有泵替本客户端回收
        if self.is_shared() {
            core.uploads.reap_once();
        }
        Ok(())
    }

    /// 销毁客户端（等价于 drop）
    pub fn destroy(self) {}
}

impl Drop for ClientHandle {
    fn drop(&mut self) {
        // 持锁：请求私有泵停止，并回收一次已完成的上传
        match self.gate.acquire() {
            Ok(_guard) => {
                if let ThreadMode::Private(pump) = &self.mode {
                    pump.lock().signal_stop();
                }
                self.core.lock().uploads.reap_once();
            },
            Err(e) => {
                warn!("{}: could not acquire lock, proceeding with shutdown: {}", self.id, e);
                if let ThreadMode::Private(pump) = &self.mode {
                    pump.lock().signal_stop();
                }
            },
        }

        match &self.mode {
            ThreadMode::Shared(transport) => {
                if transport.signal_end_worker_thread(self.id) {
                    transport.join_worker_thread(self.id);
                }
            },
            ThreadMode::Private(pump) => {
                if let Err(e) = pump.lock().join() {
                    error!("{}: worker thread ended abnormally: {}", self.id, e);
                }
            },
        }

        // 共享模式下其他客户端的泵可能仍在运行，注销与销毁下层客户端都需要持锁
        {
            let _guard = self.gate.acquire().ok();
            if let ThreadMode::Shared(transport) = &self.mode {
                transport
                    .get_lower_layer_transport()
                    .lock()
                    .unregister_device(&self.device_id);
            }
            drop(self.core.lock().lower_layer.take());
        }

        let drained = self.core.lock().uploads.drain_all();
        debug!("{} destroyed ({} upload(s) drained)", self.id, drained);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iothub_driver::mock::CountingThreads;
    use iothub_transport::mock::{MockCall, MockFailures, MockProvider};
    use iothub_transport::{ConfirmationResult, FileUploadResult, RetryPolicy};
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    fn config() -> ClientConfig {
        ClientConfig::new("hub", "example.net", "dev-1").with_device_key("a2V5")
    }

    fn client_with(threads: Arc<CountingThreads>) -> (ClientHandle, MockProvider) {
        let provider = MockProvider::new();
        let client = ClientHandle::builder()
            .config(config())
            .provider(Arc::new(provider.clone()))
            .threads(threads)
            .build()
            .unwrap();
        (client, provider)
    }

    fn wait_until(mut cond: impl FnMut() -> bool) {
        let start = Instant::now();
        while !cond() {
            assert!(start.elapsed() < Duration::from_secs(5), "condition not reached");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn poison(gate: &Arc<SerialLock>) {
        let gate = gate.clone();
        let _ = std::thread::spawn(move || {
            let _guard = gate.acquire().unwrap();
            panic!("poisoning client lock for test");
        })
        .join();
    }

    #[test]
    fn test_client_handle_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ClientHandle>();
        assert_send_sync::<TransportHandle>();
    }

    #[test]
    fn test_client_ids_are_unique() {
        let a = ClientId::next();
        let b = ClientId::next();
        assert!(b > a);
        assert_eq!(a.to_string(), format!("client-{}", a.value()));
    }

    #[test]
    fn test_create_then_destroy_spawns_nothing() {
        let threads = Arc::new(CountingThreads::new());
        let (client, provider) = client_with(threads.clone());
        assert_eq!(client.worker_state(), PumpState::Unstarted);
        client.destroy();

        assert!(threads.spawned().is_empty());
        assert!(threads.joined().is_empty());
        assert_eq!(provider.stats().count(MockCall::CreateClient), 1);
        assert_eq!(provider.stats().count(MockCall::DestroyClient), 1);
    }

    #[test]
    fn test_create_passes_lower_layer_failure_through() {
        let provider = MockProvider::new();
        MockFailures::set(&provider.failures().create_client, true);
        let result = ClientHandle::create(&config(), Arc::new(provider));
        assert!(matches!(result, Err(ClientError::LowerLayer(_))));
    }

    #[test]
    fn test_create_from_connection_string() {
        let provider = MockProvider::new();
        let client = ClientHandle::create_from_connection_string(
            "HostName=hub.example.net;DeviceId=dev-1;SharedAccessKey=a2V5",
            Arc::new(provider.clone()),
        )
        .unwrap();
        assert!(!client.is_shared());
        assert_eq!(provider.stats().count(MockCall::CreateClient), 1);
    }

    #[test]
    fn test_send_event_twice_starts_one_worker() {
        let threads = Arc::new(CountingThreads::new());
        let (client, provider) = client_with(threads.clone());
        let confirmed = Arc::new(AtomicUsize::new(0));

        for i in 0..2 {
            let confirmed = confirmed.clone();
            client
                .send_event_async(
                    Message::from_text(&format!("event {}", i)),
                    Some(Box::new(move |result| {
                        assert_eq!(result, ConfirmationResult::Ok);
                        confirmed.fetch_add(1, Ordering::Relaxed);
                    })),
                )
                .unwrap();
        }

        assert_eq!(threads.spawned_matching("iothub-client"), 1);
        assert_eq!(provider.stats().count(MockCall::SendEvent), 2);
        assert_eq!(client.worker_state(), PumpState::Running);

        wait_until(|| confirmed.load(Ordering::Relaxed) == 2);
        client.destroy();
        assert_eq!(threads.joined_matching("iothub-client"), 1);
    }

    #[test]
    fn test_non_starting_calls_do_not_spawn() {
        let threads = Arc::new(CountingThreads::new());
        let (client, provider) = client_with(threads.clone());

        assert_eq!(client.get_send_status().unwrap(), SendStatus::Idle);
        assert!(matches!(
            client.get_last_message_receive_time(),
            Err(ClientError::LowerLayer(LowerLayerError::IndefiniteTime))
        ));
        client.set_option("logtrace", &OptionValue::Bool(true)).unwrap();

        assert!(threads.spawned().is_empty());
        assert_eq!(provider.stats().count(MockCall::GetSendStatus), 1);
        assert_eq!(provider.stats().count(MockCall::SetOption), 1);
    }

    #[test]
    fn test_invalid_arguments_have_no_side_effects() {
        let threads = Arc::new(CountingThreads::new());
        let (client, provider) = client_with(threads.clone());

        assert!(matches!(
            client.set_option("", &OptionValue::Int(1)),
            Err(ClientError::InvalidArg(_))
        ));
        assert!(matches!(
            client.send_reported_state(b"", None),
            Err(ClientError::InvalidArg(_))
        ));
        assert!(matches!(
            client.upload_to_blob_async("", b"data", None),
            Err(ClientError::InvalidArg(_))
        ));

        assert!(threads.spawned().is_empty());
        assert_eq!(provider.stats().count(MockCall::SetOption), 0);
        assert_eq!(provider.stats().count(MockCall::SendReportedState), 0);
    }

    #[test]
    fn test_lower_layer_errors_pass_through_verbatim() {
        let (client, provider) = client_with(Arc::new(CountingThreads::new()));
        MockFailures::set(&provider.failures().forwarded, true);

        match client.send_event_async(Message::from_text("x"), None) {
            Err(ClientError::LowerLayer(LowerLayerError::Error(msg))) => {
                assert!(msg.contains("SendEvent"))
            },
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(client.set_retry_policy(RetrySettings::default()).is_err());
    }

    #[test]
    fn test_retry_policy_round_trip_through_lower_layer() {
        let (client, _provider) = client_with(Arc::new(CountingThreads::new()));
        let settings = RetrySettings {
            policy: RetryPolicy::LinearBackoff,
            timeout_limit_secs: 60,
        };
        client.set_retry_policy(settings).unwrap();
        assert_eq!(client.get_retry_policy().unwrap(), settings);
    }

    #[test]
    fn test_worker_spawn_failure_skips_forwarding() {
        let threads = Arc::new(CountingThreads::new());
        threads.fail_spawn_matching(Some("iothub-client"));
        let (client, provider) = client_with(threads.clone());

        assert!(matches!(
            client.send_event_async(Message::from_text("x"), None),
            Err(ClientError::Driver(_))
        ));
        assert_eq!(provider.stats().count(MockCall::SendEvent), 0);
        assert_eq!(client.worker_state(), PumpState::Unstarted);

        threads.fail_spawn_matching(None);
        client.send_event_async(Message::from_text("x"), None).unwrap();
        assert_eq!(provider.stats().count(MockCall::SendEvent), 1);
    }

    #[test]
    fn test_lock_failure_skips_everything() {
        let threads = Arc::new(CountingThreads::new());
        let (client, provider) = client_with(threads.clone());
        poison(&client.gate);

        assert!(matches!(
            client.send_event_async(Message::from_text("x"), None),
            Err(ClientError::Driver(iothub_driver::DriverError::PoisonedLock))
        ));
        assert!(client.get_send_status().is_err());
        assert!(client.upload_to_blob_async("f", b"1", None).is_err());

        assert!(threads.spawned().is_empty());
        assert_eq!(provider.stats().count(MockCall::SendEvent), 0);
        assert_eq!(provider.stats().count(MockCall::GetSendStatus), 0);

        // 锁失败时销毁仍然完成
        client.destroy();
        assert_eq!(provider.stats().count(MockCall::DestroyClient), 1);
    }

    #[test]
    fn test_connection_status_delivered_by_worker() {
        let (client, _provider) = client_with(Arc::new(CountingThreads::new()));
        let notified = Arc::new(AtomicUsize::new(0));
        let notified_clone = notified.clone();
        client
            .set_connection_status_callback(Some(Box::new(move |_, _| {
                notified_clone.fetch_add(1, Ordering::Relaxed);
            })))
            .unwrap();
        wait_until(|| notified.load(Ordering::Relaxed) == 1);
    }

    #[test]
    fn test_upload_reports_result_and_is_reaped_by_worker() {
        let threads = Arc::new(CountingThreads::new());
        let (client, provider) = client_with(threads.clone());
        let results = Arc::new(Mutex::new(Vec::new()));
        let sink = results.clone();

        client
            .upload_to_blob_async(
                "telemetry/log.txt",
                b"hello",
                Some(Box::new(move |r| sink.lock().push(r))),
            )
            .unwrap();

        wait_until(|| client.pending_uploads().unwrap() == 0);
        assert_eq!(*results.lock(), vec![FileUploadResult::Ok]);
        assert_eq!(provider.stats().count(MockCall::Upload), 1);
        assert_eq!(threads.joined_matching("iothub-upload"), 1);
    }

    #[test]
    fn test_upload_spawn_failure_returns_error() {
        let threads = Arc::new(CountingThreads::new());
        threads.fail_spawn_matching(Some("iothub-upload"));
        let (client, provider) = client_with(threads.clone());

        let result = client.upload_to_blob_async("f", b"payload", Some(Box::new(|_| {})));
        assert!(matches!(result, Err(ClientError::Driver(_))));
        assert_eq!(client.pending_uploads().unwrap(), 0);
        assert_eq!(provider.stats().count(MockCall::Upload), 0);
    }

    #[test]
    fn test_destroy_drains_pending_uploads() {
        const K: usize = 4;
        let threads = Arc::new(CountingThreads::new());
        let (client, provider) = client_with(threads.clone());
        let failures = provider.failures();
        MockFailures::set(&failures.hold_uploads, true);

        for i in 0..K {
            client
                .upload_to_blob_async(&format!("f{}", i), b"data", None)
                .unwrap();
        }
        assert_eq!(client.pending_uploads().unwrap(), K);

        let releaser = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            MockFailures::set(&failures.hold_uploads, false);
        });
        client.destroy();
        releaser.join().unwrap();

        assert_eq!(threads.spawned_matching("iothub-upload"), K);
        assert_eq!(threads.joined_matching("iothub-upload"), K);
    }

    #[test]
    fn test_shutdown_order_joins_worker_before_lower_layer_destroy() {
        let threads = Arc::new(CountingThreads::new());
        let (client, provider) = client_with(threads.clone());
        client.send_event_async(Message::from_text("x"), None).unwrap();
        wait_until(|| provider.stats().count(MockCall::ClientDoWork) > 0);

        client.destroy();

        let stats = provider.stats();
        let destroyed = stats.first_index_of(MockCall::DestroyClient).unwrap();
        let last_tick = stats.last_index_of(MockCall::ClientDoWork).unwrap();
        assert!(last_tick < destroyed);
        assert_eq!(threads.joined_matching("iothub-client"), 1);
    }

    #[test]
    fn test_shared_clients_share_one_worker() {
        let threads = Arc::new(CountingThreads::new());
        let provider = MockProvider::new();
        let transport = TransportHandle::builder(Arc::new(provider.clone()))
            .hub("hub", "example.net")
            .threads(threads.clone())
            .build()
            .unwrap();

        let a = ClientHandle::create_with_transport(
            &transport,
            &ClientConfig::new("", "", "dev-a").with_device_key("k"),
        )
        .unwrap();
        let b = ClientHandle::create_with_transport(
            &transport,
            &ClientConfig::new("", "", "dev-b").with_device_key("k"),
        )
        .unwrap();
        assert!(Arc::ptr_eq(&a.gate, &transport.get_lock()));

        a.send_event_async(Message::from_text("a"), None).unwrap();
        b.send_event_async(Message::from_text("b"), None).unwrap();
        assert_eq!(threads.spawned_matching("iothub-transport"), 1);
        assert_eq!(transport.attached_clients(), 2);

        a.destroy();
        assert_eq!(transport.attached_clients(), 1);
        assert_eq!(transport.worker_state(), PumpState::Running);
        assert_eq!(threads.joined_matching("iothub-transport"), 0);

        b.destroy();
        assert_eq!(transport.attached_clients(), 0);
        assert_eq!(threads.joined_matching("iothub-transport"), 1);
        assert_eq!(provider.stats().count(MockCall::DestroyClient), 2);
    }

    #[test]
    fn test_shared_upload_is_reaped_on_next_submission() {
        let threads = Arc::new(CountingThreads::new());
        let provider = MockProvider::new();
        let transport = TransportHandle::builder(Arc::new(provider.clone()))
            .hub("hub", "example.net")
            .threads(threads.clone())
            .build()
            .unwrap();
        let client = ClientHandle::create_with_transport(
            &transport,
            &ClientConfig::new("", "", "dev-up").with_device_key("k"),
        )
        .unwrap();

        let done = Arc::new(AtomicUsize::new(0));
        let done_clone = done.clone();
        client
            .upload_to_blob_async("a", b"1", Some(Box::new(move |_| {
                done_clone.fetch_add(1, Ordering::Relaxed);
            })))
            .unwrap();
        wait_until(|| done.load(Ordering::Relaxed) == 1);
        // 回调之后完成标志才被设置
        std::thread::sleep(Duration::from_millis(5));

        client.upload_to_blob_async("b", b"2", None).unwrap();
        assert!(threads.joined_matching("iothub-upload") >= 1);
    }

    #[test]
    fn test_attach_registration_failure_passes_through() {
        let provider = MockProvider::new();
        let transport = TransportHandle::create(Arc::new(provider.clone()), "hub", "net").unwrap();
        MockFailures::set(&provider.failures().register_device, true);

        let result = ClientHandle::create_with_transport(
            &transport,
            &ClientConfig::new("", "", "dev-x"),
        );
        assert!(matches!(result, Err(ClientError::LowerLayer(_))));
        assert_eq!(transport.attached_clients(), 0);
    }

    fn shared_transport(threads: Arc<CountingThreads>) -> (TransportHandle, MockProvider) {
        let provider = MockProvider::new();
        let transport = TransportHandle::builder(Arc::new(provider.clone()))
            .hub("hub", "example.net")
            .threads(threads)
            .build()
            .unwrap();
        (transport, provider)
    }

    #[test]
    fn test_shared_destroy_unregisters_device() {
        let (transport, provider) = shared_transport(Arc::new(CountingThreads::new()));
        let config = ClientConfig::new("", "", "dev-1").with_device_key("k");

        let first = ClientHandle::create_with_transport(&transport, &config).unwrap();
        assert_eq!(first.device_id(), "dev-1");
        first.send_event_async(Message::from_text("x"), None).unwrap();
        first.destroy();

        let stats = provider.stats();
        let unregistered = stats.first_index_of(MockCall::UnregisterDevice).unwrap();
        let destroyed = stats.first_index_of(MockCall::DestroyClient).unwrap();
        assert!(unregistered < destroyed);

        let second = ClientHandle::create_with_transport(&transport, &config).unwrap();
        second.destroy();
        assert_eq!(stats.count(MockCall::RegisterDevice), 2);
        assert_eq!(stats.count(MockCall::UnregisterDevice), 2);
    }

    #[test]
    fn test_private_destroy_does_not_unregister() {
        let (client, provider) = client_with(Arc::new(CountingThreads::new()));
        client.destroy();
        assert_eq!(provider.stats().count(MockCall::UnregisterDevice), 0);
    }

    #[test]
    fn test_shared_callbacks_are_driven_by_transport_worker() {
        let (transport, provider) = shared_transport(Arc::new(CountingThreads::new()));
        let client = ClientHandle::create_with_transport(
            &transport,
            &ClientConfig::new("", "", "dev-cb").with_device_key("k"),
        )
        .unwrap();

        let statuses = Arc::new(AtomicUsize::new(0));
        let reported = Arc::new(Mutex::new(None));
        let s = statuses.clone();
        client
            .set_connection_status_callback(Some(Box::new(move |_, _| {
                s.fetch_add(1, Ordering::Relaxed);
            })))
            .unwrap();
        let r = reported.clone();
        client
            .send_reported_state(b"{}", Some(Box::new(move |code| *r.lock() = Some(code))))
            .unwrap();
        client
            .set_device_method_callback(Some(Box::new(|_, _| {
                iothub_transport::MethodResponse::new(200, "{}")
            })))
            .unwrap();
        provider.cloud().invoke_method("dev-cb", "ping", b"");

        wait_until(|| {
            statuses.load(Ordering::Relaxed) == 1
                && reported.lock().is_some()
                && !provider.cloud().method_replies().is_empty()
        });
        assert_eq!(*reported.lock(), Some(204));
        assert_eq!(provider.cloud().method_replies()[0].response.status, 200);
        assert_eq!(provider.stats().count(MockCall::ClientDoWork), 0);
    }

    #[test]
    fn test_shared_failed_upload_leaves_registry_unchanged() {
        let threads = Arc::new(CountingThreads::new());
        let (transport, provider) = shared_transport(threads.clone());
        let client = ClientHandle::create_with_transport(
            &transport,
            &ClientConfig::new("", "", "dev-up").with_device_key("k"),
        )
        .unwrap();

        // 阻塞第一个上传，避免它在提交时就被回收
        let failures = provider.failures();
        MockFailures::set(&failures.hold_uploads, true);
        let done = Arc::new(AtomicUsize::new(0));
        let done_clone = done.clone();
        client
            .upload_to_blob_async("a", b"1", Some(Box::new(move |_| {
                done_clone.fetch_add(1, Ordering::Relaxed);
            })))
            .unwrap();
        MockFailures::set(&failures.hold_uploads, false);
        wait_until(|| done.load(Ordering::Relaxed) == 1);
        std::thread::sleep(Duration::from_millis(5));

        threads.fail_spawn_matching(Some("iothub-upload"));
        let result = client.upload_to_blob_async("b", b"2", None);
        assert!(matches!(result, Err(ClientError::Driver(_))));
        // 已完成的任务仍在登记表中，没有被回收
        assert_eq!(client.pending_uploads().unwrap(), 1);
        assert_eq!(threads.joined_matching("iothub-upload"), 0);

        threads.fail_spawn_matching(None);
        client.destroy();
        assert_eq!(threads.joined_matching("iothub-upload"), 1);
    }
}
