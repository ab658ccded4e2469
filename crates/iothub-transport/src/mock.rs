//! Mock 下层实现
//!
//! 用于单元测试、集成测试与 CLI 演示：记录所有调用顺序，支持注入失败，
//! 并通过 [`MockCloud`] 模拟云端下发的 C2D 消息、直接方法与孪生更新。
//! 不实现任何线上协议。
//!
//! 每个设备的状态（回调、待确认事件、待上报属性）保存在一份共享的设备状态中。
//! 私有客户端在自己的 `do_work` 中推进它；注册到 [`MockTransport`] 的设备
//! 与传输共享同一份状态，由 `MockTransport::do_work` 统一推进。

use crate::{
    BlobUploader, ClientConfig, ConfirmationResult, ConnectionStatus, ConnectionStatusCallback,
    ConnectionStatusReason, DeviceConfig, DeviceMethodCallback, DeviceTwinCallback,
    EventConfirmationCallback, LowerLayerClient, LowerLayerError, LowerLayerResult,
    LowerLayerTransport, Message, MessageCallback, MessageDisposition, MethodResponse, OptionValue,
    ReportedStateCallback, RetrySettings, SendStatus, TransportProvider, TwinUpdateState,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime};

/// Mock 记录的调用种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockCall {
    CreateClient,
    DestroyClient,
    CreateTransport,
    DestroyTransport,
    RegisterDevice,
    UnregisterDevice,
    ClientDoWork,
    TransportDoWork,
    SendEvent,
    SetMessageCallback,
    SetConnectionStatusCallback,
    SetDeviceTwinCallback,
    SetDeviceMethodCallback,
    SendReportedState,
    GetSendStatus,
    GetLastMessageReceiveTime,
    SetOption,
    TransportSetOption,
    SetRetryPolicy,
    GetRetryPolicy,
    BlobUploader,
    Upload,
}

/// 调用日志（按发生顺序）
#[derive(Debug, Default)]
pub struct MockStats {
    log: Mutex<Vec<MockCall>>,
}

impl MockStats {
    pub fn record(&self, call: MockCall) {
        self.log.lock().push(call);
    }

    pub fn count(&self, call: MockCall) -> usize {
        self.log.lock().iter().filter(|c| **c == call).count()
    }

    /// 调用日志快照
    pub fn calls(&self) -> Vec<MockCall> {
        self.log.lock().clone()
    }

    pub fn first_index_of(&self, call: MockCall) -> Option<usize> {
        self.log.lock().iter().position(|c| *c == call)
    }

    pub fn last_index_of(&self, call: MockCall) -> Option<usize> {
        self.log.lock().iter().rposition(|c| *c == call)
    }
}

/// 失败注入开关
#[derive(Debug, Default)]
pub struct MockFailures {
    /// `create_client` 返回错误
    pub create_client: AtomicBool,
    /// `create_transport` 返回错误
    pub create_transport: AtomicBool,
    /// `register_device` 返回错误
    pub register_device: AtomicBool,
    /// `blob_uploader` 返回错误
    pub blob_uploader: AtomicBool,
    /// 上传本身失败（通过回调报告）
    pub upload: AtomicBool,
    /// 所有被转发的客户端操作返回 `LowerLayerError::Error`
    pub forwarded: AtomicBool,
    /// 上传线程在此开关为 true 时保持阻塞，用于构造"未完成"的任务
    pub hold_uploads: AtomicBool,
}

impl MockFailures {
    pub fn set(flag: &AtomicBool, value: bool) {
        flag.store(value, Ordering::SeqCst);
    }

    fn is(flag: &AtomicBool) -> bool {
        flag.load(Ordering::SeqCst)
    }
}

/// 云端下发给设备的事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockInbound {
    Message(Message),
    Method { name: String, payload: Vec<u8> },
    Twin { state: TwinUpdateState, payload: Vec<u8> },
}

/// 设备对直接方法的应答
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockMethodReply {
    pub device_id: String,
    pub method: String,
    pub response: MethodResponse,
}

/// 模拟云端
///
/// 注入的事件在目标设备下一次被推进时送达；没有对应回调时，
/// 消息记为 `Abandoned`，直接方法应答 501，孪生更新被丢弃。
#[derive(Debug, Default)]
pub struct MockCloud {
    inbound: Mutex<Vec<(String, MockInbound)>>,
    replies: Mutex<Vec<MockMethodReply>>,
    dispositions: Mutex<Vec<(String, MessageDisposition)>>,
}

impl MockCloud {
    pub fn send_message(&self, device_id: &str, message: Message) {
        self.push(device_id, MockInbound::Message(message));
    }

    pub fn invoke_method(&self, device_id: &str, method: &str, payload: &[u8]) {
        self.push(
            device_id,
            MockInbound::Method {
                name: method.to_string(),
                payload: payload.to_vec(),
            },
        );
    }

    pub fn update_twin(&self, device_id: &str, state: TwinUpdateState, payload: &[u8]) {
        self.push(
            device_id,
            MockInbound::Twin {
                state,
                payload: payload.to_vec(),
            },
        );
    }

    /// 尚未送达的事件数
    pub fn pending(&self) -> usize {
        self.inbound.lock().len()
    }

    pub fn method_replies(&self) -> Vec<MockMethodReply> {
        self.replies.lock().clone()
    }

    pub fn dispositions(&self) -> Vec<(String, MessageDisposition)> {
        self.dispositions.lock().clone()
    }

    fn push(&self, device_id: &str, inbound: MockInbound) {
        self.inbound.lock().push((device_id.to_string(), inbound));
    }

    fn take_for(&self, device_id: &str) -> Vec<MockInbound> {
        let mut inbound = self.inbound.lock();
        let (mine, rest): (Vec<_>, Vec<_>) =
            inbound.drain(..).partition(|(id, _)| id == device_id);
        *inbound = rest;
        mine.into_iter().map(|(_, event)| event).collect()
    }
}

/// Mock 协议提供者
#[derive(Debug, Clone, Default)]
pub struct MockProvider {
    stats: Arc<MockStats>,
    failures: Arc<MockFailures>,
    cloud: Arc<MockCloud>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> Arc<MockStats> {
        self.stats.clone()
    }

    pub fn failures(&self) -> Arc<MockFailures> {
        self.failures.clone()
    }

    /// 本提供者创建的所有客户端共用的模拟云端
    pub fn cloud(&self) -> Arc<MockCloud> {
        self.cloud.clone()
    }

    fn device(&self, device_id: &str) -> SharedDevice {
        Arc::new(Mutex::new(DeviceState::new(device_id, self.cloud.clone())))
    }
}

impl TransportProvider for MockProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn create_client(&self, config: &ClientConfig) -> LowerLayerResult<Box<dyn LowerLayerClient>> {
        if MockFailures::is(&self.failures.create_client) {
            return Err(LowerLayerError::error("injected create_client failure"));
        }
        self.stats.record(MockCall::CreateClient);
        Ok(Box::new(MockClient {
            state: self.device(&config.device_id),
            stats: self.stats.clone(),
            failures: self.failures.clone(),
            shared: false,
        }))
    }

    fn create_transport(
        &self,
        hub_name: &str,
        hub_suffix: &str,
    ) -> LowerLayerResult<Box<dyn LowerLayerTransport>> {
        if MockFailures::is(&self.failures.create_transport) {
            return Err(LowerLayerError::error("injected create_transport failure"));
        }
        self.stats.record(MockCall::CreateTransport);
        Ok(Box::new(MockTransport {
            hostname: format!("{}.{}", hub_name, hub_suffix),
            provider: self.clone(),
            devices: Vec::new(),
        }))
    }
}

/// 单个设备的协议状态
struct DeviceState {
    device_id: String,
    cloud: Arc<MockCloud>,
    outbox: Vec<EventConfirmationCallback>,
    message_callback: Option<MessageCallback>,
    status_callback: Option<ConnectionStatusCallback>,
    twin_callback: Option<DeviceTwinCallback>,
    method_callback: Option<DeviceMethodCallback>,
    pending_reported: Vec<ReportedStateCallback>,
    status_notified: bool,
    retry: RetrySettings,
    options: Vec<(String, OptionValue)>,
    last_receive: Option<SystemTime>,
}

type SharedDevice = Arc<Mutex<DeviceState>>;

impl DeviceState {
    fn new(device_id: &str, cloud: Arc<MockCloud>) -> Self {
        Self {
            device_id: device_id.to_string(),
            cloud,
            outbox: Vec::new(),
            message_callback: None,
            status_callback: None,
            twin_callback: None,
            method_callback: None,
            pending_reported: Vec::new(),
            status_notified: false,
            retry: RetrySettings::default(),
            options: Vec::new(),
            last_receive: None,
        }
    }

    /// 触发所有待处理回调
    fn pump(&mut self) {
        if !self.status_notified
            && let Some(cb) = self.status_callback.as_mut()
        {
            cb(ConnectionStatus::Authenticated, ConnectionStatusReason::ConnectionOk);
            self.status_notified = true;
        }

        for on_reported in self.pending_reported.drain(..) {
            on_reported(204);
        }

        for on_confirmation in self.outbox.drain(..) {
            on_confirmation(ConfirmationResult::Ok);
        }

        for inbound in self.cloud.take_for(&self.device_id) {
            self.dispatch(inbound);
        }
    }

    fn dispatch(&mut self, inbound: MockInbound) {
        match inbound {
            MockInbound::Message(message) => {
                self.last_receive = Some(SystemTime::now());
                let disposition = match self.message_callback.as_mut() {
                    Some(cb) => cb(&message),
                    None => MessageDisposition::Abandoned,
                };
                self.cloud
                    .dispositions
                    .lock()
                    .push((self.device_id.clone(), disposition));
            },
            MockInbound::Method { name, payload } => {
                let response = match self.method_callback.as_mut() {
                    Some(cb) => cb(&name, &payload),
                    None => MethodResponse::new(501, "{}"),
                };
                self.cloud.replies.lock().push(MockMethodReply {
                    device_id: self.device_id.clone(),
                    method: name,
                    response,
                });
            },
            MockInbound::Twin { state, payload } => {
                if let Some(cb) = self.twin_callback.as_mut() {
                    cb(state, &payload);
                }
            },
        }
    }

    /// 未确认的事件以 `BecauseDestroy` 结束
    fn abandon(&mut self) {
        for on_confirmation in self.outbox.drain(..) {
            on_confirmation(ConfirmationResult::BecauseDestroy);
        }
    }
}

/// Mock 单设备客户端
///
/// 私有模式下自己在 `do_work` 中推进设备状态；共享模式下由传输推进，
/// 自身的 `do_work` 只记录调用。
pub struct MockClient {
    state: SharedDevice,
    stats: Arc<MockStats>,
    failures: Arc<MockFailures>,
    shared: bool,
}

impl MockClient {
    fn forwarded(&self, call: MockCall) -> LowerLayerResult<()> {
        self.stats.record(call);
        if MockFailures::is(&self.failures.forwarded) {
            Err(LowerLayerError::error(format!("injected {:?} failure", call)))
        } else {
            Ok(())
        }
    }
}

impl LowerLayerClient for MockClient {
    fn do_work(&mut self) {
        self.stats.record(MockCall::ClientDoWork);
        if !self.shared {
            self.state.lock().pump();
        }
    }

    fn send_event_async(
        &mut self,
        _message: Message,
        on_confirmation: Option<EventConfirmationCallback>,
    ) -> LowerLayerResult<()> {
        self.forwarded(MockCall::SendEvent)?;
        if let Some(cb) = on_confirmation {
            self.state.lock().outbox.push(cb);
        }
        Ok(())
    }

    fn set_message_callback(&mut self, callback: Option<MessageCallback>) -> LowerLayerResult<()> {
        self.forwarded(MockCall::SetMessageCallback)?;
        self.state.lock().message_callback = callback;
        Ok(())
    }

    fn set_connection_status_callback(
        &mut self,
        callback: Option<ConnectionStatusCallback>,
    ) -> LowerLayerResult<()> {
        self.forwarded(MockCall::SetConnectionStatusCallback)?;
        let mut state = self.state.lock();
        state.status_callback = callback;
        state.status_notified = false;
        Ok(())
    }

    fn set_device_twin_callback(
        &mut self,
        callback: Option<DeviceTwinCallback>,
    ) -> LowerLayerResult<()> {
        self.forwarded(MockCall::SetDeviceTwinCallback)?;
        self.state.lock().twin_callback = callback;
        Ok(())
    }

    fn set_device_method_callback(
        &mut self,
        callback: Option<DeviceMethodCallback>,
    ) -> LowerLayerResult<()> {
        self.forwarded(MockCall::SetDeviceMethodCallback)?;
        self.state.lock().method_callback = callback;
        Ok(())
    }

    fn send_reported_state(
        &mut self,
        _reported_state: &[u8],
        on_reported: Option<ReportedStateCallback>,
    ) -> LowerLayerResult<()> {
        self.forwarded(MockCall::SendReportedState)?;
        if let Some(cb) = on_reported {
            self.state.lock().pending_reported.push(cb);
        }
        Ok(())
    }

    fn get_send_status(&self) -> LowerLayerResult<SendStatus> {
        self.forwarded(MockCall::GetSendStatus)?;
        if self.state.lock().outbox.is_empty() {
            Ok(SendStatus::Idle)
        } else {
            Ok(SendStatus::Busy)
        }
    }

    fn get_last_message_receive_time(&self) -> LowerLayerResult<SystemTime> {
        self.forwarded(MockCall::GetLastMessageReceiveTime)?;
        self.state.lock().last_receive.ok_or(LowerLayerError::IndefiniteTime)
    }

    fn set_option(&mut self, name: &str, value: &OptionValue) -> LowerLayerResult<()> {
        self.forwarded(MockCall::SetOption)?;
        let mut state = self.state.lock();
        state.options.retain(|(k, _)| k != name);
        state.options.push((name.to_string(), value.clone()));
        Ok(())
    }

    fn set_retry_policy(&mut self, settings: RetrySettings) -> LowerLayerResult<()> {
        self.forwarded(MockCall::SetRetryPolicy)?;
        self.state.lock().retry = settings;
        Ok(())
    }

    fn get_retry_policy(&self) -> LowerLayerResult<RetrySettings> {
        self.forwarded(MockCall::GetRetryPolicy)?;
        Ok(self.state.lock().retry)
    }

    fn blob_uploader(&self) -> LowerLayerResult<Arc<dyn BlobUploader>> {
        if MockFailures::is(&self.failures.blob_uploader) {
            return Err(LowerLayerError::error("injected blob_uploader failure"));
        }
        self.stats.record(MockCall::BlobUploader);
        Ok(Arc::new(MockUploader {
            stats: self.stats.clone(),
            failures: self.failures.clone(),
        }))
    }
}

impl Drop for MockClient {
    fn drop(&mut self) {
        self.stats.record(MockCall::DestroyClient);
        self.state.lock().abandon();
    }
}

/// Mock 共享传输
pub struct MockTransport {
    hostname: String,
    provider: MockProvider,
    devices: Vec<SharedDevice>,
}

impl LowerLayerTransport for MockTransport {
    fn do_work(&mut self) {
        self.provider.stats.record(MockCall::TransportDoWork);
        for device in &self.devices {
            device.lock().pump();
        }
    }

    fn set_option(&mut self, _name: &str, _value: &OptionValue) -> LowerLayerResult<()> {
        self.provider.stats.record(MockCall::TransportSetOption);
        if MockFailures::is(&self.provider.failures.forwarded) {
            return Err(LowerLayerError::error("injected transport set_option failure"));
        }
        Ok(())
    }

    fn register_device(
        &mut self,
        config: &DeviceConfig,
    ) -> LowerLayerResult<Box<dyn LowerLayerClient>> {
        if MockFailures::is(&self.provider.failures.register_device) {
            return Err(LowerLayerError::error("injected register_device failure"));
        }
        if self.devices.iter().any(|d| d.lock().device_id == config.device_id) {
            return Err(LowerLayerError::invalid_arg(format!(
                "device `{}` already registered",
                config.device_id
            )));
        }
        self.provider.stats.record(MockCall::RegisterDevice);
        let state = self.provider.device(&config.device_id);
        self.devices.push(state.clone());
        Ok(Box::new(MockClient {
            state,
            stats: self.provider.stats.clone(),
            failures: self.provider.failures.clone(),
            shared: true,
        }))
    }

    fn unregister_device(&mut self, device_id: &str) {
        self.provider.stats.record(MockCall::UnregisterDevice);
        self.devices.retain(|d| d.lock().device_id != device_id);
    }

    fn hostname(&self) -> &str {
        &self.hostname
    }
}

impl Drop for MockTransport {
    fn drop(&mut self) {
        self.provider.stats.record(MockCall::DestroyTransport);
        for device in &self.devices {
            device.lock().abandon();
        }
    }
}

/// Mock blob 上传器
pub struct MockUploader {
    stats: Arc<MockStats>,
    failures: Arc<MockFailures>,
}

impl BlobUploader for MockUploader {
    fn upload(&self, _destination: &str, _payload: &[u8]) -> LowerLayerResult<()> {
        self.stats.record(MockCall::Upload);
        while MockFailures::is(&self.failures.hold_uploads) {
            std::thread::sleep(Duration::from_millis(1));
        }
        if MockFailures::is(&self.failures.upload) {
            Err(LowerLayerError::error("injected upload failure"))
        } else {
            Ok(())
        }
    }
}
