//! run 命令
//!
//! 模拟设备持续运行：周期发送遥测、响应直接方法与孪生更新，直到 Ctrl+C 或超时。
//! 使用 mock 协议时，模拟云端每个周期调用一次 `ping` 直接方法。

use crate::commands::{connect_with, provider_name};
use crate::config::{self as cli_config, CliConfig};
use crate::utils::{collect_confirmations, telemetry_message};
use anyhow::{Context, Result};
use clap::Args;
use iothub_sdk::prelude::*;
use iothub_sdk::transport::mock::MockProvider;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// 运行命令参数
#[derive(Args, Debug)]
pub struct RunCommand {
    /// 设备 ID（默认取配置中的第一个设备）
    #[arg(short, long)]
    pub device: Option<String>,

    /// 遥测发送周期（毫秒）
    #[arg(long, default_value_t = 1000)]
    pub period_ms: u64,

    /// 运行时长（秒），缺省时运行到 Ctrl+C
    #[arg(long)]
    pub duration_secs: Option<u64>,
}

impl RunCommand {
    pub fn execute(&self, config: &CliConfig) -> Result<()> {
        let device = config.device(self.device.as_deref())?;

        let mock = (provider_name(config) == "mock").then(MockProvider::new);
        let provider: Arc<dyn TransportProvider> = match &mock {
            Some(mock) => Arc::new(mock.clone()),
            None => cli_config::provider(provider_name(config))?,
        };
        let cloud = mock.as_ref().map(MockProvider::cloud);
        let client = connect_with(config, device, provider)?;

        client.set_device_method_callback(Some(Box::new(|method, payload| {
            tracing::info!("Direct method `{}` ({} bytes)", method, payload.len());
            match method {
                "ping" => MethodResponse::new(200, "\"pong\""),
                _ => MethodResponse::new(404, "{}"),
            }
        })))?;
        let twin_updates = Arc::new(AtomicUsize::new(0));
        let t = twin_updates.clone();
        client.set_device_twin_callback(Some(Box::new(move |state, payload| {
            tracing::info!("Twin update {:?} ({} bytes)", state, payload.len());
            t.fetch_add(1, Ordering::Relaxed);
        })))?;
        client.set_message_callback(Some(Box::new(|message| {
            tracing::info!("C2D message {:?}", message.message_id());
            MessageDisposition::Accepted
        })))?;

        let running = Arc::new(AtomicBool::new(true));
        let r = running.clone();
        ctrlc::set_handler(move || {
            eprintln!("\nReceived interrupt signal. Shutting down...");
            r.store(false, Ordering::SeqCst);
        })
        .context("failed to set signal handler")?;

        if let Some(cloud) = &cloud {
            cloud.update_twin(&device.id, TwinUpdateState::Complete, b"{\"desired\":{}}");
        }

        let deadline = self.duration_secs.map(|s| Instant::now() + Duration::from_secs(s));
        let period = Duration::from_millis(self.period_ms.max(1));
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut rng = rand::thread_rng();
        let mut sent = 0u64;

        println!("▶ {} running (Ctrl+C to stop)", device.id);
        while running.load(Ordering::SeqCst) && deadline.is_none_or(|d| Instant::now() < d) {
            let tx = tx.clone();
            client.send_event_async(
                telemetry_message(&device.id, sent, &mut rng),
                Some(Box::new(move |result| {
                    let _ = tx.send(result);
                })),
            )?;
            if let Some(cloud) = &cloud {
                cloud.invoke_method(&device.id, "ping", b"{}");
            }
            sent += 1;
            std::thread::sleep(period);
        }

        let summary = collect_confirmations(&rx, sent as usize, Duration::from_secs(2));
        let metrics = client.worker_metrics();
        client.destroy();

        println!("{}: sent {}, {}", device.id, sent, summary);
        if let Some(cloud) = &cloud {
            let answered = cloud
                .method_replies()
                .iter()
                .filter(|reply| reply.response.status == 200)
                .count();
            println!(
                "{}: answered {} direct method call(s), {} twin update(s)",
                device.id,
                answered,
                twin_updates.load(Ordering::Relaxed)
            );
        }
        println!("worker ran {} tick(s)", metrics.ticks_run);
        Ok(())
    }
}
