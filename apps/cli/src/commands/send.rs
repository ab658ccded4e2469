//! 发送遥测命令

use crate::commands::connect;
use crate::config::CliConfig;
use crate::utils::{collect_confirmations, telemetry_message};
use anyhow::{Result, bail};
use clap::Args;
use iothub_sdk::prelude::*;
use std::time::Duration;

/// 发送命令参数
#[derive(Args, Debug)]
pub struct SendCommand {
    /// 设备 ID（默认取配置中的第一个设备）
    #[arg(short, long)]
    pub device: Option<String>,

    /// 发送条数
    #[arg(short = 'n', long, default_value_t = 5)]
    pub count: u64,

    /// 自定义消息内容（默认生成模拟遥测）
    #[arg(short, long)]
    pub message: Option<String>,

    /// 等待确认的超时（秒）
    #[arg(long, default_value_t = 5)]
    pub timeout_secs: u64,
}

impl SendCommand {
    pub fn execute(&self, config: &CliConfig) -> Result<()> {
        let device = config.device(self.device.as_deref())?;
        let client = connect(config, device)?;

        let (tx, rx) = crossbeam_channel::unbounded();
        let mut rng = rand::thread_rng();
        for sequence in 0..self.count {
            let message = match &self.message {
                Some(text) => Message::from_text(text),
                None => telemetry_message(&device.id, sequence, &mut rng),
            };
            let tx = tx.clone();
            client.send_event_async(
                message,
                Some(Box::new(move |result| {
                    let _ = tx.send(result);
                })),
            )?;
        }

        let summary = collect_confirmations(
            &rx,
            self.count as usize,
            Duration::from_secs(self.timeout_secs),
        );
        client.destroy();

        println!("{}: {}", device.id, summary);
        if !summary.is_complete() {
            bail!("not all events were confirmed");
        }
        Ok(())
    }
}
