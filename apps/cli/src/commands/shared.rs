//! 共享传输命令
//!
//! 所有配置的设备挂到同一个传输上，由一个工作线程驱动。

use crate::config::{self as cli_config, CliConfig};
use crate::utils::{ConfirmationSummary, collect_confirmations, telemetry_message};
use anyhow::{Result, anyhow, bail};
use clap::Args;
use iothub_sdk::prelude::*;
use std::time::Duration;

/// 共享命令参数
#[derive(Args, Debug)]
pub struct SharedCommand {
    /// 每个设备发送的条数
    #[arg(short = 'n', long, default_value_t = 3)]
    pub count: u64,

    /// 等待确认的超时（秒）
    #[arg(long, default_value_t = 5)]
    pub timeout_secs: u64,
}

impl SharedCommand {
    pub fn execute(&self, config: &CliConfig) -> Result<()> {
        let hub = config.hub()?;
        if config.devices.is_empty() {
            bail!("no [[devices]] configured");
        }

        let transport = TransportHandle::builder(cli_config::provider(&hub.provider)?)
            .hub(&hub.name, &hub.suffix)
            .pump_config(config.pump_config())
            .build()?;

        let mut clients = Vec::with_capacity(config.devices.len());
        for device in &config.devices {
            let client = ClientHandle::builder()
                .config(config.client_config(device)?)
                .transport(&transport)
                .build()?;
            clients.push((device.id.as_str(), client));
        }
        tracing::info!(
            "{} device(s) attached to {}",
            transport.attached_clients(),
            transport.hostname()
        );

        let timeout = Duration::from_secs(self.timeout_secs);
        let summaries = std::thread::scope(|scope| {
            let workers: Vec<_> = clients
                .iter()
                .map(|(device_id, client)| {
                    scope.spawn(move || -> Result<ConfirmationSummary> {
                        let (tx, rx) = crossbeam_channel::unbounded();
                        let mut rng = rand::thread_rng();
                        for sequence in 0..self.count {
                            let tx = tx.clone();
                            client.send_event_async(
                                telemetry_message(device_id, sequence, &mut rng),
                                Some(Box::new(move |result| {
                                    let _ = tx.send(result);
                                })),
                            )?;
                        }
                        Ok(collect_confirmations(&rx, self.count as usize, timeout))
                    })
                })
                .collect();

            workers
                .into_iter()
                .map(|worker| {
                    worker
                        .join()
                        .unwrap_or_else(|_| Err(anyhow!("sender thread panicked")))
                })
                .collect::<Vec<_>>()
        });

        let mut incomplete = 0;
        for ((device_id, _), summary) in clients.iter().zip(&summaries) {
            match summary {
                Ok(summary) => {
                    if !summary.is_complete() {
                        incomplete += 1;
                    }
                    println!("{}: {}", device_id, summary);
                },
                Err(e) => {
                    incomplete += 1;
                    println!("{}: {:#}", device_id, e);
                },
            }
        }

        let metrics = transport.worker_metrics();
        drop(clients);
        transport.destroy();
        println!("shared worker ran {} tick(s)", metrics.ticks_run);

        if incomplete > 0 {
            bail!("{} device(s) did not confirm every event", incomplete);
        }
        Ok(())
    }
}
