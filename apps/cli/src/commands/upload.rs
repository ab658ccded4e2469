//! 文件上传命令

use crate::commands::connect;
use crate::config::CliConfig;
use anyhow::{Context, Result, bail};
use clap::Args;
use iothub_sdk::prelude::*;
use std::path::PathBuf;
use std::time::Duration;

/// 上传命令参数
#[derive(Args, Debug)]
pub struct UploadCommand {
    /// 设备 ID（默认取配置中的第一个设备）
    #[arg(short, long)]
    pub device: Option<String>,

    /// 目标 blob 名称
    #[arg(long)]
    pub destination: String,

    /// 要上传的本地文件
    #[arg(short, long, conflicts_with = "data")]
    pub file: Option<PathBuf>,

    /// 直接上传的文本内容
    #[arg(long)]
    pub data: Option<String>,

    /// 等待上传结果的超时（秒）
    #[arg(long, default_value_t = 10)]
    pub timeout_secs: u64,
}

impl UploadCommand {
    fn payload(&self) -> Result<Vec<u8>> {
        match (&self.file, &self.data) {
            (Some(path), _) => {
                std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))
            },
            (None, Some(data)) => Ok(data.as_bytes().to_vec()),
            (None, None) => bail!("either --file or --data is required"),
        }
    }

    pub fn execute(&self, config: &CliConfig) -> Result<()> {
        let payload = self.payload()?;
        let device = config.device(self.device.as_deref())?;
        let client = connect(config, device)?;

        let (tx, rx) = crossbeam_channel::bounded(1);
        client.upload_to_blob_async(
            &self.destination,
            &payload,
            Some(Box::new(move |result| {
                let _ = tx.send(result);
            })),
        )?;

        let result = rx
            .recv_timeout(Duration::from_secs(self.timeout_secs))
            .context("timed out waiting for upload result")?;
        client.destroy();

        match result {
            FileUploadResult::Ok => {
                println!("{}: uploaded {} byte(s) to {}", device.id, payload.len(), self.destination);
                Ok(())
            },
            FileUploadResult::Error => bail!("upload of {} failed", self.destination),
        }
    }
}
