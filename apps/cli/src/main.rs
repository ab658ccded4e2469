//! # IoT Hub CLI
//!
//! 通过设备 SDK 驱动模拟设备的命令行工具。
//!
//! ```bash
//! # 配置 Hub 与设备
//! iothub-cli config set --hub-name contoso --hub-suffix azure-devices.net
//! iothub-cli config add-device --id sensor-1 --key a2V5
//!
//! # 发送遥测（私有工作泵）
//! iothub-cli send -n 10
//!
//! # 所有设备共享一个传输和一个工作线程
//! iothub-cli shared -n 3
//!
//! # 上传文件
//! iothub-cli upload --destination logs/today.txt --file ./today.txt
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod config;
mod utils;

use commands::{ConfigCommand, RunCommand, SendCommand, SharedCommand, UploadCommand};
use config::CliConfig;

/// IoT Hub CLI - 模拟设备命令行工具
#[derive(Parser, Debug)]
#[command(name = "iothub-cli")]
#[command(about = "Drive simulated IoT hub devices through the device SDK", long_about = None)]
#[command(version)]
struct Cli {
    /// 配置文件路径（默认 `<config_dir>/iothub/config.toml`）
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 配置管理
    #[command(subcommand)]
    Config(ConfigCommand),

    /// 发送遥测事件
    Send {
        #[command(flatten)]
        args: SendCommand,
    },

    /// 上传文件到 blob 存储
    Upload {
        #[command(flatten)]
        args: UploadCommand,
    },

    /// 所有设备共享一个传输
    Shared {
        #[command(flatten)]
        args: SharedCommand,
    },

    /// 持续运行模拟设备
    Run {
        #[command(flatten)]
        args: RunCommand,
    },
}

fn main() -> Result<()> {
    // 初始化日志（输出到 stderr，stdout 留给命令结果）
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("iothub_cli=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let path = match cli.config {
        Some(path) => path,
        None => config::default_path()?,
    };

    match cli.command {
        Commands::Config(cmd) => cmd.execute(&path),

        Commands::Send { args } => args.execute(&CliConfig::load(&path)?),

        Commands::Upload { args } => args.execute(&CliConfig::load(&path)?),

        Commands::Shared { args } => args.execute(&CliConfig::load(&path)?),

        Commands::Run { args } => args.execute(&CliConfig::load(&path)?),
    }
}
