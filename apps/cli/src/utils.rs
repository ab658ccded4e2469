//! 命令共用的小工具

use crossbeam_channel::Receiver;
use iothub_sdk::prelude::*;
use rand::Rng;
use std::time::{Duration, Instant};

/// 生成一条模拟遥测消息
pub fn telemetry_message(device_id: &str, sequence: u64, rng: &mut impl Rng) -> Message {
    let body = serde_json::json!({
        "deviceId": device_id,
        "sequence": sequence,
        "temperature": rng.gen_range(18.0..32.0_f64),
        "humidity": rng.gen_range(30.0..70.0_f64),
    });
    Message::from_text(&body.to_string())
        .with_message_id(format!("{}-{}", device_id, sequence))
        .with_property("source", "iothub-cli")
}

/// 确认结果统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmationSummary {
    pub ok: usize,
    pub failed: usize,
    pub missing: usize,
}

impl ConfirmationSummary {
    pub fn is_complete(&self) -> bool {
        self.failed == 0 && self.missing == 0
    }
}

impl std::fmt::Display for ConfirmationSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} confirmed, {} failed, {} missing", self.ok, self.failed, self.missing)
    }
}

/// 在 `timeout` 内收集 `expected` 个确认
pub fn collect_confirmations(
    rx: &Receiver<ConfirmationResult>,
    expected: usize,
    timeout: Duration,
) -> ConfirmationSummary {
    let deadline = Instant::now() + timeout;
    let mut summary = ConfirmationSummary::default();

    for _ in 0..expected {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok(ConfirmationResult::Ok) => summary.ok += 1,
            Ok(other) => {
                tracing::warn!("Event confirmation: {:?}", other);
                summary.failed += 1;
            },
            Err(_) => break,
        }
    }
    summary.missing = expected - summary.ok - summary.failed;
    summary
}
