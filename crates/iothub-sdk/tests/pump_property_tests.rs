//! 工作泵属性测试
//!
//! 在当前线程上直接驱动 `pump_loop`，用脚本化的 `ThreadApi::sleep`
//! 控制锁何时恢复、何时请求停止。

use iothub_sdk::driver::{
    DriverError, OsThreads, PumpMetrics, SerialLock, StopSignal, ThreadApi, pump_loop,
};
use proptest::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

/// 第 `recover_at` 次休眠时清除锁中毒，第 `stop_at` 次休眠时请求停止
struct ScriptedThreads {
    lock: Arc<SerialLock>,
    stop: StopSignal,
    sleeps: AtomicUsize,
    recover_at: usize,
    stop_at: usize,
}

impl ThreadApi for ScriptedThreads {
    fn spawn(
        &self,
        name: &str,
        body: Box<dyn FnOnce() + Send + 'static>,
    ) -> Result<JoinHandle<()>, DriverError> {
        OsThreads.spawn(name, body)
    }

    fn sleep(&self, _duration: Duration) {
        let n = self.sleeps.fetch_add(1, Ordering::Relaxed) + 1;
        if n == self.recover_at {
            self.lock.clear_poison();
        }
        if n == self.stop_at {
            self.stop.request();
        }
    }
}

fn poison(lock: &Arc<SerialLock>) {
    let lock = lock.clone();
    let _ = std::thread::spawn(move || {
        let _guard = lock.acquire().unwrap();
        panic!("poisoning lock for property test");
    })
    .join();
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// 锁失败的轮次绝不执行 tick；恢复后每轮恰好执行一次
    #[test]
    fn tick_never_runs_without_lock(failures in 0usize..20, successes in 0usize..20) {
        let lock = Arc::new(SerialLock::new());
        if failures > 0 {
            poison(&lock);
        }
        let stop = StopSignal::new();
        let threads = ScriptedThreads {
            lock: lock.clone(),
            stop: stop.clone(),
            sleeps: AtomicUsize::new(0),
            recover_at: failures,
            stop_at: failures + successes,
        };
        if failures + successes == 0 {
            stop.request();
        }

        let metrics = PumpMetrics::default();
        let ticks = AtomicUsize::new(0);
        let sleeps_at_tick = AtomicUsize::new(usize::MAX);
        pump_loop(
            &lock,
            &stop,
            || {
                let seen = threads.sleeps.load(Ordering::Relaxed);
                sleeps_at_tick.fetch_min(seen, Ordering::Relaxed);
                ticks.fetch_add(1, Ordering::Relaxed);
            },
            &threads,
            Duration::from_millis(1),
            &metrics,
        );

        let snapshot = metrics.snapshot();
        prop_assert_eq!(ticks.load(Ordering::Relaxed), successes);
        prop_assert_eq!(snapshot.ticks_run as usize, successes);
        prop_assert_eq!(snapshot.ticks_skipped_lock as usize, failures);
        prop_assert_eq!(snapshot.ticks_skipped_stop, 1);
        if successes > 0 {
            // 第一次 tick 发生在锁恢复之后
            prop_assert!(sleeps_at_tick.load(Ordering::Relaxed) >= failures);
        }
    }
}
