//! 共享传输集成测试
//!
//! 验证多个客户端共用一个传输时：
//! 1. 只创建一个共享工作泵线程
//! 2. 最后一个 detach 的客户端负责 join
//! 3. 多线程并发调用被正确串行化

use iothub_sdk::driver::mock::CountingThreads;
use iothub_sdk::prelude::*;
use iothub_sdk::transport::mock::{MockCall, MockProvider};
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

fn new_transport(threads: &Arc<CountingThreads>) -> (TransportHandle, MockProvider) {
    let provider = MockProvider::new();
    let transport = TransportHandle::builder(Arc::new(provider.clone()))
        .hub("contoso", "azure-devices.net")
        .threads(threads.clone())
        .build()
        .unwrap();
    (transport, provider)
}

fn device(id: &str) -> ClientConfig {
    ClientConfig::new("contoso", "azure-devices.net", id).with_device_key("a2V5")
}

#[test]
fn test_two_clients_one_thread_last_one_out() {
    let threads = Arc::new(CountingThreads::new());
    let (transport, _provider) = new_transport(&threads);

    let first = ClientHandle::create_with_transport(&transport, &device("dev-1")).unwrap();
    let second = ClientHandle::create_with_transport(&transport, &device("dev-2")).unwrap();

    transport.start_worker_thread(first.id()).unwrap();
    transport.start_worker_thread(second.id()).unwrap();
    assert_eq!(threads.spawned_matching("iothub-transport"), 1);

    assert!(!transport.signal_end_worker_thread(first.id()));
    assert!(transport.signal_end_worker_thread(second.id()));
    transport.join_worker_thread(second.id());
    assert_eq!(threads.joined_matching("iothub-transport"), 1);

    // 两个客户端都已注销：销毁时不会再次 join
    first.destroy();
    second.destroy();
    assert_eq!(threads.joined_matching("iothub-transport"), 1);
}

#[test]
fn test_events_confirmed_by_shared_worker() {
    let threads = Arc::new(CountingThreads::new());
    let (transport, provider) = new_transport(&threads);
    let client = ClientHandle::create_with_transport(&transport, &device("dev-events")).unwrap();

    let (tx, rx) = crossbeam_channel::unbounded();
    for i in 0..3 {
        let tx = tx.clone();
        client
            .send_event_async(
                Message::from_text(&format!("reading {}", i)),
                Some(Box::new(move |result| {
                    let _ = tx.send(result);
                })),
            )
            .unwrap();
    }

    for _ in 0..3 {
        let result = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(result, ConfirmationResult::Ok);
    }
    assert!(provider.stats().count(MockCall::TransportDoWork) > 0);
    assert_eq!(provider.stats().count(MockCall::ClientDoWork), 0);
}

#[test]
fn test_concurrent_clients_across_threads() {
    const CLIENTS: usize = 4;
    const EVENTS: usize = 25;

    let threads = Arc::new(CountingThreads::new());
    let (transport, provider) = new_transport(&threads);

    let workers: Vec<_> = (0..CLIENTS)
        .map(|i| {
            let client =
                ClientHandle::create_with_transport(&transport, &device(&format!("dev-{}", i)))
                    .unwrap();
            std::thread::spawn(move || {
                for n in 0..EVENTS {
                    client
                        .send_event_async(Message::from_text(&n.to_string()), None)
                        .unwrap();
                }
                // 客户端在工作线程上销毁，触发 detach
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(provider.stats().count(MockCall::SendEvent), CLIENTS * EVENTS);
    assert_eq!(transport.attached_clients(), 0);
    assert_eq!(
        threads.spawned_matching("iothub-transport"),
        threads.joined_matching("iothub-transport")
    );
}

#[test]
fn test_transport_outlives_dropped_handle_while_clients_attached() {
    let threads = Arc::new(CountingThreads::new());
    let (transport, provider) = new_transport(&threads);
    let client = ClientHandle::create_with_transport(&transport, &device("dev-keep")).unwrap();
    client.send_event_async(Message::from_text("x"), None).unwrap();

    transport.destroy();
    assert_eq!(provider.stats().count(MockCall::DestroyTransport), 0);
    client.send_event_async(Message::from_text("y"), None).unwrap();

    client.destroy();
    assert_eq!(provider.stats().count(MockCall::DestroyTransport), 1);
    assert_eq!(threads.joined_matching("iothub-transport"), 1);
}

#[derive(Debug, Clone, Copy)]
enum Step {
    Attach(usize),
    Detach(usize),
}

fn step_strategy() -> impl Strategy<Value = Step> {
    prop_oneof![
        (0..4usize).prop_map(Step::Attach),
        (0..4usize).prop_map(Step::Detach),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// detach 返回 true 当且仅当注册表在调用前非空且调用后为空
    #[test]
    fn detach_signal_matches_registry_model(steps in proptest::collection::vec(step_strategy(), 0..20)) {
        let threads = Arc::new(CountingThreads::new());
        let (transport, _provider) = new_transport(&threads);
        let ids: Vec<ClientId> = (0..4).map(|_| ClientId::next()).collect();

        let mut model = BTreeSet::new();
        let mut expected_spawns = 0usize;

        for step in steps {
            match step {
                Step::Attach(i) => {
                    if model.is_empty() {
                        expected_spawns += 1;
                    }
                    transport.start_worker_thread(ids[i]).unwrap();
                    model.insert(i);
                },
                Step::Detach(i) => {
                    let expected = model.contains(&i) && model.len() == 1;
                    model.remove(&i);
                    let signaled = transport.signal_end_worker_thread(ids[i]);
                    prop_assert_eq!(signaled, expected);
                    if signaled {
                        transport.join_worker_thread(ids[i]);
                    }
                },
            }
            prop_assert_eq!(transport.attached_clients(), model.len());
        }

        prop_assert_eq!(threads.spawned_matching("iothub-transport"), expected_spawns);
        drop(transport);
        prop_assert_eq!(threads.joined_matching("iothub-transport"), expected_spawns);
    }
}
