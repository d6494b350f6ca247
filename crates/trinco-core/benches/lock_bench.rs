// Benchmarks for the lock primitives and the standalone engine path
// Measures uncontended acquisition throughput

use std::time::Duration;

use criterion::{Criterion, criterion_group, criterion_main};
use tokio::runtime::Runtime;

use trinco_api::NodeId;
use trinco_core::service::fifo_lock::FifoLock;
use trinco_core::service::shared_lock::SharedLock;
use trinco_core::{ExclusiveLockManager, LocalCluster};

fn bench_fifo_lock_uncontended(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let lock = FifoLock::new("bench");
    let caller = NodeId::from("node-a");

    c.bench_function("fifo_lock_uncontended", |b| {
        b.to_async(&rt).iter(|| async {
            lock.lock(&caller, 0).await.unwrap();
            lock.unlock(&caller);
        })
    });
}

fn bench_shared_register_cycle(c: &mut Criterion) {
    let me = NodeId::from("node-a");
    let lock = SharedLock::new_held("bench", &me);

    c.bench_function("shared_register_unlock", |b| {
        b.iter(|| {
            lock.register(&me, 1);
            lock.unlock(&me, false);
        })
    });
}

fn bench_shared_snapshot(c: &mut Criterion) {
    let me = NodeId::from("node-a");
    let lock = SharedLock::new_held("bench", &me);

    c.bench_function("shared_snapshot", |b| b.iter(|| lock.snapshot()));
}

fn bench_standalone_global_lock(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let manager = rt.block_on(async {
        let hub = LocalCluster::default();
        let channel = hub.join(NodeId::from("node-a")).await;
        let manager = ExclusiveLockManager::new(channel);
        manager.start().await.unwrap();
        manager
    });

    c.bench_function("standalone_global_lock_cycle", |b| {
        b.to_async(&rt).iter(|| async {
            manager
                .lock_globally("bench", Duration::from_secs(1))
                .await
                .unwrap();
            manager.unlock_globally("bench").await.unwrap();
        })
    });
}

criterion_group!(
    benches,
    bench_fifo_lock_uncontended,
    bench_shared_register_cycle,
    bench_shared_snapshot,
    bench_standalone_global_lock
);
criterion_main!(benches);
