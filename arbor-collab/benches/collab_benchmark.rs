use std::hint::black_box;
use std::sync::Arc;

use arbor_collab::broadcast::BroadcastGroup;
use arbor_collab::protocol::ServerMessage;
use arbor_collab::storage::{MemorySnapshotStore, RocksSnapshotStore, SnapshotStore, StoreConfig};
use arbor_collab::{default_tree, SyncCoordinator};
use arbor_core::TreeNode;
use criterion::{criterion_group, criterion_main, Criterion};
use uuid::Uuid;

/// Tree with `fanout^depth` leaves.
fn wide_tree(fanout: usize, depth: usize) -> TreeNode {
    fn build(id: &mut usize, fanout: usize, depth: usize) -> TreeNode {
        *id += 1;
        let mut node = TreeNode::new(id.to_string(), format!("Node {id}"));
        if depth > 0 {
            for _ in 0..fanout {
                node.children.push(build(id, fanout, depth - 1));
            }
        }
        node
    }
    let mut id = 0;
    build(&mut id, fanout, depth)
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn bench_frame_encode(c: &mut Criterion) {
    let small = ServerMessage::TreeUpdate(default_tree());
    let large = ServerMessage::TreeUpdate(wide_tree(10, 3)); // 1,111 nodes

    c.bench_function("frame_encode_default_tree", |b| {
        b.iter(|| black_box(small.encode().unwrap()))
    });
    c.bench_function("frame_encode_1k_nodes", |b| {
        b.iter(|| black_box(large.encode().unwrap()))
    });
}

fn bench_frame_decode(c: &mut Criterion) {
    let encoded = ServerMessage::TreeUpdate(wide_tree(10, 3)).encode().unwrap();
    c.bench_function("frame_decode_1k_nodes", |b| {
        b.iter(|| black_box(ServerMessage::decode(black_box(&encoded)).unwrap()))
    });
}

fn bench_broadcast_fanout(c: &mut Criterion) {
    let rt = runtime();
    let group = BroadcastGroup::new(1024);
    // Keep 100 subscribers alive; they never read, so drain by lagging
    let _subs: Vec<_> = rt.block_on(async {
        let mut subs = Vec::new();
        for _ in 0..100 {
            subs.push(group.register(Uuid::new_v4()).await);
        }
        subs
    });
    let tree = default_tree();

    c.bench_function("broadcast_100_sessions", |b| {
        b.iter(|| black_box(group.broadcast(black_box(&tree), None).unwrap()))
    });
}

fn bench_memory_append(c: &mut Criterion) {
    let store = MemorySnapshotStore::new();
    let tree = default_tree();
    c.bench_function("memory_append", |b| {
        b.iter(|| black_box(store.append(black_box(&tree)).unwrap()))
    });
}

fn bench_rocks_append(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let store = RocksSnapshotStore::open(StoreConfig::for_testing(dir.path())).unwrap();
    let tree = wide_tree(10, 2); // 111 nodes
    c.bench_function("rocks_append_111_nodes", |b| {
        b.iter(|| black_box(store.append(black_box(&tree)).unwrap()))
    });
}

fn bench_rocks_latest(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let store = RocksSnapshotStore::open(StoreConfig::for_testing(dir.path())).unwrap();
    for _ in 0..1000 {
        store.append(&default_tree()).unwrap();
    }
    c.bench_function("rocks_latest_of_1000", |b| {
        b.iter(|| black_box(store.latest().unwrap()))
    });
}

fn bench_coordinator_commit(c: &mut Criterion) {
    let rt = runtime();
    let coordinator = SyncCoordinator::new(Arc::new(MemorySnapshotStore::new()), 1024);
    let tree = default_tree();
    c.bench_function("coordinator_commit", |b| {
        b.iter(|| {
            rt.block_on(async { black_box(coordinator.commit(tree.clone(), None).await.unwrap()) })
        })
    });
}

criterion_group!(
    benches,
    bench_frame_encode,
    bench_frame_decode,
    bench_broadcast_fanout,
    bench_memory_append,
    bench_rocks_append,
    bench_rocks_latest,
    bench_coordinator_commit,
);

criterion_main!(benches);
