//! Stress tests for keeldb: sustained writes, concurrent clients, replay time

use keeldb::common::{FlushPolicy, NodeConfig, StorageConfig};
use keeldb::model::{FieldType, Record, Schema, Value};
use keeldb::net::Client;
use keeldb::node::Entity;
use keeldb::query::{Filter, Operator, Query};
use keeldb::Node;
use std::sync::Arc;
use std::time::Instant;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

fn event_schema() -> Arc<Schema> {
    Arc::new(
        Schema::builder("event", 1)
            .field(2, "source", FieldType::String)
            .indexed()
            .field(3, "seq", FieldType::U64)
            .sorted()
            .build()
            .unwrap(),
    )
}

fn event(schema: &Arc<Schema>, source: &str, seq: u64) -> Record {
    schema
        .new_blank()
        .with(2, Value::String(source.into()))
        .unwrap()
        .with(3, Value::U64(seq))
        .unwrap()
}

#[test]
fn stress_write_replay() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("event.log");
    let schema = event_schema();
    let storage = StorageConfig {
        flush_policy: FlushPolicy::Never,
        ..StorageConfig::default()
    };

    let n = if cfg!(feature = "heavy-tests") { 100_000 } else { 5_000 };

    let start = Instant::now();
    {
        let entity = Entity::open(schema.clone(), &path, &storage).unwrap();
        for i in 0..n {
            let mut r = event(&schema, &format!("src-{}", i % 16), i);
            entity.insert(r.clone()).unwrap();
            if i % 4 == 0 {
                r.set(3, Value::U64(i + n)).unwrap();
                entity.update(r).unwrap();
            }
        }
    }
    let write_time = start.elapsed();

    let start = Instant::now();
    let entity = Entity::open(schema, &path, &storage).unwrap();
    let replay_time = start.elapsed();

    assert_eq!(entity.len().unwrap(), n as usize);
    let src0 = entity
        .query(&Query::and(vec![Filter::new(
            2,
            Operator::Equal,
            Value::String("src-0".into()),
        )]))
        .unwrap();
    assert_eq!(src0.len(), (n as usize).div_ceil(16));

    println!("Write {} records: {:?}", n, write_time);
    println!("Compact + replay: {:?}", replay_time);
    assert!(write_time.as_secs_f64() < 60.0, "Write too slow");
    assert!(replay_time.as_secs_f64() < 60.0, "Replay too slow");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stress_concurrent_clients() {
    let dir = TempDir::new().unwrap();
    let schema = event_schema();
    let mut config = NodeConfig::new("stress", dir.path().join("stress"));
    config.storage.flush_policy = FlushPolicy::Never;

    let node = Node::open(config, vec![schema.clone()]).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown, rx) = oneshot::channel::<()>();
    let server = node.clone();
    let handle = tokio::spawn(async move {
        server
            .run_until(listener, async {
                let _ = rx.await;
            })
            .await
    });

    let clients = 8;
    let per_client = 250u64;
    let start = Instant::now();

    let mut tasks = Vec::new();
    for c in 0..clients {
        let schema = schema.clone();
        tasks.push(tokio::spawn(async move {
            let mut client = Client::connect(addr).await.unwrap();
            for i in 0..per_client {
                client
                    .insert(&event(&schema, &format!("client-{}", c), i))
                    .await
                    .unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    let elapsed = start.elapsed();

    let mut client = Client::connect(addr).await.unwrap();
    let all = client.get_all(&schema).await.unwrap();
    assert_eq!(all.len() as u64, clients * per_client);

    println!("{} inserts over {} connections: {:?}", all.len(), clients, elapsed);

    let _ = shutdown.send(());
    handle.await.unwrap().unwrap();
    assert_eq!(node.metrics().requests_total(), clients * per_client + 1);
}
