//! Recovery tests for keeldb: restart, replay and compaction

use keeldb::common::{FlushPolicy, StorageConfig};
use keeldb::model::{FieldType, Record, Schema, Value};
use keeldb::node::Entity;
use keeldb::storage::{LogOptions, LogStore};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn user_schema() -> Arc<Schema> {
    Arc::new(
        Schema::builder("user", 1)
            .field(2, "email", FieldType::String)
            .indexed()
            .field(3, "age", FieldType::U32)
            .sorted()
            .build()
            .unwrap(),
    )
}

fn user(schema: &Arc<Schema>, email: &str, age: u32) -> Record {
    schema
        .new_blank()
        .with(2, Value::String(email.into()))
        .unwrap()
        .with(3, Value::U32(age))
        .unwrap()
}

fn storage(compact_on_startup: bool) -> StorageConfig {
    StorageConfig {
        flush_policy: FlushPolicy::Interval,
        flush_interval_ms: 50,
        compact_on_startup,
        compact_interval_secs: None,
    }
}

#[test]
fn test_insert_delete_reinsert_across_restarts() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("user.log");
    let schema = user_schema();
    let mut u = user(&schema, "u@example.com", 30);
    let id = u.id();

    // Insert U
    {
        let entity = Entity::open(schema.clone(), &path, &storage(false)).unwrap();
        entity.insert(u.clone()).unwrap();
    }
    {
        let entity = Entity::open(schema.clone(), &path, &storage(false)).unwrap();
        let all = entity.get_all().unwrap();
        assert_eq!(all.iter().filter(|r| r.id() == id).count(), 1);

        // Delete U
        entity.delete(u.clone()).unwrap();
    }
    {
        let entity = Entity::open(schema.clone(), &path, &storage(false)).unwrap();
        assert!(entity.get(id).unwrap().is_none());

        // Re-insert U with a new value
        u.set(3, Value::U32(31)).unwrap();
        entity.insert(u.clone()).unwrap();
    }
    {
        let entity = Entity::open(schema.clone(), &path, &storage(true)).unwrap();
        let all = entity.get_all().unwrap();
        assert_eq!(all, vec![u.clone()]);
        assert_eq!(all[0].get(3).unwrap(), &Value::U32(31));
    }
}

#[test]
fn test_last_write_wins_on_replay() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("user.log");
    let schema = user_schema();
    let mut u = user(&schema, "w@example.com", 1);
    let other = user(&schema, "o@example.com", 99);

    {
        let entity = Entity::open(schema.clone(), &path, &storage(false)).unwrap();
        entity.insert(u.clone()).unwrap();
        entity.insert(other.clone()).unwrap();
        for age in 2..=10 {
            u.set(3, Value::U32(age)).unwrap();
            entity.update(u.clone()).unwrap();
        }
    }

    let entity = Entity::open(schema.clone(), &path, &storage(false)).unwrap();
    // Survivors come back in order of their latest append
    assert_eq!(entity.get_all().unwrap(), vec![other, u]);
}

#[test]
fn test_compaction_preserves_visible_state() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("user.log");
    let schema = user_schema();
    let options = LogOptions {
        flush_policy: FlushPolicy::Never,
        flush_interval: Duration::from_secs(1),
    };

    let mut log = LogStore::open(&path, schema.clone(), options).unwrap();
    let mut live = Vec::new();
    for i in 0..50u32 {
        let mut r = user(&schema, &format!("{}@x", i), i);
        log.append(&r.encode().unwrap()).unwrap();
        match i % 3 {
            0 => {
                r.set_deleted(true);
                log.append(&r.encode().unwrap()).unwrap();
            }
            1 => {
                r.set(3, Value::U32(i * 10)).unwrap();
                log.append(&r.encode().unwrap()).unwrap();
                live.push(r);
            }
            _ => live.push(r),
        }
    }

    let before = log.read_all().unwrap();
    let size_before = std::fs::metadata(&path).unwrap().len();

    let report = log.compact().unwrap();
    assert!(report.rewritten);
    assert_eq!(report.entries_after as usize, live.len());

    assert_eq!(log.read_all().unwrap(), before);
    assert!(std::fs::metadata(&path).unwrap().len() < size_before);

    // Idempotent, and the file is byte-identical afterwards
    let bytes = std::fs::read(&path).unwrap();
    assert!(!log.compact().unwrap().rewritten);
    assert_eq!(std::fs::read(&path).unwrap(), bytes);
    drop(log);

    let log = LogStore::open(&path, schema, options).unwrap();
    let mut replayed = log.read_all().unwrap();
    replayed.sort_by_key(|r| r.id());
    live.sort_by_key(|r| r.id());
    assert_eq!(replayed, live);
}

#[test]
fn test_interval_flush_survives_drop() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("user.log");
    let schema = user_schema();
    let u = user(&schema, "flush@example.com", 5);

    {
        let entity = Entity::open(schema.clone(), &path, &storage(false)).unwrap();
        entity.insert(u.clone()).unwrap();
    }

    let entity = Entity::open(schema, &path, &storage(false)).unwrap();
    assert_eq!(entity.get(u.id()).unwrap(), Some(u));
}
