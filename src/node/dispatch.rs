//! Request dispatch
//!
//! Turns one decoded request into its reply. Failures are reported in the
//! reply; the caller decides nothing about the connection from here.

use super::entity::{Entity, Registry};
use crate::common::{Error, Result};
use crate::model::Record;
use crate::net::{Message, MessageKind, ECHO_SUFFIX};
use std::sync::Arc;

/// Handle one request and return the filled-in envelope.
pub fn handle(registry: &Registry, mut msg: Message) -> Message {
    match execute(registry, &mut msg) {
        Ok(models) => {
            if msg.kind.is_mutation() {
                tracing::debug!("{} applied to {}", msg.kind.as_str(), msg.entity);
            }
            msg.ok();
            msg.response.models = models;
        }
        Err(e) => {
            tracing::warn!(
                "{} request on {:?} failed: {}",
                msg.kind.as_str(),
                msg.entity,
                e
            );
            msg.fail(&e);
        }
    }
    msg
}

fn execute(registry: &Registry, msg: &mut Message) -> Result<Vec<Vec<u8>>> {
    match msg.kind {
        MessageKind::Test => {
            msg.response.echo = format!("{}{}", msg.echo, ECHO_SUFFIX);
            Ok(Vec::new())
        }
        MessageKind::Insert => {
            let (entity, record) = decode_mutation(registry, msg)?;
            entity.insert(record)?;
            Ok(Vec::new())
        }
        MessageKind::Update => {
            let (entity, record) = decode_mutation(registry, msg)?;
            entity.update(record)?;
            Ok(Vec::new())
        }
        MessageKind::Delete => {
            let (entity, record) = decode_mutation(registry, msg)?;
            entity.delete(record)?;
            Ok(Vec::new())
        }
        MessageKind::GetAll => {
            let entity = resolve(registry, msg)?;
            encode_all(&entity.get_all()?)
        }
        MessageKind::Query => {
            let entity = resolve(registry, msg)?;
            let query = msg
                .query
                .as_ref()
                .ok_or_else(|| Error::InvalidQuery("query message without a query".into()))?;
            encode_all(&entity.query(query)?)
        }
    }
}

/// Look up the target entity and check the message version against it.
fn resolve(registry: &Registry, msg: &Message) -> Result<Arc<Entity>> {
    let entity = registry.get(&msg.entity)?;
    let expected = entity.schema().version();
    if msg.version != expected {
        return Err(Error::VersionMismatch {
            entity: msg.entity.clone(),
            expected,
            actual: msg.version,
        });
    }
    Ok(entity)
}

fn decode_mutation(registry: &Registry, msg: &Message) -> Result<(Arc<Entity>, Record)> {
    let entity = resolve(registry, msg)?;
    let record = entity.schema().decode(&msg.record)?;
    Ok((entity, record))
}

fn encode_all(records: &[Record]) -> Result<Vec<Vec<u8>>> {
    records.iter().map(Record::encode).collect()
}
