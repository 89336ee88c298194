//! Node: entity registry, request dispatch, connection server and peers

pub mod compactor;
pub mod dispatch;
pub mod entity;
pub mod peer;
pub mod server;

pub use entity::{Entity, Registry};
pub use peer::PeerSet;
pub use server::Node;
