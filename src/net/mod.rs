//! Wire protocol: framing, message envelope and client

pub mod client;
pub mod frame;
pub mod message;

pub use client::Client;
pub use frame::{read_frame, write_frame, DEFAULT_MAX_FRAME};
pub use message::{Message, MessageKind, Mode, Response, Status, ECHO_SUFFIX};
