//! Client for a keeldb node
//!
//! One TCP connection, one request in flight at a time.

use super::frame::{read_frame, write_frame, DEFAULT_MAX_FRAME};
use super::message::Message;
use crate::common::{Error, Result};
use crate::model::{Record, Schema};
use crate::query::Query;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpStream, ToSocketAddrs};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Client {
    stream: TcpStream,
    peer: String,
    timeout: Duration,
    max_frame: u64,
}

impl Client {
    /// Open a connection. A refused connection is [`Error::ConnectionRefused`].
    pub async fn connect<A>(addr: A) -> Result<Self>
    where
        A: ToSocketAddrs + std::fmt::Display,
    {
        let peer = addr.to_string();
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| connect_error(&peer, e))?;
        stream.set_nodelay(true)?;

        tracing::debug!("Connected to {}", peer);

        Ok(Self {
            stream,
            peer,
            timeout: DEFAULT_TIMEOUT,
            max_frame: DEFAULT_MAX_FRAME,
        })
    }

    /// Deadline for each reply
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_frame(mut self, max_frame: u64) -> Self {
        self.max_frame = max_frame;
        self
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Send a request and wait for its reply.
    ///
    /// A reply with `status=Error` becomes [`Error::Remote`].
    pub async fn request(&mut self, msg: &Message) -> Result<Message> {
        write_frame(&mut self.stream, &msg.to_bytes()?).await?;

        let frame = read_frame(&mut self.stream, self.timeout, self.max_frame)
            .await?
            .ok_or_else(|| {
                Error::ConnectionFailed(format!("{} closed the connection", self.peer))
            })?;

        Message::from_bytes(&frame)?.into_result()
    }

    /// Round-trip a `Test` message; returns the echoed string.
    pub async fn ping(&mut self, echo: &str) -> Result<String> {
        let reply = self.request(&Message::test(echo)).await?;
        Ok(reply.response.echo)
    }

    pub async fn insert(&mut self, record: &Record) -> Result<()> {
        self.request(&Message::insert(record)?).await.map(|_| ())
    }

    pub async fn update(&mut self, record: &Record) -> Result<()> {
        self.request(&Message::update(record)?).await.map(|_| ())
    }

    pub async fn delete(&mut self, record: &Record) -> Result<()> {
        self.request(&Message::delete(record)?).await.map(|_| ())
    }

    /// Every live record of the schema's type
    pub async fn get_all(&mut self, schema: &Arc<Schema>) -> Result<Vec<Record>> {
        let reply = self
            .request(&Message::get_all(schema.name(), schema.version()))
            .await?;
        decode_models(schema, reply)
    }

    pub async fn query(&mut self, schema: &Arc<Schema>, query: Query) -> Result<Vec<Record>> {
        let reply = self
            .request(&Message::query(schema.name(), schema.version(), query))
            .await?;
        decode_models(schema, reply)
    }
}

fn decode_models(schema: &Arc<Schema>, reply: Message) -> Result<Vec<Record>> {
    reply
        .response
        .models
        .iter()
        .map(|bytes| schema.decode(bytes))
        .collect()
}

pub(crate) fn connect_error(peer: &str, e: std::io::Error) -> Error {
    match e.kind() {
        std::io::ErrorKind::ConnectionRefused => Error::ConnectionRefused(peer.to_string()),
        _ => Error::ConnectionFailed(format!("{}: {}", peer, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_error_classification() {
        let refused = std::io::Error::from(std::io::ErrorKind::ConnectionRefused);
        assert!(connect_error("x", refused).is_retryable());

        let other = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        let err = connect_error("x", other);
        assert!(matches!(err, Error::ConnectionFailed(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Bind then drop to get a port nothing listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        match Client::connect(addr).await {
            Err(Error::ConnectionRefused(_)) => {}
            Err(other) => panic!("expected refused, got {}", other),
            Ok(_) => panic!("connected to a closed port"),
        }
    }
}
