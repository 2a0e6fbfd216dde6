//! Line-oriented TCP transport. A connection opens with `Name <client>`,
//! then sends one command per line. Every reply and broadcast is one JSON
//! line.

use std::sync::Arc;

use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{Decoder, Encoder, Framed, LinesCodec, LinesCodecError};
use tracing::{debug, info, warn};

use crate::auth::{self, INVALID_HANDSHAKE};
use crate::command::{self, Response};
use crate::engine::{Engine, ErrorKind};
use crate::limits::*;
use crate::model::ClientName;
use crate::notify::{ClientHandle, Outbound};

/// One decoded inbound line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Text(String),
    /// A line longer than `MAX_LINE_LEN`. Its bytes are discarded up to the
    /// next newline.
    TooLong,
}

/// `LinesCodec` that yields [`Line::TooLong`] instead of failing on an
/// over-long line. `Framed` ends the stream after any decode error, which
/// would drop the connection.
#[derive(Debug, Clone)]
pub struct LineCodec {
    inner: LinesCodec,
}

impl LineCodec {
    pub fn new() -> Self {
        Self {
            inner: LinesCodec::new_with_max_length(MAX_LINE_LEN),
        }
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn recover(decoded: Result<Option<String>, LinesCodecError>) -> Result<Option<Line>, LinesCodecError> {
    match decoded {
        Ok(line) => Ok(line.map(Line::Text)),
        Err(LinesCodecError::MaxLineLengthExceeded) => Ok(Some(Line::TooLong)),
        Err(e) => Err(e),
    }
}

impl Decoder for LineCodec {
    type Item = Line;
    type Error = LinesCodecError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Line>, LinesCodecError> {
        recover(self.inner.decode(buf))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Line>, LinesCodecError> {
        recover(self.inner.decode_eof(buf))
    }
}

impl<T: AsRef<str>> Encoder<T> for LineCodec {
    type Error = LinesCodecError;

    fn encode(&mut self, line: T, buf: &mut BytesMut) -> Result<(), LinesCodecError> {
        self.inner.encode(line, buf)
    }
}

/// Encode an outbound message as one JSON line.
pub fn encode(msg: &Outbound) -> String {
    let value = match msg {
        Outbound::Response(response) => serde_json::to_value(response),
        Outbound::Broadcast(text) => Ok(json!({ "broadcast": text })),
    };
    match value {
        Ok(v) => v.to_string(),
        Err(e) => {
            tracing::error!("error encoding message: {e}");
            json!({ "data": null, "error": "error encoding message" }).to_string()
        }
    }
}

/// Serve one client until it disconnects. The client's pending locks are
/// left untouched on disconnect.
pub async fn process_connection(socket: TcpStream, engine: Arc<Engine>) -> Result<(), LinesCodecError> {
    let mut framed = Framed::new(socket, LineCodec::new());

    let first = match tokio::time::timeout(HANDSHAKE_TIMEOUT, framed.next()).await {
        Ok(Some(Ok(Line::Text(line)))) => line,
        Ok(Some(Ok(Line::TooLong))) => String::new(),
        Ok(Some(Err(e))) => return Err(e),
        Ok(None) => return Ok(()),
        Err(_) => {
            debug!("handshake timed out");
            return Ok(());
        }
    };
    let name = match auth::parse_handshake(&first) {
        Ok(name) => name,
        Err(e) => {
            debug!("handshake rejected: {e}");
            metrics::counter!(crate::observability::AUTH_FAILURES_TOTAL).increment(1);
            framed.send(INVALID_HANDSHAKE).await?;
            return Ok(());
        }
    };

    let (mut sink, mut stream) = framed.split::<String>();
    let (tx, mut rx) = mpsc::channel::<Outbound>(CLIENT_QUEUE_DEPTH);
    let handle = ClientHandle::new(name.clone(), tx.clone());
    let conn_id = handle.conn_id;
    if let Some(previous) = engine.add_client(handle).await {
        info!("client {name} reconnected, replacing connection {}", previous.conn_id);
    }
    info!("client connected: {name}");

    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            sink.send(encode(&msg)).await?;
        }
        Ok::<_, LinesCodecError>(())
    });

    let result = serve_lines(&engine, &name, &mut stream, &tx).await;

    engine.remove_client(&name, conn_id).await;
    drop(tx);
    match writer.await {
        Ok(Err(e)) => debug!("writer for {name} stopped: {e}"),
        Err(e) => warn!("writer for {name} panicked: {e}"),
        Ok(Ok(())) => {}
    }
    info!("client disconnected: {name}");
    result
}

async fn serve_lines<S>(
    engine: &Engine,
    name: &ClientName,
    stream: &mut S,
    tx: &mpsc::Sender<Outbound>,
) -> Result<(), LinesCodecError>
where
    S: futures::Stream<Item = Result<Line, LinesCodecError>> + Unpin,
{
    while let Some(line) = stream.next().await {
        let line = match line? {
            Line::Text(line) => line,
            Line::TooLong => {
                debug!("line from {name} exceeds {MAX_LINE_LEN} bytes");
                let response = Response::error(ErrorKind::Validation, "line too long");
                if tx.send(Outbound::Response(response)).await.is_err() {
                    break;
                }
                continue;
            }
        };

        let dispatched = command::dispatch(engine, name, line.trim()).await;
        if tx.send(Outbound::Response(dispatched.response)).await.is_err() {
            break;
        }
        for event in dispatched.events {
            engine.broadcast(&event.to_string()).await;
        }
    }
    Ok(())
}
