//! One authenticated socket shared by many in-flight queries.
//!
//! Every query gets its own token. A background task reads response frames
//! and hands each one to the query waiting on that token, so callers can
//! issue requests concurrently without serialising on the socket. Outgoing
//! frames go through a channel to a single writer task, so a caller dropped
//! mid-query never leaves half a frame on the wire.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::io::{
    AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf, split,
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::protocol::{
    FRAME_HEADER_LEN, Response, ResponseKind, continue_query, encode_frame, start_query,
};
use crate::domain::ports::DatabaseDriverError;

/// Largest response body accepted from the server.
const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;
const FRAME_QUEUE_CAPACITY: usize = 64;

type ResponseSender = oneshot::Sender<Result<Vec<u8>, DatabaseDriverError>>;

#[derive(Default)]
struct PendingQueries {
    senders: HashMap<u64, ResponseSender>,
    closed: Option<String>,
}

#[derive(Default)]
struct Pending(Mutex<PendingQueries>);

impl Pending {
    fn lock(&self) -> MutexGuard<'_, PendingQueries> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(
        &self,
        token: u64,
    ) -> Result<oneshot::Receiver<Result<Vec<u8>, DatabaseDriverError>>, DatabaseDriverError> {
        let mut pending = self.lock();
        if let Some(reason) = &pending.closed {
            return Err(DatabaseDriverError::connection(reason.clone()));
        }
        let (sender, receiver) = oneshot::channel();
        pending.senders.insert(token, sender);
        Ok(receiver)
    }

    fn forget(&self, token: u64) {
        self.lock().senders.remove(&token);
    }

    fn deliver(&self, token: u64, body: Vec<u8>) {
        match self.lock().senders.remove(&token) {
            Some(sender) => {
                // The query may have been abandoned; nothing to deliver to.
                let _ = sender.send(Ok(body));
            }
            None => debug!(token, "dropping response for unknown token"),
        }
    }

    fn close(&self, reason: String) {
        let mut pending = self.lock();
        for (_, sender) in pending.senders.drain() {
            let _ = sender.send(Err(DatabaseDriverError::connection(reason.clone())));
        }
        pending.closed = Some(reason);
    }
}

/// Removes a query's response slot when its caller stops waiting.
struct Registration<'a> {
    pending: &'a Pending,
    token: u64,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.pending.forget(self.token);
    }
}

/// Multiplexed query channel over an authenticated stream.
pub(crate) struct WireConnection {
    frames: mpsc::Sender<Vec<u8>>,
    pending: Arc<Pending>,
    next_token: AtomicU64,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl WireConnection {
    /// Take ownership of `stream` and start routing responses.
    ///
    /// Must be called from within a tokio runtime.
    pub(crate) fn spawn<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = split(stream);
        let pending = Arc::new(Pending::default());
        let (frames, queue) = mpsc::channel(FRAME_QUEUE_CAPACITY);
        let reader = tokio::spawn(route_responses(read_half, Arc::clone(&pending)));
        let writer = tokio::spawn(write_frames(write_half, queue, Arc::clone(&pending)));
        Self {
            frames,
            pending,
            next_token: AtomicU64::new(1),
            reader,
            writer,
        }
    }

    /// Run `term` to completion, draining partial sequences.
    pub(crate) async fn run(&self, term: Value) -> Result<Vec<Value>, DatabaseDriverError> {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let mut response = self.round_trip(token, &start_query(term)).await?;
        let mut values = Vec::new();
        loop {
            let partial = response.kind == ResponseKind::Partial;
            values.extend(response.results);
            if !partial {
                return Ok(values);
            }
            response = self.round_trip(token, &continue_query()).await?;
        }
    }

    async fn round_trip(&self, token: u64, query: &Value) -> Result<Response, DatabaseDriverError> {
        let frame = encode_frame(token, query)?;
        let receiver = self.pending.register(token)?;
        let _registration = Registration {
            pending: &self.pending,
            token,
        };
        self.frames
            .send(frame)
            .await
            .map_err(|_| DatabaseDriverError::connection("connection closed"))?;
        let body = receiver
            .await
            .map_err(|_| DatabaseDriverError::connection("connection closed"))??;
        Response::decode(&body)
    }
}

impl Drop for WireConnection {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

async fn write_frames<S>(
    mut writer: WriteHalf<S>,
    mut queue: mpsc::Receiver<Vec<u8>>,
    pending: Arc<Pending>,
) where
    S: AsyncRead + AsyncWrite + Send,
{
    while let Some(frame) = queue.recv().await {
        let written = match writer.write_all(&frame).await {
            Ok(()) => writer.flush().await,
            Err(error) => Err(error),
        };
        if let Err(error) = written {
            warn!(error = %error, "database connection write failed");
            pending.close(error.to_string());
            return;
        }
    }
}

async fn route_responses<S>(mut reader: ReadHalf<S>, pending: Arc<Pending>)
where
    S: AsyncRead + AsyncWrite + Send,
{
    let reason = loop {
        match read_frame(&mut reader).await {
            Ok((token, body)) => pending.deliver(token, body),
            Err(error) => break error.to_string(),
        }
    };
    warn!(reason = %reason, "database connection closed");
    pending.close(reason);
}

async fn read_frame<R>(reader: &mut R) -> std::io::Result<(u64, Vec<u8>)>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0_u8; FRAME_HEADER_LEN];
    reader.read_exact(&mut header).await?;
    let (token, length) = header.split_at(8);
    let token = u64::from_le_bytes(token.try_into().map_err(std::io::Error::other)?);
    let length = u32::from_le_bytes(length.try_into().map_err(std::io::Error::other)?);
    if length > MAX_FRAME_LEN {
        return Err(std::io::Error::new(
            ErrorKind::InvalidData,
            format!("response frame of {length} bytes exceeds {MAX_FRAME_LEN}"),
        ));
    }
    let mut body = vec![0_u8; length as usize];
    reader.read_exact(&mut body).await?;
    Ok((token, body))
}
