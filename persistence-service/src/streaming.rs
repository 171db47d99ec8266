//! Streaming pipelines.
//!
//! Insert-many folds a stream of request messages into one id list. Find
//! re-chunks an already materialized result set into bounded batches.
//!
//! Find does not stream from the backend cursor: the adapter returns the
//! whole result set first, so memory grows with the result size. Batching
//! only bounds the size of each outgoing message.

use std::pin::pin;

use futures::stream::{self, Stream, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::Value;

use common::errors::{AppError, AppResult};
use common::models::{FindBatch, InsertManyRequest};
use common::utils::JsonCodec;

use crate::registry::Registry;

/// Maximum number of results carried by one find message.
pub const FIND_BATCH_SIZE: usize = 100;

/// Longest NDJSON line accepted from a request body.
pub const MAX_MESSAGE_BYTES: usize = 16 * 1024 * 1024;

/// Runs an insert-many stream to completion.
///
/// Each message is resolved against the registry, decoded and inserted in
/// arrival order; the ids are accumulated in that same order. The first
/// failing message ends the stream with its error. Messages already inserted
/// by then stay inserted.
pub async fn insert_many<S>(registry: &Registry, messages: S) -> AppResult<Vec<Value>>
where
    S: Stream<Item = AppResult<InsertManyRequest>>,
{
    let mut messages = pin!(messages);
    let mut ids = Vec::new();
    let mut received = 0usize;

    while let Some(message) = messages.next().await {
        let message = message?;
        received += 1;

        let store = registry.lookup(&message.id).await?;
        let documents = JsonCodec::decode_array("documents", &message.json_str)?;
        let inserted = store
            .insert_many(
                &message.database,
                &message.collection,
                documents,
                &message.options,
            )
            .await?;

        tracing::debug!(
            id = %message.id,
            database = %message.database,
            collection = %message.collection,
            inserted = inserted.len(),
            "insert-many message applied"
        );
        ids.extend(inserted);
    }

    tracing::info!(messages = received, ids = ids.len(), "insert-many stream complete");
    Ok(ids)
}

/// Splits results into encoded batches of at most [`FIND_BATCH_SIZE`].
///
/// Order is preserved across batches. An empty result set yields no batch.
/// Results are pulled one batch at a time, so nothing past the last polled
/// batch is touched once the stream is dropped.
pub fn find_batches<I>(results: I) -> impl Stream<Item = AppResult<FindBatch>> + Send + 'static
where
    I: IntoIterator<Item = Value>,
    I::IntoIter: Send + 'static,
{
    let mut results = results.into_iter();
    stream::iter(std::iter::from_fn(move || {
        let batch: Vec<Value> = results.by_ref().take(FIND_BATCH_SIZE).collect();
        if batch.is_empty() {
            None
        } else {
            Some(JsonCodec::encode(&batch).map(|json_str| FindBatch { json_str }))
        }
    }))
}

/// Decodes newline-delimited JSON from a byte stream.
///
/// Lines may span chunk boundaries; blank lines are skipped and a final line
/// without a trailing newline is still decoded. A transport error ends the
/// stream after being reported once. Lines are capped at
/// [`MAX_MESSAGE_BYTES`].
pub fn decode_ndjson<T, S, B, E>(chunks: S) -> impl Stream<Item = AppResult<T>>
where
    T: DeserializeOwned,
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    decode_ndjson_with_limit(chunks, MAX_MESSAGE_BYTES)
}

/// [`decode_ndjson`] with an explicit line cap.
///
/// A line longer than `max_line` ends the stream with `InvalidArgument`, so
/// the pending buffer never holds more than `max_line` bytes plus one chunk.
pub fn decode_ndjson_with_limit<T, S, B, E>(
    chunks: S,
    max_line: usize,
) -> impl Stream<Item = AppResult<T>>
where
    T: DeserializeOwned,
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    stream::unfold(
        (chunks, Vec::<u8>::new(), false),
        move |(mut chunks, mut buffer, mut finished)| async move {
            loop {
                let newline = buffer.iter().position(|b| *b == b'\n');
                let pending = newline.unwrap_or(buffer.len());
                if pending > max_line {
                    buffer.clear();
                    let err = AppError::InvalidArgument(format!(
                        "stream message exceeds {} bytes",
                        max_line
                    ));
                    return Some((Err(err), (chunks, buffer, true)));
                }

                if let Some(newline) = newline {
                    let line: Vec<u8> = buffer.drain(..=newline).collect();
                    if is_blank(&line) {
                        continue;
                    }
                    return Some((decode_line(&line), (chunks, buffer, finished)));
                }

                if finished {
                    if is_blank(&buffer) {
                        return None;
                    }
                    let line = std::mem::take(&mut buffer);
                    return Some((decode_line(&line), (chunks, buffer, finished)));
                }

                match chunks.next().await {
                    Some(Ok(bytes)) => buffer.extend_from_slice(bytes.as_ref()),
                    Some(Err(e)) => {
                        buffer.clear();
                        let err = AppError::InvalidArgument(format!("request stream failed: {}", e));
                        return Some((Err(err), (chunks, buffer, true)));
                    }
                    None => finished = true,
                }
            }
        },
    )
}

fn is_blank(line: &[u8]) -> bool {
    line.iter().all(|b| b.is_ascii_whitespace())
}

fn decode_line<T: DeserializeOwned>(line: &[u8]) -> AppResult<T> {
    serde_json::from_slice(line)
        .map_err(|e| AppError::InvalidArgument(format!("malformed stream message: {}", e)))
}
