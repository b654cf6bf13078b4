//! One segment: a streaming GET copied to one file in fixed-size chunks.

use std::io;
use std::path::{Path, PathBuf};

use bytes::BytesMut;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, CONTENT_LENGTH};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::event::{EventSender, ProgressEvent};
use crate::progress::{Slot, TaskId};
use crate::scheduler::SegmentJob;

/// Bytes written (and reported) per progress event; the last chunk may be shorter.
pub const CHUNK_SIZE: usize = 256 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("failed to open {}: {source}", .path.display())]
    Open { path: PathBuf, source: io::Error },

    #[error("request failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("server returned HTTP {0}")]
    Status(reqwest::StatusCode),

    #[error("body stream failed: {0}")]
    Body(#[source] reqwest::Error),

    #[error("failed writing {}: {source}", .path.display())]
    Write { path: PathBuf, source: io::Error },

    #[error("fetcher panicked")]
    Panicked,
}

/// Downloads `job.source` into `job.target`, reporting every step on `events`.
///
/// Always emits `Init` first and exactly one of `End` / `Failed` last. On
/// failure whatever was received stays on disk and stays counted.
pub async fn run(
    client: reqwest::Client,
    job: SegmentJob,
    slot: Slot,
    events: EventSender,
) -> Result<u64, FetchError> {
    let task_id = job.task_id;
    emit(
        &events,
        ProgressEvent::Init {
            task_id,
            slot,
            filename: job.display_name(),
        },
    );

    let result = transfer(&client, &job, &events).await;
    match &result {
        Ok(bytes) => {
            debug!(task_id, slot, bytes, target = %job.target.display(), "segment done");
            emit(&events, ProgressEvent::End { task_id });
        }
        Err(err) => {
            warn!(task_id, slot, source = %job.source, "segment failed: {err}");
            emit(
                &events,
                ProgressEvent::Failed {
                    task_id,
                    reason: err.to_string(),
                },
            );
        }
    }
    result
}

async fn transfer(
    client: &reqwest::Client,
    job: &SegmentJob,
    events: &EventSender,
) -> Result<u64, FetchError> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&job.target)
        .await
        .map_err(|source| FetchError::Open {
            path: job.target.clone(),
            source,
        })?;

    let mut sink = ChunkSink {
        file,
        path: &job.target,
        task_id: job.task_id,
        events,
        written: 0,
    };
    let streamed = copy_body(client, job, &mut sink).await;
    // The file is flushed on every path, so a partial segment is left as received.
    let flushed = sink.file.flush().await.map_err(|source| FetchError::Write {
        path: job.target.clone(),
        source,
    });
    streamed?;
    flushed?;
    Ok(sink.written)
}

async fn copy_body(
    client: &reqwest::Client,
    job: &SegmentJob,
    sink: &mut ChunkSink<'_>,
) -> Result<(), FetchError> {
    let resp = client
        .get(&job.source)
        .send()
        .await
        .map_err(FetchError::Request)?;
    let status = resp.status();
    if !status.is_success() {
        return Err(FetchError::Status(status));
    }

    match declared_length(resp.headers()) {
        Some(total_bytes) => emit(
            sink.events,
            ProgressEvent::Start {
                task_id: job.task_id,
                total_bytes,
            },
        ),
        None => debug!(task_id = job.task_id, "no content-length, size stays unknown"),
    }

    let mut stream = resp.bytes_stream();
    let mut buf = BytesMut::with_capacity(CHUNK_SIZE);
    while let Some(next) = stream.next().await {
        let bytes = match next {
            Ok(bytes) => bytes,
            Err(err) => {
                if !buf.is_empty() {
                    sink.write(&buf.split()).await?;
                }
                return Err(FetchError::Body(err));
            }
        };
        buf.extend_from_slice(&bytes);
        while buf.len() >= CHUNK_SIZE {
            let chunk = buf.split_to(CHUNK_SIZE);
            sink.write(&chunk).await?;
        }
    }
    if !buf.is_empty() {
        sink.write(&buf.split()).await?;
    }
    Ok(())
}

struct ChunkSink<'a> {
    file: File,
    path: &'a Path,
    task_id: TaskId,
    events: &'a EventSender,
    written: u64,
}

impl ChunkSink<'_> {
    async fn write(&mut self, chunk: &[u8]) -> Result<(), FetchError> {
        self.file
            .write_all(chunk)
            .await
            .map_err(|source| FetchError::Write {
                path: self.path.to_path_buf(),
                source,
            })?;
        self.written += chunk.len() as u64;
        emit(
            self.events,
            ProgressEvent::Progress {
                task_id: self.task_id,
                chunk_len: chunk.len() as u64,
            },
        );
        Ok(())
    }
}

/// `Content-Length` as a byte count. Absent or unparsable means unknown size.
pub fn declared_length(headers: &HeaderMap) -> Option<u64> {
    let value = headers.get(CONTENT_LENGTH)?;
    let parsed = value.to_str().ok().and_then(|s| s.trim().parse::<u64>().ok());
    if parsed.is_none() {
        warn!(?value, "ignoring unparsable content-length");
    }
    parsed
}

fn emit(events: &EventSender, event: ProgressEvent) {
    // A closed channel only means nobody is watching any more.
    let _ = events.send(event);
}
