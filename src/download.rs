//! Concurrent download pool: bounded in-flight requests, streaming writes.
//!
//! Every task handed to the pool ends in exactly one [`FetchResult`].
//! Transient failures are retried under the shared policy; a failed or
//! cancelled attempt never leaves a partial file at its destination.

use std::path::Path;

use futures::{stream, StreamExt};
use indicatif::ProgressBar;
use tokio::{fs, io::AsyncWriteExt, time};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{request::DownloadTask, retry::RetryPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Success,
    HttpError(u16),
    NetworkError,
    Timeout,
    Cancelled,
}

impl FetchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, FetchOutcome::Success)
    }
}

#[derive(Debug)]
pub struct FetchResult {
    pub task: DownloadTask,
    pub outcome: FetchOutcome,
    pub bytes_written: u64,
}

/// How a single attempt ended, before retry classification.
enum AttemptError {
    Transient(FetchOutcome),
    Permanent(u16),
    Cancelled,
}

pub struct FetchPool {
    client: reqwest::Client,
    max_concurrency: usize,
    retry: RetryPolicy,
}

impl FetchPool {
    pub fn new(client: reqwest::Client, max_concurrency: usize, retry: RetryPolicy) -> Self {
        Self {
            client,
            max_concurrency: max_concurrency.max(1),
            retry,
        }
    }

    /// Runs every task to a terminal outcome. Returns one result per task,
    /// in completion order.
    pub async fn run(
        &self,
        tasks: Vec<DownloadTask>,
        cancel: &CancellationToken,
        progress: &ProgressBar,
    ) -> Vec<FetchResult> {
        stream::iter(tasks.into_iter().map(|task| {
            let cancel = cancel.clone();
            async move {
                let result = self.fetch(task, &cancel).await;
                progress.inc(1);
                match result.outcome {
                    FetchOutcome::Success => info!(
                        "downloaded {} ({} bytes)",
                        result.task.file_name(),
                        result.bytes_written
                    ),
                    FetchOutcome::Cancelled => warn!("cancelled {}", result.task.file_name()),
                    outcome => warn!("failed {}: {:?}", result.task.file_name(), outcome),
                }
                result
            }
        }))
        .buffer_unordered(self.max_concurrency)
        .collect()
        .await
    }

    async fn fetch(&self, task: DownloadTask, cancel: &CancellationToken) -> FetchResult {
        let mut last = FetchOutcome::NetworkError;

        for attempt in self.retry.attempts() {
            if cancel.is_cancelled() {
                return FetchResult {
                    task,
                    outcome: FetchOutcome::Cancelled,
                    bytes_written: 0,
                };
            }

            match self.attempt(&task, cancel).await {
                Ok(bytes_written) => {
                    return FetchResult {
                        task,
                        outcome: FetchOutcome::Success,
                        bytes_written,
                    }
                }
                Err(AttemptError::Cancelled) => {
                    return FetchResult {
                        task,
                        outcome: FetchOutcome::Cancelled,
                        bytes_written: 0,
                    }
                }
                Err(AttemptError::Permanent(code)) => {
                    return FetchResult {
                        task,
                        outcome: FetchOutcome::HttpError(code),
                        bytes_written: 0,
                    }
                }
                Err(AttemptError::Transient(outcome)) => {
                    last = outcome;
                    if !self.retry.is_last(attempt) {
                        warn!(
                            "retrying {} after attempt {attempt}: {outcome:?}",
                            task.file_name()
                        );
                        time::sleep(self.retry.delay_after(attempt)).await;
                    }
                }
            }
        }

        FetchResult {
            task,
            outcome: last,
            bytes_written: 0,
        }
    }

    /// One download attempt. Never leaves a partial file behind on failure.
    async fn attempt(
        &self,
        task: &DownloadTask,
        cancel: &CancellationToken,
    ) -> Result<u64, AttemptError> {
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(AttemptError::Cancelled),
            sent = self.client.get(task.url.as_str()).send() => {
                sent.map_err(classify_request_error)?
            }
        };

        let status = response.status();
        if !status.is_success() {
            let code = status.as_u16();
            return Err(if status.is_server_error() || code == 429 {
                AttemptError::Transient(FetchOutcome::HttpError(code))
            } else {
                AttemptError::Permanent(code)
            });
        }

        if let Some(parent) = task.dest.parent() {
            fs::create_dir_all(parent).await.map_err(|err| {
                warn!("creating {}: {err}", parent.display());
                AttemptError::Transient(FetchOutcome::NetworkError)
            })?;
        }

        write_body(response, &task.dest, cancel).await
    }
}

/// Streams the body to `dest`, flushing before close. The handle is scoped
/// here so it is closed, and the partial file unlinked, on every failure path.
async fn write_body(
    response: reqwest::Response,
    dest: &Path,
    cancel: &CancellationToken,
) -> Result<u64, AttemptError> {
    let mut file = fs::File::create(dest).await.map_err(|err| {
        warn!("creating {}: {err}", dest.display());
        AttemptError::Transient(FetchOutcome::NetworkError)
    })?;

    let written = match copy_chunks(&mut file, response, cancel).await {
        Ok(written) => written,
        Err(err) => {
            discard_partial(file, dest).await;
            return Err(err);
        }
    };

    if let Err(err) = file.flush().await {
        warn!("flushing {}: {err}", dest.display());
        discard_partial(file, dest).await;
        return Err(AttemptError::Transient(FetchOutcome::NetworkError));
    }

    Ok(written)
}

async fn copy_chunks(
    file: &mut fs::File,
    response: reqwest::Response,
    cancel: &CancellationToken,
) -> Result<u64, AttemptError> {
    let mut stream = response.bytes_stream();
    let mut written = 0u64;

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return Err(AttemptError::Cancelled),
            next = stream.next() => next,
        };

        let chunk = match next {
            Some(Ok(chunk)) => chunk,
            Some(Err(err)) => return Err(classify_request_error(err)),
            None => return Ok(written),
        };

        file.write_all(&chunk).await.map_err(|err| {
            warn!("writing: {err}");
            AttemptError::Transient(FetchOutcome::NetworkError)
        })?;
        written += chunk.len() as u64;
    }
}

async fn discard_partial(file: fs::File, dest: &Path) {
    drop(file);
    if let Err(err) = fs::remove_file(dest).await {
        warn!("removing partial file {}: {err}", dest.display());
    }
}

fn classify_request_error(err: reqwest::Error) -> AttemptError {
    if err.is_timeout() {
        AttemptError::Transient(FetchOutcome::Timeout)
    } else {
        AttemptError::Transient(FetchOutcome::NetworkError)
    }
}

// -- Tests -------------------------------------------------------------------
