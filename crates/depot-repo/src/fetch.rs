//! Resumable remote download into a staging file
//!
//! The first response tells whether the remote accepts byte ranges. A
//! transient failure after bytes were received is resumed with a `Range`
//! request when possible and fails fast with `RangeNotSupported` otherwise.
//! Small files such as checksums are read into memory instead.

use futures::StreamExt;
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::checksum::{DigestValues, Digests};
use crate::error::{RepoError, Result};
use crate::remote::{RemoteFetcher, RemoteRequest, RemoteResponse};

/// Download `request` into `staging`, retrying transient failures
///
/// Returns `Ok(None)` when the remote does not have the artifact. The staging
/// file is removed on failure.
pub async fn download(
    fetcher: &dyn RemoteFetcher,
    request: &RemoteRequest,
    staging: &Path,
    retry_budget: u32,
) -> Result<Option<DigestValues>> {
    let result = download_into(fetcher, request, staging, retry_budget).await;
    if !matches!(result, Ok(Some(_))) {
        let _ = tokio::fs::remove_file(staging).await;
    }
    result
}

async fn download_into(
    fetcher: &dyn RemoteFetcher,
    request: &RemoteRequest,
    staging: &Path,
    retry_budget: u32,
) -> Result<Option<DigestValues>> {
    let mut file = File::create(staging).await?;
    let mut digests = Digests::new();
    let mut accepts_ranges = false;
    let mut expected: Option<u64> = None;
    let mut retries = 0;

    loop {
        let received = digests.size();
        let attempt = fetcher.fetch(&request.at_offset(received)).await;

        let outcome = match attempt {
            Ok(None) if received == 0 => return Ok(None),
            Ok(None) => Err(RepoError::HttpError {
                status: 404,
                message: format!("{} disappeared while resuming", request.url),
            }),
            Ok(Some(response)) => {
                if received > 0 && !response.partial {
                    return Err(RepoError::RangeNotSupported {
                        url: request.url.clone(),
                        offset: received,
                    });
                }
                if received == 0 {
                    accepts_ranges = response.accepts_ranges;
                }
                if let Some(length) = response.content_length {
                    expected = Some(received + length);
                }
                copy_body(response, &mut file, &mut digests, expected).await
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => break,
            Err(e) if e.is_transient() => {
                let received = digests.size();
                if received > 0 && !accepts_ranges {
                    return Err(RepoError::RangeNotSupported {
                        url: request.url.clone(),
                        offset: received,
                    });
                }
                if retries >= retry_budget {
                    return Err(e);
                }
                retries += 1;
                tracing::warn!(
                    "Transient failure fetching {} at offset {} (retry {}/{}): {}",
                    request.url,
                    received,
                    retries,
                    retry_budget,
                    e
                );
            }
            Err(e) => return Err(e),
        }
    }

    file.flush().await?;
    file.sync_all().await?;
    Ok(Some(digests.finish()))
}

async fn copy_body(
    response: RemoteResponse,
    file: &mut File,
    digests: &mut Digests,
    expected: Option<u64>,
) -> Result<()> {
    let mut body = response.body;
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        digests.update(&chunk);
    }

    match expected {
        Some(total) if digests.size() < total => Err(RepoError::TransientIo {
            message: format!(
                "connection closed after {} of {} bytes",
                digests.size(),
                total
            ),
        }),
        _ => Ok(()),
    }
}

/// Fetch a small body into memory, retrying transient failures from the start
///
/// Returns `Ok(None)` when the remote does not have the file.
pub async fn buffer(
    fetcher: &dyn RemoteFetcher,
    request: &RemoteRequest,
    retry_budget: u32,
) -> Result<Option<Vec<u8>>> {
    let mut retries = 0;
    loop {
        let attempt = match fetcher.fetch(request).await {
            Ok(None) => return Ok(None),
            Ok(Some(response)) => read_body(response).await,
            Err(e) => Err(e),
        };

        match attempt {
            Ok(content) => return Ok(Some(content)),
            Err(e) if e.is_transient() && retries < retry_budget => {
                retries += 1;
                tracing::warn!(
                    "Transient failure fetching {} (retry {}/{}): {}",
                    request.url,
                    retries,
                    retry_budget,
                    e
                );
            }
            Err(e) => return Err(e),
        }
    }
}

async fn read_body(response: RemoteResponse) -> Result<Vec<u8>> {
    let expected = response.content_length;
    let mut content = Vec::new();
    let mut body = response.body;
    while let Some(chunk) = body.next().await {
        content.extend_from_slice(&chunk?);
    }

    match expected {
        Some(total) if (content.len() as u64) < total => Err(RepoError::TransientIo {
            message: format!("connection closed after {} of {} bytes", content.len(), total),
        }),
        _ => Ok(content),
    }
}
