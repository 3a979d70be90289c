//! Downloads upstream raw sample files.

use std::{fs::File, io::Write, path::Path};

use futures::StreamExt;
use reqwest::{Client, StatusCode};
use tracing::debug;

use crate::error::FetchError;

/// Streams the body at `url` into `file_path`.
///
/// Returns the number of bytes written, or `None` when the server has no such file.
pub async fn download_file(
    client: &Client,
    url: &str,
    file_path: &Path,
) -> Result<Option<u64>, FetchError> {
    let response = client.get(url).send().await?;

    if response.status() == StatusCode::NOT_FOUND {
        debug!(url, "upstream file not found");
        return Ok(None);
    }
    let response = response.error_for_status()?;

    let mut file = File::create(file_path)?;
    let mut downloaded = 0u64;
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk)?;
        downloaded += chunk.len() as u64;
    }
    file.flush()?;

    debug!(url, bytes = downloaded, "downloaded upstream file");
    Ok(Some(downloaded))
}

// -- Tests -------------------------------------------------------------------
