//! Local files written by the CLI: streamed copies of backend-side exports.

use crate::backend::{BackendClient, ExportKind};
use anyhow::{Context, Result};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

pub const VALIDATED_CSV: &str = "companies_leads_validated.csv";

/// CSV export name the backend derives from a JSON output file.
pub fn csv_name_for(json_name: &str) -> String {
    match json_name.strip_suffix(".json") {
        Some(stem) => format!("{stem}.csv"),
        None => format!("{json_name}.csv"),
    }
}

/// Stream a backend export into `dest`. Returns the path written and its size.
///
/// The file is written next to `dest` under a temporary name and renamed once the
/// whole body has arrived, so a failed download never leaves a truncated file behind.
pub async fn download_export(
    client: &BackendClient,
    kind: ExportKind,
    filename: &str,
    dest: &Path,
) -> Result<(PathBuf, u64)> {
    let resp = client
        .download(kind, filename)
        .await
        .with_context(|| format!("download {filename}"))?;

    let partial = dest.with_extension("part");
    let mut file = tokio::fs::File::create(&partial)
        .await
        .with_context(|| format!("create {}", partial.display()))?;

    let mut written = 0u64;
    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                drop(file);
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(e).with_context(|| format!("read body of {filename}"));
            }
        };
        file.write_all(&chunk)
            .await
            .with_context(|| format!("write {}", partial.display()))?;
        written += chunk.len() as u64;
    }
    file.flush().await.context("flush download")?;
    drop(file);

    tokio::fs::rename(&partial, dest)
        .await
        .with_context(|| format!("move download into {}", dest.display()))?;
    Ok((dest.to_path_buf(), written))
}
