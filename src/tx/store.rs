// ABOUTME: Queries over the persisted transactions area.
// ABOUTME: Id listing, name lookup, summaries for ls, directory sizing.

use super::{Closed, Transaction};
use crate::context::HostContext;
use crate::error::{Error, Result};
use serde::Serialize;
use std::collections::HashSet;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use walkdir::WalkDir;

/// Sorted ids of all persisted transactions. A missing transactions area
/// reads as empty.
pub fn transaction_ids(ctx: &HostContext) -> Result<Vec<String>> {
    let dir = ctx.transactions_dir();
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut ids: Vec<String> = std::fs::read_dir(&dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    ids.sort();
    Ok(ids)
}

/// Every loadable transaction whose `app_name` matches exactly.
pub fn transactions_by_name(ctx: &HostContext, app_name: &str) -> Result<Vec<Transaction<Closed>>> {
    let mut matches = Vec::new();
    for id in transaction_ids(ctx)? {
        let tx = Transaction::load(ctx, &id)?;
        if tx.meta().get("app_name").map(String::as_str) == Some(app_name) {
            matches.push(tx);
        }
    }
    Ok(matches)
}

/// Row data for `tx ls`.
#[derive(Debug, Serialize)]
pub struct TxSummary {
    pub id: String,
    pub app_name: String,
    pub app_version: String,
    pub tx_type: String,
    pub create_time: String,
    pub size: u64,
}

/// Summaries of all transactions whose app name matches `app_regex`
/// (anchored). Unloadable transactions are skipped with a warning.
pub fn summaries(ctx: &HostContext, app_regex: &str) -> Result<Vec<TxSummary>> {
    let pattern = regex::Regex::new(&format!("^{app_regex}$"))
        .map_err(|e| Error::Execution(format!("Invalid regular expression: {e}")))?;

    let mut rows = Vec::new();
    for id in transaction_ids(ctx)? {
        let tx = match Transaction::load(ctx, &id) {
            Ok(tx) => tx,
            Err(e) => {
                tracing::warn!("{e}");
                continue;
            }
        };
        let meta = tx.meta();
        let app_name = meta.get("app_name").cloned().unwrap_or_default();
        if !pattern.is_match(&app_name) {
            continue;
        }
        rows.push(TxSummary {
            id: id.clone(),
            app_name,
            app_version: meta.get("app_version").cloned().unwrap_or_default(),
            tx_type: meta.get("tx_type").cloned().unwrap_or_default(),
            create_time: meta.get("create_time").cloned().unwrap_or_default(),
            size: directory_size(tx.basedir()),
        });
    }
    Ok(rows)
}

/// Total size in bytes of all files under `path`, counting hardlinked
/// inodes once.
pub fn directory_size(path: &Path) -> u64 {
    let mut seen = HashSet::new();
    let mut total = 0;
    for entry in WalkDir::new(path).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        if seen.insert((metadata.dev(), metadata.ino())) {
            total += metadata.len();
        }
    }
    total
}
