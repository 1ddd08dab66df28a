//! Zip decoding and result-directory promotion.

use crate::errors::LabflowError;
use regex::Regex;
use serde_json::Value;
use std::fs;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use walkdir::WalkDir;
use zip::ZipArchive;

#[allow(clippy::expect_used)]
static ITERATION_DIR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^iteration_(\d+)$").expect("iteration pattern is valid"));

/// Parses the first entry with a `.json` suffix, in archive order.
///
/// Returns the entry name and its parsed content.
pub fn first_json_payload(bytes: &[u8]) -> Result<(String, Value), LabflowError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() || !entry.name().to_ascii_lowercase().ends_with(".json") {
            continue;
        }
        let name = entry.name().to_string();
        let mut raw = Vec::new();
        entry.read_to_end(&mut raw)?;
        let value = serde_json::from_slice(&raw)?;
        return Ok((name, value));
    }

    Err(LabflowError::Archive("archive contains no .json file".to_string()))
}

/// Unpacks every entry under `dest` and returns the written file paths.
///
/// Entries whose path would escape `dest` are rejected.
pub fn extract_archive(bytes: &[u8], dest: &Path) -> Result<Vec<PathBuf>, LabflowError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    fs::create_dir_all(dest)?;
    let mut written = Vec::new();

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let relative = entry
            .enclosed_name()
            .map(Path::to_path_buf)
            .ok_or_else(|| LabflowError::Archive(format!("unsafe entry path '{}'", entry.name())))?;
        let target = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = fs::File::create(&target)?;
        std::io::copy(&mut entry, &mut out)?;
        written.push(target);
    }

    tracing::debug!(dest = %dest.display(), files = written.len(), "Extracted archive");
    Ok(written)
}

fn iteration_number(path: &Path) -> Option<u64> {
    let name = path.file_name()?.to_str()?;
    ITERATION_DIR.captures(name)?.get(1)?.as_str().parse().ok()
}

/// Finds the `iteration_<n>` directory with the highest `n` among the
/// ancestors of `paths`.
///
/// Used with the paths returned by [`extract_archive`], so directories left
/// by earlier extractions are never considered.
#[must_use]
pub fn latest_iteration_among(paths: &[PathBuf]) -> Option<PathBuf> {
    paths
        .iter()
        .flat_map(|path| path.ancestors().skip(1))
        .filter_map(|dir| iteration_number(dir).map(|n| (n, dir)))
        .max_by_key(|(n, _)| *n)
        .map(|(_, dir)| dir.to_path_buf())
}

/// Replaces the contents of `alias` with the files under `src`.
///
/// `alias` is deleted and recreated; relative paths are preserved. Returns
/// the number of files copied.
pub fn promote_latest(src: &Path, alias: &Path) -> Result<usize, LabflowError> {
    if alias.exists() {
        fs::remove_dir_all(alias)?;
    }
    fs::create_dir_all(alias)?;

    let mut copied = 0;
    for entry in WalkDir::new(src).min_depth(1) {
        let entry = entry.map_err(|e| LabflowError::Io(e.into()))?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| LabflowError::Internal(e.to_string()))?;
        let target = alias.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }

    tracing::info!(src = %src.display(), alias = %alias.display(), files = copied, "Promoted latest results");
    Ok(copied)
}
