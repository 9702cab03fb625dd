use std::io::Write;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;

/// Persists `value` as pretty JSON with a trailing newline.
///
/// The document is staged in a sibling temp file and renamed over `path`, so a
/// reader sees either the previous report/snapshot or the new one.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if path.is_dir() {
        bail!("cannot write JSON to directory {}", path.display());
    }
    let parent_dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent_dir)
        .with_context(|| format!("failed to create {}", parent_dir.display()))?;

    let mut staged = NamedTempFile::new_in(parent_dir)
        .with_context(|| format!("failed to stage a temp file in {}", parent_dir.display()))?;
    serde_json::to_writer_pretty(&mut staged, value)
        .with_context(|| format!("failed to encode JSON for {}", path.display()))?;
    staged.write_all(b"\n")?;
    staged.as_file().sync_all()?;
    staged
        .persist(path)
        .with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}

/// Reads a JSON document, or `None` when nothing has been written at `path` yet.
pub fn read_json_if_exists<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(error) => {
            return Err(error).with_context(|| format!("failed to read {}", path.display()))
        }
    };
    let value = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(Some(value))
}
