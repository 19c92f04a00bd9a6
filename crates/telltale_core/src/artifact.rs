//! JSON artifact persistence shared by every exporter.

use crate::error::{CoreError, CoreResult};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

/// Create the parent directory of `path` if it has one
///
/// # Errors
///
/// Returns `Io` if the directory cannot be created
pub fn ensure_parent(path: &Path) -> CoreResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| CoreError::io(parent, &e))?;
    }
    Ok(())
}

/// Write `value` as pretty JSON, creating directories on demand
///
/// # Errors
///
/// Returns `Io` or `Encoding` on failure
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> CoreResult<()> {
    ensure_parent(path)?;
    let file = fs::File::create(path).map_err(|e| CoreError::io(path, &e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.write_all(b"\n").map_err(|e| CoreError::io(path, &e))?;
    writer.flush().map_err(|e| CoreError::io(path, &e))?;
    Ok(())
}

/// Read a JSON document
///
/// # Errors
///
/// Returns `Io` or `Encoding` on failure
pub fn read_json<T: DeserializeOwned>(path: &Path) -> CoreResult<T> {
    let file = fs::File::open(path).map_err(|e| CoreError::io(path, &e))?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn test_write_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/doc.json");
        let doc = Value::map([("schema_version", "diag.snapshot.v1")]);
        write_json(&path, &doc).unwrap();
        let back: Value = read_json(&path).unwrap();
        assert_eq!(back, doc);
    }

    #[test]
    fn test_read_missing_reports_path() {
        let err = read_json::<Value>(Path::new("/definitely/missing/doc.json")).unwrap_err();
        assert!(err.to_string().contains("/definitely/missing/doc.json"));
    }
}
