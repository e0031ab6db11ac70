// ABOUTME: Flat key=value file parsing and writing.
// ABOUTME: The on-disk format of meta, conf and namespaced sibling files.

use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::path::Path;

/// Parse a flat `key=value` file. One assignment per line, no sections.
/// Blank lines and `#` comments are ignored; whitespace around key and
/// value is trimmed.
pub fn parse_kv_file(path: &Path) -> Result<BTreeMap<String, String>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Could not parse file {}: {}", path.display(), e)))?;
    parse_kv(&content, path)
}

pub fn parse_kv(content: &str, origin: &Path) -> Result<BTreeMap<String, String>> {
    let mut map = BTreeMap::new();
    for (lineno, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(Error::Config(format!(
                "Could not parse file {}: no '=' on line {}",
                origin.display(),
                lineno + 1
            )));
        };
        map.insert(key.trim().to_string(), value.trim().to_string());
    }
    Ok(map)
}

/// Write a map as sorted `key=value` lines.
pub fn write_kv_file(path: &Path, map: &BTreeMap<String, String>) -> Result<()> {
    let mut out = String::new();
    for (key, value) in map {
        out.push_str(key);
        out.push('=');
        out.push_str(value);
        out.push('\n');
    }
    std::fs::write(path, out)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn parses_assignments_and_skips_noise() {
        let content = "# comment\n\nlauncher.file=bin/run.sh\n timeout.start = 30 \n";
        let map = parse_kv(content, &PathBuf::from("app.conf")).unwrap();
        assert_eq!(map.get("launcher.file").unwrap(), "bin/run.sh");
        assert_eq!(map.get("timeout.start").unwrap(), "30");
    }

    #[test]
    fn line_without_assignment_is_an_error() {
        let err = parse_kv("just a line\n", &PathBuf::from("bad.conf")).unwrap_err();
        assert!(err.to_string().contains("bad.conf"));
        assert!(err.to_string().contains("line 1"));
    }

    #[test]
    fn value_may_contain_equals() {
        let map = parse_kv("launcher.args=-Dkey=value\n", &PathBuf::from("a")).unwrap();
        assert_eq!(map.get("launcher.args").unwrap(), "-Dkey=value");
    }

    #[test]
    fn written_lines_are_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta");
        let mut map = BTreeMap::new();
        map.insert("stage".to_string(), "test".to_string());
        map.insert("app_name".to_string(), "demo".to_string());
        write_kv_file(&path, &map).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, "app_name=demo\nstage=test\n");
        assert_eq!(parse_kv(&written, &path).unwrap(), map);
    }
}
