use crate::core::{
    connector::{
        ConnectorKind, ConnectorSpec, DEFAULT_RETRY_COUNT, DEFAULT_RETRY_DELAY_SECS,
        DEFAULT_TIMEOUT_SECS,
    },
    error::{NotifierError, NotifierResult},
};
use log::debug;
use std::collections::HashSet;
use std::fs::{self, Metadata};
use std::path::Path;

#[cfg(unix)]
pub(crate) fn is_executable(metadata: &Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
pub(crate) fn is_executable(metadata: &Metadata) -> bool {
    metadata.is_file()
}

/// Proposes a disabled connector for every executable regular file in
/// `dir`. A directory that does not exist yields an empty list.
pub fn discover_connectors(dir: &Path) -> NotifierResult<Vec<ConnectorSpec>> {
    if !dir.exists() {
        debug!("Connector directory {:?} does not exist", dir);
        return Ok(Vec::new());
    }

    let read_err = |e| NotifierError::FileReadError {
        path: dir.to_path_buf(),
        source: e,
    };
    let dir = fs::canonicalize(dir).map_err(read_err)?;

    let mut entries = fs::read_dir(&dir)
        .map_err(read_err)?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .collect::<Vec<_>>();
    entries.sort();

    let mut names = HashSet::new();
    let mut discovered = Vec::new();

    for path in entries {
        let metadata = match fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(e) => {
                debug!("Skipping {:?}: {}", path, e);
                continue;
            }
        };
        if !metadata.is_file() || !is_executable(&metadata) {
            continue;
        }

        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(file_name);
        // foo.sh and foo.py would share a stem; the second keeps its full name
        let name = (if names.contains(stem) { file_name } else { stem }).to_string();
        if !names.insert(name.clone()) {
            continue;
        }

        let kind = ConnectorKind::for_file(&path);
        let mut spec = ConnectorSpec::new(name, kind)
            .with_path(path.clone())
            .with_description(format!("Auto-discovered {} connector", kind));
        spec.timeout = DEFAULT_TIMEOUT_SECS;
        spec.retry_count = DEFAULT_RETRY_COUNT;
        spec.retry_delay = DEFAULT_RETRY_DELAY_SECS;

        debug!("Discovered {} connector {} at {:?}", kind, spec.name, path);
        discovered.push(spec);
    }

    Ok(discovered)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn write_file(dir: &Path, name: &str, mode: u32) {
        let path = dir.join(name);
        fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(mode)).unwrap();
    }

    #[test]
    fn test_only_executables_are_proposed() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "foo.sh", 0o755);
        write_file(dir.path(), "bar.txt", 0o644);

        let found = discover_connectors(dir.path()).unwrap();
        assert_eq!(found.len(), 1);

        let foo = &found[0];
        assert_eq!(foo.name, "foo");
        assert_eq!(foo.kind, ConnectorKind::Script);
        assert!(!foo.enabled);
        assert!(foo.path.is_absolute());
        assert!(foo.path.ends_with("foo.sh"));
        assert_eq!(foo.timeout, DEFAULT_TIMEOUT_SECS);
        assert_eq!(foo.retry_count, DEFAULT_RETRY_COUNT);
        assert_eq!(foo.retry_delay, DEFAULT_RETRY_DELAY_SECS);
        assert_eq!(foo.description, "Auto-discovered script connector");
    }

    #[test]
    fn test_kinds_and_subdirectories() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "notify", 0o700);
        write_file(dir.path(), "report.py", 0o750);
        fs::create_dir(dir.path().join("subdir")).unwrap();

        let found = discover_connectors(dir.path()).unwrap();
        let kinds: Vec<_> = found.iter().map(|c| (c.name.as_str(), c.kind)).collect();
        assert_eq!(
            kinds,
            vec![("notify", ConnectorKind::Executable), ("report", ConnectorKind::Script)]
        );
    }

    #[test]
    fn test_shared_stem_keeps_full_name() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "alert.py", 0o755);
        write_file(dir.path(), "alert.sh", 0o755);

        let names: Vec<_> = discover_connectors(dir.path())
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["alert", "alert.sh"]);
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let dir = TempDir::new().unwrap();
        let found = discover_connectors(&dir.path().join("nope")).unwrap();
        assert!(found.is_empty());
    }
}
