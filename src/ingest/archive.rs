//! # Archive Extraction
//!
//! Reads the file entries of an uploaded policy bundle.
//!
//! Entry paths are made relative to the policy directory: a bundle built by
//! zipping the `region1/` folder itself (entries `region1/policy_definition.json`)
//! and one built from inside it (entries `policy_definition.json`) both yield
//! `policy_definition.json`. Directory entries and entries that would escape
//! the policy directory are skipped.

use std::io::{Cursor, Read};
use std::path::{Component, Path};
use tracing::{debug, warn};
use zip::result::ZipError;
use zip::ZipArchive;

/// One file entry, path relative to the policy directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedFile {
    pub path: String,
    pub contents: Vec<u8>,
}

/// Extract every file entry of `archive` for the policy `policy_name`
///
/// # Errors
///
/// Returns [`ZipError`] when the bytes are not a readable zip archive or an
/// entry cannot be decompressed.
pub fn extract_entries(archive: &[u8], policy_name: &str) -> Result<Vec<ExtractedFile>, ZipError> {
    let mut zip = ZipArchive::new(Cursor::new(archive))?;
    let mut files = Vec::with_capacity(zip.len());

    for index in 0..zip.len() {
        let mut entry = zip.by_index(index)?;
        if entry.is_dir() {
            continue;
        }
        let Some(path) = entry
            .enclosed_name()
            .and_then(|path| relative_path(&path, policy_name))
        else {
            warn!(entry = %entry.name(), "Skipping archive entry with unsafe path");
            continue;
        };

        let mut contents = Vec::new();
        entry.read_to_end(&mut contents)?;
        debug!(entry = %path, bytes = contents.len(), "Extracted archive entry");
        files.push(ExtractedFile { path, contents });
    }
    Ok(files)
}

/// Join the path's normal components with `/`, dropping a leading
/// `<policy_name>` directory
fn relative_path(path: &Path, policy_name: &str) -> Option<String> {
    let mut segments = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(segment) => segments.push(segment.to_str()?.to_string()),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if segments.len() > 1 && segments[0] == policy_name {
        segments.remove(0);
    }
    if segments.is_empty() {
        return None;
    }
    Some(segments.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    fn build_zip(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, contents) in entries {
            if name.ends_with('/') {
                writer
                    .add_directory(*name, SimpleFileOptions::default())
                    .unwrap();
            } else {
                writer.start_file(*name, SimpleFileOptions::default()).unwrap();
                writer.write_all(contents.as_bytes()).unwrap();
            }
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_flat_archive() {
        let archive = build_zip(&[
            ("policy_definition.json", r#"{"plans":{}}"#),
            ("target_list.json", r#"{"targets":["ou-a"]}"#),
        ]);

        let files = extract_entries(&archive, "region1").unwrap();

        let paths: Vec<_> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["policy_definition.json", "target_list.json"]);
        assert_eq!(files[1].contents, br#"{"targets":["ou-a"]}"#);
    }

    #[test]
    fn test_policy_folder_is_flattened() {
        let archive = build_zip(&[
            ("region1/", ""),
            ("region1/policy_definition.json", "{}"),
            ("other/target_list.json", "{}"),
        ]);

        let files = extract_entries(&archive, "region1").unwrap();

        let paths: Vec<_> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["policy_definition.json", "other/target_list.json"]);
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(extract_entries(b"definitely not a zip", "region1").is_err());
    }

    #[test]
    fn test_relative_path() {
        assert_eq!(
            relative_path(Path::new("region1/a.json"), "region1"),
            Some("a.json".to_string())
        );
        // A file named like the policy is kept
        assert_eq!(
            relative_path(Path::new("region1"), "region1"),
            Some("region1".to_string())
        );
        assert_eq!(relative_path(Path::new("a/../b"), "region1"), None);
        assert_eq!(relative_path(Path::new("/etc/passwd"), "region1"), None);
        assert_eq!(relative_path(Path::new("./region1/b.json"), "region1"), Some("b.json".to_string()));
    }
}
