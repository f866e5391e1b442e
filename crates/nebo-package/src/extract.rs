//! Safe `.napp` extraction.
//!
//! Archives are gzip-compressed tar containing exactly `manifest.json`,
//! `binary` (or `app`), `signatures.json`, and optional `ui/**` assets.
//! Extraction guards against:
//!
//! - Symlink and hardlink entries
//! - Path traversal (`..` components, absolute paths, prefix components)
//! - Files outside the allowlist
//! - Header-lying size bombs (caps are enforced by a limit reader that
//!   reads one byte past the cap, not by trusting the header)

use std::io::Read;
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use tar::Archive;
use tracing::debug;

use crate::error::{PackageError, PackageResult};

/// Size cap for `binary` / `app` entries.
const BINARY_SIZE_CAP: u64 = 500 * 1024 * 1024;

/// Size cap for `ui/**` entries.
const UI_SIZE_CAP: u64 = 5 * 1024 * 1024;

/// Size cap for every other allowlisted entry.
const DEFAULT_SIZE_CAP: u64 = 1024 * 1024;

/// File mode for `binary` / `app` entries.
const BINARY_MODE: u32 = 0o700;

/// File mode for everything else.
const DEFAULT_MODE: u32 = 0o600;

/// Extract a `.napp` archive into `dest`.
///
/// `dest` must already exist. After extraction, `manifest.json`, a binary
/// (`binary` or `app`), and `signatures.json` must all be present or the
/// extraction fails.
///
/// # Errors
///
/// Returns the corresponding [`PackageError`] kind before any byte of an
/// offending entry is written to disk.
pub fn extract_package(archive: impl Read, dest: &Path) -> PackageResult<()> {
    let decoder = GzDecoder::new(archive);
    let mut tar = Archive::new(decoder);

    let dest = dest.canonicalize().map_err(|e| PackageError::Extraction {
        message: format!("failed to canonicalize destination: {e}"),
    })?;

    for entry_result in tar.entries().map_err(|e| PackageError::Extraction {
        message: format!("failed to read archive entries: {e}"),
    })? {
        let mut entry = entry_result.map_err(|e| PackageError::Extraction {
            message: format!("failed to read archive entry: {e}"),
        })?;

        let entry_path = entry
            .path()
            .map_err(|e| PackageError::Extraction {
                message: format!("failed to read entry path: {e}"),
            })?
            .into_owned();
        let display_path = entry_path.display().to_string();

        let entry_type = entry.header().entry_type();
        match entry_type {
            tar::EntryType::Regular => {},
            tar::EntryType::Directory => {
                // Only the ui tree may carry directories.
                let clean = clean_entry_path(&entry_path, &display_path)?;
                if !is_ui_path(&clean) {
                    return Err(PackageError::DisallowedEntry { path: display_path });
                }
                std::fs::create_dir_all(dest.join(&clean))?;
                continue;
            },
            // Metadata headers carry no payload.
            tar::EntryType::GNULongName | tar::EntryType::XHeader | tar::EntryType::XGlobalHeader => {
                continue;
            },
            other => {
                return Err(PackageError::UnsafeEntryType {
                    entry_type: format!("{other:?}"),
                    path: display_path,
                });
            },
        }

        let clean = clean_entry_path(&entry_path, &display_path)?;
        let cap = allowed_cap(&clean).ok_or_else(|| PackageError::DisallowedEntry {
            path: display_path.clone(),
        })?;

        let target = dest.join(&clean);
        // Defense-in-depth after join+clean: the resolved parent must stay
        // inside dest (catches symlink escapes component checks can't see).
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
            let canonical_parent = parent.canonicalize()?;
            if !canonical_parent.starts_with(&dest) {
                return Err(PackageError::PathTraversal { path: display_path });
            }
        }

        let mode = if is_binary_name(&clean) {
            BINARY_MODE
        } else {
            DEFAULT_MODE
        };
        write_limited(&mut entry, &target, mode, cap, &display_path)?;
        debug!(path = %display_path, "Extracted package entry");
    }

    require_file(&dest, "manifest.json")?;
    require_file(&dest, "signatures.json")?;
    if !dest.join("binary").is_file() && !dest.join("app").is_file() {
        return Err(PackageError::MissingFile("binary"));
    }

    Ok(())
}

/// Validate an entry path and return it cleaned for joining.
fn clean_entry_path(path: &Path, display: &str) -> PackageResult<PathBuf> {
    if path.is_absolute() {
        return Err(PackageError::PathTraversal {
            path: display.to_string(),
        });
    }
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {},
            Component::ParentDir | Component::Prefix(_) | Component::RootDir => {
                return Err(PackageError::PathTraversal {
                    path: display.to_string(),
                });
            },
        }
    }
    if clean.as_os_str().is_empty() {
        return Err(PackageError::PathTraversal {
            path: display.to_string(),
        });
    }
    Ok(clean)
}

fn is_binary_name(clean: &Path) -> bool {
    clean == Path::new("binary") || clean == Path::new("app")
}

fn is_ui_path(clean: &Path) -> bool {
    clean.starts_with("ui")
}

/// The size cap for an allowlisted path, or `None` if disallowed.
fn allowed_cap(clean: &Path) -> Option<u64> {
    if is_binary_name(clean) {
        return Some(BINARY_SIZE_CAP);
    }
    if clean == Path::new("manifest.json") || clean == Path::new("signatures.json") {
        return Some(DEFAULT_SIZE_CAP);
    }
    if is_ui_path(clean) && clean != Path::new("ui") {
        return Some(UI_SIZE_CAP);
    }
    None
}

/// Copy an entry to `target`, failing if it exceeds `cap` bytes.
///
/// Reads through a `Read::take(cap + 1)` so a header that lies about the
/// size still trips the cap.
fn write_limited(
    entry: &mut impl Read,
    target: &Path,
    mode: u32,
    cap: u64,
    display: &str,
) -> PackageResult<()> {
    let mut file = open_with_mode(target, mode)?;
    let copied = std::io::copy(&mut entry.take(cap.saturating_add(1)), &mut file)?;
    if copied > cap {
        drop(file);
        let _ = std::fs::remove_file(target);
        return Err(PackageError::FileTooLarge {
            path: display.to_string(),
            limit: cap,
        });
    }
    Ok(())
}

#[cfg(unix)]
fn open_with_mode(target: &Path, mode: u32) -> PackageResult<std::fs::File> {
    use std::os::unix::fs::OpenOptionsExt as _;

    Ok(std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(mode)
        .open(target)?)
}

#[cfg(not(unix))]
fn open_with_mode(target: &Path, _mode: u32) -> PackageResult<std::fs::File> {
    Ok(std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(target)?)
}

fn require_file(dest: &Path, name: &'static str) -> PackageResult<()> {
    if dest.join(name).is_file() {
        Ok(())
    } else {
        Err(PackageError::MissingFile(name))
    }
}

#[cfg(test)]
#[allow(clippy::arithmetic_side_effects)]
mod tests {
    use std::io::Write as _;

    use super::*;

    /// Build a gzipped tarball from (path, data, entry_type) triples using
    /// raw headers, so malicious paths and entry types survive intact.
    fn build_archive(entries: &[(&[u8], &[u8], u8)]) -> Vec<u8> {
        let mut tar_data = Vec::new();
        for &(path, data, typeflag) in entries {
            let mut header = [0u8; 512];
            let len = path.len().min(100);
            header[..len].copy_from_slice(&path[..len]);
            header[100..108].copy_from_slice(b"0000644\0");
            let size_str = format!("{:011o}\0", data.len());
            header[124..136].copy_from_slice(size_str.as_bytes());
            header[156] = typeflag;
            header[148..156].copy_from_slice(b"        ");
            let cksum: u32 = header.iter().map(|&b| u32::from(b)).sum();
            let cksum_str = format!("{cksum:06o}\0 ");
            header[148..156].copy_from_slice(cksum_str.as_bytes());

            tar_data.extend_from_slice(&header);
            tar_data.extend_from_slice(data);
            let padding = (512 - (data.len() % 512)) % 512;
            tar_data.extend(std::iter::repeat_n(0u8, padding));
        }
        tar_data.extend(std::iter::repeat_n(0u8, 1024));

        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::fast());
        encoder.write_all(&tar_data).unwrap();
        encoder.finish().unwrap()
    }

    fn complete_archive() -> Vec<u8> {
        build_archive(&[
            (b"manifest.json", br#"{"id": "com.example.a"}"#, b'0'),
            (b"binary", b"\x7fELF......", b'0'),
            (b"signatures.json", b"{}", b'0'),
            (b"ui/index.html", b"<html></html>", b'0'),
        ])
    }

    #[test]
    fn test_extract_complete_package() {
        let tmp = tempfile::tempdir().unwrap();
        extract_package(&complete_archive()[..], tmp.path()).unwrap();
        assert!(tmp.path().join("manifest.json").is_file());
        assert!(tmp.path().join("binary").is_file());
        assert!(tmp.path().join("signatures.json").is_file());
        assert!(tmp.path().join("ui/index.html").is_file());
    }

    #[cfg(unix)]
    #[test]
    fn test_extracted_modes() {
        use std::os::unix::fs::PermissionsExt as _;

        let tmp = tempfile::tempdir().unwrap();
        extract_package(&complete_archive()[..], tmp.path()).unwrap();

        let binary_mode = tmp
            .path()
            .join("binary")
            .metadata()
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(binary_mode & 0o777, 0o700);

        let manifest_mode = tmp
            .path()
            .join("manifest.json")
            .metadata()
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(manifest_mode & 0o777, 0o600);
    }

    #[test]
    fn test_reject_path_traversal() {
        let archive = build_archive(&[(b"../etc/passwd", b"evil", b'0')]);
        let tmp = tempfile::tempdir().unwrap();
        let err = extract_package(&archive[..], tmp.path()).unwrap_err();
        assert!(matches!(err, PackageError::PathTraversal { .. }));
        assert!(std::fs::read_dir(tmp.path()).unwrap().next().is_none());
    }

    #[test]
    fn test_reject_absolute_path() {
        let archive = build_archive(&[(b"/etc/passwd", b"evil", b'0')]);
        let tmp = tempfile::tempdir().unwrap();
        let err = extract_package(&archive[..], tmp.path()).unwrap_err();
        assert!(matches!(err, PackageError::PathTraversal { .. }));
    }

    #[test]
    fn test_reject_symlink_entry() {
        let archive = build_archive(&[(b"binary", b"", b'2')]);
        let tmp = tempfile::tempdir().unwrap();
        let err = extract_package(&archive[..], tmp.path()).unwrap_err();
        assert!(matches!(err, PackageError::UnsafeEntryType { .. }));
    }

    #[test]
    fn test_reject_hardlink_entry() {
        let archive = build_archive(&[(b"binary", b"", b'1')]);
        let tmp = tempfile::tempdir().unwrap();
        let err = extract_package(&archive[..], tmp.path()).unwrap_err();
        assert!(matches!(err, PackageError::UnsafeEntryType { .. }));
    }

    #[test]
    fn test_reject_disallowed_file() {
        let archive = build_archive(&[(b"Makefile", b"all:", b'0')]);
        let tmp = tempfile::tempdir().unwrap();
        let err = extract_package(&archive[..], tmp.path()).unwrap_err();
        assert!(matches!(err, PackageError::DisallowedEntry { .. }));
    }

    #[test]
    fn test_reject_oversized_manifest() {
        let big = vec![b'x'; (DEFAULT_SIZE_CAP + 1) as usize];
        let archive = build_archive(&[(b"manifest.json", &big, b'0')]);
        let tmp = tempfile::tempdir().unwrap();
        let err = extract_package(&archive[..], tmp.path()).unwrap_err();
        assert!(matches!(err, PackageError::FileTooLarge { .. }));
        // The partial file is removed on failure.
        assert!(!tmp.path().join("manifest.json").exists());
    }

    #[test]
    fn test_missing_required_files() {
        let archive = build_archive(&[(b"manifest.json", b"{}", b'0')]);
        let tmp = tempfile::tempdir().unwrap();
        let err = extract_package(&archive[..], tmp.path()).unwrap_err();
        assert!(matches!(err, PackageError::MissingFile("signatures.json")));
    }

    #[test]
    fn test_missing_binary() {
        let archive = build_archive(&[
            (b"manifest.json", b"{}", b'0'),
            (b"signatures.json", b"{}", b'0'),
        ]);
        let tmp = tempfile::tempdir().unwrap();
        let err = extract_package(&archive[..], tmp.path()).unwrap_err();
        assert!(matches!(err, PackageError::MissingFile("binary")));
    }

    #[test]
    fn test_app_binary_name_accepted() {
        let archive = build_archive(&[
            (b"manifest.json", b"{}", b'0'),
            (b"app", b"\x7fELF", b'0'),
            (b"signatures.json", b"{}", b'0'),
        ]);
        let tmp = tempfile::tempdir().unwrap();
        extract_package(&archive[..], tmp.path()).unwrap();
        assert!(tmp.path().join("app").is_file());
    }

    #[test]
    fn test_ui_directory_entries_allowed() {
        let archive = build_archive(&[
            (b"ui/", b"", b'5'),
            (b"ui/assets/", b"", b'5'),
            (b"ui/assets/app.js", b"console.log(1)", b'0'),
            (b"manifest.json", b"{}", b'0'),
            (b"binary", b"\x7fELF", b'0'),
            (b"signatures.json", b"{}", b'0'),
        ]);
        let tmp = tempfile::tempdir().unwrap();
        extract_package(&archive[..], tmp.path()).unwrap();
        assert!(tmp.path().join("ui/assets/app.js").is_file());
    }

    #[test]
    fn test_top_level_directory_rejected() {
        let archive = build_archive(&[(b"data/", b"", b'5')]);
        let tmp = tempfile::tempdir().unwrap();
        let err = extract_package(&archive[..], tmp.path()).unwrap_err();
        assert!(matches!(err, PackageError::DisallowedEntry { .. }));
    }
}
