//! Binary format validation.
//!
//! A fast pre-launch veto, not full validation: rejects symlinks,
//! non-regular files, files without an executable bit, oversized files,
//! interpreter scripts, and anything whose leading bytes match no
//! recognized native format (ELF, Mach-O including universal/fat, PE).

use std::io::Read;
use std::path::{Path, PathBuf};

use crate::error::{PackageError, PackageResult};

/// How many leading bytes the magic sniff reads.
const MAGIC_LEN: usize = 8;

/// Locate the app binary inside an app directory.
///
/// Searches `binary`, then `app`, then any executable regular file under
/// `tmp/` (build-tool output for sideloaded apps).
///
/// # Errors
///
/// Returns [`PackageError::BinaryNotFound`] if nothing plausible exists.
pub fn locate_binary(app_dir: &Path) -> PackageResult<PathBuf> {
    for name in ["binary", "app"] {
        let candidate = app_dir.join(name);
        if candidate.is_file() {
            return Ok(candidate);
        }
    }

    let tmp = app_dir.join("tmp");
    if tmp.is_dir() {
        for entry in std::fs::read_dir(&tmp)? {
            let path = entry?.path();
            if path.is_file() && is_executable(&path) {
                return Ok(path);
            }
        }
    }

    Err(PackageError::BinaryNotFound(app_dir.to_path_buf()))
}

/// Validate that `path` is a plausible native executable.
///
/// # Errors
///
/// Returns the specific [`PackageError`] kind for the first failing check.
pub fn validate_binary(path: &Path, size_limit: u64) -> PackageResult<()> {
    let meta = std::fs::symlink_metadata(path)?;
    if meta.file_type().is_symlink() {
        return Err(PackageError::BinaryIsSymlink(path.to_path_buf()));
    }
    if !meta.file_type().is_file() {
        return Err(PackageError::BinaryNotRegular(path.to_path_buf()));
    }
    if !is_executable(path) {
        return Err(PackageError::BinaryNotExecutable(path.to_path_buf()));
    }
    if meta.len() > size_limit {
        return Err(PackageError::BinaryTooLarge {
            path: path.to_path_buf(),
            size: meta.len(),
            limit: size_limit,
        });
    }

    let mut magic = [0u8; MAGIC_LEN];
    let mut file = std::fs::File::open(path)?;
    let read = file.read(&mut magic)?;
    let magic = &magic[..read];

    if magic.starts_with(b"#!") {
        return Err(PackageError::BinaryIsScript(path.to_path_buf()));
    }
    if !matches_native_magic(magic) {
        return Err(PackageError::UnknownBinaryFormat(path.to_path_buf()));
    }
    Ok(())
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt as _;

    path.metadata()
        .map(|m| m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(_path: &Path) -> bool {
    // Windows has no exec bit; the magic check is the gate.
    true
}

/// Whether the leading bytes match a recognized native binary format.
fn matches_native_magic(magic: &[u8]) -> bool {
    if magic.len() < 4 {
        return magic.len() >= 2 && &magic[..2] == b"MZ";
    }
    let word = [magic[0], magic[1], magic[2], magic[3]];
    matches!(
        word,
        // ELF
        [0x7f, b'E', b'L', b'F']
        // Mach-O 32/64, both endiannesses
        | [0xfe, 0xed, 0xfa, 0xce]
        | [0xfe, 0xed, 0xfa, 0xcf]
        | [0xce, 0xfa, 0xed, 0xfe]
        | [0xcf, 0xfa, 0xed, 0xfe]
        // Mach-O universal (fat), both endiannesses
        | [0xca, 0xfe, 0xba, 0xbe]
        | [0xca, 0xfe, 0xba, 0xbf]
        | [0xbe, 0xba, 0xfe, 0xca]
        | [0xbf, 0xba, 0xfe, 0xca]
    ) || &magic[..2] == b"MZ"
}
