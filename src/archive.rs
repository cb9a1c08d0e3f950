//! Archive handler: classifies an asset, safely extracts it, and
//! locates the single executable it contains.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};

use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;
use log::debug;
use tar::EntryType;
use xz2::read::XzDecoder;

use crate::classify::{classify_by_name, ArchiveFormat, AssetKind};
use crate::error::FetchError;

const MAX_ENTRIES: usize = 10_000;
const MAX_TOTAL_SIZE: u64 = 512 * 1024 * 1024;
const MAX_EXPANSION_FACTOR: u64 = 64;

pub struct ExtractedExecutable {
    pub path: PathBuf,
}

/// Classifies `name`, falling back to a magic-byte sniff of `head` (the
/// first bytes of the asset) when the extension doesn't resolve to a
/// known archive or package format.
pub fn classify(name: &str, head: &[u8]) -> AssetKind {
    match classify_by_name(name) {
        AssetKind::Unknown => sniff(head),
        kind => kind,
    }
}

fn sniff(head: &[u8]) -> AssetKind {
    if head.starts_with(&[0x1f, 0x8b]) {
        AssetKind::Archive(ArchiveFormat::TarGz)
    } else if head.starts_with(&[0xfd, b'7', b'z', b'X', b'Z', 0x00]) {
        AssetKind::Archive(ArchiveFormat::TarXz)
    } else if head.starts_with(b"BZh") {
        AssetKind::Archive(ArchiveFormat::TarBz2)
    } else if head.starts_with(b"PK\x03\x04") {
        AssetKind::Archive(ArchiveFormat::Zip)
    } else if head.len() >= 512 && &head[257..262] == b"ustar" {
        AssetKind::Archive(ArchiveFormat::Tar)
    } else {
        AssetKind::Unknown
    }
}

/// Extracts `archive_path` (of format `format`) into `root`, enforcing
/// the safe-extraction rules, then locates the single
/// executable per the ordered heuristics below.
pub fn extract_and_locate(archive_path: &Path, format: ArchiveFormat, root: &Path, binary_name: &str) -> Result<ExtractedExecutable, FetchError> {
    fs::create_dir_all(root)?;

    let compressed_size = fs::metadata(archive_path)?.len();
    let size_cap = (compressed_size.saturating_mul(MAX_EXPANSION_FACTOR)).min(MAX_TOTAL_SIZE);

    let entries = match format {
        ArchiveFormat::Tar | ArchiveFormat::TarGz | ArchiveFormat::TarXz | ArchiveFormat::TarBz2 => {
            extract_tar(archive_path, format, root, size_cap)?
        },
        ArchiveFormat::Zip => extract_zip(archive_path, root, size_cap)?,
    };

    locate_executable(&entries, root, binary_name)
}

struct Entry {
    path: PathBuf,
    executable: bool,
    is_file: bool,
}

fn open_tar_reader(path: &Path, format: ArchiveFormat) -> Result<Box<dyn Read>, FetchError> {
    let file = File::open(path)?;
    Ok(match format {
        ArchiveFormat::Tar => Box::new(file),
        ArchiveFormat::TarGz => Box::new(GzDecoder::new(file)),
        ArchiveFormat::TarXz => Box::new(XzDecoder::new(file)),
        ArchiveFormat::TarBz2 => Box::new(BzDecoder::new(file)),
        ArchiveFormat::Zip => unreachable!("zip uses its own reader"),
    })
}

fn extract_tar(archive_path: &Path, format: ArchiveFormat, root: &Path, size_cap: u64) -> Result<Vec<Entry>, FetchError> {
    let reader = open_tar_reader(archive_path, format)?;
    let mut archive = tar::Archive::new(reader);

    let mut entries = Vec::new();
    let mut total_written = 0u64;

    for (index, entry) in archive.entries()?.enumerate() {
        if index >= MAX_ENTRIES {
            return Err(FetchError::ArchiveBomb(format!("more than {MAX_ENTRIES} entries")));
        }

        let mut entry = entry.map_err(|e| FetchError::ArchiveMalformed(e.to_string()))?;
        let entry_type = entry.header().entry_type();
        let raw_path = entry.path().map_err(|e| FetchError::ArchiveMalformed(e.to_string()))?.into_owned();
        let safe_path = sanitize_entry_path(&raw_path)?;

        if matches!(entry_type, EntryType::Symlink | EntryType::Link) {
            let target = entry.link_name().map_err(|e| FetchError::ArchiveMalformed(e.to_string()))?
                .ok_or_else(|| FetchError::ArchiveMalformed("link entry has no target".into()))?;
            verify_link_target_inside_root(&safe_path, &target)?;
            debug!("Skipping link entry {safe_path:?} -> {target:?} (not materialized)");
            continue;
        }

        if !matches!(entry_type, EntryType::Regular | EntryType::Continuous) {
            continue;
        }

        let mode = entry.header().mode().unwrap_or(0);
        let destination = root.join(&safe_path);
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }

        let written = copy_with_cap(&mut entry, &destination, size_cap.saturating_sub(total_written))?;
        total_written += written;
        if total_written > size_cap {
            return Err(FetchError::ArchiveBomb(format!(
                "expanded size exceeds {size_cap} byte cap (64x compressed size, capped at {MAX_TOTAL_SIZE})")));
        }

        set_executable_if(&destination, mode & 0o111 != 0)?;
        entries.push(Entry { path: safe_path, executable: mode & 0o111 != 0, is_file: true });
    }

    Ok(entries)
}

fn extract_zip(archive_path: &Path, root: &Path, size_cap: u64) -> Result<Vec<Entry>, FetchError> {
    let file = File::open(archive_path)?;
    let mut zip = zip::ZipArchive::new(file).map_err(|e| FetchError::ArchiveMalformed(e.to_string()))?;

    if zip.len() > MAX_ENTRIES {
        return Err(FetchError::ArchiveBomb(format!("more than {MAX_ENTRIES} entries")));
    }

    let mut entries = Vec::new();
    let mut total_written = 0u64;

    for index in 0..zip.len() {
        let mut zip_entry = zip.by_index(index).map_err(|e| FetchError::ArchiveMalformed(e.to_string()))?;
        if zip_entry.is_dir() {
            continue;
        }

        let raw_path = match zip_entry.enclosed_name() {
            Some(path) => path,
            None => return Err(FetchError::ArchiveMalformed(format!("unsafe path in zip entry: {}", zip_entry.name()))),
        };
        let safe_path = sanitize_entry_path(&raw_path)?;

        let executable = zip_entry.unix_mode().is_some_and(|mode| mode & 0o111 != 0);
        let destination = root.join(&safe_path);
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }

        let written = copy_with_cap(&mut zip_entry, &destination, size_cap.saturating_sub(total_written))?;
        total_written += written;
        if total_written > size_cap {
            return Err(FetchError::ArchiveBomb(format!(
                "expanded size exceeds {size_cap} byte cap (64x compressed size, capped at {MAX_TOTAL_SIZE})")));
        }

        set_executable_if(&destination, executable)?;
        entries.push(Entry { path: safe_path, executable, is_file: true });
    }

    Ok(entries)
}

/// Rejects absolute paths and `..` components, and returns
/// the path a malicious entry would have to produce to escape the
/// extraction root - rejected here since a relative path
/// with no `..` and no absolute prefix cannot resolve outside `root`.
fn sanitize_entry_path(path: &Path) -> Result<PathBuf, FetchError> {
    let mut normalized = PathBuf::new();

    for component in path.components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {},
            Component::ParentDir => {
                return Err(FetchError::ArchiveMalformed(format!(
                    "entry path {path:?} contains a parent-directory component")));
            },
            Component::RootDir | Component::Prefix(_) => {
                return Err(FetchError::ArchiveMalformed(format!(
                    "entry path {path:?} is absolute")));
            },
        }
    }

    if normalized.as_os_str().is_empty() {
        return Err(FetchError::ArchiveMalformed("entry has an empty path".into()));
    }

    Ok(normalized)
}

fn verify_link_target_inside_root(entry_path: &Path, target: &Path) -> Result<(), FetchError> {
    let base = entry_path.parent().unwrap_or_else(|| Path::new(""));
    let mut resolved = base.to_path_buf();

    for component in target.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {},
            Component::ParentDir => {
                if !resolved.pop() {
                    return Err(FetchError::ArchiveMalformed(format!(
                        "link {entry_path:?} -> {target:?} escapes the extraction root")));
                }
            },
            Component::RootDir | Component::Prefix(_) => {
                return Err(FetchError::ArchiveMalformed(format!(
                    "link {entry_path:?} targets an absolute path")));
            },
        }
    }

    Ok(())
}

fn copy_with_cap(reader: &mut dyn Read, destination: &Path, remaining_budget: u64) -> Result<u64, FetchError> {
    let mut file = File::create(destination)?;
    let mut buffer = [0u8; 64 * 1024];
    let mut written = 0u64;

    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }

        written += read as u64;
        if written > remaining_budget {
            return Err(FetchError::ArchiveBomb("expanded size exceeds the safe extraction cap".into()));
        }

        file.write_all(&buffer[..read])?;
    }

    Ok(written)
}

#[cfg(unix)]
fn set_executable_if(path: &Path, executable: bool) -> Result<(), FetchError> {
    use std::os::unix::fs::PermissionsExt;

    if executable {
        let mut permissions = fs::metadata(path)?.permissions();
        permissions.set_mode(0o755);
        fs::set_permissions(path, permissions)?;
    }

    Ok(())
}

#[cfg(not(unix))]
fn set_executable_if(_path: &Path, _executable: bool) -> Result<(), FetchError> {
    Ok(())
}

fn locate_executable(entries: &[Entry], root: &Path, binary_name: &str) -> Result<ExtractedExecutable, FetchError> {
    // (a) basename equals the configured binary name.
    let platform_suffix = if cfg!(windows) { ".exe" } else { "" };
    let target_names = [binary_name.to_owned(), format!("{binary_name}{platform_suffix}")];

    if let Some(entry) = entries.iter().find(|entry| {
        entry.is_file && entry.path.file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| target_names.iter().any(|candidate| candidate == name))
    }) {
        return Ok(ExtractedExecutable { path: root.join(&entry.path) });
    }

    // (b) a single regular file marked executable by archive metadata.
    let executables: Vec<&Entry> = entries.iter().filter(|entry| entry.is_file && entry.executable).collect();
    if executables.len() == 1 {
        return Ok(ExtractedExecutable { path: root.join(&executables[0].path) });
    }

    // (c) a single regular file at the archive root.
    let root_files: Vec<&Entry> = entries.iter()
        .filter(|entry| entry.is_file && entry.path.components().count() == 1)
        .collect();
    if root_files.len() == 1 {
        return Ok(ExtractedExecutable { path: root.join(&root_files[0].path) });
    }

    if executables.is_empty() && root_files.is_empty() {
        return Err(FetchError::AmbiguousExecutable("no candidate executable found in the archive".into()));
    }

    Err(FetchError::AmbiguousExecutable(format!(
        "multiple candidate files ({} executable, {} at archive root) with no clear winner",
        executables.len(), root_files.len())))
}

/// Installs a raw (non-archive) asset as-is: used for the `RawExecutable`
/// and `Package` classifications, which install as raw files.
pub fn stage_raw(asset_path: &Path, root: &Path, file_name: &str) -> Result<ExtractedExecutable, FetchError> {
    fs::create_dir_all(root)?;
    let destination = root.join(file_name);
    fs::copy(asset_path, &destination)?;
    Ok(ExtractedExecutable { path: destination })
}

pub fn is_unpackable(kind: AssetKind) -> bool {
    matches!(kind, AssetKind::Archive(_))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_parent_dir_component() {
        assert!(sanitize_entry_path(Path::new("../escape")).is_err());
        assert!(sanitize_entry_path(Path::new("a/../../escape")).is_err());
    }

    #[test]
    fn rejects_absolute_path() {
        assert!(sanitize_entry_path(Path::new("/etc/passwd")).is_err());
    }

    #[test]
    fn accepts_normal_relative_path() {
        let result = sanitize_entry_path(Path::new("bin/sfetch")).unwrap();
        assert_eq!(result, PathBuf::from("bin/sfetch"));
    }

    #[test]
    fn sniffs_gzip_magic() {
        assert_eq!(sniff(&[0x1f, 0x8b, 0x08]), AssetKind::Archive(ArchiveFormat::TarGz));
    }

    #[test]
    fn sniffs_zip_magic() {
        assert_eq!(sniff(b"PK\x03\x04rest"), AssetKind::Archive(ArchiveFormat::Zip));
    }

    #[test]
    fn link_target_escaping_root_is_rejected() {
        assert!(verify_link_target_inside_root(Path::new("a/link"), Path::new("../../etc/passwd")).is_err());
    }

    #[test]
    fn link_target_inside_root_is_accepted() {
        assert!(verify_link_target_inside_root(Path::new("a/b/link"), Path::new("../sibling")).is_ok());
    }
}
