//! Shared lookup tables: OS/arch token aliasing and archive-format
//! extensions. Consulted by the asset selector and the archive
//! handler.

use std::env::consts;

/// Aliases for the running OS, first-match-wins order matters to callers
/// that render `{{osToken}}` and then search release assets for each
/// alias in turn.
pub fn os_aliases() -> &'static [&'static str] {
    match consts::OS {
        "macos" => &["darwin", "macos", "osx"],
        "linux" => &["linux"],
        "windows" => &["windows", "win"],
        _ => &[],
    }
}

pub fn arch_aliases() -> &'static [&'static str] {
    match consts::ARCH {
        "x86_64" => &["amd64", "x86_64", "x64"],
        "aarch64" => &["arm64", "aarch64"],
        "x86" => &["386", "i386", "x86"],
        _ => &[],
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Tar,
    TarGz,
    TarXz,
    TarBz2,
    Zip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    RawExecutable,
    Archive(ArchiveFormat),
    Package(PackageFormat),
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageFormat {
    Deb,
    Rpm,
    Msi,
    Pkg,
}

/// Classifies an asset by filename extension. Magic-byte sniffing (used
/// when the extension is absent or generic) lives in `archive::sniff`.
pub fn classify_by_name(name: &str) -> AssetKind {
    let lower = name.to_ascii_lowercase();

    if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
        AssetKind::Archive(ArchiveFormat::TarGz)
    } else if lower.ends_with(".tar.xz") || lower.ends_with(".txz") {
        AssetKind::Archive(ArchiveFormat::TarXz)
    } else if lower.ends_with(".tar.bz2") || lower.ends_with(".tbz2") {
        AssetKind::Archive(ArchiveFormat::TarBz2)
    } else if lower.ends_with(".tar") {
        AssetKind::Archive(ArchiveFormat::Tar)
    } else if lower.ends_with(".zip") {
        AssetKind::Archive(ArchiveFormat::Zip)
    } else if lower.ends_with(".deb") {
        AssetKind::Package(PackageFormat::Deb)
    } else if lower.ends_with(".rpm") {
        AssetKind::Package(PackageFormat::Rpm)
    } else if lower.ends_with(".msi") {
        AssetKind::Package(PackageFormat::Msi)
    } else if lower.ends_with(".pkg") {
        AssetKind::Package(PackageFormat::Pkg)
    } else {
        AssetKind::Unknown
    }
}

/// Strips a known archive extension from a filename, used to render the
/// `{{base}}` template placeholder.
pub fn strip_archive_extension(name: &str) -> &str {
    for ext in [".tar.gz", ".tgz", ".tar.xz", ".txz", ".tar.bz2", ".tbz2", ".tar", ".zip"] {
        if let Some(stripped) = name.strip_suffix(ext) {
            return stripped;
        }
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_extensions() {
        assert_eq!(classify_by_name("foo.tar.gz"), AssetKind::Archive(ArchiveFormat::TarGz));
        assert_eq!(classify_by_name("foo.tgz"), AssetKind::Archive(ArchiveFormat::TarGz));
        assert_eq!(classify_by_name("foo.tar.xz"), AssetKind::Archive(ArchiveFormat::TarXz));
        assert_eq!(classify_by_name("foo.zip"), AssetKind::Archive(ArchiveFormat::Zip));
        assert_eq!(classify_by_name("foo.deb"), AssetKind::Package(PackageFormat::Deb));
        assert_eq!(classify_by_name("foo"), AssetKind::Unknown);
    }

    #[test]
    fn strips_archive_extensions() {
        assert_eq!(strip_archive_extension("sfetch-linux-amd64.tar.gz"), "sfetch-linux-amd64");
        assert_eq!(strip_archive_extension("sfetch-linux-amd64"), "sfetch-linux-amd64");
    }
}
