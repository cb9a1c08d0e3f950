//! Installer: atomically places the verified executable at its
//! destination, including self-replacement of the running binary.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::error::FetchError;
use crate::file_types;

pub struct InstallPlan {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub mode: u32,
    pub self_update: bool,
}

impl InstallPlan {
    pub fn new(source: PathBuf, destination: PathBuf) -> InstallPlan {
        let self_update = std::env::current_exe()
            .map(|current| paths_refer_to_same_file(&current, &destination))
            .unwrap_or(false);

        InstallPlan { source, destination, mode: 0o755, self_update }
    }
}

/// Runs the plan. On success, either the destination holds the new
/// binary, or (self-update fallback only) a `.new` sidecar does; on
/// failure, the destination is left exactly as it was found.
pub fn install(plan: &InstallPlan) -> Result<(), FetchError> {
    sanity_check(&plan.source)?;

    if let Some(parent) = plan.destination.parent() {
        fs::create_dir_all(parent)?;
    }

    set_mode(&plan.source, plan.mode)?;

    if plan.self_update {
        return self_update(plan);
    }

    move_into_place(&plan.source, &plan.destination)?;
    info!("Installed {:?}.", plan.destination);
    Ok(())
}

fn sanity_check(path: &Path) -> Result<(), FetchError> {
    let file = File::open(path)?;
    match file_types::is_executable(file) {
        Ok((description, true)) => {
            debug!("{path:?} looks like an executable: {description}.");
            Ok(())
        },
        Ok((description, false)) => {
            warn!("{path:?} does not look like a native executable ({description}); installing anyway.");
            Ok(())
        },
        Err(err) => {
            debug!("Could not sniff {path:?}: {err}.");
            Ok(())
        },
    }
}

/// Rename-if-same-filesystem; on cross-device, copy into a temp file in
/// the destination directory, fsync, then rename.
fn move_into_place(source: &Path, destination: &Path) -> Result<(), FetchError> {
    match fs::rename(source, destination) {
        Ok(()) => Ok(()),
        Err(err) if is_cross_device(&err) => {
            let temp_path = sibling_temp_path(destination)?;
            fs::copy(source, &temp_path)?;

            let file = File::open(&temp_path)?;
            file.sync_all()?;
            drop(file);

            fs::rename(&temp_path, destination).inspect_err(|_| {
                let _ = fs::remove_file(&temp_path);
            })?;

            Ok(())
        },
        Err(err) => Err(FetchError::InstallDenied(err.to_string())),
    }
}

#[cfg(unix)]
fn is_cross_device(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::EXDEV)
}

#[cfg(not(unix))]
fn is_cross_device(_err: &io::Error) -> bool {
    false
}

fn sibling_temp_path(destination: &Path) -> Result<PathBuf, FetchError> {
    let file_name = destination.file_name().and_then(|name| name.to_str())
        .ok_or_else(|| FetchError::Internal(format!("unexpected install path: {destination:?}")))?;

    let random: u64 = random_suffix();
    Ok(destination.with_file_name(format!("{file_name}.tmp-{random:x}")))
}

fn random_suffix() -> u64 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};
    RandomState::new().build_hasher().finish()
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<(), FetchError> {
    use std::os::unix::fs::PermissionsExt;
    let mut permissions = fs::metadata(path)?.permissions();
    permissions.set_mode(mode);
    fs::set_permissions(path, permissions)?;
    Ok(())
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<(), FetchError> {
    // Windows has no POSIX mode bits; the binary's suffix is preserved by
    // the caller instead.
    Ok(())
}

#[cfg(unix)]
fn paths_refer_to_same_file(a: &Path, b: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;
    match (fs::metadata(a), fs::metadata(b)) {
        (Ok(a), Ok(b)) => a.dev() == b.dev() && a.ino() == b.ino(),
        _ => a == b,
    }
}

#[cfg(not(unix))]
fn paths_refer_to_same_file(a: &Path, b: &Path) -> bool {
    a == b
}

/// Self-update: rename-over is attempted first via
/// `self_replace`. On a sharing violation (Windows) or EBUSY, falls back
/// to writing alongside as `<dest>.new` exactly once; a second failure is
/// fatal.
fn self_update(plan: &InstallPlan) -> Result<(), FetchError> {
    match self_replace::self_replace(&plan.source) {
        Ok(()) => {
            info!("Self-updated {:?}.", plan.destination);
            Ok(())
        },
        Err(err) if is_sharing_violation(&err) => {
            let sidecar = plan.destination.with_extension(sidecar_extension(&plan.destination));
            fs::copy(&plan.source, &sidecar).map_err(|e| FetchError::SelfUpdate(format!(
                "primary self-replace failed ({err}), and writing the {sidecar:?} fallback also failed: {e}")))?;

            warn!("{:?} is in use; the new binary was written to {sidecar:?}. Restart to apply it.", plan.destination);
            Ok(())
        },
        Err(err) => Err(FetchError::SelfUpdate(err.to_string())),
    }
}

fn sidecar_extension(destination: &Path) -> String {
    match destination.extension().and_then(|ext| ext.to_str()) {
        Some(ext) => format!("{ext}.new"),
        None => "new".to_owned(),
    }
}

#[cfg(unix)]
fn is_sharing_violation(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::EBUSY) || err.raw_os_error() == Some(libc::ETXTBSY)
}

#[cfg(windows)]
fn is_sharing_violation(err: &io::Error) -> bool {
    // ERROR_SHARING_VIOLATION
    err.raw_os_error() == Some(32)
}

#[cfg(not(any(unix, windows)))]
fn is_sharing_violation(_err: &io::Error) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sidecar_extension_appends_new() {
        assert_eq!(sidecar_extension(Path::new("/usr/local/bin/sfetch")), "new");
        assert_eq!(sidecar_extension(Path::new("C:/tools/sfetch.exe")), "exe.new");
    }

    #[test]
    fn install_plan_detects_non_self_update_by_default() {
        let plan = InstallPlan::new(PathBuf::from("/tmp/scratch/sfetch"), PathBuf::from("/usr/local/bin/sfetch"));
        assert!(!plan.self_update || std::env::current_exe().map(|p| p == Path::new("/usr/local/bin/sfetch")).unwrap_or(false));
    }
}
