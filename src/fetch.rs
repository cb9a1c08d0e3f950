//! Fetcher: downloads the selected triple into the scratch
//! directory, hashing the primary asset with SHA-256 and SHA-512 while it
//! streams to disk.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;

use log::debug;
use reqwest::blocking::Client;
use sha2::{Digest, Sha256, Sha512};

use crate::error::FetchError;
use crate::evidence::Evidence;
use crate::github::Asset;
use crate::select::{SelectedTriple, SignatureRole};

pub struct FetchedTriple {
    pub primary_path: PathBuf,
    pub checksum_path: Option<PathBuf>,
    pub signature_paths: Vec<(SignatureRole, PathBuf)>,
    pub evidence: Evidence,
}

/// Digests the primary stream while writing it to disk.
struct HashingWriter<'a> {
    file: File,
    sha256: &'a mut Sha256,
    sha512: &'a mut Sha512,
}

impl Write for HashingWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let written = self.file.write(buf)?;
        self.sha256.update(&buf[..written]);
        self.sha512.update(&buf[..written]);
        Ok(written)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}

pub fn download_triple(
    client: &Client,
    triple: &SelectedTriple,
    scratch: &Path,
    bearer: Option<&str>,
    size_ceiling: u64,
) -> Result<FetchedTriple, FetchError> {
    let primary = triple.primary;
    let checksum_manifest = triple.checksum_manifest;
    let signatures = &triple.signatures;

    // Up to three downloads run concurrently: primary, manifest,
    // signatures. Each owns its own file handle exclusively; nothing
    // mutable is shared between them besides the scratch directory path.
    let (primary_result, companions_result) = thread::scope(|scope| {
        let primary_handle = scope.spawn(|| download_primary(client, primary, scratch, bearer, size_ceiling));

        let companions_handle = scope.spawn(|| -> Result<_, FetchError> {
            let checksum_path = checksum_manifest
                .map(|asset| download_companion(client, asset, scratch, bearer))
                .transpose()?;

            let signature_paths = signatures.iter()
                .map(|(role, asset)| Ok((*role, download_companion(client, asset, scratch, bearer)?)))
                .collect::<Result<Vec<_>, FetchError>>()?;

            Ok((checksum_path, signature_paths))
        });

        (primary_handle.join(), companions_handle.join())
    });

    let (primary_path, evidence) = primary_result
        .unwrap_or_else(|_| Err(FetchError::Internal("primary download thread panicked".into())))?;
    let (checksum_path, signature_paths) = companions_result
        .unwrap_or_else(|_| Err(FetchError::Internal("companion download thread panicked".into())))?;

    Ok(FetchedTriple { primary_path, checksum_path, signature_paths, evidence })
}

fn download_primary(client: &Client, asset: &Asset, scratch: &Path, bearer: Option<&str>, size_ceiling: u64) -> Result<(PathBuf, Evidence), FetchError> {
    let path = scratch.join(&asset.name);
    debug!("Downloading primary asset {} to {path:?}...", asset.url);

    let mut sha256 = Sha256::new();
    let mut sha512 = Sha512::new();
    let written = {
        let file = File::create(&path)?;
        let mut writer = HashingWriter { file, sha256: &mut sha256, sha512: &mut sha512 };
        crate::http_client::get_streamed(client, &asset.url, bearer, &mut writer, size_ceiling)?
    };

    if let Some(declared) = asset.size {
        if declared != written {
            return Err(FetchError::ShortRead { expected: declared, got: written });
        }
    }

    let evidence = Evidence::new(sha256.finalize().into(), sha512.finalize().into());
    Ok((path, evidence))
}

fn download_companion(client: &Client, asset: &Asset, scratch: &Path, bearer: Option<&str>) -> Result<PathBuf, FetchError> {
    let path = scratch.join(&asset.name);
    debug!("Downloading companion asset {} to {path:?}...", asset.url);

    let mut file = File::create(&path)?;
    // Companions (manifests, signatures) are always small text files; a
    // 1 MiB ceiling is generous and keeps the same bounded-read discipline
    // as metadata calls.
    crate::http_client::get_streamed(client, &asset.url, bearer, &mut file, 1024 * 1024)?;

    Ok(path)
}
