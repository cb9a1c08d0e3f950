#[macro_use] mod core;

mod archive;
mod checksum;
mod classify;
mod cli;
mod config;
mod error;
mod evidence;
mod fetch;
mod file_types;
mod github;
mod http_client;
mod install;
mod policy;
mod repo;
mod select;
mod signature;

use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{error, info, warn};
use minisign_verify::PublicKey;

use crate::archive::ExtractedExecutable;
use crate::cli::CliArgs;
use crate::config::RepoConfig;
use crate::error::FetchError;
use crate::evidence::Evidence;
use crate::fetch::FetchedTriple;
use crate::policy::PolicyKnobs;
use crate::repo::RepoRef;
use crate::select::SignatureRole;
use crate::signature::TrustedKeys;

fn main() {
    let args = cli::parse_args().unwrap_or_else(|e| {
        let _ = writeln!(io::stderr(), "{e}.");
        process::exit(2);
    });

    if let Err(e) = easy_logging::init(module_path!().split("::").next().unwrap(), args.log_level) {
        let _ = writeln!(io::stderr(), "Failed to initialize the logging: {e}.");
        process::exit(1);
    }

    if let Some(key) = &args.verify_minisign_pubkey {
        process::exit(verify_minisign_pubkey(key));
    }

    match run(&args) {
        Ok(()) => process::exit(0),
        Err(err) => {
            error!("{err}.");
            process::exit(err.exit_code().into());
        },
    }
}

fn verify_minisign_pubkey(key: &str) -> i32 {
    match PublicKey::from_base64(key) {
        Ok(key) => {
            println!("{} is a valid minisign public key.", key.to_base64());
            0
        },
        Err(e) => {
            let _ = writeln!(io::stderr(), "{key} is not a valid minisign public key: {e}.");
            1
        },
    }
}

/// Runs the full verifying-fetch pipeline end to end. Every stage
/// checks `cancelled` before doing network or filesystem work so a
/// SIGINT/SIGTERM caught mid-run unwinds instead of leaving a half-built
/// install in place.
fn run(args: &CliArgs) -> Result<(), FetchError> {
    let cancelled = install_cancellation_handler();

    let check_cancelled = |cancelled: &AtomicBool| -> Result<(), FetchError> {
        if cancelled.load(Ordering::SeqCst) {
            Err(FetchError::Internal("interrupted".into()))
        } else {
            Ok(())
        }
    };

    let repo = RepoRef::parse(&args.repo, args.tag.as_deref())
        .map_err(|e| FetchError::Usage(e.to_string()))?;

    let binary_name = args.binary_name.clone().unwrap_or_else(|| repo.repo.clone());

    let config = match &args.repo_config {
        Some(path) => RepoConfig::load_override(path, &binary_name)
            .map_err(|e| FetchError::Usage(format!("invalid --repo-config file: {e}")))?,
        None => RepoConfig::defaults(&binary_name),
    };

    let bearer = github_token();

    info!("Resolving {} @ {}...", repo.full_name(), repo.tag);
    let release = github::get_release(&repo)?;
    check_cancelled(&cancelled)?;

    let triple = select::select(&release, &config, &release.tag)?;
    info!("Selected asset {}.", triple.primary.name);
    check_cancelled(&cancelled)?;

    let scratch_parent = std::env::var_os("SFETCH_HOME").map(PathBuf::from);
    if let Some(parent) = &scratch_parent {
        fs::create_dir_all(parent)?;
    }
    let scratch = match &scratch_parent {
        Some(parent) => tempfile::Builder::new().prefix("sfetch-").tempdir_in(parent)?,
        None => tempfile::Builder::new().prefix("sfetch-").tempdir()?,
    };
    let client = http_client::client()?;

    // The primary download is capped at 60s per request; the overall
    // budget scales with the declared asset size so large binaries aren't
    // penalized by the same ceiling as small ones.
    let size_ceiling = triple.primary.size.unwrap_or(512 * 1024 * 1024).max(1);

    let mut fetched = fetch::download_triple(&client, &triple, scratch.path(), bearer.as_deref(), size_ceiling)?;
    check_cancelled(&cancelled)?;

    if let Some(checksum_path) = &fetched.checksum_path {
        let manifest = fs::read_to_string(checksum_path)?;
        if let Err(err) = checksum::verify(&manifest, &triple.primary.name, &mut fetched.evidence) {
            print_evidence(&triple.primary.name, &fetched.evidence, &[], Some(&err));
            return Err(err);
        }
    }

    let attempted_signers = match verify_signatures(args, &config, &mut fetched) {
        Ok(signers) => signers,
        Err(err) => {
            print_evidence(&triple.primary.name, &fetched.evidence, &[], Some(&err));
            return Err(err);
        },
    };
    check_cancelled(&cancelled)?;

    let knobs = PolicyKnobs {
        require_checksum: args.require_checksum,
        require_signature: args.require_signature,
        allow_unsigned: args.allow_unsigned,
    };
    let verdict = match policy::evaluate(&knobs, &mut fetched.evidence) {
        Ok(verdict) => verdict,
        Err(err) => {
            print_evidence(&triple.primary.name, &fetched.evidence, &attempted_signers, Some(&err));
            return Err(err);
        },
    };
    if verdict.warning {
        warn!("Accepting {} without a verified checksum or signature.", triple.primary.name);
    }

    print_evidence(&triple.primary.name, &fetched.evidence, &attempted_signers, None);

    if args.dry_run {
        info!("Dry run: stopping short of installation.");
        return Ok(());
    }

    let extracted = stage_for_install(&fetched, &triple.primary.name, &binary_name, scratch.path())?;

    let destination = args.dest_dir.join(platform_binary_name(&binary_name));
    let plan = install::InstallPlan::new(extracted.path, destination);
    install::install(&plan)?;

    Ok(())
}

/// Returns the filenames of every signature attempted, in attempt order,
/// regardless of outcome - used for the Evidence dump.
fn verify_signatures(args: &CliArgs, config: &RepoConfig, fetched: &mut FetchedTriple) -> Result<Vec<String>, FetchError> {
    let primary_bytes = fs::read(&fetched.primary_path)?;
    let manifest_bytes = fetched.checksum_path.as_ref().map(fs::read).transpose()?;
    let manifest_trusted = fetched.evidence.verified_by_manifest();

    let keyring_bytes = args.keyring.as_deref().map(fs::read).transpose()?;
    let pubkeys = signature::trusted_minisign_keys(&args.pubkeys);
    let minisign_keys: Vec<&str> = pubkeys.iter().map(String::as_str).collect();
    let keys = TrustedKeys { minisign_keys, openpgp_keyring: keyring_bytes.as_deref() };

    // A manifest signature only extends trust to the primary asset if the
    // manifest itself already checksum-verified the primary; a
    // signature over an unverified manifest proves nothing about the
    // asset we actually installed.
    let manifest_candidate = manifest_trusted
        .then(|| manifest_bytes.as_deref())
        .flatten()
        .map(|bytes| (SignatureRole::Manifest, bytes));
    let primary_candidate = Some((SignatureRole::Primary, primary_bytes.as_slice()));

    let ordered = if config.prefer_checksum_signature {
        [manifest_candidate, primary_candidate]
    } else {
        [primary_candidate, manifest_candidate]
    };

    let mut attempted = Vec::new();
    let mut last_error = None;

    for (role, payload) in ordered.into_iter().flatten() {
        for (sig_role, sig_path) in &fetched.signature_paths {
            if *sig_role != role {
                continue;
            }

            let Some(name) = sig_path.file_name().and_then(|n| n.to_str()) else { continue };
            attempted.push(name.to_owned());
            let bytes = fs::read(sig_path)?;

            match signature::verify(name, &bytes, payload, &keys, &mut fetched.evidence) {
                Ok(()) => return Ok(attempted),
                Err(err) => last_error = Some(err),
            }
        }
    }

    if let Some(err) = last_error {
        warn!("No trusted signature verified the release ({err}).");
    }

    Ok(attempted)
}

fn stage_for_install(fetched: &FetchedTriple, primary_name: &str, binary_name: &str, scratch: &std::path::Path) -> Result<ExtractedExecutable, FetchError> {
    let head = {
        let mut file = fs::File::open(&fetched.primary_path)?;
        let mut buffer = [0u8; 512];
        use std::io::Read;
        let read = file.read(&mut buffer)?;
        buffer[..read].to_vec()
    };

    let root = scratch.join("extracted");
    match classify::classify(primary_name, &head) {
        kind if archive::is_unpackable(kind) => {
            let format = match kind {
                classify::AssetKind::Archive(format) => format,
                _ => unreachable!(),
            };
            archive::extract_and_locate(&fetched.primary_path, format, &root, binary_name)
        },
        _ => archive::stage_raw(&fetched.primary_path, &root, &platform_binary_name(binary_name)),
    }
}

#[cfg(windows)]
fn platform_binary_name(binary_name: &str) -> String {
    format!("{binary_name}.exe")
}

#[cfg(not(windows))]
fn platform_binary_name(binary_name: &str) -> String {
    binary_name.to_owned()
}

fn github_token() -> Option<String> {
    std::env::var("GITHUB_TOKEN").ok()
}

/// Prints the one-line summary plus the Evidence dump: digests measured,
/// signers tried, and (when `rejection` is set) the policy requirement
/// that failed. Called both on acceptance and on rejection, so a reject
/// never leaves the operator with only the top-level error message.
fn print_evidence(asset_name: &str, evidence: &Evidence, signers_tried: &[String], rejection: Option<&FetchError>) {
    info!(
        "{asset_name}: sha256={} sha512={} checksum-verified={} signature-verified={} signer={}",
        evidence.sha256_hex(), evidence.sha512_hex(),
        evidence.verified_by_manifest(), evidence.verified_by_signature(),
        evidence.signer.as_deref().unwrap_or("-"),
    );

    if signers_tried.is_empty() {
        info!("{asset_name}: no signatures were attempted.");
    } else {
        info!("{asset_name}: signers tried: {}.", signers_tried.join(", "));
    }

    if let Some(err) = rejection {
        warn!("{asset_name}: failing requirement: {}.", err.kind());
    }
}

fn install_cancellation_handler() -> Arc<AtomicBool> {
    let cancelled = Arc::new(AtomicBool::new(false));
    let flag = cancelled.clone();

    if let Err(e) = ctrlc::set_handler(move || {
        warn!("Received interrupt; finishing the current step and cleaning up...");
        flag.store(true, Ordering::SeqCst);
    }) {
        warn!("Failed to install the interrupt handler: {e}.");
    }

    cancelled
}
