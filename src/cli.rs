use std::path::PathBuf;

use clap::{Arg, ArgAction, Command, value_parser};
use log::Level;

use crate::core::GenericResult;

/// Platform-appropriate default install directory, expanded through the
/// same `shellexpand::tilde` call the explicit `--dest-dir` value goes
/// through below.
#[cfg(windows)]
const DEFAULT_DEST_DIR: &str = "~\\bin";
#[cfg(not(windows))]
const DEFAULT_DEST_DIR: &str = "~/.local/bin";

macro_rules! long_about {
    ($text:expr) => {{
        textwrap::fill(indoc::indoc!($text).trim_matches('\n'), 100)
    }}
}

pub struct CliArgs {
    pub log_level: Level,
    pub repo: String,
    pub tag: Option<String>,
    pub dest_dir: PathBuf,
    pub binary_name: Option<String>,
    pub repo_config: Option<PathBuf>,
    pub pubkeys: Vec<String>,
    pub keyring: Option<PathBuf>,
    pub require_signature: bool,
    pub require_checksum: bool,
    pub allow_unsigned: bool,
    pub dry_run: bool,
    pub verify_minisign_pubkey: Option<String>,
}

pub fn parse_args() -> GenericResult<CliArgs> {
    let matches = Command::new(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .long_about(long_about!("
            Resolves a GitHub release, downloads its matching asset together with
            any checksum manifest and signatures it can find, verifies them
            against the given trust requirements, and installs the resulting
            binary. Running it again with --repo pointing at its own release
            performs a self-update of the currently running binary.
        "))

        .dont_collapse_args_in_usage(true)
        .help_expected(true)

        .arg(Arg::new("repo")
            .value_name("OWNER/REPO")
            .required_unless_present("verify_minisign_pubkey")
            .help("GitHub repository to fetch a release binary from"))

        .arg(Arg::new("tag").short('t').long("tag")
            .value_name("TAG")
            .default_value("latest")
            .help("Release tag to fetch"))

        .arg(Arg::new("dest_dir").short('d').long("dest-dir")
            .value_name("PATH")
            .default_value(DEFAULT_DEST_DIR)
            .help("Directory to install the resolved binary into [default: platform user bin directory]"))

        .arg(Arg::new("binary_name").short('b').long("binary-name")
            .value_name("NAME")
            .help("Name of the binary inside the release [default: the repository name]"))

        .arg(Arg::new("repo_config").long("repo-config")
            .value_name("PATH")
            .value_parser(value_parser!(PathBuf))
            .help("YAML file overriding the asset/checksum/signature template tables"))

        .arg(Arg::new("pubkey").long("pubkey")
            .value_name("KEY")
            .action(ArgAction::Append)
            .help("Trusted minisign/Ed25519 public key, base64-encoded (repeatable)"))

        .arg(Arg::new("keyring").long("keyring")
            .value_name("PATH")
            .value_parser(value_parser!(PathBuf))
            .help("OpenPGP keyring file trusted for signature verification"))

        .arg(Arg::new("require_signature").long("require-signature")
            .action(ArgAction::SetTrue)
            .help("Reject the release unless a trusted signature verifies it"))

        .arg(Arg::new("require_checksum").long("require-checksum")
            .action(ArgAction::SetTrue)
            .help("Reject the release unless a checksum manifest verifies it"))

        .arg(Arg::new("allow_unsigned").long("allow-unsigned")
            .action(ArgAction::SetTrue)
            .help("Downgrade a missing required signature to a warning instead of rejecting"))

        .arg(Arg::new("dry_run").long("dry-run")
            .action(ArgAction::SetTrue)
            .help("Resolve, fetch and verify, but stop short of installing"))

        .arg(Arg::new("verify_minisign_pubkey").long("verify-minisign-pubkey")
            .value_name("KEY")
            .help("Check that KEY parses as a minisign public key, then exit"))

        .arg(Arg::new("verbose")
            .short('v').long("verbose")
            .action(ArgAction::Count)
            .help("Set verbosity level"))

        .get_matches();

    let log_level = match matches.get_count("verbose") {
        0 => log::Level::Info,
        1 => log::Level::Debug,
        2 => log::Level::Trace,
        _ => return Err!("Invalid verbosity level"),
    };

    let tag = matches.get_one::<String>("tag").cloned().filter(|tag| tag != "latest");

    Ok(CliArgs {
        log_level,
        repo: matches.get_one::<String>("repo").cloned().unwrap_or_default(),
        tag,
        dest_dir: PathBuf::from(shellexpand::tilde(matches.get_one::<String>("dest_dir").unwrap()).to_string()),
        binary_name: matches.get_one::<String>("binary_name").cloned(),
        repo_config: matches.get_one::<PathBuf>("repo_config").cloned(),
        pubkeys: matches.get_many::<String>("pubkey").map(|values| values.cloned().collect()).unwrap_or_default(),
        keyring: matches.get_one::<PathBuf>("keyring").cloned(),
        require_signature: matches.get_flag("require_signature"),
        require_checksum: matches.get_flag("require_checksum"),
        allow_unsigned: matches.get_flag("allow_unsigned"),
        dry_run: matches.get_flag("dry_run"),
        verify_minisign_pubkey: matches.get_one::<String>("verify_minisign_pubkey").cloned(),
    })
}
