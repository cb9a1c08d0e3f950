use std::fmt::{self, Display, Formatter};
use std::time::Duration;

/// Tagged error kinds for the verifying fetch pipeline.
///
/// Unlike the boxed, string-shaped errors used at the CLI boundary (see
/// `core::GenericError`), every failure the pipeline itself can produce is a
/// distinct variant so that `main` can map it to one of the exit codes
/// below without re-parsing a message.
#[derive(Debug)]
pub enum FetchError {
    Usage(String),
    ResolveNotFound(String),
    ResolveInconsistent { requested: String, got: String },
    Transport(String),
    RateLimited { retry_after: Option<Duration> },
    Auth(String),
    TooLarge { limit: u64 },
    NoMatchForPlatform,
    ShortRead { expected: u64, got: u64 },
    ManifestMalformed(String),
    ManifestInconsistent(String),
    UnverifiedChecksum,
    BadSignature(String),
    UnknownSigner,
    ExpiredKey,
    RevokedKey,
    UnverifiedSignature,
    ArchiveBomb(String),
    ArchiveMalformed(String),
    AmbiguousExecutable(String),
    InstallDenied(String),
    SelfUpdate(String),
    Internal(String),
}

impl FetchError {
    /// Exit code mapping per the CLI contract: 0 success, 1 generic, 2
    /// usage, 3 resolve/not-found, 4 verification failure, 5 install
    /// failure, 6 rate-limited.
    pub fn exit_code(&self) -> u8 {
        use FetchError::*;
        match self {
            Usage(_) => 2,
            ResolveNotFound(_) | ResolveInconsistent { .. } => 3,
            RateLimited { .. } => 6,
            ManifestMalformed(_) | ManifestInconsistent(_) | UnverifiedChecksum
                | BadSignature(_) | UnknownSigner | ExpiredKey | RevokedKey
                | UnverifiedSignature | ArchiveBomb(_) | ArchiveMalformed(_)
                | AmbiguousExecutable(_) => 4,
            InstallDenied(_) | SelfUpdate(_) => 5,
            Transport(_) | Auth(_) | TooLarge { .. } | NoMatchForPlatform
                | ShortRead { .. } | Internal(_) => 1,
        }
    }

    /// A short machine-readable kind tag, used in the Evidence dump printed
    /// on rejection.
    pub fn kind(&self) -> &'static str {
        use FetchError::*;
        match self {
            Usage(_) => "usage",
            ResolveNotFound(_) => "resolve-not-found",
            ResolveInconsistent { .. } => "resolve-inconsistent",
            Transport(_) => "transport",
            RateLimited { .. } => "rate-limited",
            Auth(_) => "auth",
            TooLarge { .. } => "too-large",
            NoMatchForPlatform => "no-match-for-platform",
            ShortRead { .. } => "short-read",
            ManifestMalformed(_) => "manifest-malformed",
            ManifestInconsistent(_) => "manifest-inconsistent",
            UnverifiedChecksum => "unverified-checksum",
            BadSignature(_) => "bad-signature",
            UnknownSigner => "unknown-signer",
            ExpiredKey => "expired-key",
            RevokedKey => "revoked-key",
            UnverifiedSignature => "unverified-signature",
            ArchiveBomb(_) => "archive-bomb",
            ArchiveMalformed(_) => "archive-malformed",
            AmbiguousExecutable(_) => "ambiguous-executable",
            InstallDenied(_) => "install-denied",
            SelfUpdate(_) => "self-update",
            Internal(_) => "internal",
        }
    }
}

impl Display for FetchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        use FetchError::*;
        match self {
            Usage(msg) => write!(f, "{msg}"),
            ResolveNotFound(project) => write!(f, "{project} has no matching release"),
            ResolveInconsistent { requested, got } => write!(
                f, "the release host returned tag {got:?} for requested tag {requested:?}"),
            Transport(msg) => write!(f, "transport error: {msg}"),
            RateLimited { retry_after } => match retry_after {
                Some(duration) => write!(f, "rate-limited, resets in {}s", duration.as_secs()),
                None => write!(f, "rate-limited"),
            },
            Auth(msg) => write!(f, "authentication error: {msg}"),
            TooLarge { limit } => write!(f, "response exceeded the {limit} byte ceiling"),
            NoMatchForPlatform => write!(f, "no asset matches this platform"),
            ShortRead { expected, got } => write!(
                f, "downloaded {got} bytes, expected {expected}"),
            ManifestMalformed(msg) => write!(f, "checksum manifest is malformed: {msg}"),
            ManifestInconsistent(msg) => write!(f, "checksum manifest is inconsistent: {msg}"),
            UnverifiedChecksum => write!(f, "no checksum manifest entry verifies the asset"),
            BadSignature(msg) => write!(f, "signature verification failed: {msg}"),
            UnknownSigner => write!(f, "signature was produced by an untrusted key"),
            ExpiredKey => write!(f, "signing key has expired"),
            RevokedKey => write!(f, "signing key has been revoked"),
            UnverifiedSignature => write!(f, "no trusted signature verifies the asset"),
            ArchiveBomb(msg) => write!(f, "archive exceeds safe extraction limits: {msg}"),
            ArchiveMalformed(msg) => write!(f, "archive is malformed: {msg}"),
            AmbiguousExecutable(msg) => write!(f, "could not identify a single executable: {msg}"),
            InstallDenied(msg) => write!(f, "install denied: {msg}"),
            SelfUpdate(msg) => write!(f, "self-update failed: {msg}"),
            Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for FetchError {}

impl From<std::io::Error> for FetchError {
    fn from(err: std::io::Error) -> FetchError {
        FetchError::Internal(err.to_string())
    }
}
