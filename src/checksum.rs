//! Checksum engine: parses coreutils-style manifests and confirms
//! the primary asset's measured digest appears under its filename.

use std::path::Path;

use crate::error::FetchError;
use crate::evidence::Evidence;

struct ManifestLine {
    digest: String,
    filename: String,
}

/// Parses one line. Accepts the three shapes below; returns
/// `None` for lines that don't match any of them (tolerated as long as at
/// least one line in the manifest parses). The digest's length is not
/// checked here - a syntactically well-formed line with an unsupported
/// digest strength (e.g. a 40-char SHA-1 entry) still parses; it is only
/// skipped later, when matches are filtered down to strengths this engine
/// actually verifies.
fn parse_line(line: &str) -> Option<ManifestLine> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    // BSD-tag style: "filename: digest"
    if let Some((filename, digest)) = line.split_once(": ") {
        if is_hex(digest.trim()) {
            return Some(ManifestLine { digest: digest.trim().to_ascii_lowercase(), filename: filename.trim().to_owned() });
        }
    }

    // coreutils style: "digest  filename" or "digest *filename"
    let mut parts = line.splitn(2, char::is_whitespace);
    let digest = parts.next()?;
    let rest = parts.next()?.trim_start();

    if !is_hex(digest) {
        return None;
    }

    let filename = rest.strip_prefix('*').unwrap_or(rest);
    if filename.is_empty() {
        return None;
    }

    Some(ManifestLine { digest: digest.to_ascii_lowercase(), filename: filename.to_owned() })
}

/// Shape check only: a non-empty, even-length run of hex digits. Whether
/// the length is a strength this engine verifies (64 = SHA-256, 128 =
/// SHA-512) is decided separately.
fn is_hex(text: &str) -> bool {
    !text.is_empty() && text.len() % 2 == 0 && text.bytes().all(|b| b.is_ascii_hexdigit())
}

fn final_component(path: &str) -> &str {
    Path::new(path).file_name().and_then(|name| name.to_str()).unwrap_or(path)
}

/// Verifies that `manifest` contains exactly one matching, consistent
/// entry for `primary_name`, and that it agrees with the digest measured
/// in `evidence`. Marks `evidence.verified_by_manifest` on success.
pub fn verify(manifest: &str, primary_name: &str, evidence: &mut Evidence) -> Result<(), FetchError> {
    let mut parsed_any = false;
    let mut matches: Vec<ManifestLine> = Vec::new();

    for line in manifest.lines() {
        match parse_line(line) {
            Some(entry) => {
                parsed_any = true;
                if final_component(&entry.filename) == primary_name {
                    matches.push(entry);
                }
            },
            None => continue,
        }
    }

    if !parsed_any {
        return Err(FetchError::ManifestMalformed("no line in the manifest could be parsed".to_owned()));
    }

    if matches.is_empty() {
        return Err(FetchError::UnverifiedChecksum);
    }

    // Group by digest strength so a SHA-256 line and a SHA-512 line for
    // the same filename don't get treated as a conflict. Strengths other
    // than SHA-256/SHA-512 (e.g. a 40-char SHA-1 entry) are skipped here,
    // not an error - they just don't contribute anything to verify against.
    let mut sha256_digests: Vec<&str> = Vec::new();
    let mut sha512_digests: Vec<&str> = Vec::new();

    for entry in &matches {
        match entry.digest.len() {
            64 => sha256_digests.push(&entry.digest),
            128 => sha512_digests.push(&entry.digest),
            _ => continue,
        }
    }

    sha256_digests.sort_unstable();
    sha256_digests.dedup();
    sha512_digests.sort_unstable();
    sha512_digests.dedup();

    if sha256_digests.len() > 1 || sha512_digests.len() > 1 {
        return Err(FetchError::ManifestInconsistent(format!(
            "multiple divergent digests found for {primary_name:?}")));
    }

    let sha256_matches = sha256_digests.first().is_some_and(|digest| *digest == evidence.sha256_hex());
    let sha512_matches = sha512_digests.first().is_some_and(|digest| *digest == evidence.sha512_hex());

    if !sha256_digests.is_empty() && !sha256_matches {
        return Err(FetchError::UnverifiedChecksum);
    }
    if !sha512_digests.is_empty() && !sha512_matches {
        return Err(FetchError::UnverifiedChecksum);
    }
    if sha256_digests.is_empty() && sha512_digests.is_empty() {
        return Err(FetchError::UnverifiedChecksum);
    }

    evidence.mark_manifest_verified();
    Ok(())
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn evidence_for(sha256_hex: &str) -> Evidence {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(sha256_hex, &mut bytes).unwrap();
        Evidence::new(bytes, [0u8; 64])
    }

    #[rstest]
    #[case::coreutils("{digest}  sfetch-linux-amd64.tar.gz\n")]
    #[case::binary_mode("{digest} *sfetch-linux-amd64.tar.gz\n")]
    #[case::bsd_tag("sfetch-linux-amd64.tar.gz: {digest}\n")]
    fn verifies_manifest_line_shape(#[case] template: &str) {
        let digest = "a".repeat(64);
        let manifest = template.replace("{digest}", &digest);
        let mut evidence = evidence_for(&digest);
        verify(&manifest, "sfetch-linux-amd64.tar.gz", &mut evidence).unwrap();
        assert!(evidence.verified_by_manifest());
    }

    #[test]
    fn rejects_mismatched_digest() {
        let manifest = format!("{}  sfetch-linux-amd64.tar.gz\n", "a".repeat(64));
        let mut evidence = evidence_for(&"b".repeat(64));
        let err = verify(&manifest, "sfetch-linux-amd64.tar.gz", &mut evidence).unwrap_err();
        assert_matches::assert_matches!(err, FetchError::UnverifiedChecksum);
    }

    #[test]
    fn rejects_divergent_duplicate_entries() {
        let manifest = format!(
            "{}  sfetch-linux-amd64.tar.gz\n{}  sfetch-linux-amd64.tar.gz\n",
            "a".repeat(64), "b".repeat(64));
        let mut evidence = evidence_for(&"a".repeat(64));
        let err = verify(&manifest, "sfetch-linux-amd64.tar.gz", &mut evidence).unwrap_err();
        assert_matches::assert_matches!(err, FetchError::ManifestInconsistent(_));
    }

    #[test]
    fn tolerates_unparseable_lines_with_at_least_one_good_line() {
        let digest = "d".repeat(64);
        let manifest = format!("garbage line with no digest\n{digest}  sfetch-linux-amd64.tar.gz\n");
        let mut evidence = evidence_for(&digest);
        verify(&manifest, "sfetch-linux-amd64.tar.gz", &mut evidence).unwrap();
    }

    #[test]
    fn rejects_entirely_unparseable_manifest() {
        let mut evidence = evidence_for(&"a".repeat(64));
        let err = verify("not a manifest\njust text\n", "sfetch-linux-amd64.tar.gz", &mut evidence).unwrap_err();
        assert_matches::assert_matches!(err, FetchError::ManifestMalformed(_));
    }

    #[test]
    fn skips_unsupported_digest_strength_instead_of_failing_malformed() {
        // A well-formed SHA-1 (40-char) line parses fine but isn't a
        // strength this engine verifies against; it should fall through to
        // unverified-checksum, not be mistaken for an unparseable manifest.
        let manifest = format!("{}  sfetch-linux-amd64.tar.gz\n", "a".repeat(40));
        let mut evidence = evidence_for(&"b".repeat(64));
        let err = verify(&manifest, "sfetch-linux-amd64.tar.gz", &mut evidence).unwrap_err();
        assert_matches::assert_matches!(err, FetchError::UnverifiedChecksum);
    }
}
