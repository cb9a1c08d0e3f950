//! Signature engine: minisign/Ed25519 and OpenPGP detached
//! signature verification, dispatched on signature filename.

use ed25519_dalek::{Signature as DalekSignature, Verifier, VerifyingKey};
use minisign_verify::{PublicKey as MinisignPublicKey, Signature as MinisignSignature};
use sequoia_openpgp as openpgp;
use openpgp::cert::Cert;
use openpgp::parse::stream::{DetachedVerifierBuilder, MessageLayer, MessageStructure, VerificationHelper};
use openpgp::parse::Parse;
use openpgp::policy::StandardPolicy;
use openpgp::KeyHandle;

use crate::error::FetchError;
use crate::evidence::Evidence;

/// Public keys trusted for minisign/raw-Ed25519 verification: keys
/// embedded in the binary at compile time, known by key-id, followed by
/// any the caller supplied on the command line or via `SFETCH_PUBKEYS`.
/// This binary carries no vendor-specific embedded key by default - it is
/// a generic fetcher, not bound to one project's release key - so the
/// embedded table starts empty and callers are expected to supply trust
/// via `--pubkey`.
pub const EMBEDDED_MINISIGN_KEYS: &[&str] = &[];

pub struct TrustedKeys<'a> {
    pub minisign_keys: Vec<&'a str>,
    pub openpgp_keyring: Option<&'a [u8]>,
}

/// Merges the repeatable `--pubkey` flags with `SFETCH_PUBKEYS`, a
/// platform path-list (`:`-separated on Unix, `;`-separated on Windows)
/// of additional trusted keys, appended after the command-line ones.
pub fn trusted_minisign_keys(cli_pubkeys: &[String]) -> Vec<String> {
    let mut keys: Vec<String> = cli_pubkeys.to_vec();

    if let Some(value) = std::env::var_os("SFETCH_PUBKEYS") {
        for entry in std::env::split_paths(&value) {
            if let Some(key) = entry.to_str() {
                keys.push(key.to_owned());
            }
        }
    }

    keys
}

/// Dispatches on the signature asset's filename.
pub fn verify(
    signature_filename: &str,
    signature_bytes: &[u8],
    payload: &[u8],
    keys: &TrustedKeys,
    evidence: &mut Evidence,
) -> Result<(), FetchError> {
    let lower = signature_filename.to_ascii_lowercase();

    if lower.ends_with(".minisig") {
        verify_minisign(signature_bytes, payload, &keys.minisign_keys, evidence)
    } else if lower.ends_with(".sig.ed25519") {
        verify_raw_ed25519(signature_bytes, payload, &keys.minisign_keys, evidence)
    } else if lower.ends_with(".asc") || lower.ends_with(".gpg") || lower.ends_with(".sig.asc") {
        verify_openpgp(signature_bytes, payload, keys.openpgp_keyring, evidence)
    } else if lower.ends_with(".sig") {
        if signature_bytes.starts_with(b"-----BEGIN PGP SIGNATURE-----") {
            verify_openpgp(signature_bytes, payload, keys.openpgp_keyring, evidence)
        } else {
            verify_raw_ed25519(signature_bytes, payload, &keys.minisign_keys, evidence)
        }
    } else {
        Err(FetchError::BadSignature(format!("unrecognized signature file type: {signature_filename:?}")))
    }
}

fn verify_minisign(signature_bytes: &[u8], payload: &[u8], minisign_keys: &[&str], evidence: &mut Evidence) -> Result<(), FetchError> {
    let signature_text = std::str::from_utf8(signature_bytes)
        .map_err(|e| FetchError::BadSignature(format!("signature is not valid UTF-8: {e}")))?;
    let signature = MinisignSignature::decode(signature_text)
        .map_err(|e| FetchError::BadSignature(format!("malformed minisign signature: {e}")))?;

    let trusted = EMBEDDED_MINISIGN_KEYS.iter().chain(minisign_keys.iter());
    let mut attempted = false;

    for encoded_key in trusted {
        let Ok(public_key) = MinisignPublicKey::from_base64(encoded_key) else { continue };
        attempted = true;

        if public_key.verify(payload, &signature, false).is_ok() {
            evidence.mark_signature_verified(Some(public_key.to_base64()));
            return Ok(());
        }
    }

    if attempted {
        Err(FetchError::BadSignature("no trusted minisign key accepted the signature".into()))
    } else {
        Err(FetchError::UnknownSigner)
    }
}

fn verify_raw_ed25519(signature_bytes: &[u8], payload: &[u8], minisign_keys: &[&str], evidence: &mut Evidence) -> Result<(), FetchError> {
    let signature_bytes: [u8; 64] = signature_bytes.try_into()
        .map_err(|_| FetchError::BadSignature("raw Ed25519 signature must be 64 bytes".into()))?;
    let signature = DalekSignature::from_bytes(&signature_bytes);

    let mut attempted = false;

    for encoded_key in minisign_keys {
        let Ok(decoded) = minisign_key_bytes(encoded_key) else { continue };
        let Ok(verifying_key) = VerifyingKey::from_bytes(&decoded) else { continue };
        attempted = true;

        if verifying_key.verify(payload, &signature).is_ok() {
            evidence.mark_signature_verified(Some(hex::encode(verifying_key.to_bytes())));
            return Ok(());
        }
    }

    if attempted {
        Err(FetchError::BadSignature("no trusted Ed25519 key accepted the signature".into()))
    } else {
        Err(FetchError::UnknownSigner)
    }
}

/// Minisign-encoded public keys carry a 2-byte algorithm tag and 8-byte
/// key-id ahead of the raw 32-byte Ed25519 key.
fn minisign_key_bytes(encoded: &str) -> Result<[u8; 32], ()> {
    let raw = MinisignPublicKey::from_base64(encoded).map_err(|_| ())?;
    raw.to_bytes().try_into().map_err(|_| ())
}

fn verify_openpgp(signature_bytes: &[u8], payload: &[u8], keyring: Option<&[u8]>, evidence: &mut Evidence) -> Result<(), FetchError> {
    let keyring = keyring.ok_or(FetchError::UnknownSigner)?;
    let certs = openpgp::cert::CertParser::from_bytes(keyring)
        .map_err(|e| FetchError::BadSignature(format!("malformed keyring: {e}")))?
        .filter_map(Result::ok)
        .collect::<Vec<Cert>>();

    if certs.is_empty() {
        return Err(FetchError::UnknownSigner);
    }

    let policy = StandardPolicy::new();
    let mut helper = Helper { certs: &certs, signer: None };

    let mut verifier = DetachedVerifierBuilder::from_bytes(signature_bytes)
        .map_err(|e| FetchError::BadSignature(format!("malformed OpenPGP signature: {e}")))?
        .with_policy(&policy, None, &mut helper)
        .map_err(|e| classify_openpgp_error(&e))?;

    verifier.verify_bytes(payload).map_err(|e| classify_openpgp_error(&e))?;

    evidence.mark_signature_verified(helper.signer.take());
    Ok(())
}

struct Helper<'a> {
    certs: &'a [Cert],
    signer: Option<String>,
}

impl VerificationHelper for Helper<'_> {
    fn get_certs(&mut self, _ids: &[KeyHandle]) -> openpgp::Result<Vec<Cert>> {
        Ok(self.certs.to_vec())
    }

    fn check(&mut self, structure: MessageStructure) -> openpgp::Result<()> {
        for layer in structure.into_iter() {
            if let MessageLayer::SignatureGroup { results } = layer {
                for result in results {
                    let verification = result?;
                    self.signer = Some(hex::encode(verification.sig.issuer_fingerprints().next()
                        .map(|fp| fp.as_bytes().to_vec())
                        .unwrap_or_default()));
                }
            }
        }
        Ok(())
    }
}

fn classify_openpgp_error(err: &openpgp::Error) -> FetchError {
    classify_openpgp_message(&err.to_string())
}

fn classify_openpgp_message(message: &str) -> FetchError {
    let lower = message.to_ascii_lowercase();

    if lower.contains("expired") {
        FetchError::ExpiredKey
    } else if lower.contains("revoked") {
        FetchError::RevokedKey
    } else if lower.contains("no matching cert") || lower.contains("no key") {
        FetchError::UnknownSigner
    } else {
        FetchError::BadSignature(message.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use ed25519_dalek::{Signer, SigningKey};

    use super::*;

    fn evidence() -> Evidence {
        Evidence::new([0u8; 32], [0u8; 64])
    }

    /// Standard (RFC 4648, padded) base64 encode, written by hand so the
    /// test fixtures below don't need a base64 crate dependency of their
    /// own. `blob` here is always 42 bytes (divisible by 3), so no padding
    /// logic is exercised.
    fn base64_encode(blob: &[u8]) -> String {
        const ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
        let mut out = String::new();
        for chunk in blob.chunks(3) {
            let b0 = chunk[0] as u32;
            let b1 = *chunk.get(1).unwrap_or(&0) as u32;
            let b2 = *chunk.get(2).unwrap_or(&0) as u32;
            let n = (b0 << 16) | (b1 << 8) | b2;
            out.push(ALPHABET[((n >> 18) & 0x3f) as usize] as char);
            out.push(ALPHABET[((n >> 12) & 0x3f) as usize] as char);
            out.push(if chunk.len() > 1 { ALPHABET[((n >> 6) & 0x3f) as usize] as char } else { '=' });
            out.push(if chunk.len() > 2 { ALPHABET[(n & 0x3f) as usize] as char } else { '=' });
        }
        out
    }

    /// Builds a minisign-format public key string (2-byte "Ed" tag, 8-byte
    /// arbitrary key-id, 32-byte raw key) around a raw Ed25519 verifying
    /// key, the same shape `minisign_key_bytes` expects to unwrap.
    fn minisign_encoded_key(verifying_key: &VerifyingKey) -> String {
        let mut blob = Vec::with_capacity(42);
        blob.extend_from_slice(b"Ed");
        blob.extend_from_slice(&[0u8; 8]);
        blob.extend_from_slice(verifying_key.as_bytes());
        base64_encode(&blob)
    }

    // Both cases live in one test (rather than two `#[test]` fns) because
    // `SFETCH_PUBKEYS` is a process-global; cargo runs tests in parallel by
    // default, and a second test toggling the same var mid-assertion would
    // be a real race rather than a hypothetical one.
    #[test]
    fn trusted_minisign_keys_merges_cli_and_env() {
        std::env::remove_var("SFETCH_PUBKEYS");
        let cli_only = trusted_minisign_keys(&["clikey".to_owned()]);
        assert_eq!(cli_only, vec!["clikey"]);

        std::env::set_var("SFETCH_PUBKEYS", "envkey-one:envkey-two");
        let merged = trusted_minisign_keys(&["clikey".to_owned()]);
        std::env::remove_var("SFETCH_PUBKEYS");

        assert_eq!(merged, vec!["clikey", "envkey-one", "envkey-two"]);
    }

    #[test]
    fn raw_ed25519_accepts_signature_from_trusted_key() {
        let signing_key = SigningKey::from_bytes(&[7u8; 32]);
        let verifying_key = signing_key.verifying_key();
        let payload = b"sfetch-linux-amd64.tar.gz";
        let signature = signing_key.sign(payload);

        let encoded_key = minisign_encoded_key(&verifying_key);
        let mut ev = evidence();
        verify_raw_ed25519(&signature.to_bytes(), payload, &[encoded_key.as_str()], &mut ev).unwrap();
        assert!(ev.verified_by_signature());
    }

    #[test]
    fn raw_ed25519_rejects_signature_from_wrong_key() {
        let signing_key = SigningKey::from_bytes(&[7u8; 32]);
        let other_key = SigningKey::from_bytes(&[9u8; 32]);
        let payload = b"sfetch-linux-amd64.tar.gz";
        let signature = signing_key.sign(payload);

        let encoded_key = minisign_encoded_key(&other_key.verifying_key());
        let mut ev = evidence();
        let err = verify_raw_ed25519(&signature.to_bytes(), payload, &[encoded_key.as_str()], &mut ev).unwrap_err();
        assert_matches::assert_matches!(err, FetchError::BadSignature(_));
    }

    #[test]
    fn raw_ed25519_with_no_keys_is_unknown_signer() {
        let signing_key = SigningKey::from_bytes(&[7u8; 32]);
        let payload = b"sfetch-linux-amd64.tar.gz";
        let signature = signing_key.sign(payload);

        let mut ev = evidence();
        let err = verify_raw_ed25519(&signature.to_bytes(), payload, &[], &mut ev).unwrap_err();
        assert_matches::assert_matches!(err, FetchError::UnknownSigner);
    }

    #[test]
    fn raw_ed25519_rejects_wrong_length_signature() {
        let mut ev = evidence();
        let err = verify_raw_ed25519(b"too-short", b"payload", &["anykey"], &mut ev).unwrap_err();
        assert_matches::assert_matches!(err, FetchError::BadSignature(_));
    }

    #[test]
    fn verify_dispatches_dot_sig_ed25519_to_raw_ed25519() {
        let signing_key = SigningKey::from_bytes(&[7u8; 32]);
        let payload = b"sfetch-linux-amd64.tar.gz";
        let signature = signing_key.sign(payload);
        let encoded_key = minisign_encoded_key(&signing_key.verifying_key());

        let keys = TrustedKeys { minisign_keys: vec![encoded_key.as_str()], openpgp_keyring: None };
        let mut ev = evidence();
        verify("sfetch-linux-amd64.tar.gz.sig.ed25519", &signature.to_bytes(), payload, &keys, &mut ev).unwrap();
        assert!(ev.verified_by_signature());
    }

    #[test]
    fn verify_dispatches_plain_dot_sig_without_pgp_banner_to_raw_ed25519() {
        let signing_key = SigningKey::from_bytes(&[7u8; 32]);
        let payload = b"sfetch-linux-amd64.tar.gz";
        let signature = signing_key.sign(payload);
        let encoded_key = minisign_encoded_key(&signing_key.verifying_key());

        let keys = TrustedKeys { minisign_keys: vec![encoded_key.as_str()], openpgp_keyring: None };
        let mut ev = evidence();
        verify("sfetch-linux-amd64.tar.gz.sig", &signature.to_bytes(), payload, &keys, &mut ev).unwrap();
        assert!(ev.verified_by_signature());
    }

    #[test]
    fn verify_rejects_unrecognized_extension() {
        let keys = TrustedKeys { minisign_keys: vec![], openpgp_keyring: None };
        let mut ev = evidence();
        let err = verify("sfetch-linux-amd64.tar.gz.xyz", b"", b"", &keys, &mut ev).unwrap_err();
        assert_matches::assert_matches!(err, FetchError::BadSignature(_));
    }

    #[test]
    fn minisign_without_trusted_keys_is_unknown_signer() {
        let mut ev = evidence();
        let err = verify_minisign(b"not even a signature", b"payload", &[], &mut ev).unwrap_err();
        assert_matches::assert_matches!(err, FetchError::UnknownSigner);
    }

    #[test]
    fn openpgp_with_no_keyring_is_unknown_signer() {
        let mut ev = evidence();
        let err = verify_openpgp(b"signature", b"payload", None, &mut ev).unwrap_err();
        assert_matches::assert_matches!(err, FetchError::UnknownSigner);
    }

    #[test]
    fn classifies_expired_revoked_and_unknown_signer_messages() {
        assert_matches::assert_matches!(classify_openpgp_message("Key is Expired"), FetchError::ExpiredKey);
        assert_matches::assert_matches!(classify_openpgp_message("certificate is Revoked"), FetchError::RevokedKey);
        assert_matches::assert_matches!(classify_openpgp_message("no matching cert found"), FetchError::UnknownSigner);
        assert_matches::assert_matches!(classify_openpgp_message("no key for this signature"), FetchError::UnknownSigner);
        assert_matches::assert_matches!(classify_openpgp_message("some other failure"), FetchError::BadSignature(_));
    }
}
