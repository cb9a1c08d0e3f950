//! Trust policy: combines checksum/signature evidence per
//! configurable rules into a single accept/reject verdict.

use crate::error::FetchError;
use crate::evidence::Evidence;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    /// Set when acceptance rests on neither a verified checksum nor a
    /// verified signature (either because nothing was required, or
    /// because `allow_unsigned` downgraded a missing requirement).
    pub warning: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct PolicyKnobs {
    pub require_checksum: bool,
    pub require_signature: bool,
    pub allow_unsigned: bool,
}

impl Default for PolicyKnobs {
    fn default() -> PolicyKnobs {
        PolicyKnobs { require_checksum: false, require_signature: false, allow_unsigned: false }
    }
}

/// Evaluates the verdict table below and freezes it onto `evidence`.
pub fn evaluate(knobs: &PolicyKnobs, evidence: &mut Evidence) -> Result<Verdict, FetchError> {
    let sig_ok = evidence.verified_by_signature();
    let ck_ok = evidence.verified_by_manifest();

    let verdict = if knobs.require_signature {
        if sig_ok {
            Verdict { warning: false }
        } else if knobs.allow_unsigned {
            Verdict { warning: true }
        } else {
            return Err(FetchError::UnverifiedSignature);
        }
    } else if knobs.require_checksum {
        if ck_ok {
            Verdict { warning: false }
        } else {
            return Err(FetchError::UnverifiedChecksum);
        }
    } else {
        Verdict { warning: !sig_ok && !ck_ok }
    };

    evidence.verdict = Some(verdict);
    Ok(verdict)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evidence() -> Evidence {
        Evidence::new([0u8; 32], [0u8; 64])
    }

    #[test]
    fn accepts_when_signature_required_and_present() {
        let mut e = evidence();
        e.mark_signature_verified(Some("key".into()));
        let knobs = PolicyKnobs { require_signature: true, ..Default::default() };
        assert_eq!(evaluate(&knobs, &mut e).unwrap(), Verdict { warning: false });
    }

    #[test]
    fn rejects_when_signature_required_and_missing() {
        let mut e = evidence();
        let knobs = PolicyKnobs { require_signature: true, ..Default::default() };
        let err = evaluate(&knobs, &mut e).unwrap_err();
        assert_matches::assert_matches!(err, FetchError::UnverifiedSignature);
    }

    #[test]
    fn downgrades_to_warning_when_allow_unsigned() {
        let mut e = evidence();
        let knobs = PolicyKnobs { require_signature: true, allow_unsigned: true, ..Default::default() };
        assert_eq!(evaluate(&knobs, &mut e).unwrap(), Verdict { warning: true });
    }

    #[test]
    fn checksum_alone_is_insufficient_when_signature_required() {
        let mut e = evidence();
        e.mark_manifest_verified();
        let knobs = PolicyKnobs { require_signature: true, ..Default::default() };
        let err = evaluate(&knobs, &mut e).unwrap_err();
        assert_matches::assert_matches!(err, FetchError::UnverifiedSignature);
    }

    #[test]
    fn accepts_on_checksum_when_only_checksum_required() {
        let mut e = evidence();
        e.mark_manifest_verified();
        let knobs = PolicyKnobs { require_checksum: true, ..Default::default() };
        assert_eq!(evaluate(&knobs, &mut e).unwrap(), Verdict { warning: false });
    }

    #[test]
    fn accepts_with_warning_when_nothing_verified_and_nothing_required() {
        let mut e = evidence();
        let knobs = PolicyKnobs::default();
        assert_eq!(evaluate(&knobs, &mut e).unwrap(), Verdict { warning: true });
    }

    #[test]
    fn accepts_without_warning_when_checksum_verified_but_not_required() {
        let mut e = evidence();
        e.mark_manifest_verified();
        let knobs = PolicyKnobs::default();
        assert_eq!(evaluate(&knobs, &mut e).unwrap(), Verdict { warning: false });
    }
}
