//! The evidence record that accompanies an asset through
//! the pipeline: every stage from the fetcher onward either adds to it or
//! consults it.

use crate::policy::Verdict;

#[derive(Debug, Clone)]
pub struct Evidence {
    pub sha256: [u8; 32],
    pub sha512: [u8; 64],
    verified_by_manifest: bool,
    verified_by_signature: bool,
    pub signer: Option<String>,
    pub verdict: Option<Verdict>,
}

impl Evidence {
    pub fn new(sha256: [u8; 32], sha512: [u8; 64]) -> Evidence {
        Evidence {
            sha256,
            sha512,
            verified_by_manifest: false,
            verified_by_signature: false,
            signer: None,
            verdict: None,
        }
    }

    pub fn verified_by_manifest(&self) -> bool {
        self.verified_by_manifest
    }

    pub fn verified_by_signature(&self) -> bool {
        self.verified_by_signature
    }

    /// Flags only ever transition false -> true, never back.
    pub fn mark_manifest_verified(&mut self) {
        self.verified_by_manifest = true;
    }

    pub fn mark_signature_verified(&mut self, signer: Option<String>) {
        self.verified_by_signature = true;
        if signer.is_some() {
            self.signer = signer;
        }
    }

    pub fn sha256_hex(&self) -> String {
        hex::encode(self.sha256)
    }

    pub fn sha512_hex(&self) -> String {
        hex::encode(self.sha512)
    }
}
