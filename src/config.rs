//! Default and per-repo-override template tables for `RepoConfig`.
//!
//! The defaults cover the common asset-naming conventions seen across
//! GitHub release publishers. A caller can layer an on-disk override file
//! (`--repo-config`, YAML, same shape) on top to extend these tables for a
//! repository with unusual naming - this is the one piece of persistent
//! configuration this system has; it holds no tool list and nothing here
//! survives between invocations beyond the file the caller points at.

use std::fs::File;
use std::path::Path;

use serde_derive::Deserialize;
use validator::Validate;

use crate::core::GenericResult;

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(deny_unknown_fields, default)]
pub struct RepoConfig {
    #[validate(length(min = 1))]
    pub binary_name: String,

    /// First-match-wins, in order.
    pub asset_templates: Vec<String>,
    pub checksum_templates: Vec<String>,
    pub signature_templates: Vec<String>,

    pub prefer_checksum_signature: bool,
}

impl RepoConfig {
    pub fn defaults(binary_name: &str) -> RepoConfig {
        RepoConfig {
            binary_name: binary_name.to_owned(),
            asset_templates: default_asset_templates(),
            checksum_templates: default_checksum_templates(),
            signature_templates: default_signature_templates(),
            prefer_checksum_signature: true,
        }
    }

    /// Loads an override file and prepends its templates ahead of the
    /// defaults (first-match-wins means caller overrides must come
    /// first).
    pub fn load_override(path: &Path, binary_name: &str) -> GenericResult<RepoConfig> {
        let overrides: RepoConfigOverride = serde_yaml::from_reader(File::open(path)?)?;
        overrides.validate()?;

        let mut config = RepoConfig::defaults(binary_name);
        if let Some(name) = overrides.binary_name {
            config.binary_name = name;
        }

        config.asset_templates = chain(overrides.asset_templates, config.asset_templates);
        config.checksum_templates = chain(overrides.checksum_templates, config.checksum_templates);
        config.signature_templates = chain(overrides.signature_templates, config.signature_templates);
        if let Some(prefer) = overrides.prefer_checksum_signature {
            config.prefer_checksum_signature = prefer;
        }

        Ok(config)
    }
}

impl Default for RepoConfig {
    fn default() -> RepoConfig {
        RepoConfig::defaults("")
    }
}

fn chain(overrides: Vec<String>, defaults: Vec<String>) -> Vec<String> {
    overrides.into_iter().chain(defaults).collect()
}

#[derive(Deserialize, Validate)]
#[serde(deny_unknown_fields)]
struct RepoConfigOverride {
    binary_name: Option<String>,
    #[serde(default)]
    asset_templates: Vec<String>,
    #[serde(default)]
    checksum_templates: Vec<String>,
    #[serde(default)]
    signature_templates: Vec<String>,
    prefer_checksum_signature: Option<bool>,
}

fn default_asset_templates() -> Vec<String> {
    [
        "{{binary}}-{{osToken}}-{{archToken}}.tar.gz",
        "{{binary}}-{{osToken}}-{{archToken}}.tar.xz",
        "{{binary}}-{{osToken}}-{{archToken}}.tar.bz2",
        "{{binary}}-{{osToken}}-{{archToken}}.zip",
        "{{binary}}_{{versionNoPrefix}}_{{osToken}}_{{archToken}}.tar.gz",
        "{{binary}}-{{version}}-{{osToken}}-{{archToken}}.tar.gz",
        "{{binary}}.{{osToken}}-{{archToken}}.tar.gz",
        "{{binary}}-{{osToken}}-{{archToken}}",
        "{{binary}}.{{osToken}}.{{archToken}}",
        "{{binary}}_{{osToken}}_{{archToken}}",
    ].into_iter().map(String::from).collect()
}

fn default_checksum_templates() -> Vec<String> {
    [
        "{{asset}}.sha256",
        "{{asset}}.sha512",
        "{{asset}}.sha256sum",
        "SHA256SUMS",
        "SHA256SUMS.txt",
        "SHA2-512SUMS",
        "checksums.txt",
        "CHECKSUMS",
        "checksums.sha256",
    ].into_iter().map(String::from).collect()
}

fn default_signature_templates() -> Vec<String> {
    [
        "{{asset}}.minisig",
        "{{asset}}.sig.ed25519",
        "{{asset}}.sig",
        "{{asset}}.asc",
    ].into_iter().map(String::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_ordered_and_non_empty() {
        let config = RepoConfig::defaults("sfetch");
        assert!(!config.asset_templates.is_empty());
        assert_eq!(config.asset_templates[0], "{{binary}}-{{osToken}}-{{archToken}}.tar.gz");
        assert!(config.prefer_checksum_signature);
    }
}
