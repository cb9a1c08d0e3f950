//! Asset selector: ranks a release's assets against configurable
//! templates and picks one primary asset plus checksum/signature
//! companions.

use std::env::consts;

use globset::{GlobBuilder, GlobMatcher};
use itertools::Itertools;

use crate::classify::{arch_aliases, os_aliases, strip_archive_extension};
use crate::config::RepoConfig;
use crate::error::FetchError;
use crate::github::{Asset, Release};

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum SignatureRole {
    Primary,
    Manifest,
}

pub struct SelectedTriple<'a> {
    pub primary: &'a Asset,
    pub checksum_manifest: Option<&'a Asset>,
    pub signatures: Vec<(SignatureRole, &'a Asset)>,
}

/// Renders the closed placeholder grammar. Not a general templating
/// engine: unknown `{{...}}` sequences are left untouched.
fn render(template: &str, binary: &str, version: &str, os_token: &str, arch_token: &str, asset: &str) -> String {
    let version_no_prefix = version.strip_prefix('v').unwrap_or(version);
    let base = strip_archive_extension(asset);

    template
        .replace("{{binary}}", binary)
        .replace("{{version}}", version)
        .replace("{{versionNoPrefix}}", version_no_prefix)
        .replace("{{osToken}}", os_token)
        .replace("{{archToken}}", arch_token)
        .replace("{{asset}}", asset)
        .replace("{{base}}", base)
}

/// Matches are case-insensitive: publishers mix casings for the same
/// OS/arch token (`sfetch-Darwin-arm64.tar.gz` next to
/// `sfetch-darwin-arm64.tar.gz`), and release order is the tiebreak when
/// more than one casing is present.
fn glob_matcher(pattern: &str) -> Result<GlobMatcher, FetchError> {
    GlobBuilder::new(pattern)
        .literal_separator(true)
        .case_insensitive(true)
        .build()
        .map(|glob| glob.compile_matcher())
        .map_err(|e| FetchError::Internal(format!("invalid asset template {pattern:?}: {e}")))
}

/// Renders `template` against every OS/arch alias combination, in order,
/// deduplicating identical renderings. The templates that don't reference
/// `{{osToken}}`/`{{archToken}}` collapse to a single rendering.
fn render_all(template: &str, binary: &str, version: &str, asset_hint: &str) -> Vec<String> {
    let os_aliases = if os_aliases().is_empty() { &[consts::OS][..] } else { os_aliases() };
    let arch_aliases = if arch_aliases().is_empty() { &[consts::ARCH][..] } else { arch_aliases() };

    os_aliases.iter().cartesian_product(arch_aliases.iter())
        .map(|(os, arch)| render(template, binary, version, os, arch, asset_hint))
        .dedup()
        .collect()
}

pub fn select<'a>(release: &'a Release, config: &RepoConfig, version: &str) -> Result<SelectedTriple<'a>, FetchError> {
    let primary = select_primary(release, config, version)?;
    let checksum_manifest = select_checksum_manifest(release, config, version, &primary.name);
    let signatures = select_signatures(release, config, version, &primary.name,
        checksum_manifest.map(|asset| asset.name.as_str()));

    Ok(SelectedTriple { primary, checksum_manifest, signatures })
}

fn select_primary<'a>(release: &'a Release, config: &RepoConfig, version: &str) -> Result<&'a Asset, FetchError> {
    for template in &config.asset_templates {
        for rendered in render_all(template, &config.binary_name, version, "") {
            let matcher = glob_matcher(&rendered)?;
            if let Some(asset) = release.assets.iter().find(|asset| matcher.is_match(&asset.name)) {
                return Ok(asset);
            }
        }
    }

    Err(FetchError::NoMatchForPlatform)
}

fn select_checksum_manifest<'a>(release: &'a Release, config: &RepoConfig, version: &str, primary_name: &str) -> Option<&'a Asset> {
    for template in &config.checksum_templates {
        for rendered in render_all(template, &config.binary_name, version, primary_name) {
            let Ok(matcher) = glob_matcher(&rendered) else { continue };
            if let Some(asset) = release.assets.iter().find(|asset| matcher.is_match(&asset.name)) {
                return Some(asset);
            }
        }
    }

    None
}

fn select_signatures<'a>(
    release: &'a Release,
    config: &RepoConfig,
    version: &str,
    primary_name: &str,
    manifest_name: Option<&str>,
) -> Vec<(SignatureRole, &'a Asset)> {
    let mut found = Vec::new();

    for (role, name) in [
        (SignatureRole::Primary, Some(primary_name)),
        (SignatureRole::Manifest, manifest_name),
    ] {
        let Some(name) = name else { continue };

        for template in &config.signature_templates {
            for rendered in render_all(template, &config.binary_name, version, name) {
                let Ok(matcher) = glob_matcher(&rendered) else { continue };
                if let Some(asset) = release.assets.iter().find(|asset| matcher.is_match(&asset.name)) {
                    found.push((role, asset));
                    break;
                }
            }
        }
    }

    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_placeholders() {
        let rendered = render("{{binary}}-{{osToken}}-{{archToken}}.tar.gz",
            "sfetch", "v2025.12.20", "linux", "amd64", "");
        assert_eq!(rendered, "sfetch-linux-amd64.tar.gz");
    }

    #[test]
    fn renders_version_no_prefix() {
        let rendered = render("{{binary}}_{{versionNoPrefix}}", "sfetch", "v1.2.3", "linux", "amd64", "");
        assert_eq!(rendered, "sfetch_1.2.3");
    }

    #[test]
    fn renders_asset_and_base() {
        let rendered = render("{{asset}}.sha256", "sfetch", "v1.0.0", "linux", "amd64", "sfetch-linux-amd64.tar.gz");
        assert_eq!(rendered, "sfetch-linux-amd64.tar.gz.sha256");

        let rendered = render("{{base}}.sig", "sfetch", "v1.0.0", "linux", "amd64", "sfetch-linux-amd64.tar.gz");
        assert_eq!(rendered, "sfetch-linux-amd64.sig");
    }

    #[test]
    fn matches_are_case_insensitive() {
        let rendered = render("{{binary}}-{{osToken}}-{{archToken}}.tar.gz",
            "sfetch", "v1.0.0", "darwin", "arm64", "");
        let matcher = glob_matcher(&rendered).unwrap();
        assert!(matcher.is_match("sfetch-Darwin-arm64.tar.gz"));
        assert!(matcher.is_match("sfetch-darwin-arm64.tar.gz"));
    }
}
