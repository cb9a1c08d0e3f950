use std::fmt::{self, Display, Formatter};

use crate::core::GenericResult;

/// `owner/repo` plus the tag the caller asked for.
#[derive(Debug, Clone)]
pub struct RepoRef {
    pub owner: String,
    pub repo: String,
    pub tag: TagRef,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagRef {
    Concrete(String),
    Latest,
}

impl RepoRef {
    pub fn parse(spec: &str, tag: Option<&str>) -> GenericResult<RepoRef> {
        let mut parts = spec.splitn(3, '/');
        let owner = parts.next().filter(|s| !s.is_empty());
        let repo = parts.next().filter(|s| !s.is_empty());
        let extra = parts.next();

        let (owner, repo) = match (owner, repo, extra) {
            (Some(owner), Some(repo), None) => (owner, repo),
            _ => return Err!("invalid repository reference {spec:?}, expected owner/repo"),
        };

        Ok(RepoRef {
            owner: owner.to_owned(),
            repo: repo.to_owned(),
            tag: match tag {
                None | Some("latest") => TagRef::Latest,
                Some(tag) => TagRef::Concrete(tag.to_owned()),
            },
        })
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

impl Display for TagRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            TagRef::Concrete(tag) => tag.fmt(f),
            TagRef::Latest => "latest".fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_owner_repo() {
        let repo = RepoRef::parse("3leaps/sfetch", Some("v2025.12.20")).unwrap();
        assert_eq!(repo.owner, "3leaps");
        assert_eq!(repo.repo, "sfetch");
        assert_eq!(repo.tag, TagRef::Concrete("v2025.12.20".to_owned()));
    }

    #[test]
    fn defaults_to_latest() {
        let repo = RepoRef::parse("3leaps/sfetch", None).unwrap();
        assert_eq!(repo.tag, TagRef::Latest);
    }

    #[test]
    fn rejects_malformed_spec() {
        assert!(RepoRef::parse("sfetch", None).is_err());
        assert!(RepoRef::parse("/sfetch", None).is_err());
    }

    #[test]
    fn rejects_extra_path_segments() {
        assert!(RepoRef::parse("3leaps/sfetch/extra", None).is_err());
    }
}
