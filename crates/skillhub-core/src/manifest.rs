//! Bootstraps the in-process [`InMemoryMetadataStore`] from a small TOML
//! repository manifest.
//!
//! The real system's repository/membership tables live in the SQL schema
//! named out of scope by the top-level spec; this workspace has no SQL
//! layer, so a manifest file plays the role `cargo_metadata` plays for the
//! teacher's `plan::build_plan` — a declarative description of the graph
//! the core operates over, read once at process start.

use std::path::Path;

use serde::Deserialize;
use skillhub_store::InMemoryMetadataStore;
use skillhub_types::{GroupMembership, RepoId, Repository, RepositoryType};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("read repository manifest {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parse repository manifest {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid repository manifest: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
struct RepositoryEntry {
    id: i64,
    name: String,
    #[serde(rename = "type")]
    kind: RepositoryType,
    #[serde(default)]
    upstream_url: Option<String>,
    #[serde(default = "default_true")]
    enabled: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
struct MembershipEntry {
    group: i64,
    member: i64,
    #[serde(default)]
    priority: i32,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ReposManifest {
    #[serde(rename = "repository", default)]
    repositories: Vec<RepositoryEntry>,
    #[serde(rename = "membership", default)]
    memberships: Vec<MembershipEntry>,
}

impl ReposManifest {
    pub fn load_from_file(path: &Path) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path).map_err(|source| ManifestError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let manifest: Self = toml::from_str(&content).map_err(|source| ManifestError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        manifest.validate()?;
        Ok(manifest)
    }

    fn validate(&self) -> Result<(), ManifestError> {
        for entry in &self.repositories {
            let repo = Repository {
                id: RepoId(entry.id),
                name: entry.name.clone(),
                kind: entry.kind,
                upstream_url: entry.upstream_url.clone(),
                enabled: entry.enabled,
            };
            repo.validate()
                .map_err(|e| ManifestError::Invalid(format!("repository {}: {e}", entry.name)))?;
        }
        Ok(())
    }

    /// Registers every declared repository and membership edge into
    /// `store`. Membership entries referencing an undeclared repository
    /// id are accepted as-is — the resolver's own `get_repository` call
    /// will surface `NotFound` for a dangling edge at resolve time rather
    /// than this bootstrap step.
    pub fn apply(&self, store: &InMemoryMetadataStore) {
        let mut names_by_id = std::collections::HashMap::new();
        for entry in &self.repositories {
            names_by_id.insert(entry.id, entry.name.clone());
            store.put_repository(Repository {
                id: RepoId(entry.id),
                name: entry.name.clone(),
                kind: entry.kind,
                upstream_url: entry.upstream_url.clone(),
                enabled: entry.enabled,
            });
        }
        for membership in &self.memberships {
            let member_name = names_by_id
                .get(&membership.member)
                .cloned()
                .unwrap_or_else(|| membership.member.to_string());
            store.put_group_membership(GroupMembership {
                group_id: RepoId(membership.group),
                member_id: RepoId(membership.member),
                member_name,
                priority: membership.priority,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_repositories_and_memberships() {
        let toml_str = r#"
            [[repository]]
            id = 1
            name = "group-all"
            type = "group"

            [[repository]]
            id = 2
            name = "local-hosted"
            type = "hosted"

            [[repository]]
            id = 3
            name = "clawhub-mirror"
            type = "proxy"
            upstream_url = "https://clawhub.example"

            [[membership]]
            group = 1
            member = 2
            priority = 0

            [[membership]]
            group = 1
            member = 3
            priority = 1
        "#;
        let manifest: ReposManifest = toml::from_str(toml_str).unwrap();
        manifest.validate().unwrap();
        assert_eq!(manifest.repositories.len(), 3);

        let store = InMemoryMetadataStore::new();
        manifest.apply(&store);

        let members = store.list_group_members(RepoId(1)).unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].member_name, "local-hosted");
        assert_eq!(members[1].member_name, "clawhub-mirror");
    }

    #[test]
    fn proxy_without_upstream_url_is_invalid() {
        let toml_str = r#"
            [[repository]]
            id = 1
            name = "broken-proxy"
            type = "proxy"
        "#;
        let manifest: ReposManifest = toml::from_str(toml_str).unwrap();
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn hosted_with_upstream_url_is_invalid() {
        let toml_str = r#"
            [[repository]]
            id = 1
            name = "bad-hosted"
            type = "hosted"
            upstream_url = "https://example.com"
        "#;
        let manifest: ReposManifest = toml::from_str(toml_str).unwrap();
        assert!(manifest.validate().is_err());
    }
}
