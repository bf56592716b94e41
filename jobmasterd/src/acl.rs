//! Service-level authorization policy for the client protocol.
//!
//! Loaded once at bootstrap when authorization is enabled; an
//! unreadable policy is fatal. Evaluation is per message: the caller
//! ident must be in the allow list, and idents on the read-only list
//! are denied mutating operations.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Policy decision for a protocol call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyAction {
    Allow,
    Deny,
}

#[derive(Debug, Default, Deserialize)]
struct PolicyFile {
    /// Idents allowed to use the protocol. Omitted or empty: everyone.
    #[serde(default)]
    allowed: Vec<String>,
    /// Idents restricted to read-only operations.
    #[serde(default)]
    read_only: Vec<String>,
}

#[derive(Debug, Default)]
pub struct ServicePolicy {
    allowed: Option<HashSet<String>>,
    read_only: HashSet<String>,
}

impl ServicePolicy {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read policy file {}", path.display()))?;
        let file: PolicyFile = toml::from_str(&raw)
            .with_context(|| format!("failed to parse policy file {}", path.display()))?;

        let allowed = if file.allowed.is_empty() {
            None
        } else {
            Some(file.allowed.into_iter().collect())
        };

        Ok(Self {
            allowed,
            read_only: file.read_only.into_iter().collect(),
        })
    }

    pub fn eval(&self, ident: &str, modify: bool) -> PolicyAction {
        if let Some(allowed) = &self.allowed {
            if !allowed.contains(ident) {
                return PolicyAction::Deny;
            }
        }
        if modify && self.read_only.contains(ident) {
            return PolicyAction::Deny;
        }
        PolicyAction::Allow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_policy(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn empty_policy_allows_everyone() {
        let file = write_policy("");
        let policy = ServicePolicy::load(file.path()).unwrap();
        assert_eq!(policy.eval("anyone", false), PolicyAction::Allow);
        assert_eq!(policy.eval("anyone", true), PolicyAction::Allow);
    }

    #[test]
    fn allow_list_gates_all_operations() {
        let file = write_policy("allowed = [\"client-a\"]\n");
        let policy = ServicePolicy::load(file.path()).unwrap();
        assert_eq!(policy.eval("client-a", false), PolicyAction::Allow);
        assert_eq!(policy.eval("client-b", false), PolicyAction::Deny);
    }

    #[test]
    fn read_only_idents_cannot_mutate() {
        let file = write_policy("read_only = [\"dashboard\"]\n");
        let policy = ServicePolicy::load(file.path()).unwrap();
        assert_eq!(policy.eval("dashboard", false), PolicyAction::Allow);
        assert_eq!(policy.eval("dashboard", true), PolicyAction::Deny);
    }

    #[test]
    fn malformed_policy_fails_to_load() {
        let file = write_policy("allowed = \"not a list\"");
        assert!(ServicePolicy::load(file.path()).is_err());
    }
}
