//! Per-identity folder visibility and access rules

use std::collections::HashMap;

use serde::Deserialize;

use crate::error::MediaError;
use crate::paths;

/// Authenticated user name, resolved once per request
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity(String);

impl Identity {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Folder that stays listed but needs an extra secret to enter
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct GatedFolder {
    pub pattern: String,
    pub secret: String,
}

/// Declarative folder rules for one identity
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct FolderRules {
    /// Folder-name patterns this identity can neither see nor enter
    #[serde(default, alias = "hidden_folders")]
    pub hidden: Vec<String>,
    /// Folders this identity sees but may only enter with the gate secret
    #[serde(default, alias = "gated_folders")]
    pub gated: Vec<GatedFolder>,
}

/// Case-insensitive equality or substring match of a folder name
fn matches_pattern(name: &str, pattern: &str) -> bool {
    let name = name.to_lowercase();
    let pattern = pattern.to_lowercase();
    name == pattern || name.contains(&pattern)
}

/// Visibility and access decisions for every configured identity
///
/// Identities without rules are unrestricted.
#[derive(Debug, Clone, Default)]
pub struct AccessPolicy {
    rules: HashMap<String, FolderRules>,
}

impl AccessPolicy {
    /// Build a policy from identity → rules, dropping empty patterns
    pub fn new(rules: HashMap<String, FolderRules>) -> Self {
        let rules = rules
            .into_iter()
            .map(|(name, mut rule)| {
                rule.hidden.retain(|p| !p.trim().is_empty());
                rule.gated.retain(|g| !g.pattern.trim().is_empty());
                (name, rule)
            })
            .collect();
        Self { rules }
    }

    fn rules_for(&self, identity: &Identity) -> Option<&FolderRules> {
        self.rules.get(identity.name())
    }

    fn is_hidden_name(&self, identity: &Identity, name: &str) -> bool {
        self.rules_for(identity)
            .is_some_and(|rules| rules.hidden.iter().any(|p| matches_pattern(name, p)))
    }

    /// Whether a directory entry appears in this identity's listing
    ///
    /// Hidden-folder rules apply to folders only; files are always listed
    /// once their parent is reachable.
    pub fn is_visible(&self, identity: &Identity, entry_relative_path: &str, is_folder: bool) -> bool {
        if !is_folder {
            return true;
        }
        let name = paths::segments(entry_relative_path).last().unwrap_or("");
        let visible = !self.is_hidden_name(identity, name);
        if !visible {
            tracing::debug!("Hiding folder \"{}\" from user \"{}\"", name, identity);
        }
        visible
    }

    /// Whether a listed folder is behind a gate for this identity
    pub fn is_locked(&self, identity: &Identity, folder_name: &str) -> bool {
        self.rules_for(identity)
            .is_some_and(|rules| rules.gated.iter().any(|g| matches_pattern(folder_name, &g.pattern)))
    }

    /// Check every segment of `target` against this identity's rules
    ///
    /// `unlock` is the folder secret presented with the request, if any.
    pub fn check_access(
        &self,
        identity: &Identity,
        target: &str,
        unlock: Option<&str>,
    ) -> Result<(), MediaError> {
        let Some(rules) = self.rules_for(identity) else {
            return Ok(());
        };

        for segment in paths::segments(target) {
            if rules.hidden.iter().any(|p| matches_pattern(segment, p)) {
                tracing::warn!("Access denied for user {} to hidden path: {}", identity, target);
                return Err(MediaError::AccessDenied);
            }

            for gate in rules.gated.iter().filter(|g| matches_pattern(segment, &g.pattern)) {
                let unlocked = unlock.is_some_and(|secret| {
                    constant_time_eq::constant_time_eq(secret.as_bytes(), gate.secret.as_bytes())
                });
                if !unlocked {
                    tracing::warn!("Access denied for user {} to gated path: {}", identity, target);
                    return Err(MediaError::AccessDenied);
                }
            }
        }
        Ok(())
    }

    /// Shorthand for [`AccessPolicy::check_access`] without a folder secret
    pub fn is_accessible(&self, identity: &Identity, target: &str) -> bool {
        self.check_access(identity, target, None).is_ok()
    }
}
