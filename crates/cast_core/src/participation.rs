//! The vault-participation list (`cast-vaults`) and sync-mode derivation.
//!
//! A document is eligible for synchronization between two vaults only when
//! its participation list names both of them. Each entry has the form
//! `<vault-id> (<role>)`, where the role is `cast` (authoritative broadcast
//! source) or `sync` (full bidirectional peer).

use std::fmt;

use serde::{Deserialize, Serialize};

/// Role of a vault in a document's participation list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VaultRole {
    /// Authoritative source; participates in broadcast mode.
    Cast,
    /// Full bidirectional peer.
    Sync,
}

impl fmt::Display for VaultRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VaultRole::Cast => write!(f, "cast"),
            VaultRole::Sync => write!(f, "sync"),
        }
    }
}

/// How a planner classifies actions for one vault pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Source is authoritative; destination body edits lose.
    Broadcast,
    /// Both sides are peers; concurrent edits merge.
    Bidirectional,
    /// Operator-forced overpower: destination mirrors source.
    Mirror,
}

/// Parse participation entries, ignoring anything malformed.
pub fn parse_entries(entries: &[String]) -> Vec<(String, VaultRole)> {
    entries.iter().filter_map(|e| parse_entry(e)).collect()
}

fn parse_entry(entry: &str) -> Option<(String, VaultRole)> {
    let trimmed = entry.trim();
    let rest = trimmed.strip_suffix(')')?;
    let (name, role) = rest.rsplit_once('(')?;
    let role = match role.trim() {
        "cast" => VaultRole::Cast,
        "sync" => VaultRole::Sync,
        _ => return None,
    };
    let name = name.trim();
    (!name.is_empty()).then(|| (name.to_string(), role))
}

/// Format a participation entry for a header.
pub fn format_entry(vault_id: &str, role: VaultRole) -> String {
    format!("{vault_id} ({role})")
}

/// Look up the role of a specific vault in a participation list.
pub fn role_of(entries: &[String], vault_id: &str) -> Option<VaultRole> {
    parse_entries(entries)
        .into_iter()
        .find(|(name, _)| name == vault_id)
        .map(|(_, role)| role)
}

/// Whether a document may sync between the two named vaults at all.
///
/// Both ends must be declared in the list; everything else is mode policy.
pub fn is_eligible(entries: &[String], source_vault: &str, dest_vault: &str) -> bool {
    role_of(entries, source_vault).is_some() && role_of(entries, dest_vault).is_some()
}

/// Derive the sync mode implied by the two roles.
///
/// Broadcast requires exactly source `cast` and destination `sync`; every
/// other declared combination is treated as bidirectional.
pub fn mode_for(source_role: VaultRole, dest_role: VaultRole) -> SyncMode {
    match (source_role, dest_role) {
        (VaultRole::Cast, VaultRole::Sync) => SyncMode::Broadcast,
        _ => SyncMode::Bidirectional,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_well_formed_entries() {
        let parsed = parse_entries(&entries(&["alpha (cast)", " beta (sync) "]));
        assert_eq!(
            parsed,
            vec![
                ("alpha".to_string(), VaultRole::Cast),
                ("beta".to_string(), VaultRole::Sync),
            ]
        );
    }

    #[test]
    fn ignores_malformed_entries() {
        let parsed = parse_entries(&entries(&["no-role", "x (owner)", "(sync)", ""]));
        assert!(parsed.is_empty());
    }

    #[test]
    fn vault_names_may_contain_parentheses_free_spaces() {
        let parsed = parse_entries(&entries(&["My Vault (sync)"]));
        assert_eq!(parsed[0].0, "My Vault");
    }

    #[test]
    fn eligibility_needs_both_ends() {
        let list = entries(&["a (cast)", "b (sync)"]);
        assert!(is_eligible(&list, "a", "b"));
        assert!(is_eligible(&list, "b", "a"));
        assert!(!is_eligible(&list, "a", "c"));
        assert!(!is_eligible(&list, "c", "b"));
    }

    #[test]
    fn mode_derivation() {
        assert_eq!(mode_for(VaultRole::Cast, VaultRole::Sync), SyncMode::Broadcast);
        assert_eq!(mode_for(VaultRole::Sync, VaultRole::Sync), SyncMode::Bidirectional);
        assert_eq!(mode_for(VaultRole::Sync, VaultRole::Cast), SyncMode::Bidirectional);
        assert_eq!(mode_for(VaultRole::Cast, VaultRole::Cast), SyncMode::Bidirectional);
    }

    #[test]
    fn format_round_trips() {
        let entry = format_entry("alpha", VaultRole::Cast);
        assert_eq!(entry, "alpha (cast)");
        assert_eq!(parse_entry(&entry), Some(("alpha".to_string(), VaultRole::Cast)));
    }
}
