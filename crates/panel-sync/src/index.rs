//! Identity index over a panel's existing accounts
//!
//! Built once per run from the live listing and kept current as the run
//! writes, so later records see accounts and names created earlier in the
//! same run.

use std::collections::{HashMap, HashSet};

use crate::record::UserRecord;

/// Lowercased, trimmed credential used as an index key.
pub fn normalize_identifier(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Key used to compare usernames.
pub fn username_key(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Username as it will be written: lowercase, inner spaces as underscores.
pub fn sanitize_username(raw: &str) -> String {
    raw.trim().to_lowercase().replace(' ', "_")
}

/// Change the run made to the remote panel.
#[derive(Debug, Clone)]
pub enum IndexMutation {
    /// An existing account was rewritten. `record` is its new state.
    Updated {
        identifier: String,
        previous_username: String,
        record: UserRecord,
    },
    Created { record: UserRecord },
    /// The panel refused a name as taken by an account the listing did not
    /// show.
    UsernameReserved { username: String },
}

#[derive(Debug, Default, Clone)]
pub struct IdentityIndex {
    records: Vec<UserRecord>,
    by_primary: HashMap<String, usize>,
    by_username: HashMap<String, usize>,
    by_any: HashMap<String, usize>,
    reserved_usernames: HashSet<String>,
    stale: bool,
}

impl IdentityIndex {
    pub fn build(listing: &[UserRecord]) -> Self {
        let mut index = Self::default();
        for record in listing {
            index.insert(record.clone());
        }
        index
    }

    /// Empty index standing in for a listing that could not be fetched.
    pub fn unavailable() -> Self {
        Self {
            stale: true,
            ..Self::default()
        }
    }

    /// Replace the contents with a fresh listing, keeping reserved names.
    pub fn rebuild(&mut self, listing: &[UserRecord]) {
        let reserved = std::mem::take(&mut self.reserved_usernames);
        *self = Self::build(listing);
        self.reserved_usernames = reserved;
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Stop asking for a rebuild after one failed attempt.
    pub fn give_up_rebuild(&mut self) {
        self.stale = false;
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn identifier_count(&self) -> usize {
        self.by_any.len()
    }

    fn insert(&mut self, record: UserRecord) -> usize {
        let slot = self.records.len();
        self.index_slot(slot, &record);
        self.records.push(record);
        slot
    }

    fn index_slot(&mut self, slot: usize, record: &UserRecord) {
        let primary = normalize_identifier(&record.primary_identifier);
        if !primary.is_empty() {
            self.by_primary.insert(primary.clone(), slot);
            self.by_any.insert(primary.clone(), slot);
        }
        for identifier in record.all_identifiers() {
            if identifier != primary {
                // a primary mapping is never displaced by a secondary one
                if !self.by_primary.contains_key(&identifier) {
                    self.by_any.insert(identifier, slot);
                }
            }
        }
        let name = username_key(&record.username);
        if !name.is_empty() {
            self.by_username.insert(name, slot);
        }
    }

    /// Account exposing `identifier` as any credential.
    pub fn lookup(&self, identifier: &str) -> Option<&UserRecord> {
        let slot = *self.by_any.get(&normalize_identifier(identifier))?;
        self.records.get(slot)
    }

    pub fn lookup_primary(&self, identifier: &str) -> Option<&UserRecord> {
        let slot = *self.by_primary.get(&normalize_identifier(identifier))?;
        self.records.get(slot)
    }

    pub fn lookup_username(&self, username: &str) -> Option<&UserRecord> {
        let slot = *self.by_username.get(&username_key(username))?;
        self.records.get(slot)
    }

    pub fn is_username_taken(&self, username: &str) -> bool {
        self.lookup_username(username).is_some() || self.reserved_usernames.contains(&username_key(username))
    }

    pub fn apply(&mut self, mutation: IndexMutation) {
        match mutation {
            IndexMutation::Updated {
                identifier,
                previous_username,
                record,
            } => {
                let slot = self
                    .by_any
                    .get(&normalize_identifier(&identifier))
                    .or_else(|| self.by_username.get(&username_key(&previous_username)))
                    .copied();
                match slot {
                    Some(slot) => {
                        let old_key = username_key(&previous_username);
                        if self.by_username.get(&old_key) == Some(&slot) {
                            self.by_username.remove(&old_key);
                        }
                        self.index_slot(slot, &record);
                        self.records[slot] = record;
                    }
                    None => {
                        self.insert(record);
                    }
                }
            }
            IndexMutation::Created { record } => {
                self.insert(record);
            }
            IndexMutation::UsernameReserved { username } => {
                self.reserved_usernames.insert(username_key(&username));
            }
        }
    }

    pub fn records(&self) -> &[UserRecord] {
        &self.records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use panel_types::PanelProtocol;
    use serde_json::json;

    fn user(name: &str, id: &str) -> UserRecord {
        UserRecord::new(name, id, PanelProtocol::Vless)
    }

    #[test]
    fn lookup_is_case_and_space_insensitive() {
        let index = IdentityIndex::build(&[user("alice", "AbC-1")]);
        assert_eq!(index.lookup(" abc-1 ").map(|r| r.username.as_str()), Some("alice"));
        assert!(index.lookup_primary("ABC-1").is_some());
        assert!(index.lookup("missing").is_none());
    }

    #[test]
    fn secondary_credentials_are_indexed() {
        let settings = serde_json::from_value(json!({"trojan": {"password": "Secret"}})).unwrap();
        let index = IdentityIndex::build(&[user("bob", "u-2").with_settings(settings)]);

        assert_eq!(index.lookup("secret").map(|r| r.username.as_str()), Some("bob"));
        assert!(index.lookup_primary("secret").is_none());
        assert_eq!(index.identifier_count(), 2);
    }

    #[test]
    fn primary_wins_over_secondary() {
        let settings = serde_json::from_value(json!({"vmess": {"id": "shared"}})).unwrap();
        let index = IdentityIndex::build(&[
            user("owner", "shared"),
            user("other", "o-1").with_settings(settings),
        ]);
        assert_eq!(index.lookup("shared").map(|r| r.username.as_str()), Some("owner"));
    }

    #[test]
    fn updates_move_the_username() {
        let mut index = IdentityIndex::build(&[user("alice", "u1")]);
        index.apply(IndexMutation::Updated {
            identifier: "u1".into(),
            previous_username: "alice".into(),
            record: user("alice2", "u1"),
        });

        assert!(!index.is_username_taken("alice"));
        assert!(index.is_username_taken("Alice2"));
        assert_eq!(index.lookup("u1").map(|r| r.username.as_str()), Some("alice2"));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn created_and_reserved_names_are_taken() {
        let mut index = IdentityIndex::unavailable();
        assert!(index.is_stale());

        index.apply(IndexMutation::Created { record: user("bob", "u2") });
        index.apply(IndexMutation::UsernameReserved { username: "carol".into() });

        assert!(index.is_username_taken("bob"));
        assert!(index.is_username_taken("carol"));
        assert!(index.lookup("u2").is_some());

        index.rebuild(&[user("dave", "u4")]);
        assert!(!index.is_stale());
        assert!(index.is_username_taken("carol"));
        assert!(!index.is_username_taken("bob"));
    }

    #[test]
    fn sanitizing_usernames() {
        assert_eq!(sanitize_username("  John Smith "), "john_smith");
        assert_eq!(sanitize_username("BOB"), "bob");
        assert_eq!(sanitize_username("   "), "");
    }

    #[test]
    fn taken_username_resolves_to_its_holder() {
        let index = IdentityIndex::build(&[user("Bob", "b1")]);

        assert_eq!(index.lookup_username(" bob ").map(|r| r.primary_identifier.as_str()), Some("b1"));
        assert!(index.is_username_taken("BOB"));
        assert!(index.lookup_username("bob_1").is_none());
        assert!(!index.is_username_taken("bob_1"));
    }
}
