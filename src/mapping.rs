//! Loader for the whatsmeow LID-to-phone-number identity mapping.
//!
//! The authoritative store (whatsapp.db) is read exactly once, up front,
//! into a [`LidMapping`] holding two derived indexes: a full-JID index
//! (`12345@lid` maps to `33612345678@s.whatsapp.net`) and a bare-user index
//! with the domain suffixes stripped from both sides. The two indexes are
//! consulted in a different order by the chat pass and the sender pass; the
//! resolution rules live here so each order is stated in one place.

use std::collections::HashMap;
use std::path::Path;

use rusqlite::{Connection, OpenFlags};

use crate::store::StoreError;

/// Domain suffix of anonymized identifiers.
pub const LID_SUFFIX: &str = "@lid";
/// Domain suffix of stable phone-number identifiers.
pub const PN_SUFFIX: &str = "@s.whatsapp.net";

/// The portion of an identifier before the first `@`, or the whole string
/// when no `@` is present.
pub fn bare(id: &str) -> &str {
    id.split('@').next().unwrap_or(id)
}

/// In-memory LID-to-phone-number mapping, immutable for the run.
#[derive(Debug, Default)]
pub struct LidMapping {
    /// Full-JID index, suffixes included on both sides.
    jids: HashMap<String, String>,
    /// Bare-user index, suffixes stripped from both sides.
    users: HashMap<String, String>,
}

impl LidMapping {
    /// Build both indexes from `(lid, pn)` pairs. Later pairs overwrite
    /// earlier ones in both indexes.
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut mapping = Self::default();
        for (lid, pn) in pairs {
            mapping
                .users
                .insert(bare(&lid).to_string(), bare(&pn).to_string());
            mapping.jids.insert(lid, pn);
        }
        mapping
    }

    /// Number of mapping entries loaded.
    pub fn len(&self) -> usize {
        self.jids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jids.is_empty()
    }

    /// Exact full-JID lookup, suffix included.
    pub fn lookup_jid(&self, jid: &str) -> Option<&str> {
        self.jids.get(jid).map(String::as_str)
    }

    /// Bare-user lookup; both key and value carry no suffix.
    pub fn lookup_user(&self, user: &str) -> Option<&str> {
        self.users.get(user).map(String::as_str)
    }

    /// Resolve the rewrite target for a chat jid.
    ///
    /// The bare-user index is consulted first, unconditionally, with the
    /// stable suffix re-attached to the result; the full-JID index is only a
    /// fallback and its value is returned verbatim. The sender pass resolves
    /// in the opposite order (see [`sender_target`](Self::sender_target)).
    pub fn chat_target(&self, chat_jid: &str) -> Option<String> {
        let bare_lid = chat_jid.strip_suffix(LID_SUFFIX).unwrap_or(chat_jid);
        if let Some(pn_user) = self.users.get(bare_lid) {
            return Some(format!("{pn_user}{PN_SUFFIX}"));
        }
        self.jids.get(chat_jid).cloned()
    }

    /// Resolve the rewrite target for a suffixed sender value.
    ///
    /// The full-JID index is consulted first; the bare-user index is the
    /// fallback, and a fallback hit yields the bare mapped value with no
    /// suffix re-attached. Both the order and the bare result differ from
    /// [`chat_target`](Self::chat_target).
    pub fn sender_target(&self, sender: &str) -> Option<String> {
        if let Some(pn_jid) = self.jids.get(sender) {
            return Some(pn_jid.clone());
        }
        self.users.get(bare(sender)).cloned()
    }
}

/// Load the full mapping table from the authoritative store.
///
/// Opens a read-only connection, drains the mapping table, and drops the
/// connection before returning. Fails with [`StoreError::NotFound`] when the
/// store file does not exist.
pub fn load_lid_map(path: &Path) -> Result<LidMapping, StoreError> {
    if !path.exists() {
        return Err(StoreError::NotFound(path.display().to_string()));
    }
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    let mut stmt = conn.prepare("SELECT lid, pn FROM whatsmeow_lid_map")?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    let mut pairs: Vec<(String, String)> = Vec::new();
    for row in rows {
        pairs.push(row?);
    }
    Ok(LidMapping::from_pairs(pairs))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(entries: &[(&str, &str)]) -> Vec<(String, String)> {
        entries
            .iter()
            .map(|(lid, pn)| (lid.to_string(), pn.to_string()))
            .collect()
    }

    #[test]
    fn test_bare_strips_first_suffix() {
        assert_eq!(bare("111@lid"), "111");
        assert_eq!(bare("222@s.whatsapp.net"), "222");
        assert_eq!(bare("555"), "555");
        assert_eq!(bare(""), "");
    }

    #[test]
    fn test_both_indexes_built() {
        let mapping =
            LidMapping::from_pairs(pairs(&[("111@lid", "22211111111@s.whatsapp.net")]));
        assert_eq!(mapping.len(), 1);
        assert_eq!(
            mapping.lookup_jid("111@lid"),
            Some("22211111111@s.whatsapp.net")
        );
        assert_eq!(mapping.lookup_user("111"), Some("22211111111"));
    }

    #[test]
    fn test_last_pair_wins_on_duplicate_keys() {
        let mapping = LidMapping::from_pairs(pairs(&[
            ("111@lid", "22211111111@s.whatsapp.net"),
            ("111@lid", "33311111111@s.whatsapp.net"),
        ]));
        assert_eq!(mapping.len(), 1);
        assert_eq!(mapping.lookup_user("111"), Some("33311111111"));
    }

    #[test]
    fn test_chat_target_reattaches_stable_suffix() {
        let mapping =
            LidMapping::from_pairs(pairs(&[("111@lid", "22211111111@s.whatsapp.net")]));
        assert_eq!(
            mapping.chat_target("111@lid"),
            Some("22211111111@s.whatsapp.net".to_string())
        );
        assert_eq!(mapping.chat_target("999@lid"), None);
    }

    #[test]
    fn chat_target_prefers_bare_user_mapping() {
        // Seed the two indexes so they disagree: the full-JID index maps
        // 111@lid outright, while a later bare pair overwrites the user index.
        let mapping = LidMapping::from_pairs(pairs(&[
            ("111@lid", "999@s.whatsapp.net"),
            ("111", "222"),
        ]));
        // Bare-user index wins for chats, with the suffix re-attached.
        assert_eq!(
            mapping.chat_target("111@lid"),
            Some("222@s.whatsapp.net".to_string())
        );
        // Full-JID index wins for senders.
        assert_eq!(
            mapping.sender_target("111@lid"),
            Some("999@s.whatsapp.net".to_string())
        );
    }

    #[test]
    fn suffixed_sender_bare_fallback_keeps_bare_form() {
        // Only a bare pair is present, so the sender falls back to the user
        // index and the rewrite target carries no suffix.
        let mapping = LidMapping::from_pairs(pairs(&[("111", "22211111111")]));
        assert_eq!(
            mapping.sender_target("111@lid"),
            Some("22211111111".to_string())
        );
        assert_eq!(mapping.sender_target("999@lid"), None);
    }

    #[test]
    fn test_chat_target_full_jid_fallback() {
        // A full-JID-only entry whose bare user was overwritten to point
        // elsewhere exercises the fallback branch returning the value verbatim.
        let mut mapping = LidMapping::from_pairs(pairs(&[(
            "111@lid",
            "22211111111@s.whatsapp.net",
        )]));
        mapping.users.remove("111");
        assert_eq!(
            mapping.chat_target("111@lid"),
            Some("22211111111@s.whatsapp.net".to_string())
        );
    }

    #[test]
    fn test_load_lid_map_missing_file() {
        let err = load_lid_map(Path::new("/nonexistent/whatsapp.db")).unwrap_err();
        match err {
            StoreError::NotFound(path) => assert!(path.contains("whatsapp.db")),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }
}
