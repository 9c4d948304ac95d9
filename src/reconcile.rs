//! Reconciliation passes over the message history store.
//!
//! Three sequential passes, all inside one transaction committed only after
//! the last pass finishes: the chat-registry pass (rename or merge every
//! mapped `@lid` chat), the suffixed-sender pass, and the bare-sender pass.
//! Any error mid-pass propagates and the dropped transaction rolls the whole
//! run back, so a failed run persists nothing.

use crate::mapping::{LidMapping, LID_SUFFIX};
use crate::store::{MessageStore, StoreError};

// ---------------------------------------------------------------------------
// Outcomes and report
// ---------------------------------------------------------------------------

/// Per-chat outcome of the chat-registry pass, in pass order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatOutcome {
    /// No chat with the target jid existed; the record was renamed in place
    /// and its messages cascaded.
    Renamed { old_jid: String, new_jid: String },
    /// A chat with the target jid already existed; duplicate messages under
    /// the old jid were deleted, the rest moved, and the old chat removed.
    Merged {
        old_jid: String,
        new_jid: String,
        duplicates_removed: usize,
        messages_moved: usize,
    },
    /// Neither index held an entry for the chat; the record was left
    /// untouched.
    NoMapping { jid: String },
}

/// Counters and per-chat outcomes for one reconciliation run.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    pub chats_found: usize,
    pub chats_renamed: usize,
    pub chats_merged: usize,
    pub duplicates_removed: usize,
    pub messages_moved: usize,
    pub suffixed_senders_found: usize,
    pub suffixed_senders_updated: usize,
    pub bare_senders_updated: usize,
    pub outcomes: Vec<ChatOutcome>,
}

impl ReconcileReport {
    /// Chats rewritten by either path.
    pub fn chats_updated(&self) -> usize {
        self.chats_renamed + self.chats_merged
    }

    /// Distinct sender values rewritten across both sender passes.
    pub fn senders_updated(&self) -> usize {
        self.suffixed_senders_updated + self.bare_senders_updated
    }

    /// True when the run changed nothing.
    pub fn is_noop(&self) -> bool {
        self.chats_updated() == 0 && self.senders_updated() == 0
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Apply the mapping across the store: chat pass, then both sender passes,
/// under a single transaction committed at the end.
pub fn reconcile(
    store: &MessageStore,
    mapping: &LidMapping,
) -> Result<ReconcileReport, StoreError> {
    let tx = store.begin()?;
    let mut report = ReconcileReport::default();
    reconcile_chats(store, mapping, &mut report)?;
    reconcile_suffixed_senders(store, mapping, &mut report)?;
    reconcile_bare_senders(store, mapping, &mut report)?;
    tx.commit()?;
    Ok(report)
}

// ---------------------------------------------------------------------------
// Chat registry pass
// ---------------------------------------------------------------------------

/// Rewrite every chat whose jid ends in `@lid` and has a mapping.
///
/// The jid list is snapshotted before the loop, so rewrites never change the
/// iteration set. The target-existence check runs per chat against current
/// state: a chat renamed earlier in the loop can become the merge target of
/// a later one.
fn reconcile_chats(
    store: &MessageStore,
    mapping: &LidMapping,
    report: &mut ReconcileReport,
) -> Result<(), StoreError> {
    let lid_chats = store.chats_with_suffix(LID_SUFFIX)?;
    report.chats_found = lid_chats.len();

    for chat_jid in lid_chats {
        let new_jid = match mapping.chat_target(&chat_jid) {
            Some(target) => target,
            None => {
                report.outcomes.push(ChatOutcome::NoMapping { jid: chat_jid });
                continue;
            }
        };

        if store.chat_exists(&new_jid)? {
            let duplicates_removed = store.delete_duplicate_messages(&chat_jid, &new_jid)?;
            let messages_moved = store.reassign_messages(&chat_jid, &new_jid)?;
            store.delete_chat(&chat_jid)?;
            report.chats_merged += 1;
            report.duplicates_removed += duplicates_removed;
            report.messages_moved += messages_moved;
            report.outcomes.push(ChatOutcome::Merged {
                old_jid: chat_jid,
                new_jid,
                duplicates_removed,
                messages_moved,
            });
        } else {
            store.rename_chat(&chat_jid, &new_jid)?;
            report.chats_renamed += 1;
            report.outcomes.push(ChatOutcome::Renamed {
                old_jid: chat_jid,
                new_jid,
            });
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Sender passes
// ---------------------------------------------------------------------------

/// Rewrite every distinct sender value ending in `@lid`.
///
/// Resolution order is full-JID index first, bare-user index as fallback;
/// a fallback hit rewrites to the bare mapped value with no suffix. This is
/// the opposite order from the chat pass and is kept that way deliberately.
fn reconcile_suffixed_senders(
    store: &MessageStore,
    mapping: &LidMapping,
    report: &mut ReconcileReport,
) -> Result<(), StoreError> {
    let senders = store.suffixed_senders(LID_SUFFIX)?;
    report.suffixed_senders_found = senders.len();

    for sender in senders {
        if let Some(new_sender) = mapping.sender_target(&sender) {
            store.update_sender(&sender, &new_sender)?;
            report.suffixed_senders_updated += 1;
        }
    }
    Ok(())
}

/// Rewrite every distinct sender value with no domain suffix at all via the
/// bare-user index. Rewritten values stay bare.
fn reconcile_bare_senders(
    store: &MessageStore,
    mapping: &LidMapping,
    report: &mut ReconcileReport,
) -> Result<(), StoreError> {
    for sender in store.bare_senders()? {
        if let Some(pn_user) = mapping.lookup_user(&sender) {
            store.update_sender(&sender, &pn_user.to_string())?;
            report.bare_senders_updated += 1;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
