//! Access gating: allowlists, mention detection, and chat policies.
//!
//! All sender and allowlist comparisons go through the same normalization
//! (trim, strip one leading `@`, lowercase) so config entries, pairing keys,
//! and wire ids agree.

use {serde::{Deserialize, Serialize}, volery_common::types::ChatType, volery_pairing::PairingStatus};

use crate::dock::ChannelDock;

/// Canonical form of a sender id.
#[must_use]
pub fn normalize_sender(raw: &str) -> String {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_prefix('@').unwrap_or(trimmed);
    trimmed.to_lowercase()
}

/// Canonical form of an allowlist entry; `*` wildcards survive untouched.
#[must_use]
pub fn normalize_allow_entry(raw: &str) -> String {
    normalize_sender(raw)
}

/// Check a sender against an allowlist.
///
/// An empty list matches nobody (openness is a policy decision, not an
/// allowlist one). A `*` entry matches anyone; entries may embed `*` glob
/// segments. Matching is case-insensitive.
#[must_use]
pub fn allowlist_matches(sender_id: &str, allow_from: &[String]) -> bool {
    if allow_from.is_empty() {
        return false;
    }
    let sender = normalize_sender(sender_id);
    allow_from.iter().any(|entry| {
        let entry = normalize_allow_entry(entry);
        if entry == "*" {
            true
        } else if entry.contains('*') {
            glob_match(&entry, &sender)
        } else {
            entry == sender
        }
    })
}

/// Simple glob matching supporting `*` as a wildcard for any sequence of chars.
fn glob_match(pattern: &str, text: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == text;
    }

    let mut pos = 0;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        match text[pos..].find(part) {
            Some(idx) => {
                // First segment must match at start
                if i == 0 && idx != 0 {
                    return false;
                }
                pos += idx + part.len();
            },
            None => return false,
        }
    }
    // Last segment must match at end (unless pattern ends with *)
    if !parts.last().unwrap_or(&"").is_empty() {
        pos == text.len()
    } else {
        true
    }
}

/// Whether `text` mentions the assistant per the configured patterns.
///
/// Each pattern is tried as a case-insensitive regex; a pattern that fails
/// to compile degrades to a case-insensitive substring match. An empty
/// pattern list never matches.
#[must_use]
pub fn matches_mention(text: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|pattern| {
        if pattern.is_empty() {
            return false;
        }
        match regex::RegexBuilder::new(pattern).case_insensitive(true).build() {
            Ok(re) => re.is_match(text),
            Err(_) => text.to_lowercase().contains(&pattern.to_lowercase()),
        }
    })
}

/// Whether `text` is a reserved control command (`/status`, `/help`).
///
/// Requires the `/` prefix followed immediately by an alphanumeric command
/// word; a bare `/` or `/ foo` is ordinary text.
#[must_use]
pub fn is_control_command(text: &str) -> bool {
    let mut chars = text.trim_start().chars();
    chars.next() == Some('/')
        && chars.next().is_some_and(|c| c.is_ascii_alphanumeric())
}

/// Outcome of the group-mention gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MentionGate {
    /// Message proceeds; `mentioned` records whether a pattern matched.
    Pass { mentioned: bool },
    /// Message is silently dropped (unmentioned group chatter).
    Drop,
}

/// Apply the mention requirement for one message.
///
/// Control commands always pass; DMs never require a mention; group
/// messages drop when a required mention is missing.
#[must_use]
pub fn mention_gate(
    dock: &ChannelDock,
    chat_type: ChatType,
    require_override: Option<bool>,
    patterns: &[String],
    text: &str,
) -> MentionGate {
    let mentioned = matches_mention(text, patterns);
    if is_control_command(text) {
        return MentionGate::Pass { mentioned };
    }
    if dock.resolve_require_mention(chat_type, require_override) && !mentioned {
        return MentionGate::Drop;
    }
    MentionGate::Pass { mentioned }
}

/// DM access policy.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DmPolicy {
    /// Anyone can DM the assistant.
    Open,
    /// Unknown senders go through the pairing handshake.
    #[default]
    Pairing,
    /// Only senders on the allowlist.
    Allowlist,
}

/// Group access policy.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GroupPolicy {
    /// The assistant participates in any group it is added to.
    #[default]
    Open,
    /// Only groups on the group allowlist.
    Allowlist,
    /// Group chats are ignored entirely.
    Disabled,
}

/// Reason a message was refused by policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AccessDenied {
    #[error("sender not on allowlist")]
    NotOnAllowlist,
    #[error("sender not paired")]
    NotPaired,
    #[error("pairing approval still pending")]
    PairingPending,
    #[error("group chats are disabled")]
    GroupsDisabled,
    #[error("group not on allowlist")]
    GroupNotOnAllowlist,
}

/// Gate a direct message.
///
/// Allowlisted senders (including via `*`) bypass pairing; with an
/// `allowlist` policy an explicitly empty list denies everyone.
pub fn check_dm_access(
    policy: DmPolicy,
    sender_id: &str,
    allow_from: &[String],
    pairing: PairingStatus,
) -> Result<(), AccessDenied> {
    match policy {
        DmPolicy::Open => Ok(()),
        DmPolicy::Allowlist => {
            if allowlist_matches(sender_id, allow_from) {
                Ok(())
            } else {
                Err(AccessDenied::NotOnAllowlist)
            }
        },
        DmPolicy::Pairing => {
            if allowlist_matches(sender_id, allow_from) {
                return Ok(());
            }
            match pairing {
                PairingStatus::Paired => Ok(()),
                PairingStatus::Pending => Err(AccessDenied::PairingPending),
                PairingStatus::Unpaired => Err(AccessDenied::NotPaired),
            }
        },
    }
}

/// Gate a group message by its chat id.
pub fn check_group_access(
    policy: GroupPolicy,
    group_id: &str,
    group_allow_from: &[String],
) -> Result<(), AccessDenied> {
    match policy {
        GroupPolicy::Open => Ok(()),
        GroupPolicy::Disabled => Err(AccessDenied::GroupsDisabled),
        GroupPolicy::Allowlist => {
            if allowlist_matches(group_id, group_allow_from) {
                Ok(())
            } else {
                Err(AccessDenied::GroupNotOnAllowlist)
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dock::MediaSupport;

    fn dock() -> ChannelDock {
        ChannelDock {
            channel_id: "bridge".into(),
            label: "Bridge".into(),
            chat_types: vec![ChatType::Dm, ChatType::Group],
            media: MediaSupport::both(),
            text_chunk_limit: 4000,
            typing_indicators: true,
            default_require_mention_in_groups: true,
            debounce_default_ms: None,
        }
    }

    #[test]
    fn normalization_strips_at_and_lowercases() {
        assert_eq!(normalize_sender("  @Ada "), "ada");
        assert_eq!(normalize_sender("OPS"), "ops");
        assert_eq!(normalize_allow_entry("@Admin_*"), "admin_*");
    }

    #[test]
    fn empty_allowlist_matches_nobody() {
        assert!(!allowlist_matches("anyone", &[]));
    }

    #[test]
    fn wildcard_matches_everyone() {
        let list = vec!["*".into()];
        assert!(allowlist_matches("anyone", &list));
    }

    #[test]
    fn exact_match_is_case_insensitive() {
        let list = vec!["alice".into(), "bob".into()];
        assert!(allowlist_matches("Alice", &list));
        assert!(allowlist_matches("@alice", &list));
        assert!(!allowlist_matches("charlie", &list));
    }

    #[test]
    fn glob_prefix_and_suffix() {
        let list = vec!["admin_*".into(), "*@example.com".into()];
        assert!(allowlist_matches("admin_alice", &list));
        assert!(allowlist_matches("user@example.com", &list));
        assert!(!allowlist_matches("user@other.com", &list));
    }

    #[test]
    fn glob_middle() {
        let list = vec!["user_*_admin".into()];
        assert!(allowlist_matches("user_123_admin", &list));
        assert!(!allowlist_matches("user_123_mod", &list));
    }

    #[test]
    fn mention_substring_is_case_insensitive() {
        let patterns = vec!["@volery".into()];
        assert!(matches_mention("hey @Volery, ping", &patterns));
        assert!(!matches_mention("hey there", &patterns));
    }

    #[test]
    fn mention_regex_patterns_work() {
        let patterns = vec![r"^volery[,:]".into()];
        assert!(matches_mention("Volery: status?", &patterns));
        assert!(!matches_mention("ask volery later", &patterns));
    }

    #[test]
    fn invalid_regex_falls_back_to_substring() {
        let patterns = vec!["volery[".into()];
        assert!(matches_mention("see VOLERY[ bracket", &patterns));
        assert!(!matches_mention("nothing here", &patterns));
    }

    #[test]
    fn no_patterns_never_match() {
        assert!(!matches_mention("@volery hello", &[]));
    }

    #[test]
    fn command_detection() {
        assert!(is_control_command("/status"));
        assert!(is_control_command("  /help now"));
        assert!(is_control_command("/2fa"));
        assert!(!is_control_command("/"));
        assert!(!is_control_command("/ status"));
        assert!(!is_control_command("//status"));
        assert!(!is_control_command("status"));
    }

    #[test]
    fn dm_never_requires_mention() {
        let gate = mention_gate(&dock(), ChatType::Dm, None, &["@volery".into()], "hello");
        assert_eq!(gate, MentionGate::Pass { mentioned: false });
    }

    #[test]
    fn unmentioned_group_message_drops() {
        let gate = mention_gate(&dock(), ChatType::Group, None, &["@volery".into()], "hello");
        assert_eq!(gate, MentionGate::Drop);
    }

    #[test]
    fn mentioned_group_message_passes() {
        let gate = mention_gate(
            &dock(),
            ChatType::Group,
            None,
            &["@volery".into()],
            "@volery hello",
        );
        assert_eq!(gate, MentionGate::Pass { mentioned: true });
    }

    #[test]
    fn command_beats_missing_mention() {
        let gate = mention_gate(&dock(), ChatType::Group, None, &["@volery".into()], "/status");
        assert_eq!(gate, MentionGate::Pass { mentioned: false });
    }

    #[test]
    fn override_disables_group_mention_requirement() {
        let gate = mention_gate(&dock(), ChatType::Group, Some(false), &["@volery".into()], "hi");
        assert_eq!(gate, MentionGate::Pass { mentioned: false });
    }

    #[test]
    fn open_dm_policy_admits_anyone() {
        assert!(check_dm_access(DmPolicy::Open, "anyone", &[], PairingStatus::Unpaired).is_ok());
    }

    #[test]
    fn allowlist_policy_with_empty_list_denies_everyone() {
        assert_eq!(
            check_dm_access(DmPolicy::Allowlist, "ada", &[], PairingStatus::Paired),
            Err(AccessDenied::NotOnAllowlist)
        );
    }

    #[test]
    fn pairing_policy_tracks_status() {
        assert!(check_dm_access(DmPolicy::Pairing, "ada", &[], PairingStatus::Paired).is_ok());
        assert_eq!(
            check_dm_access(DmPolicy::Pairing, "ada", &[], PairingStatus::Pending),
            Err(AccessDenied::PairingPending)
        );
        assert_eq!(
            check_dm_access(DmPolicy::Pairing, "ada", &[], PairingStatus::Unpaired),
            Err(AccessDenied::NotPaired)
        );
    }

    #[test]
    fn allowlist_bypasses_pairing() {
        let list = vec!["ada".into()];
        assert!(check_dm_access(DmPolicy::Pairing, "@Ada", &list, PairingStatus::Unpaired).is_ok());
    }

    #[test]
    fn disabled_groups_reject_all() {
        let list = vec!["-100200".into()];
        assert_eq!(
            check_group_access(GroupPolicy::Disabled, "-100200", &list),
            Err(AccessDenied::GroupsDisabled)
        );
    }

    #[test]
    fn group_allowlist_matches_chat_id() {
        let list = vec!["-100200".into()];
        assert!(check_group_access(GroupPolicy::Allowlist, "-100200", &list).is_ok());
        assert_eq!(
            check_group_access(GroupPolicy::Allowlist, "-100999", &list),
            Err(AccessDenied::GroupNotOnAllowlist)
        );
    }
}
