//! Hashlist, Hash, and the linked-pair representation (spec.md §3).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashlistStatus {
    Uploading,
    Ready,
    Processing,
    Archived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkType {
    LmNtlm,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hashlist {
    pub id: i64,
    pub user_id: i64,
    pub client_id: Option<i64>,
    pub hash_type_id: i32,
    pub total_hashes: i64,
    pub cracked_hashes: i64,
    pub status: HashlistStatus,
    pub exclude_from_potfile: bool,
    pub original_file_path: Option<String>,
    pub has_mixed_work_factors: bool,
    /// The hashlist this one is linked to (e.g. an NTLM list's LM half),
    /// if any. The link is symmetric; both sides carry the same partner id.
    pub linked_hashlist: Option<(i64, LinkType)>,
}

impl Hashlist {
    pub fn validate_counts(&self) -> Result<(), String> {
        if self.cracked_hashes < 0 || self.cracked_hashes > self.total_hashes {
            return Err(format!(
                "cracked_hashes {} out of bounds for total_hashes {}",
                self.cracked_hashes, self.total_hashes
            ));
        }
        Ok(())
    }
}

/// Per-hash LM-partial-crack bookkeeping. See DESIGN.md open-question
/// decision #2: the "blank-LM constant ⇒ password ≤ 7 chars" heuristic
/// is documented here, not evaluated by this crate (cracking itself is
/// out of scope).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LmCrackState {
    pub first_half_cracked: bool,
    pub second_half_cracked: bool,
    pub partial_password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hash {
    pub id: Uuid,
    pub hash_value: String,
    pub original_hash: String,
    pub hash_type_id: i32,
    pub is_cracked: bool,
    pub password: Option<String>,
    pub username: Option<String>,
    pub domain: Option<String>,
    pub last_updated: chrono::DateTime<chrono::Utc>,
    /// Set only for LM/NTLM halves; see [`LmCrackState`].
    pub lm_state: Option<LmCrackState>,
    pub linked_hash: Option<(Uuid, LinkType)>,
}

/// Collapse a set of hashlists so a linked pair contributes exactly one
/// row, per spec.md §8 property 7.
pub fn dedupe_linked(hashlists: &[Hashlist]) -> Vec<&Hashlist> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for h in hashlists {
        if let Some((partner, _)) = h.linked_hashlist {
            if seen.contains(&partner) {
                continue;
            }
        }
        seen.insert(h.id);
        out.push(h);
    }
    out
}

/// "is cracked" for a (possibly linked) hashlist pair: true iff either
/// side is fully cracked.
pub fn pair_is_cracked(a: &Hashlist, b: Option<&Hashlist>) -> bool {
    let a_cracked = a.total_hashes > 0 && a.cracked_hashes == a.total_hashes;
    let b_cracked = b.map(|b| b.total_hashes > 0 && b.cracked_hashes == b.total_hashes).unwrap_or(false);
    a_cracked || b_cracked
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hashlist(id: i64, linked: Option<(i64, LinkType)>) -> Hashlist {
        Hashlist {
            id,
            user_id: 1,
            client_id: None,
            hash_type_id: 1000,
            total_hashes: 10,
            cracked_hashes: 0,
            status: HashlistStatus::Ready,
            exclude_from_potfile: false,
            original_file_path: None,
            has_mixed_work_factors: false,
            linked_hashlist: linked,
        }
    }

    #[test]
    fn property7_linked_pair_counts_once() {
        let a = hashlist(1, Some((2, LinkType::LmNtlm)));
        let b = hashlist(2, Some((1, LinkType::LmNtlm)));
        let c = hashlist(3, None);
        let deduped = dedupe_linked(&[a, b, c]);
        assert_eq!(deduped.len(), 2);
    }

    #[test]
    fn cracked_count_invariant_rejects_overflow() {
        let mut h = hashlist(1, None);
        h.cracked_hashes = 11;
        assert!(h.validate_counts().is_err());
    }
}
