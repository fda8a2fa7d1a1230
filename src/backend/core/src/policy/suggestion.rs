//! Proposed actions and their lifecycle.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{ErrorCode, KernelError, Result};
use crate::events::Verdict;

/// Priority of an unremarkable suggestion.
pub const BASELINE_PRIORITY: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionStatus {
    Pending,
    Accepted,
    Ignored,
    Expired,
}

impl SuggestionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SuggestionStatus::Pending)
    }

    /// Move along `pending -> accepted | ignored | expired`.
    pub fn transition(self, to: SuggestionStatus) -> Result<SuggestionStatus> {
        match (self, to) {
            (SuggestionStatus::Pending, SuggestionStatus::Pending) => Ok(self),
            (SuggestionStatus::Pending, next) => Ok(next),
            (from, to) => Err(KernelError::new(
                ErrorCode::SuggestionAlreadyResolved,
                format!("suggestion is already {:?}, cannot become {:?}", from, to),
            )),
        }
    }
}

impl From<Verdict> for SuggestionStatus {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Accepted => SuggestionStatus::Accepted,
            Verdict::Ignored => SuggestionStatus::Ignored,
        }
    }
}

/// Why a suggestion was made.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reason {
    pub code: String,
    pub detail: String,
}

/// A non-binding recommendation produced by a policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposedAction {
    pub id: String,
    /// Name of the policy that produced it.
    pub policy: String,
    #[serde(rename = "type")]
    pub action_type: String,
    pub priority: u32,
    pub reason: Reason,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_key: Option<String>,
    pub status: SuggestionStatus,
    pub day: NaiveDate,
}

impl ProposedAction {
    pub fn new(
        policy: impl Into<String>,
        action_type: impl Into<String>,
        priority: u32,
        day: NaiveDate,
    ) -> Self {
        let mut action = Self {
            id: String::new(),
            policy: policy.into(),
            action_type: action_type.into(),
            priority,
            reason: Reason {
                code: String::new(),
                detail: String::new(),
            },
            payload: serde_json::Value::Null,
            cooldown_key: None,
            status: SuggestionStatus::Pending,
            day,
        };
        action.id = action.derive_id();
        action
    }

    pub fn with_reason(mut self, code: impl Into<String>, detail: impl Into<String>) -> Self {
        self.reason = Reason {
            code: code.into(),
            detail: detail.into(),
        };
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Set the cooldown key. The id is re-derived from it.
    pub fn with_cooldown_key(mut self, key: impl Into<String>) -> Self {
        self.cooldown_key = Some(key.into());
        self.id = self.derive_id();
        self
    }

    /// Stable across refreshes: same policy, key (or type) and day give the same id.
    fn derive_id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.policy.as_bytes());
        hasher.update([0u8]);
        hasher.update(
            self.cooldown_key
                .as_deref()
                .unwrap_or(&self.action_type)
                .as_bytes(),
        );
        hasher.update([0u8]);
        hasher.update(self.day.to_string().as_bytes());
        let digest = hex::encode(hasher.finalize());
        format!("sg_{}", &digest[..16])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 7, 1).unwrap()
    }

    #[test]
    fn test_id_is_deterministic() {
        let a = ProposedAction::new("overload_guard", "reschedule", 80, day()).with_cooldown_key("k");
        let b = ProposedAction::new("overload_guard", "reschedule", 80, day()).with_cooldown_key("k");
        let c = ProposedAction::new("overload_guard", "reschedule", 80, day().succ_opt().unwrap())
            .with_cooldown_key("k");

        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
        assert!(a.id.starts_with("sg_"));
    }

    #[test]
    fn test_status_transitions() {
        let pending = SuggestionStatus::Pending;
        assert_eq!(
            pending.transition(SuggestionStatus::Accepted).unwrap(),
            SuggestionStatus::Accepted
        );

        let err = SuggestionStatus::Ignored
            .transition(SuggestionStatus::Accepted)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::SuggestionAlreadyResolved);
        assert!(SuggestionStatus::Expired.is_terminal());
    }

    #[test]
    fn test_wire_shape() {
        let action = ProposedAction::new("p", "quick_win", 60, day())
            .with_reason("LOW_COMPLETION", "nothing finished lately");
        let json = serde_json::to_value(&action).unwrap();

        assert_eq!(json["type"], "quick_win");
        assert_eq!(json["status"], "pending");
        assert_eq!(json["reason"]["code"], "LOW_COMPLETION");
        assert!(json.get("cooldownKey").is_none());
    }
}
