//! Human decisions and the one-way decision state of an event.
//!
//! An event's decision state starts [`HumanDecision::Absent`] (no request) or
//! [`HumanDecision::Pending`] (request raised, nobody answered yet) and can
//! only move to [`HumanDecision::Resolved`]. A repeated resolution replaces
//! the stored decision (last write wins) but never re-opens it.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// The answer a human gave to a [`HumanRequest`](crate::event::HumanRequest).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Decision {
  /// Free-text answer to a question.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub response:     Option<String>,
  /// Approve / deny for a permission request.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub permission:   Option<bool>,
  /// The selected option for a choice request.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub choice:       Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub responded_by: Option<String>,
}

impl Decision {
  pub fn validate(&self) -> Result<()> {
    let has_response = self.response.as_deref().is_some_and(|r| !r.trim().is_empty());
    if has_response || self.permission.is_some() || self.choice.is_some() {
      Ok(())
    } else {
      Err(Error::EmptyDecision)
    }
  }
}

/// Decision state of a stored event.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HumanDecision {
  /// The event never asked for a decision.
  #[default]
  Absent,
  /// The event carries a request that has not been answered.
  Pending,
  Resolved {
    decision:    Decision,
    /// Milliseconds since the Unix epoch.
    resolved_at: i64,
  },
}

impl HumanDecision {
  /// Rebuild the state from its stored parts.
  pub fn from_parts(has_request: bool, resolved: Option<(Decision, i64)>) -> Self {
    match resolved {
      Some((decision, resolved_at)) => Self::Resolved { decision, resolved_at },
      None if has_request => Self::Pending,
      None => Self::Absent,
    }
  }

  /// The only transition there is: any state → `Resolved`.
  pub fn resolve(self, decision: Decision, resolved_at: i64) -> Self {
    Self::Resolved { decision, resolved_at }
  }

  pub fn is_resolved(&self) -> bool { matches!(self, Self::Resolved { .. }) }

  pub fn is_pending(&self) -> bool { matches!(self, Self::Pending) }
}
