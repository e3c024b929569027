//! Append-only action history for a referral.
//!
//! In memory the log is always an ordered list. Persisted rows may still carry the
//! older shapes (`null` or a lone object); [`ActionLog::from_stored`] normalizes those
//! at the storage boundary and [`ActionLog::to_stored`] always writes an array.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::domain::{Action, ActionStatus};

#[derive(Debug, thiserror::Error)]
pub enum ActionLogError {
    #[error("an action is already in flight (status requested)")]
    DuplicateInFlight,
    #[error("expected exactly one requested action, found {0}")]
    AmbiguousRequested(usize),
    #[error("malformed persisted action log: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Ordered sequence of actions in insertion order. Never reordered or truncated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionLog(Vec<Action>);

#[derive(Deserialize)]
#[serde(untagged)]
enum StoredShape {
    Many(Vec<Action>),
    Single(Box<Action>),
}

impl ActionLog {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Action> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[Action] {
        &self.0
    }

    pub fn latest(&self) -> Option<&Action> {
        self.0.last()
    }

    /// Latest entry that records a decision outcome, skipping lifecycle-stage errors.
    pub fn latest_outcome(&self) -> Option<&Action> {
        self.0.iter().rev().find(|action| !action.is_stage_error())
    }

    pub fn requested_count(&self) -> usize {
        self.0
            .iter()
            .filter(|action| action.status == Some(ActionStatus::Requested))
            .count()
    }

    pub fn has_outbound_action(&self) -> bool {
        self.0.iter().any(|action| action.action_type.is_outbound())
    }

    /// Append an action. Only one `requested` action may be in flight at a time.
    pub fn append(&mut self, action: Action) -> Result<(), ActionLogError> {
        if action.status == Some(ActionStatus::Requested) && self.requested_count() > 0 {
            return Err(ActionLogError::DuplicateInFlight);
        }
        self.0.push(action);
        Ok(())
    }

    /// Flip the single in-flight action to `completed`, returning its position.
    pub fn complete_requested(&mut self) -> Result<usize, ActionLogError> {
        let requested: Vec<usize> = self
            .0
            .iter()
            .enumerate()
            .filter(|(_, action)| action.status == Some(ActionStatus::Requested))
            .map(|(index, _)| index)
            .collect();

        match requested.as_slice() {
            [index] => {
                self.0[*index].status = Some(ActionStatus::Completed);
                Ok(*index)
            }
            other => Err(ActionLogError::AmbiguousRequested(other.len())),
        }
    }

    /// Decode a persisted log that may be `null`, a single object, or an array.
    pub fn from_stored(value: Value) -> Result<Self, ActionLogError> {
        if value.is_null() {
            return Ok(Self::new());
        }

        match serde_json::from_value::<StoredShape>(value)? {
            StoredShape::Many(actions) => Ok(Self(actions)),
            StoredShape::Single(action) => Ok(Self(vec![*action])),
        }
    }

    pub fn to_stored(&self) -> Result<Value, ActionLogError> {
        Ok(serde_json::to_value(&self.0)?)
    }
}

impl<'a> IntoIterator for &'a ActionLog {
    type Item = &'a Action;
    type IntoIter = std::slice::Iter<'a, Action>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
