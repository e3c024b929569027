use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::action_log::ActionLogError;
use super::decision::ClinicalSignals;
use super::domain::{Action, NewReferral, Referral, ReferralId, ReferralSource, ReferralStatus};
use super::retry::RetryableReasons;

/// Requested referral annotated with the duplicate check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AcceptanceCandidate {
    pub referral: Referral,
    /// An earlier, non-declined referral exists for the same external patient.
    pub is_duplicate: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionCandidate {
    pub referral: Referral,
    pub appointment_date: NaiveDate,
}

/// Completed referral selected for a decision, with the latest clinical signals.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionCandidate {
    pub referral: Referral,
    /// `None` when no questionnaire has been submitted for the patient.
    pub signals: Option<ClinicalSignals>,
    pub questionnaire_date: Option<NaiveDate>,
}

/// How the completed-referral pass selects candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionableQuery {
    /// No action yet, or the latest action is a retryable error.
    #[default]
    Initial,
    /// A questionnaire newer than the referral exists and no outbound action was ever taken.
    NewQuestionnaire,
}

/// Storage abstraction for referrals. Each read corresponds to one orchestrator pass.
pub trait ReferralRepository: Send + Sync {
    fn insert(&self, referral: NewReferral) -> Result<Referral, RepositoryError>;

    fn fetch(&self, id: &ReferralId) -> Result<Option<Referral>, RepositoryError>;

    fn referrals_needing_acceptance_decision(
        &self,
        source: Option<ReferralSource>,
    ) -> Result<Vec<AcceptanceCandidate>, RepositoryError>;

    fn referrals_ready_for_in_progress(
        &self,
        source: Option<ReferralSource>,
    ) -> Result<Vec<Referral>, RepositoryError>;

    fn referrals_ready_for_completion(
        &self,
        source: Option<ReferralSource>,
    ) -> Result<Vec<CompletionCandidate>, RepositoryError>;

    fn actionable_completed_referrals(
        &self,
        source: Option<ReferralSource>,
        query: ActionableQuery,
        retryable: &RetryableReasons,
    ) -> Result<Vec<ActionCandidate>, RepositoryError>;

    /// Conditional update: applied only when the stored status is still `from`.
    fn transition_status(
        &self,
        id: &ReferralId,
        from: ReferralStatus,
        to: ReferralStatus,
    ) -> Result<Referral, RepositoryError>;

    fn append_action(&self, id: &ReferralId, action: Action) -> Result<Referral, RepositoryError>;

    fn mark_latest_requested_action_completed(
        &self,
        id: &ReferralId,
    ) -> Result<Referral, RepositoryError>;

    fn record_appointment_date(
        &self,
        id: &ReferralId,
        date: NaiveDate,
    ) -> Result<Referral, RepositoryError>;
}

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("referral {0} not found")]
    NotFound(ReferralId),
    #[error("referral {id} is {actual}, expected {expected}")]
    StateConflict {
        id: ReferralId,
        expected: ReferralStatus,
        actual: ReferralStatus,
    },
    #[error("state violation: {0}")]
    StateViolation(String),
    #[error("invalid data: {0}")]
    InvalidData(String),
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

impl RepositoryError {
    pub fn reason_code(&self) -> &'static str {
        match self {
            RepositoryError::NotFound(_) => "not_found",
            RepositoryError::StateConflict { .. } => "state_conflict",
            RepositoryError::StateViolation(_) => "state_violation",
            RepositoryError::InvalidData(_) => "invalid_data",
            RepositoryError::Unavailable(_) => "exception_error",
        }
    }
}

impl From<ActionLogError> for RepositoryError {
    fn from(error: ActionLogError) -> Self {
        match error {
            ActionLogError::Malformed(inner) => RepositoryError::InvalidData(inner.to_string()),
            other => RepositoryError::StateViolation(other.to_string()),
        }
    }
}
