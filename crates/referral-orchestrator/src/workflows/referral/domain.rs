use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::action_log::ActionLog;
use super::decision::{ClinicalSignals, DecisionResult};

/// Identifier wrapper for referrals tracked by the store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReferralId(pub String);

impl fmt::Display for ReferralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Raised when a label read from configuration, CSV, or an HTTP path does not name a known value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownValue {
    pub kind: &'static str,
    pub value: String,
}

/// Programs a referral can originate from. The callback registry is keyed on this closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferralSource {
    HealthPlan,
    HospitalDischarge,
    CommunityPartner,
}

impl ReferralSource {
    pub const ALL: [ReferralSource; 3] = [
        ReferralSource::HealthPlan,
        ReferralSource::HospitalDischarge,
        ReferralSource::CommunityPartner,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            ReferralSource::HealthPlan => "health_plan",
            ReferralSource::HospitalDischarge => "hospital_discharge",
            ReferralSource::CommunityPartner => "community_partner",
        }
    }
}

impl fmt::Display for ReferralSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ReferralSource {
    type Err = UnknownValue;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace('-', "_");
        ReferralSource::ALL
            .into_iter()
            .find(|source| source.label() == normalized)
            .ok_or_else(|| UnknownValue {
                kind: "referral source",
                value: value.to_string(),
            })
    }
}

/// Status tracked for a referral. Edges between statuses are fixed by [`ReferralStatus::allowed_transitions`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReferralStatus {
    Requested,
    Invalid,
    Accepted,
    InProgress,
    Declined,
    Completed,
    Cancelled,
}

impl ReferralStatus {
    pub const ALL: [ReferralStatus; 7] = [
        ReferralStatus::Requested,
        ReferralStatus::Invalid,
        ReferralStatus::Accepted,
        ReferralStatus::InProgress,
        ReferralStatus::Declined,
        ReferralStatus::Completed,
        ReferralStatus::Cancelled,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            ReferralStatus::Requested => "requested",
            ReferralStatus::Invalid => "invalid",
            ReferralStatus::Accepted => "accepted",
            ReferralStatus::InProgress => "in-progress",
            ReferralStatus::Declined => "declined",
            ReferralStatus::Completed => "completed",
            ReferralStatus::Cancelled => "cancelled",
        }
    }

    pub const fn allowed_transitions(self) -> &'static [ReferralStatus] {
        match self {
            ReferralStatus::Requested => &[
                ReferralStatus::Accepted,
                ReferralStatus::Declined,
                ReferralStatus::Invalid,
            ],
            ReferralStatus::Accepted => &[ReferralStatus::InProgress],
            ReferralStatus::InProgress => &[ReferralStatus::Completed, ReferralStatus::Cancelled],
            ReferralStatus::Completed
            | ReferralStatus::Declined
            | ReferralStatus::Cancelled
            | ReferralStatus::Invalid => &[],
        }
    }

    pub fn can_transition_to(self, next: ReferralStatus) -> bool {
        self.allowed_transitions().contains(&next)
    }

    pub fn is_terminal(self) -> bool {
        self.allowed_transitions().is_empty()
    }
}

impl fmt::Display for ReferralStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ReferralStatus {
    type Err = UnknownValue;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace('_', "-");
        ReferralStatus::ALL
            .into_iter()
            .find(|status| status.label() == normalized)
            .ok_or_else(|| UnknownValue {
                kind: "referral status",
                value: value.to_string(),
            })
    }
}

/// A request for a downstream benefit on behalf of a patient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Referral {
    pub id: ReferralId,
    pub source: ReferralSource,
    pub status: ReferralStatus,
    pub external_id: Option<String>,
    pub external_patient_id: Option<String>,
    pub account_id: Option<String>,
    pub identity_id: Option<String>,
    pub payer_id: Option<String>,
    pub source_data: BTreeMap<String, String>,
    pub action_log: ActionLog,
    pub appointment_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Referral {
    /// External identity used when talking to the case-management system.
    /// `None` until the downstream system has accepted the referral.
    pub fn identity(&self) -> Option<ReferralIdentity> {
        let external_id = self.external_id.clone()?;
        let external_patient_id = self.external_patient_id.clone()?;
        Some(ReferralIdentity {
            referral_id: self.id.clone(),
            source: self.source,
            external_id,
            external_patient_id,
        })
    }
}

/// Intake payload; the store assigns id, status, and timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewReferral {
    pub source: ReferralSource,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub external_patient_id: Option<String>,
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub identity_id: Option<String>,
    #[serde(default)]
    pub payer_id: Option<String>,
    #[serde(default)]
    pub source_data: BTreeMap<String, String>,
}

impl NewReferral {
    pub fn new(source: ReferralSource) -> Self {
        Self {
            source,
            external_id: None,
            external_patient_id: None,
            account_id: None,
            identity_id: None,
            payer_id: None,
            source_data: BTreeMap::new(),
        }
    }

    pub fn with_external_ids(
        mut self,
        external_id: impl Into<String>,
        external_patient_id: impl Into<String>,
    ) -> Self {
        self.external_id = Some(external_id.into());
        self.external_patient_id = Some(external_patient_id.into());
        self
    }
}

/// Identifiers the Action Executor needs to locate a case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferralIdentity {
    pub referral_id: ReferralId,
    pub source: ReferralSource,
    pub external_id: String,
    pub external_patient_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Error,
    FoodReferral,
    FoodReauthorization,
    Decline,
    NoAction,
}

impl ActionType {
    pub const fn label(self) -> &'static str {
        match self {
            ActionType::Error => "error",
            ActionType::FoodReferral => "food_referral",
            ActionType::FoodReauthorization => "food_reauthorization",
            ActionType::Decline => "decline",
            ActionType::NoAction => "no_action",
        }
    }

    /// Referral, reauthorization, and decline actions close out a questionnaire cycle.
    pub const fn is_outbound(self) -> bool {
        matches!(
            self,
            ActionType::FoodReferral | ActionType::FoodReauthorization | ActionType::Decline
        )
    }
}

/// Progress of an action that represents a multi-step asynchronous operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Requested,
    Completed,
    Failed,
}

/// Immutable record of a decision or outbound effect taken against a referral.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub action_type: ActionType,
    pub action_date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ActionStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl Action {
    pub fn new(action_type: ActionType, action_date: NaiveDate) -> Self {
        Self {
            action_type,
            action_date,
            action_reason: None,
            status: None,
            data: None,
        }
    }

    pub fn error(action_date: NaiveDate, reason: impl Into<String>) -> Self {
        Self::new(ActionType::Error, action_date).with_reason(reason)
    }

    /// Error raised while moving a referral between statuses. The stage tag lets the
    /// completed pass look past it when selecting candidates.
    pub fn stage_error(action_date: NaiveDate, reason: impl Into<String>, stage: &str) -> Self {
        let mut action = Self::error(action_date, reason);
        action.data = Some(serde_json::json!({ "stage": stage }));
        action
    }

    pub fn is_stage_error(&self) -> bool {
        self.action_type == ActionType::Error
            && self
                .data
                .as_ref()
                .and_then(|data| data.get("stage"))
                .is_some()
    }

    pub fn no_action(action_date: NaiveDate, reason: impl Into<String>) -> Self {
        Self::new(ActionType::NoAction, action_date).with_reason(reason)
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.action_reason = Some(reason.into());
        self
    }

    pub fn with_status(mut self, status: ActionStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Attach the decision snapshot that justified this action.
    pub fn with_decision(mut self, decision: &DecisionResult) -> Result<Self, serde_json::Error> {
        self.data = Some(serde_json::to_value(decision)?);
        Ok(self)
    }

    /// Decode the decision snapshot, if one was recorded in the current shape.
    pub fn decision(&self) -> Option<DecisionResult> {
        self.data
            .as_ref()
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    pub fn reason_is(&self, reason: &str) -> bool {
        self.action_reason.as_deref() == Some(reason)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Occurred,
    Cancelled,
    NoShow,
}

/// Appointment linked to a patient through the external patient id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub external_patient_id: String,
    pub scheduled_for: NaiveDate,
    pub status: AppointmentStatus,
}

/// Questionnaire submission carrying the clinical signals the decision engine consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Questionnaire {
    pub external_patient_id: String,
    pub submitted_at: DateTime<Utc>,
    pub signals: ClinicalSignals,
}
