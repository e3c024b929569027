//! Seams to the external case-management system (the Action Executor) and the
//! eligibility service. Implementations are session-bound and blocking.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::decision::DecisionResult;
use super::domain::{ReferralIdentity, ReferralSource};

/// Structured failure codes reported by the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemErrorCode {
    Timeout,
    SessionExpired,
    PatientNotFound,
    CaseAlreadyOpen,
    Rejected,
}

impl SystemErrorCode {
    pub const fn code(self) -> &'static str {
        match self {
            SystemErrorCode::Timeout => "executor_timeout",
            SystemErrorCode::SessionExpired => "executor_session_expired",
            SystemErrorCode::PatientNotFound => "executor_patient_not_found",
            SystemErrorCode::CaseAlreadyOpen => "executor_case_already_open",
            SystemErrorCode::Rejected => "executor_rejected",
        }
    }

    pub const fn is_transient(self) -> bool {
        matches!(
            self,
            SystemErrorCode::Timeout
                | SystemErrorCode::SessionExpired
                | SystemErrorCode::PatientNotFound
        )
    }
}

/// Executor failures split into machine-readable codes and free-form diagnostics.
/// Diagnostics are recorded verbatim as the action reason.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionError {
    #[error("executor system error: {}", .0.code())]
    System(SystemErrorCode),
    #[error("executor diagnostic: {0}")]
    Diagnostic(String),
}

impl ExecutionError {
    pub fn reason(&self) -> String {
        match self {
            ExecutionError::System(code) => code.code().to_string(),
            ExecutionError::Diagnostic(text) => text.clone(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ExecutionError::System(code) if code.is_transient())
    }
}

/// What the executor reported after accepting a referral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseReceipt {
    /// The case was created synchronously.
    Confirmed,
    /// The request was queued; confirmation arrives later.
    Submitted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatientRecord {
    pub case_reference: String,
}

/// Substatus applied when a case is closed downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseSubstatus {
    Duplicate,
    Cancelled,
}

/// Session-bound client for the case-management system. Calls block.
pub trait ActionExecutor: Send {
    /// Idempotent; safe to retry.
    fn lookup_patient(&mut self, identity: &ReferralIdentity)
        -> Result<PatientRecord, ExecutionError>;

    fn create_referral(
        &mut self,
        identity: &ReferralIdentity,
        decision: &DecisionResult,
        dry_run: bool,
    ) -> Result<CaseReceipt, ExecutionError>;

    fn close_case(
        &mut self,
        identity: &ReferralIdentity,
        substatus: CaseSubstatus,
        discharge_date: NaiveDate,
    ) -> Result<(), ExecutionError>;

    fn transfer_case(&mut self, identity: &ReferralIdentity) -> Result<(), ExecutionError>;

    fn sign_out(&mut self) -> Result<(), ExecutionError>;
}

/// Opens executor sessions. One session backs one source context.
pub trait ExecutorConnector: Send + Sync {
    fn connect(&self, source: ReferralSource) -> Result<Box<dyn ActionExecutor>, ExecutionError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Eligibility {
    Eligible,
    Ineligible,
    Undetermined,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("eligibility check failed: {code}")]
pub struct EligibilityError {
    pub code: String,
}

pub trait EligibilityChecker: Send + Sync {
    fn is_patient_eligible(&self, external_patient_id: &str) -> Result<Eligibility, EligibilityError>;
}
