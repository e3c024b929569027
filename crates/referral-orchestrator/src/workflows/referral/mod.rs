//! Referral lifecycle orchestration: intake, the four lifecycle passes, the decision
//! engine, and the source callbacks that mirror each step into the downstream
//! case-management system.

pub mod action_log;
pub mod callbacks;
pub mod decision;
pub mod domain;
pub mod executor;
pub mod food_program;
pub mod intake;
pub mod orchestrator;
pub mod repository;
pub mod retry;
pub mod store;

#[cfg(test)]
mod tests;

pub use action_log::{ActionLog, ActionLogError};
pub use callbacks::{
    ActionDisposition, ActionOptions, CallbackError, CallbackFactory, CallbackRegistry,
    ContextError, RegistryError, SourceCallback, SourceContexts, StateChangeOptions,
};
pub use decision::{
    BenefitDuration, ClinicalSignals, DecisionConfig, DecisionEngine, DecisionOutcome,
    DecisionResult, DecisionValidationError, DietCode, FoodBenefit, Frequency, RiskScore,
    VendorAssigner, VendorOption,
};
pub use domain::{
    Action, ActionStatus, ActionType, Appointment, AppointmentStatus, NewReferral, Questionnaire,
    Referral, ReferralId, ReferralIdentity, ReferralSource, ReferralStatus, UnknownValue,
};
pub use executor::{
    ActionExecutor, CaseReceipt, CaseSubstatus, Eligibility, EligibilityChecker,
    EligibilityError, ExecutionError, ExecutorConnector, PatientRecord, SystemErrorCode,
};
pub use food_program::{FoodProgramCallback, FoodProgramCallbackFactory};
pub use intake::{IntakeError, IntakeReport, ReferralIntake};
pub use orchestrator::{
    AcceptedPassSummary, CompletedPassSummary, InProgressPassSummary, LifecycleOrchestrator,
    OrchestratorSettings, PassReport, PassStage, PipelineError, ProcessingError,
    RequestedPassSummary, StageSummary,
};
pub use repository::{
    AcceptanceCandidate, ActionCandidate, ActionableQuery, CompletionCandidate,
    ReferralRepository, RepositoryError,
};
pub use retry::{BackoffPolicy, RetryableReasons};
pub use store::InMemoryReferralStore;
