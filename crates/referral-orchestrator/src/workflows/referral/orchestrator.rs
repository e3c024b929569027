//! Stage functions moving referrals through their lifecycle.
//!
//! Each pass fetches its candidates, lazily opens one source context per distinct
//! source, processes referrals one at a time, and returns aggregate counts. A failure
//! on one referral is logged, counted, and recorded as an `error` action; it never
//! aborts the pass. A callback failure after a status write has landed only counts
//! in `num_callback_failures`: the write is the outcome. Candidate fetch failures and
//! context failures on a pass filtered to a single source are fatal.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use super::callbacks::{
    ActionDisposition, ActionOptions, CallbackError, CallbackRegistry, ContextError,
    SourceCallback, SourceContexts, StateChangeOptions,
};
use super::decision::{DecisionEngine, DecisionValidationError};
use super::domain::{
    Action, ActionStatus, ActionType, Referral, ReferralId, ReferralSource, ReferralStatus,
    UnknownValue,
};
use super::executor::CaseReceipt;
use super::repository::{
    AcceptanceCandidate, ActionCandidate, ActionableQuery, CompletionCandidate,
    ReferralRepository, RepositoryError,
};
use super::retry::RetryableReasons;

/// Reason attached to referrals declined as duplicates.
pub const DUPLICATE_REFERRAL: &str = "duplicate_referral";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorSettings {
    pub completed_mode: ActionableQuery,
    pub retryable: RetryableReasons,
    /// Ask the executor to validate without creating cases; nothing is appended.
    pub executor_dry_run: bool,
    /// Fixed evaluation date. Defaults to today (UTC).
    pub as_of: Option<NaiveDate>,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            completed_mode: ActionableQuery::Initial,
            retryable: RetryableReasons::default(),
            executor_dry_run: false,
            as_of: None,
        }
    }
}

/// Counts shared by every pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub num_processed: usize,
    pub num_errors: usize,
    /// Status writes that landed but whose source callback failed.
    pub num_callback_failures: usize,
    pub skipped_sources: BTreeMap<ReferralSource, String>,
    pub dry_run: bool,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RequestedPassSummary {
    #[serde(flatten)]
    pub report: PassReport,
    pub num_accepted: usize,
    pub num_declined: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AcceptedPassSummary {
    #[serde(flatten)]
    pub report: PassReport,
    pub num_in_progress: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InProgressPassSummary {
    #[serde(flatten)]
    pub report: PassReport,
    pub num_completed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompletedPassSummary {
    #[serde(flatten)]
    pub report: PassReport,
    pub num_actioned: usize,
    pub num_no_action: usize,
    pub num_declined: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "stage", rename_all = "kebab-case")]
pub enum StageSummary {
    Requested(RequestedPassSummary),
    Accepted(AcceptedPassSummary),
    InProgress(InProgressPassSummary),
    Completed(CompletedPassSummary),
}

impl StageSummary {
    pub fn report(&self) -> &PassReport {
        match self {
            StageSummary::Requested(summary) => &summary.report,
            StageSummary::Accepted(summary) => &summary.report,
            StageSummary::InProgress(summary) => &summary.report,
            StageSummary::Completed(summary) => &summary.report,
        }
    }
}

/// Pass selector, named after the status each pass consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PassStage {
    Requested,
    Accepted,
    InProgress,
    Completed,
}

impl PassStage {
    pub const ALL: [PassStage; 4] = [
        PassStage::Requested,
        PassStage::Accepted,
        PassStage::InProgress,
        PassStage::Completed,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            PassStage::Requested => "requested",
            PassStage::Accepted => "accepted",
            PassStage::InProgress => "in-progress",
            PassStage::Completed => "completed",
        }
    }
}

impl fmt::Display for PassStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for PassStage {
    type Err = UnknownValue;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace('_', "-");
        PassStage::ALL
            .into_iter()
            .find(|stage| stage.label() == normalized)
            .ok_or_else(|| UnknownValue {
                kind: "pass stage",
                value: value.to_string(),
            })
    }
}

/// Per-referral failure. Converted into an `error` action by the pass.
#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Callback(#[from] CallbackError),
    #[error("failed to encode decision snapshot: {0}")]
    Snapshot(#[from] serde_json::Error),
}

impl ProcessingError {
    pub fn reason(&self) -> String {
        match self {
            ProcessingError::Repository(error) => error.reason_code().to_string(),
            ProcessingError::Callback(error) => error.reason(),
            ProcessingError::Snapshot(_) => "exception_error".to_string(),
        }
    }

    /// Another worker moved the referral first; nothing to record.
    pub fn is_state_conflict(&self) -> bool {
        matches!(
            self,
            ProcessingError::Repository(RepositoryError::StateConflict { .. })
        )
    }
}

/// Failures that abort a pass or a single-referral operation.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("failed to load candidates: {0}")]
    Candidates(#[source] RepositoryError),
    #[error("source context unavailable for {referral_source}: {reason}")]
    SourceContext {
        referral_source: ReferralSource,
        reason: String,
    },
    #[error("referral {0} not found")]
    NotFound(ReferralId),
    #[error(transparent)]
    Processing(#[from] ProcessingError),
}

impl From<RepositoryError> for PipelineError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::NotFound(id) => PipelineError::NotFound(id),
            other => PipelineError::Processing(ProcessingError::Repository(other)),
        }
    }
}

trait PassCandidate {
    fn referral(&self) -> &Referral;
}

impl PassCandidate for Referral {
    fn referral(&self) -> &Referral {
        self
    }
}

impl PassCandidate for AcceptanceCandidate {
    fn referral(&self) -> &Referral {
        &self.referral
    }
}

impl PassCandidate for CompletionCandidate {
    fn referral(&self) -> &Referral {
        &self.referral
    }
}

impl PassCandidate for ActionCandidate {
    fn referral(&self) -> &Referral {
        &self.referral
    }
}

/// Outcome of the completed-referral pass for one referral.
enum ActionTaken {
    Actioned,
    NoAction,
    Declined,
    /// An `error` action was recorded.
    Errored,
}

/// Drives referrals through the lifecycle and records every decision in the action log.
pub struct LifecycleOrchestrator<R> {
    repository: Arc<R>,
    registry: Arc<CallbackRegistry>,
    engine: Arc<DecisionEngine>,
    settings: OrchestratorSettings,
    cancel: Arc<AtomicBool>,
}

impl<R> LifecycleOrchestrator<R>
where
    R: ReferralRepository + 'static,
{
    pub fn new(
        repository: Arc<R>,
        registry: Arc<CallbackRegistry>,
        engine: Arc<DecisionEngine>,
    ) -> Self {
        Self {
            repository,
            registry,
            engine,
            settings: OrchestratorSettings::default(),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn repository(&self) -> &Arc<R> {
        &self.repository
    }

    /// Shared flag checked between referrals. Setting it stops running passes after
    /// the referral in flight; clearing it lets later passes run again.
    pub fn cancellation_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    fn today(&self) -> NaiveDate {
        self.settings
            .as_of
            .unwrap_or_else(|| Utc::now().date_naive())
    }

    pub fn run_stage(
        &self,
        stage: PassStage,
        source: Option<ReferralSource>,
        dry_run: bool,
    ) -> Result<StageSummary, PipelineError> {
        let summary = match stage {
            PassStage::Requested => {
                StageSummary::Requested(self.process_requested_referrals(source, dry_run)?)
            }
            PassStage::Accepted => {
                StageSummary::Accepted(self.process_accepted_referrals(source, dry_run)?)
            }
            PassStage::InProgress => {
                StageSummary::InProgress(self.process_in_progress_referrals(source, dry_run)?)
            }
            PassStage::Completed => {
                let mut contexts = SourceContexts::new();
                StageSummary::Completed(self.process_completed_referrals_with(
                    source,
                    dry_run || self.settings.executor_dry_run,
                    &mut contexts,
                )?)
            }
        };
        Ok(summary)
    }

    /// Pass 1: accept new referrals, declining duplicates of an active referral for
    /// the same patient.
    pub fn process_requested_referrals(
        &self,
        source: Option<ReferralSource>,
        dry_run: bool,
    ) -> Result<RequestedPassSummary, PipelineError> {
        let mut contexts = SourceContexts::new();
        self.process_requested_referrals_with(source, dry_run, &mut contexts)
    }

    pub fn process_requested_referrals_with(
        &self,
        source: Option<ReferralSource>,
        dry_run: bool,
        contexts: &mut SourceContexts<'_>,
    ) -> Result<RequestedPassSummary, PipelineError> {
        let candidates = self
            .repository
            .referrals_needing_acceptance_decision(source)
            .map_err(PipelineError::Candidates)?;

        let mut summary = RequestedPassSummary::default();
        summary.report.dry_run = dry_run;
        self.pass_started(PassStage::Requested, source, candidates.len(), dry_run);

        let today = self.today();
        let num_accepted = &mut summary.num_accepted;
        let num_declined = &mut summary.num_declined;
        self.drive(
            PassStage::Requested,
            source,
            contexts,
            &candidates,
            &mut summary.report,
            |callback, candidate| {
                let (next, reason) = if candidate.is_duplicate {
                    (ReferralStatus::Declined, Some(DUPLICATE_REFERRAL.to_string()))
                } else {
                    (ReferralStatus::Accepted, None)
                };

                let mut callback_failure = None;
                if !dry_run {
                    let options = StateChangeOptions {
                        dry_run,
                        reason,
                        effective_date: Some(today),
                    };
                    (_, callback_failure) = self.apply_transition(
                        callback,
                        &candidate.referral,
                        ReferralStatus::Requested,
                        next,
                        &options,
                    )?;
                }

                match next {
                    ReferralStatus::Accepted => *num_accepted += 1,
                    _ => *num_declined += 1,
                }
                Ok(callback_failure)
            },
        )?;

        info!(
            stage = PassStage::Requested.label(),
            processed = summary.report.num_processed,
            accepted = summary.num_accepted,
            declined = summary.num_declined,
            errors = summary.report.num_errors,
            callback_failures = summary.report.num_callback_failures,
            dry_run,
            "pass finished"
        );
        Ok(summary)
    }

    /// Pass 2: move accepted referrals with a linked appointment to in-progress.
    pub fn process_accepted_referrals(
        &self,
        source: Option<ReferralSource>,
        dry_run: bool,
    ) -> Result<AcceptedPassSummary, PipelineError> {
        let candidates = self
            .repository
            .referrals_ready_for_in_progress(source)
            .map_err(PipelineError::Candidates)?;

        let mut summary = AcceptedPassSummary::default();
        summary.report.dry_run = dry_run;
        self.pass_started(PassStage::Accepted, source, candidates.len(), dry_run);

        let today = self.today();
        let mut contexts = SourceContexts::new();
        let num_in_progress = &mut summary.num_in_progress;
        self.drive(
            PassStage::Accepted,
            source,
            &mut contexts,
            &candidates,
            &mut summary.report,
            |callback, referral| {
                let mut callback_failure = None;
                if !dry_run {
                    let options = StateChangeOptions {
                        effective_date: Some(today),
                        ..StateChangeOptions::default()
                    };
                    (_, callback_failure) = self.apply_transition(
                        callback,
                        referral,
                        ReferralStatus::Accepted,
                        ReferralStatus::InProgress,
                        &options,
                    )?;
                }
                *num_in_progress += 1;
                Ok(callback_failure)
            },
        )?;

        info!(
            stage = PassStage::Accepted.label(),
            processed = summary.report.num_processed,
            in_progress = summary.num_in_progress,
            errors = summary.report.num_errors,
            callback_failures = summary.report.num_callback_failures,
            dry_run,
            "pass finished"
        );
        Ok(summary)
    }

    /// Pass 3: complete in-progress referrals whose appointment occurred, carrying the
    /// appointment date forward for action metadata.
    pub fn process_in_progress_referrals(
        &self,
        source: Option<ReferralSource>,
        dry_run: bool,
    ) -> Result<InProgressPassSummary, PipelineError> {
        let candidates = self
            .repository
            .referrals_ready_for_completion(source)
            .map_err(PipelineError::Candidates)?;

        let mut summary = InProgressPassSummary::default();
        summary.report.dry_run = dry_run;
        self.pass_started(PassStage::InProgress, source, candidates.len(), dry_run);

        let mut contexts = SourceContexts::new();
        let num_completed = &mut summary.num_completed;
        self.drive(
            PassStage::InProgress,
            source,
            &mut contexts,
            &candidates,
            &mut summary.report,
            |callback, candidate| {
                let mut callback_failure = None;
                if !dry_run {
                    let options = StateChangeOptions {
                        effective_date: Some(candidate.appointment_date),
                        ..StateChangeOptions::default()
                    };
                    (_, callback_failure) = self.apply_transition(
                        callback,
                        &candidate.referral,
                        ReferralStatus::InProgress,
                        ReferralStatus::Completed,
                        &options,
                    )?;
                    self.repository
                        .record_appointment_date(&candidate.referral.id, candidate.appointment_date)?;
                }
                *num_completed += 1;
                Ok(callback_failure)
            },
        )?;

        info!(
            stage = PassStage::InProgress.label(),
            processed = summary.report.num_processed,
            completed = summary.num_completed,
            errors = summary.report.num_errors,
            callback_failures = summary.report.num_callback_failures,
            dry_run,
            "pass finished"
        );
        Ok(summary)
    }

    /// Pass 4: decide on completed referrals and act through the source callback.
    /// Status is unchanged; each processed referral receives exactly one action.
    pub fn process_completed_referrals(
        &self,
        source: Option<ReferralSource>,
    ) -> Result<CompletedPassSummary, PipelineError> {
        let mut contexts = SourceContexts::new();
        self.process_completed_referrals_with(source, self.settings.executor_dry_run, &mut contexts)
    }

    pub fn process_completed_referrals_with(
        &self,
        source: Option<ReferralSource>,
        executor_dry_run: bool,
        contexts: &mut SourceContexts<'_>,
    ) -> Result<CompletedPassSummary, PipelineError> {
        let candidates = self
            .repository
            .actionable_completed_referrals(
                source,
                self.settings.completed_mode,
                &self.settings.retryable,
            )
            .map_err(PipelineError::Candidates)?;

        let mut summary = CompletedPassSummary::default();
        summary.report.dry_run = executor_dry_run;
        self.pass_started(PassStage::Completed, source, candidates.len(), executor_dry_run);

        let mut recorded_errors = 0;
        let num_actioned = &mut summary.num_actioned;
        let num_no_action = &mut summary.num_no_action;
        let num_declined = &mut summary.num_declined;
        self.drive(
            PassStage::Completed,
            source,
            contexts,
            &candidates,
            &mut summary.report,
            |callback, candidate| {
                match self.act_on(callback, candidate, executor_dry_run)? {
                    ActionTaken::Actioned => *num_actioned += 1,
                    ActionTaken::NoAction => *num_no_action += 1,
                    ActionTaken::Declined => *num_declined += 1,
                    ActionTaken::Errored => recorded_errors += 1,
                }
                Ok(None)
            },
        )?;
        summary.report.num_errors += recorded_errors;

        info!(
            stage = PassStage::Completed.label(),
            processed = summary.report.num_processed,
            actioned = summary.num_actioned,
            no_action = summary.num_no_action,
            declined = summary.num_declined,
            errors = summary.report.num_errors,
            dry_run = executor_dry_run,
            "pass finished"
        );
        Ok(summary)
    }

    /// Cancel an in-progress referral and close its downstream case.
    pub fn cancel_referral(
        &self,
        id: &ReferralId,
        reason: &str,
    ) -> Result<Referral, PipelineError> {
        let referral = self
            .repository
            .fetch(id)?
            .ok_or_else(|| PipelineError::NotFound(id.clone()))?;

        if !referral.status.can_transition_to(ReferralStatus::Cancelled) {
            return Err(RepositoryError::StateViolation(format!(
                "referral {id} is {} and cannot be cancelled",
                referral.status
            ))
            .into());
        }

        let mut contexts = SourceContexts::new();
        let callback = contexts
            .acquire(referral.source, &self.registry)
            .map_err(|error| PipelineError::SourceContext {
                referral_source: referral.source,
                reason: context_reason(error),
            })?;

        let options = StateChangeOptions {
            dry_run: false,
            reason: Some(reason.to_string()),
            effective_date: Some(self.today()),
        };
        match self.apply_transition(
            callback,
            &referral,
            ReferralStatus::InProgress,
            ReferralStatus::Cancelled,
            &options,
        ) {
            Ok((updated, callback_failure)) => {
                if let Some(failure) = callback_failure {
                    warn!(
                        referral_id = %id,
                        reason = %failure.reason(),
                        error = %failure,
                        "referral cancelled but case close failed"
                    );
                } else {
                    info!(referral_id = %id, reason, "referral cancelled");
                }
                Ok(updated)
            }
            Err(error) => {
                self.record_error_action(&referral, &error, PassStage::InProgress);
                Err(error.into())
            }
        }
    }

    /// Mark the in-flight action of a referral as completed once the executor confirms it.
    pub fn confirm_pending_action(&self, id: &ReferralId) -> Result<Referral, PipelineError> {
        let updated = self.repository.mark_latest_requested_action_completed(id)?;
        info!(referral_id = %id, "pending action confirmed");
        Ok(updated)
    }

    fn pass_started(
        &self,
        stage: PassStage,
        source: Option<ReferralSource>,
        candidates: usize,
        dry_run: bool,
    ) {
        info!(
            stage = stage.label(),
            source = source.map(ReferralSource::label).unwrap_or("all"),
            candidates,
            dry_run,
            "pass started"
        );
    }

    /// Resolve the context for a referral's source. `Ok(None)` means the source is
    /// skipped for this pass.
    fn context_for<'c>(
        &self,
        contexts: &'c mut SourceContexts<'_>,
        referral_source: ReferralSource,
        filter: Option<ReferralSource>,
    ) -> Result<Option<&'c mut dyn SourceCallback>, PipelineError> {
        match contexts.acquire(referral_source, &self.registry) {
            Ok(callback) => Ok(Some(callback)),
            Err(ContextError::CreationFailed { reason, .. }) if filter.is_some() => {
                Err(PipelineError::SourceContext {
                    referral_source,
                    reason,
                })
            }
            Err(_) => Ok(None),
        }
    }

    fn drive<T, F>(
        &self,
        stage: PassStage,
        source: Option<ReferralSource>,
        contexts: &mut SourceContexts<'_>,
        candidates: &[T],
        report: &mut PassReport,
        mut handle: F,
    ) -> Result<(), PipelineError>
    where
        T: PassCandidate,
        F: FnMut(&mut dyn SourceCallback, &T) -> Result<Option<CallbackError>, ProcessingError>,
    {
        for (index, candidate) in candidates.iter().enumerate() {
            if self.cancel.load(Ordering::SeqCst) {
                warn!(remaining = candidates.len() - index, "pass cancelled");
                report.cancelled = true;
                break;
            }

            let referral = candidate.referral();
            let Some(callback) = self.context_for(contexts, referral.source, source)? else {
                continue;
            };

            report.num_processed += 1;
            match handle(callback, candidate) {
                Ok(None) => {}
                Ok(Some(failure)) => {
                    report.num_callback_failures += 1;
                    warn!(
                        referral_id = %referral.id,
                        source = %referral.source,
                        reason = %failure.reason(),
                        error = %failure,
                        "status written but source callback failed"
                    );
                }
                Err(error) => {
                    report.num_errors += 1;
                    warn!(
                        referral_id = %referral.id,
                        source = %referral.source,
                        reason = %error.reason(),
                        error = %error,
                        "referral processing failed"
                    );
                    if !error.is_state_conflict() {
                        self.record_error_action(referral, &error, stage);
                    }
                }
            }
        }

        report.skipped_sources = contexts.skipped_sources();
        Ok(())
    }

    fn apply_transition(
        &self,
        callback: &mut dyn SourceCallback,
        referral: &Referral,
        from: ReferralStatus,
        to: ReferralStatus,
        options: &StateChangeOptions,
    ) -> Result<(Referral, Option<CallbackError>), ProcessingError> {
        let updated = self.repository.transition_status(&referral.id, from, to)?;
        let callback_failure = callback.on_state_change(&updated, to, options).err();
        Ok((updated, callback_failure))
    }

    /// Errors outside the completed pass are tagged with their stage so they never
    /// shadow the decision outcome used for completed-pass selection.
    fn record_error_action(
        &self,
        referral: &Referral,
        failure: &ProcessingError,
        stage: PassStage,
    ) {
        let action = match stage {
            PassStage::Completed => Action::error(self.today(), failure.reason()),
            _ => Action::stage_error(self.today(), failure.reason(), stage.label()),
        };
        if let Err(append_error) = self.repository.append_action(&referral.id, action) {
            error!(
                referral_id = %referral.id,
                error = %append_error,
                "failed to record error action"
            );
        }
    }

    fn act_on(
        &self,
        callback: &mut dyn SourceCallback,
        candidate: &ActionCandidate,
        executor_dry_run: bool,
    ) -> Result<ActionTaken, ProcessingError> {
        let referral = &candidate.referral;
        let today = self.today();
        let action_date = candidate
            .questionnaire_date
            .or(referral.appointment_date)
            .unwrap_or(today);

        let Some(signals) = candidate.signals.as_ref() else {
            let code = DecisionValidationError::MissingQuestionnaire.code();
            self.repository
                .append_action(&referral.id, Action::error(action_date, code))?;
            return Ok(ActionTaken::Errored);
        };

        let outcome = self.engine.evaluate(signals, today);
        let decision = outcome.decision;
        if decision.risk_score.is_none() {
            // Insufficient questionnaire data; retried once a fuller questionnaire lands.
            let code = DecisionValidationError::MissingQuestionnaire.code();
            self.repository.append_action(
                &referral.id,
                Action::error(action_date, code).with_decision(&decision)?,
            )?;
            info!(referral_id = %referral.id, reason = code, "risk tier undetermined");
            return Ok(ActionTaken::Errored);
        }
        if let Err(invalid) = outcome.verdict {
            let (action, taken) = if invalid.records_no_action() {
                (Action::no_action(action_date, invalid.code()), ActionTaken::NoAction)
            } else {
                (Action::error(action_date, invalid.code()), ActionTaken::Errored)
            };
            self.repository
                .append_action(&referral.id, action.with_decision(&decision)?)?;
            info!(referral_id = %referral.id, reason = invalid.code(), "decision not actionable");
            return Ok(taken);
        }

        let action_type = if signals.benefits_received > 0 {
            ActionType::FoodReauthorization
        } else {
            ActionType::FoodReferral
        };
        let proposed = Action::new(action_type, action_date).with_decision(&decision)?;
        let options = ActionOptions {
            dry_run: executor_dry_run,
            effective_date: Some(action_date),
        };

        let disposition = callback.on_action(referral, &proposed, &decision, &options);
        if executor_dry_run {
            info!(
                referral_id = %referral.id,
                action_type = action_type.label(),
                disposition = ?disposition,
                "executor dry run, no action recorded"
            );
            return Ok(match disposition {
                Ok(ActionDisposition::Executed { .. }) => ActionTaken::Actioned,
                Ok(ActionDisposition::Declined { .. }) => ActionTaken::Declined,
                Err(_) => ActionTaken::Errored,
            });
        }

        let (action, taken) = match disposition {
            Ok(ActionDisposition::Executed { receipt }) => {
                let status = match receipt {
                    CaseReceipt::Confirmed => ActionStatus::Completed,
                    CaseReceipt::Submitted => ActionStatus::Requested,
                };
                (proposed.with_status(status), ActionTaken::Actioned)
            }
            Ok(ActionDisposition::Declined { reason }) => (
                Action::new(ActionType::Decline, action_date)
                    .with_reason(reason)
                    .with_decision(&decision)?,
                ActionTaken::Declined,
            ),
            Err(failure) => {
                warn!(
                    referral_id = %referral.id,
                    reason = %failure.reason(),
                    error = %failure,
                    "executor call failed"
                );
                (
                    Action::error(action_date, failure.reason()).with_decision(&decision)?,
                    ActionTaken::Errored,
                )
            }
        };

        self.repository.append_action(&referral.id, action)?;
        Ok(taken)
    }
}

fn context_reason(error: ContextError) -> String {
    match error {
        ContextError::NoFactory(_) => error.to_string(),
        ContextError::CreationFailed { reason, .. } => reason,
    }
}
