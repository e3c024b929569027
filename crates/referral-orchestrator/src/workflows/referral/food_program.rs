use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tracing::{debug, info};

use super::callbacks::{
    ActionDisposition, ActionOptions, CallbackError, CallbackFactory, SourceCallback,
    StateChangeOptions,
};
use super::decision::DecisionResult;
use super::domain::{Action, Referral, ReferralIdentity, ReferralSource, ReferralStatus};
use super::executor::{
    ActionExecutor, CaseSubstatus, Eligibility, EligibilityChecker, ExecutionError,
    ExecutorConnector,
};
use super::retry::{retry_idempotent, BackoffPolicy};

/// Reason recorded when the eligibility service rules a patient out.
pub const PATIENT_INELIGIBLE: &str = "patient_ineligible";

/// Builds food-program callbacks backed by one executor session each.
pub struct FoodProgramCallbackFactory {
    connector: Arc<dyn ExecutorConnector>,
    eligibility: Option<Arc<dyn EligibilityChecker>>,
    lookup_backoff: BackoffPolicy,
}

impl FoodProgramCallbackFactory {
    pub fn new(connector: Arc<dyn ExecutorConnector>) -> Self {
        Self {
            connector,
            eligibility: None,
            lookup_backoff: BackoffPolicy::default(),
        }
    }

    pub fn with_eligibility(mut self, checker: Arc<dyn EligibilityChecker>) -> Self {
        self.eligibility = Some(checker);
        self
    }

    pub fn with_lookup_backoff(mut self, policy: BackoffPolicy) -> Self {
        self.lookup_backoff = policy;
        self
    }
}

impl CallbackFactory for FoodProgramCallbackFactory {
    fn create(&self, source: ReferralSource) -> Result<Box<dyn SourceCallback>, CallbackError> {
        let executor = self.connector.connect(source)?;
        Ok(Box::new(FoodProgramCallback {
            source,
            executor,
            eligibility: self.eligibility.clone(),
            lookup_backoff: self.lookup_backoff.clone(),
        }))
    }
}

/// Mirrors referral lifecycle changes into the case-management system and submits
/// actionable food-benefit decisions.
pub struct FoodProgramCallback {
    source: ReferralSource,
    executor: Box<dyn ActionExecutor>,
    eligibility: Option<Arc<dyn EligibilityChecker>>,
    lookup_backoff: BackoffPolicy,
}

impl FoodProgramCallback {
    fn identity(referral: &Referral) -> Result<ReferralIdentity, CallbackError> {
        referral
            .identity()
            .ok_or_else(|| CallbackError::MissingIdentity(referral.id.clone()))
    }

    fn effective_date(date: Option<NaiveDate>) -> NaiveDate {
        date.unwrap_or_else(|| Utc::now().date_naive())
    }
}

impl SourceCallback for FoodProgramCallback {
    fn on_state_change(
        &mut self,
        referral: &Referral,
        next: ReferralStatus,
        options: &StateChangeOptions,
    ) -> Result<(), CallbackError> {
        if options.dry_run {
            return Ok(());
        }

        let substatus = match next {
            ReferralStatus::Accepted => None,
            ReferralStatus::Declined => Some(CaseSubstatus::Duplicate),
            ReferralStatus::Cancelled => Some(CaseSubstatus::Cancelled),
            _ => return Ok(()),
        };

        let identity = Self::identity(referral)?;
        match substatus {
            None => self.executor.transfer_case(&identity)?,
            Some(substatus) => {
                let discharge_date = Self::effective_date(options.effective_date);
                self.executor
                    .close_case(&identity, substatus, discharge_date)?;
            }
        }

        debug!(
            referral_id = %referral.id,
            source = %self.source,
            status = next.label(),
            "case updated downstream"
        );
        Ok(())
    }

    fn on_action(
        &mut self,
        referral: &Referral,
        action: &Action,
        decision: &DecisionResult,
        options: &ActionOptions,
    ) -> Result<ActionDisposition, CallbackError> {
        let identity = Self::identity(referral)?;

        if let Some(checker) = &self.eligibility {
            match checker.is_patient_eligible(&identity.external_patient_id)? {
                Eligibility::Ineligible => {
                    info!(referral_id = %referral.id, "patient ineligible, declining action");
                    return Ok(ActionDisposition::Declined {
                        reason: PATIENT_INELIGIBLE.to_string(),
                    });
                }
                Eligibility::Undetermined => {
                    debug!(referral_id = %referral.id, "eligibility undetermined, proceeding");
                }
                Eligibility::Eligible => {}
            }
        }

        let executor = &mut self.executor;
        let patient = retry_idempotent(
            &self.lookup_backoff,
            "lookup_patient",
            || executor.lookup_patient(&identity),
            ExecutionError::is_transient,
        )?;

        let receipt = self
            .executor
            .create_referral(&identity, decision, options.dry_run)?;

        info!(
            referral_id = %referral.id,
            case_reference = %patient.case_reference,
            action_type = action.action_type.label(),
            receipt = ?receipt,
            dry_run = options.dry_run,
            "food benefit submitted"
        );
        Ok(ActionDisposition::Executed { receipt })
    }

    fn destroy(&mut self) -> Result<(), CallbackError> {
        self.executor.sign_out()?;
        Ok(())
    }
}
