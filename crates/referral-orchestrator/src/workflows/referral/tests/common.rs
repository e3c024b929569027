use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};

use crate::workflows::referral::decision::{
    ClinicalSignals, MedicalCondition, PriorDetermination, RiskScore,
};
use crate::workflows::referral::domain::{
    Appointment, AppointmentStatus, NewReferral, Questionnaire, Referral, ReferralIdentity,
    ReferralSource, ReferralStatus,
};
use crate::workflows::referral::executor::{
    ActionExecutor, CaseReceipt, CaseSubstatus, Eligibility, EligibilityChecker,
    EligibilityError, ExecutionError, ExecutorConnector, PatientRecord,
};
use crate::workflows::referral::{
    BackoffPolicy, CallbackRegistry, DecisionConfig, DecisionEngine, DecisionResult,
    FoodProgramCallbackFactory, InMemoryReferralStore, LifecycleOrchestrator,
    OrchestratorSettings,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum ExecutorCall {
    Connect(ReferralSource),
    Lookup(String),
    Create { external_id: String, dry_run: bool },
    Close { external_id: String, substatus: CaseSubstatus },
    Transfer(String),
    SignOut,
}

/// Scripted behavior shared by every session a connector opens.
#[derive(Debug, Clone)]
pub(super) struct ExecutorScript {
    pub create_result: Result<CaseReceipt, ExecutionError>,
    pub transfer_result: Result<(), ExecutionError>,
    pub close_result: Result<(), ExecutionError>,
    pub transient_lookup_failures: usize,
    pub fail_connect: bool,
}

impl Default for ExecutorScript {
    fn default() -> Self {
        Self {
            create_result: Ok(CaseReceipt::Confirmed),
            transfer_result: Ok(()),
            close_result: Ok(()),
            transient_lookup_failures: 0,
            fail_connect: false,
        }
    }
}

#[derive(Clone, Default)]
pub(super) struct RecordingConnector {
    calls: Arc<Mutex<Vec<ExecutorCall>>>,
    script: Arc<Mutex<ExecutorScript>>,
}

impl RecordingConnector {
    pub(super) fn scripted(script: ExecutorScript) -> Self {
        Self {
            calls: Arc::default(),
            script: Arc::new(Mutex::new(script)),
        }
    }

    pub(super) fn calls(&self) -> Vec<ExecutorCall> {
        self.calls.lock().expect("calls mutex").clone()
    }

    pub(super) fn count(&self, predicate: impl Fn(&ExecutorCall) -> bool) -> usize {
        self.calls().iter().filter(|call| predicate(call)).count()
    }
}

impl ExecutorConnector for RecordingConnector {
    fn connect(&self, source: ReferralSource) -> Result<Box<dyn ActionExecutor>, ExecutionError> {
        let script = self.script.lock().expect("script mutex").clone();
        if script.fail_connect {
            return Err(ExecutionError::Diagnostic("login rejected".to_string()));
        }
        self.calls
            .lock()
            .expect("calls mutex")
            .push(ExecutorCall::Connect(source));
        Ok(Box::new(RecordingExecutor {
            calls: Arc::clone(&self.calls),
            lookup_failures_left: script.transient_lookup_failures,
            script,
        }))
    }
}

struct RecordingExecutor {
    calls: Arc<Mutex<Vec<ExecutorCall>>>,
    script: ExecutorScript,
    lookup_failures_left: usize,
}

impl RecordingExecutor {
    fn record(&self, call: ExecutorCall) {
        self.calls.lock().expect("calls mutex").push(call);
    }
}

impl ActionExecutor for RecordingExecutor {
    fn lookup_patient(
        &mut self,
        identity: &ReferralIdentity,
    ) -> Result<PatientRecord, ExecutionError> {
        self.record(ExecutorCall::Lookup(identity.external_patient_id.clone()));
        if self.lookup_failures_left > 0 {
            self.lookup_failures_left -= 1;
            return Err(ExecutionError::System(
                crate::workflows::referral::SystemErrorCode::Timeout,
            ));
        }
        Ok(PatientRecord {
            case_reference: format!("case-{}", identity.external_id),
        })
    }

    fn create_referral(
        &mut self,
        identity: &ReferralIdentity,
        _decision: &DecisionResult,
        dry_run: bool,
    ) -> Result<CaseReceipt, ExecutionError> {
        self.record(ExecutorCall::Create {
            external_id: identity.external_id.clone(),
            dry_run,
        });
        self.script.create_result.clone()
    }

    fn close_case(
        &mut self,
        identity: &ReferralIdentity,
        substatus: CaseSubstatus,
        _discharge_date: NaiveDate,
    ) -> Result<(), ExecutionError> {
        self.record(ExecutorCall::Close {
            external_id: identity.external_id.clone(),
            substatus,
        });
        self.script.close_result.clone()
    }

    fn transfer_case(&mut self, identity: &ReferralIdentity) -> Result<(), ExecutionError> {
        self.record(ExecutorCall::Transfer(identity.external_id.clone()));
        self.script.transfer_result.clone()
    }

    fn sign_out(&mut self) -> Result<(), ExecutionError> {
        self.record(ExecutorCall::SignOut);
        Ok(())
    }
}

pub(super) struct StaticEligibility(pub Eligibility);

impl EligibilityChecker for StaticEligibility {
    fn is_patient_eligible(&self, _external_patient_id: &str) -> Result<Eligibility, EligibilityError> {
        Ok(self.0)
    }
}

pub(super) fn as_of() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, 1).expect("valid date")
}

pub(super) fn at(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 5, day, 9, 0, 0)
        .single()
        .expect("valid timestamp")
}

pub(super) fn instant_backoff() -> BackoffPolicy {
    BackoffPolicy::new(vec![Duration::ZERO, Duration::ZERO])
}

pub(super) fn registry_for(factory: FoodProgramCallbackFactory) -> CallbackRegistry {
    let factory = Arc::new(factory);
    let mut registry = CallbackRegistry::new();
    for source in ReferralSource::ALL {
        registry
            .register(source, factory.clone())
            .expect("source registered once");
    }
    registry
}

pub(super) fn orchestrator_with(
    store: Arc<InMemoryReferralStore>,
    registry: CallbackRegistry,
) -> LifecycleOrchestrator<InMemoryReferralStore> {
    LifecycleOrchestrator::new(
        store,
        Arc::new(registry),
        Arc::new(DecisionEngine::new(DecisionConfig::default())),
    )
    .with_settings(OrchestratorSettings {
        as_of: Some(as_of()),
        ..OrchestratorSettings::default()
    })
}

pub(super) fn orchestrator(
    store: Arc<InMemoryReferralStore>,
    connector: &RecordingConnector,
) -> LifecycleOrchestrator<InMemoryReferralStore> {
    let factory = FoodProgramCallbackFactory::new(Arc::new(connector.clone()))
        .with_lookup_backoff(instant_backoff());
    orchestrator_with(store, registry_for(factory))
}

pub(super) fn seed_requested(
    store: &InMemoryReferralStore,
    source: ReferralSource,
    external_id: &str,
    patient: &str,
    day: u32,
) -> Referral {
    store
        .insert_at(
            NewReferral::new(source).with_external_ids(external_id, patient),
            at(day),
        )
        .expect("referral inserted")
}

/// Seed a referral already in `status`, bypassing the passes.
pub(super) fn seed_with_status(
    store: &InMemoryReferralStore,
    external_id: &str,
    patient: &str,
    status: ReferralStatus,
) -> Referral {
    let referral = seed_requested(store, ReferralSource::HealthPlan, external_id, patient, 1);
    store
        .restore_status(&referral.id, status)
        .expect("status restored");
    referral
}

pub(super) fn appointment(patient: &str, status: AppointmentStatus) -> Appointment {
    Appointment {
        external_patient_id: patient.to_string(),
        scheduled_for: NaiveDate::from_ymd_opt(2025, 5, 20).expect("valid date"),
        status,
    }
}

pub(super) fn questionnaire(patient: &str, signals: ClinicalSignals, day: u32) -> Questionnaire {
    Questionnaire {
        external_patient_id: patient.to_string(),
        submitted_at: at(day),
        signals,
    }
}

pub(super) fn high_risk_signals() -> ClinicalSignals {
    let mut signals = ClinicalSignals::default();
    signals.utilization.heart_failure_flag = true;
    signals.conditions.insert(MedicalCondition::HeartFailure);
    signals
}

/// Normal biometrics alone determine no tier; nothing drives the score.
pub(super) fn normal_biometric_signals() -> ClinicalSignals {
    let mut signals = ClinicalSignals::default();
    signals.biometrics.systolic_bp = Some(118);
    signals.biometrics.diastolic_bp = Some(76);
    signals.biometrics.a1c_percent = Some(5.2);
    signals
}

/// Low tier carried over from a determination made within the reuse window.
pub(super) fn low_risk_signals() -> ClinicalSignals {
    let mut signals = normal_biometric_signals();
    signals.prior_determination = Some(PriorDetermination {
        risk_score: RiskScore::Low,
        determined_on: NaiveDate::from_ymd_opt(2025, 3, 1).expect("valid date"),
    });
    signals
}
