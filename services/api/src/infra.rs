use chrono::NaiveDate;
use metrics_exporter_prometheus::PrometheusHandle;
use referral_orchestrator::config::PipelineConfig;
use referral_orchestrator::error::AppError;
use referral_orchestrator::workflows::referral::{
    ActionExecutor, CallbackRegistry, CaseReceipt, CaseSubstatus, DecisionEngine, DecisionResult,
    ExecutionError, ExecutorConnector, FoodProgramCallbackFactory, InMemoryReferralStore,
    LifecycleOrchestrator, OrchestratorSettings, PatientRecord, ReferralIdentity, ReferralSource,
};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::info;

pub(crate) type Orchestrator = LifecycleOrchestrator<InMemoryReferralStore>;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Stand-in for the case-management system: every session accepts the work and logs it.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct SimulatedConnector;

impl ExecutorConnector for SimulatedConnector {
    fn connect(&self, source: ReferralSource) -> Result<Box<dyn ActionExecutor>, ExecutionError> {
        info!(%source, "simulated executor session opened");
        Ok(Box::new(SimulatedExecutor { source }))
    }
}

struct SimulatedExecutor {
    source: ReferralSource,
}

impl ActionExecutor for SimulatedExecutor {
    fn lookup_patient(
        &mut self,
        identity: &ReferralIdentity,
    ) -> Result<PatientRecord, ExecutionError> {
        Ok(PatientRecord {
            case_reference: identity.external_id.clone(),
        })
    }

    fn create_referral(
        &mut self,
        identity: &ReferralIdentity,
        decision: &DecisionResult,
        dry_run: bool,
    ) -> Result<CaseReceipt, ExecutionError> {
        info!(
            referral_id = %identity.referral_id,
            case = %identity.external_id,
            benefit = %decision.food_benefit,
            dry_run,
            "simulated referral submitted"
        );
        Ok(CaseReceipt::Confirmed)
    }

    fn close_case(
        &mut self,
        identity: &ReferralIdentity,
        substatus: CaseSubstatus,
        discharge_date: NaiveDate,
    ) -> Result<(), ExecutionError> {
        info!(
            case = %identity.external_id,
            ?substatus,
            %discharge_date,
            "simulated case closed"
        );
        Ok(())
    }

    fn transfer_case(&mut self, identity: &ReferralIdentity) -> Result<(), ExecutionError> {
        info!(case = %identity.external_id, "simulated case transferred");
        Ok(())
    }

    fn sign_out(&mut self) -> Result<(), ExecutionError> {
        info!(source = %self.source, "simulated executor session closed");
        Ok(())
    }
}

/// Wire an orchestrator over an empty in-memory store with one food-program callback
/// per referral source.
pub(crate) fn build_orchestrator(
    pipeline: &PipelineConfig,
    connector: Arc<dyn ExecutorConnector>,
) -> Result<Orchestrator, AppError> {
    let factory = Arc::new(
        FoodProgramCallbackFactory::new(connector).with_lookup_backoff(pipeline.lookup_backoff.clone()),
    );
    let mut registry = CallbackRegistry::new();
    for source in ReferralSource::ALL {
        registry.register(source, factory.clone())?;
    }

    let settings = OrchestratorSettings {
        completed_mode: pipeline.completed_mode,
        retryable: pipeline.retryable.clone(),
        ..OrchestratorSettings::default()
    };

    Ok(LifecycleOrchestrator::new(
        Arc::new(InMemoryReferralStore::new()),
        Arc::new(registry),
        Arc::new(DecisionEngine::new(pipeline.decision.clone())),
    )
    .with_settings(settings))
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|err| format!("failed to parse '{raw}' as YYYY-MM-DD ({err})"))
}
