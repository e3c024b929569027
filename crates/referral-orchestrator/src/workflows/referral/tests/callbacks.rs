use std::sync::{Arc, Mutex};

use super::common::*;
use crate::workflows::referral::callbacks::{
    ActionDisposition, ActionOptions, CallbackError, CallbackFactory, CallbackRegistry,
    RegistryError, SourceCallback, SourceContexts, StateChangeOptions,
};
use crate::workflows::referral::decision::DecisionResult;
use crate::workflows::referral::domain::{Action, Referral, ReferralSource, ReferralStatus};
use crate::workflows::referral::executor::CaseReceipt;
use crate::workflows::referral::repository::ReferralRepository;
use crate::workflows::referral::InMemoryReferralStore;

/// Callback that records lifecycle notifications and whether it was destroyed.
#[derive(Default)]
struct NotingCallback {
    notes: Arc<Mutex<Vec<String>>>,
}

impl NotingCallback {
    fn note(&self, entry: String) {
        self.notes.lock().expect("notes mutex").push(entry);
    }
}

impl SourceCallback for NotingCallback {
    fn on_state_change(
        &mut self,
        referral: &Referral,
        next: ReferralStatus,
        _options: &StateChangeOptions,
    ) -> Result<(), CallbackError> {
        self.note(format!("{}:{}", referral.id, next));
        Ok(())
    }

    fn on_action(
        &mut self,
        _referral: &Referral,
        _action: &Action,
        _decision: &DecisionResult,
        _options: &ActionOptions,
    ) -> Result<ActionDisposition, CallbackError> {
        Ok(ActionDisposition::Executed {
            receipt: CaseReceipt::Confirmed,
        })
    }

    fn destroy(&mut self) -> Result<(), CallbackError> {
        self.note("destroyed".to_string());
        Ok(())
    }
}

struct NotingFactory {
    notes: Arc<Mutex<Vec<String>>>,
}

impl CallbackFactory for NotingFactory {
    fn create(&self, _source: ReferralSource) -> Result<Box<dyn SourceCallback>, CallbackError> {
        Ok(Box::new(NotingCallback {
            notes: Arc::clone(&self.notes),
        }))
    }
}

#[test]
fn registry_rejects_duplicate_registration() {
    let notes = Arc::new(Mutex::new(Vec::new()));
    let mut registry = CallbackRegistry::new();
    registry
        .register(
            ReferralSource::HealthPlan,
            Arc::new(NotingFactory {
                notes: notes.clone(),
            }),
        )
        .expect("first registration");

    match registry.register_label("health-plan", Arc::new(NotingFactory { notes })) {
        Err(RegistryError::AlreadyRegistered(source)) => {
            assert_eq!(source, ReferralSource::HealthPlan)
        }
        other => panic!("expected duplicate registration error, got {other:?}"),
    }
    assert!(matches!(
        registry.register_label("walk_in", Arc::new(NotingFactory {
            notes: Arc::default()
        })),
        Err(RegistryError::UnknownSource(_))
    ));
    assert_eq!(
        registry.sources().collect::<Vec<_>>(),
        vec![ReferralSource::HealthPlan]
    );
}

#[test]
fn owned_contexts_are_created_once_and_destroyed_on_drop() {
    let notes = Arc::new(Mutex::new(Vec::new()));
    let mut registry = CallbackRegistry::new();
    registry
        .register(
            ReferralSource::HealthPlan,
            Arc::new(NotingFactory {
                notes: notes.clone(),
            }),
        )
        .expect("registered");

    {
        let mut contexts = SourceContexts::new();
        contexts
            .acquire(ReferralSource::HealthPlan, &registry)
            .expect("created");
        contexts
            .acquire(ReferralSource::HealthPlan, &registry)
            .expect("reused");
        assert!(contexts
            .acquire(ReferralSource::CommunityPartner, &registry)
            .is_err());
        assert!(contexts.is_skipped(ReferralSource::CommunityPartner));
    }

    assert_eq!(notes.lock().expect("notes").as_slice(), ["destroyed"]);
}

#[test]
fn borrowed_contexts_serve_the_pass_but_are_never_destroyed() {
    let store = Arc::new(InMemoryReferralStore::new());
    let referral = seed_requested(&store, ReferralSource::HealthPlan, "case-1", "patient-1", 1);
    let orchestrator = orchestrator_with(store.clone(), CallbackRegistry::new());

    let notes = Arc::new(Mutex::new(Vec::new()));
    let mut borrowed = NotingCallback {
        notes: notes.clone(),
    };
    {
        let mut contexts =
            SourceContexts::new().with_borrowed(ReferralSource::HealthPlan, &mut borrowed);
        let summary = orchestrator
            .process_requested_referrals_with(None, false, &mut contexts)
            .expect("pass runs");
        assert_eq!(summary.num_accepted, 1);
    }

    assert_eq!(
        notes.lock().expect("notes").as_slice(),
        [format!("{}:accepted", referral.id)]
    );
    let stored = store.fetch(&referral.id).expect("fetch").expect("exists");
    assert_eq!(stored.status, ReferralStatus::Accepted);
}
