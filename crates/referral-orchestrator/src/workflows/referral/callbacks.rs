use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, warn};

use super::decision::DecisionResult;
use super::domain::{Action, Referral, ReferralId, ReferralSource, ReferralStatus, UnknownValue};
use super::executor::{CaseReceipt, EligibilityError, ExecutionError};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateChangeOptions {
    pub dry_run: bool,
    pub reason: Option<String>,
    pub effective_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionOptions {
    pub dry_run: bool,
    pub effective_date: Option<NaiveDate>,
}

/// Result of handing an actionable decision to a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionDisposition {
    Executed { receipt: CaseReceipt },
    /// The source refused the action before reaching the executor.
    Declined { reason: String },
}

/// Source-specific side effects. One instance lives for one pass.
pub trait SourceCallback: Send {
    fn on_state_change(
        &mut self,
        referral: &Referral,
        next: ReferralStatus,
        options: &StateChangeOptions,
    ) -> Result<(), CallbackError>;

    fn on_action(
        &mut self,
        referral: &Referral,
        action: &Action,
        decision: &DecisionResult,
        options: &ActionOptions,
    ) -> Result<ActionDisposition, CallbackError>;

    /// Release sessions held by the callback. Called once when the owning pass ends.
    fn destroy(&mut self) -> Result<(), CallbackError>;
}

pub trait CallbackFactory: Send + Sync {
    fn create(&self, source: ReferralSource) -> Result<Box<dyn SourceCallback>, CallbackError>;
}

#[derive(Debug, thiserror::Error)]
pub enum CallbackError {
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error(transparent)]
    Eligibility(#[from] EligibilityError),
    #[error("referral {0} has no external identity")]
    MissingIdentity(ReferralId),
    #[error("source session unavailable: {0}")]
    Session(String),
}

impl CallbackError {
    /// Reason string recorded on error actions.
    pub fn reason(&self) -> String {
        match self {
            CallbackError::Execution(error) => error.reason(),
            CallbackError::Eligibility(error) => error.code.clone(),
            CallbackError::MissingIdentity(_) => "missing_external_identity".to_string(),
            CallbackError::Session(_) => "source_session_unavailable".to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("a callback factory is already registered for {0}")]
    AlreadyRegistered(ReferralSource),
    #[error(transparent)]
    UnknownSource(#[from] UnknownValue),
}

/// Maps each referral source to the factory producing its callbacks.
#[derive(Default, Clone)]
pub struct CallbackRegistry {
    factories: BTreeMap<ReferralSource, Arc<dyn CallbackFactory>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        source: ReferralSource,
        factory: Arc<dyn CallbackFactory>,
    ) -> Result<(), RegistryError> {
        match self.factories.entry(source) {
            Entry::Occupied(_) => Err(RegistryError::AlreadyRegistered(source)),
            Entry::Vacant(slot) => {
                slot.insert(factory);
                Ok(())
            }
        }
    }

    /// Register by label, e.g. from configuration.
    pub fn register_label(
        &mut self,
        label: &str,
        factory: Arc<dyn CallbackFactory>,
    ) -> Result<ReferralSource, RegistryError> {
        let source: ReferralSource = label.parse()?;
        self.register(source, factory)?;
        Ok(source)
    }

    pub fn factory(&self, source: ReferralSource) -> Option<&Arc<dyn CallbackFactory>> {
        self.factories.get(&source)
    }

    pub fn sources(&self) -> impl Iterator<Item = ReferralSource> + '_ {
        self.factories.keys().copied()
    }
}

/// Why a source could not provide a context for this pass.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    #[error("no callback factory registered for {0}")]
    NoFactory(ReferralSource),
    #[error("callback creation failed for {source_label}: {reason}")]
    CreationFailed {
        source_label: ReferralSource,
        reason: String,
    },
}

enum ContextHandle<'a> {
    Owned(Box<dyn SourceCallback>),
    Borrowed(&'a mut dyn SourceCallback),
}

impl ContextHandle<'_> {
    fn callback(&mut self) -> &mut dyn SourceCallback {
        match self {
            ContextHandle::Owned(callback) => callback.as_mut(),
            ContextHandle::Borrowed(callback) => &mut **callback,
        }
    }
}

/// Per-pass set of source contexts, created lazily on first use.
///
/// Owned contexts are destroyed when the set is dropped; borrowed contexts belong
/// to the caller and are left untouched.
#[derive(Default)]
pub struct SourceContexts<'a> {
    handles: BTreeMap<ReferralSource, ContextHandle<'a>>,
    skipped: BTreeMap<ReferralSource, ContextError>,
}

impl<'a> SourceContexts<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Supply a context the caller keeps ownership of.
    pub fn with_borrowed(mut self, source: ReferralSource, callback: &'a mut dyn SourceCallback) -> Self {
        self.handles.insert(source, ContextHandle::Borrowed(callback));
        self
    }

    /// Return the context for `source`, creating it through the registry on first use.
    /// A source that failed once stays skipped for the remainder of the pass.
    pub fn acquire(
        &mut self,
        source: ReferralSource,
        registry: &CallbackRegistry,
    ) -> Result<&mut dyn SourceCallback, ContextError> {
        if let Some(error) = self.skipped.get(&source) {
            return Err(error.clone());
        }

        match self.handles.entry(source) {
            Entry::Occupied(entry) => Ok(entry.into_mut().callback()),
            Entry::Vacant(entry) => {
                let created = match registry.factory(source) {
                    None => Err(ContextError::NoFactory(source)),
                    Some(factory) => {
                        factory
                            .create(source)
                            .map_err(|error| ContextError::CreationFailed {
                                source_label: source,
                                reason: error.to_string(),
                            })
                    }
                };

                match created {
                    Ok(callback) => {
                        debug!(source = %source, "source context created");
                        Ok(entry.insert(ContextHandle::Owned(callback)).callback())
                    }
                    Err(error) => {
                        warn!(source = %source, error = %error, "source skipped for this pass");
                        self.skipped.insert(source, error.clone());
                        Err(error)
                    }
                }
            }
        }
    }

    pub fn is_skipped(&self, source: ReferralSource) -> bool {
        self.skipped.contains_key(&source)
    }

    /// Sources skipped so far with the reason each was skipped.
    pub fn skipped_sources(&self) -> BTreeMap<ReferralSource, String> {
        self.skipped
            .iter()
            .map(|(source, error)| (*source, error.to_string()))
            .collect()
    }

    /// Destroy owned contexts now rather than at drop.
    pub fn release(mut self) {
        self.release_owned();
    }

    fn release_owned(&mut self) {
        for (source, handle) in std::mem::take(&mut self.handles) {
            if let ContextHandle::Owned(mut callback) = handle {
                match callback.destroy() {
                    Ok(()) => debug!(source = %source, "source context released"),
                    Err(error) => {
                        warn!(source = %source, error = %error, "source context release failed")
                    }
                }
            }
        }
    }
}

impl Drop for SourceContexts<'_> {
    fn drop(&mut self) {
        self.release_owned();
    }
}
