use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;

use super::action_log::ActionLog;
use super::domain::{
    Action, ActionType, Appointment, AppointmentStatus, NewReferral, Questionnaire, Referral,
    ReferralId, ReferralSource, ReferralStatus,
};
use super::repository::{
    AcceptanceCandidate, ActionCandidate, ActionableQuery, CompletionCandidate,
    ReferralRepository, RepositoryError,
};
use super::retry::RetryableReasons;

/// Row as persisted. The action log is kept in its stored JSON shape and decoded on read.
#[derive(Debug, Clone)]
struct StoredReferral {
    sequence: u64,
    referral: Referral,
    action_log: Value,
}

#[derive(Debug, Default)]
struct StoreState {
    next_sequence: u64,
    rows: BTreeMap<ReferralId, StoredReferral>,
    appointments: Vec<Appointment>,
    questionnaires: Vec<Questionnaire>,
}

impl StoreState {
    fn row_mut(&mut self, id: &ReferralId) -> Result<&mut StoredReferral, RepositoryError> {
        self.rows
            .get_mut(id)
            .ok_or_else(|| RepositoryError::NotFound(id.clone()))
    }

    /// Rows in creation order, optionally restricted to one source.
    fn ordered(&self, source: Option<ReferralSource>) -> Vec<&StoredReferral> {
        let mut rows: Vec<&StoredReferral> = self
            .rows
            .values()
            .filter(|row| source.map_or(true, |source| row.referral.source == source))
            .collect();
        rows.sort_by_key(|row| (row.referral.created_at, row.sequence));
        rows
    }

    fn latest_questionnaire(&self, external_patient_id: &str) -> Option<&Questionnaire> {
        self.questionnaires
            .iter()
            .filter(|questionnaire| questionnaire.external_patient_id == external_patient_id)
            .max_by_key(|questionnaire| questionnaire.submitted_at)
    }
}

fn materialize(row: &StoredReferral) -> Result<Referral, RepositoryError> {
    let mut referral = row.referral.clone();
    referral.action_log = ActionLog::from_stored(row.action_log.clone())?;
    Ok(referral)
}

/// Thread-safe in-memory referral store with the same selection semantics as the
/// relational backend: creation-ordered reads, conditional status updates, and
/// atomic appends to the action log.
#[derive(Debug, Default)]
pub struct InMemoryReferralStore {
    state: Mutex<StoreState>,
}

impl InMemoryReferralStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreState>, RepositoryError> {
        self.state
            .lock()
            .map_err(|_| RepositoryError::Unavailable("referral store lock poisoned".to_string()))
    }

    /// Insert with an explicit creation timestamp.
    pub fn insert_at(
        &self,
        new: NewReferral,
        created_at: DateTime<Utc>,
    ) -> Result<Referral, RepositoryError> {
        let mut state = self.lock()?;
        state.next_sequence += 1;
        let sequence = state.next_sequence;
        let id = ReferralId(format!("ref-{sequence:06}"));

        let referral = Referral {
            id: id.clone(),
            source: new.source,
            status: ReferralStatus::Requested,
            external_id: new.external_id,
            external_patient_id: new.external_patient_id,
            account_id: new.account_id,
            identity_id: new.identity_id,
            payer_id: new.payer_id,
            source_data: new.source_data,
            action_log: ActionLog::new(),
            appointment_date: None,
            created_at,
            updated_at: created_at,
        };

        state.rows.insert(
            id,
            StoredReferral {
                sequence,
                referral: referral.clone(),
                action_log: Value::Null,
            },
        );
        Ok(referral)
    }

    pub fn record_appointment(&self, appointment: Appointment) -> Result<(), RepositoryError> {
        self.lock()?.appointments.push(appointment);
        Ok(())
    }

    pub fn record_questionnaire(&self, questionnaire: Questionnaire) -> Result<(), RepositoryError> {
        self.lock()?.questionnaires.push(questionnaire);
        Ok(())
    }

    /// Overwrite the persisted action log verbatim to stand in for rows written by
    /// older releases.
    #[cfg(test)]
    pub(crate) fn restore_action_log(&self, id: &ReferralId, stored: Value) -> Result<(), RepositoryError> {
        let mut state = self.lock()?;
        state.row_mut(id)?.action_log = stored;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn stored_action_log(&self, id: &ReferralId) -> Result<Value, RepositoryError> {
        let state = self.lock()?;
        state
            .rows
            .get(id)
            .map(|row| row.action_log.clone())
            .ok_or_else(|| RepositoryError::NotFound(id.clone()))
    }

    /// Force a status without consulting the lifecycle table.
    #[cfg(test)]
    pub(crate) fn restore_status(&self, id: &ReferralId, status: ReferralStatus) -> Result<(), RepositoryError> {
        let mut state = self.lock()?;
        state.row_mut(id)?.referral.status = status;
        Ok(())
    }

    fn update_log<F>(&self, id: &ReferralId, change: F) -> Result<Referral, RepositoryError>
    where
        F: FnOnce(&mut ActionLog) -> Result<(), RepositoryError>,
    {
        let mut state = self.lock()?;
        let row = state.row_mut(id)?;
        let mut log = ActionLog::from_stored(row.action_log.clone())?;
        change(&mut log)?;
        row.action_log = log.to_stored()?;
        row.referral.updated_at = Utc::now();
        materialize(row)
    }
}

impl ReferralRepository for InMemoryReferralStore {
    fn insert(&self, referral: NewReferral) -> Result<Referral, RepositoryError> {
        self.insert_at(referral, Utc::now())
    }

    fn fetch(&self, id: &ReferralId) -> Result<Option<Referral>, RepositoryError> {
        let state = self.lock()?;
        state.rows.get(id).map(materialize).transpose()
    }

    fn referrals_needing_acceptance_decision(
        &self,
        source: Option<ReferralSource>,
    ) -> Result<Vec<AcceptanceCandidate>, RepositoryError> {
        let state = self.lock()?;

        // Duplicates are ranked across every source; only the candidate list is filtered.
        let all = state.ordered(None);
        let mut candidates = Vec::new();
        for (position, row) in all.iter().enumerate() {
            let referral = &row.referral;
            if referral.status != ReferralStatus::Requested
                || source.map_or(false, |source| referral.source != source)
                || referral.external_id.is_none()
            {
                continue;
            }
            let Some(patient) = referral.external_patient_id.as_deref() else {
                continue;
            };

            let is_duplicate = all[..position].iter().any(|earlier| {
                earlier.referral.status != ReferralStatus::Declined
                    && earlier.referral.external_patient_id.as_deref() == Some(patient)
            });

            candidates.push(AcceptanceCandidate {
                referral: materialize(row)?,
                is_duplicate,
            });
        }
        Ok(candidates)
    }

    fn referrals_ready_for_in_progress(
        &self,
        source: Option<ReferralSource>,
    ) -> Result<Vec<Referral>, RepositoryError> {
        let state = self.lock()?;
        state
            .ordered(source)
            .into_iter()
            .filter(|row| row.referral.status == ReferralStatus::Accepted)
            .filter(|row| {
                row.referral
                    .external_patient_id
                    .as_deref()
                    .map_or(false, |patient| {
                        state
                            .appointments
                            .iter()
                            .any(|appointment| appointment.external_patient_id == patient)
                    })
            })
            .map(materialize)
            .collect()
    }

    fn referrals_ready_for_completion(
        &self,
        source: Option<ReferralSource>,
    ) -> Result<Vec<CompletionCandidate>, RepositoryError> {
        let state = self.lock()?;
        let mut candidates = Vec::new();
        for row in state.ordered(source) {
            if row.referral.status != ReferralStatus::InProgress {
                continue;
            }
            let Some(patient) = row.referral.external_patient_id.as_deref() else {
                continue;
            };

            let occurred = state
                .appointments
                .iter()
                .filter(|appointment| {
                    appointment.external_patient_id == patient
                        && appointment.status == AppointmentStatus::Occurred
                })
                .map(|appointment| appointment.scheduled_for)
                .max();

            if let Some(appointment_date) = occurred {
                candidates.push(CompletionCandidate {
                    referral: materialize(row)?,
                    appointment_date,
                });
            }
        }
        Ok(candidates)
    }

    fn actionable_completed_referrals(
        &self,
        source: Option<ReferralSource>,
        query: ActionableQuery,
        retryable: &RetryableReasons,
    ) -> Result<Vec<ActionCandidate>, RepositoryError> {
        let state = self.lock()?;
        let mut candidates = Vec::new();
        for row in state.ordered(source) {
            if row.referral.status != ReferralStatus::Completed {
                continue;
            }

            let referral = materialize(row)?;
            let questionnaire = referral
                .external_patient_id
                .as_deref()
                .and_then(|patient| state.latest_questionnaire(patient));

            let selected = match query {
                ActionableQuery::Initial => match referral.action_log.latest_outcome() {
                    None => true,
                    Some(latest) => {
                        latest.action_type == ActionType::Error
                            && latest
                                .action_reason
                                .as_deref()
                                .map_or(false, |reason| retryable.contains(reason))
                    }
                },
                ActionableQuery::NewQuestionnaire => {
                    questionnaire.map_or(false, |questionnaire| {
                        questionnaire.submitted_at > referral.created_at
                    }) && !referral.action_log.has_outbound_action()
                }
            };

            if selected {
                candidates.push(ActionCandidate {
                    signals: questionnaire.map(|questionnaire| questionnaire.signals.clone()),
                    questionnaire_date: questionnaire
                        .map(|questionnaire| questionnaire.submitted_at.date_naive()),
                    referral,
                });
            }
        }
        Ok(candidates)
    }

    fn transition_status(
        &self,
        id: &ReferralId,
        from: ReferralStatus,
        to: ReferralStatus,
    ) -> Result<Referral, RepositoryError> {
        if !from.can_transition_to(to) {
            return Err(RepositoryError::StateViolation(format!(
                "illegal transition {from} -> {to} for referral {id}"
            )));
        }

        let mut state = self.lock()?;
        let row = state.row_mut(id)?;
        let actual = row.referral.status;
        if actual != from {
            return Err(RepositoryError::StateConflict {
                id: id.clone(),
                expected: from,
                actual,
            });
        }

        row.referral.status = to;
        row.referral.updated_at = Utc::now();
        materialize(row)
    }

    fn append_action(&self, id: &ReferralId, action: Action) -> Result<Referral, RepositoryError> {
        self.update_log(id, |log| Ok(log.append(action)?))
    }

    fn mark_latest_requested_action_completed(
        &self,
        id: &ReferralId,
    ) -> Result<Referral, RepositoryError> {
        self.update_log(id, |log| {
            log.complete_requested()?;
            Ok(())
        })
    }

    fn record_appointment_date(
        &self,
        id: &ReferralId,
        date: NaiveDate,
    ) -> Result<Referral, RepositoryError> {
        let mut state = self.lock()?;
        let row = state.row_mut(id)?;
        row.referral.appointment_date = Some(date);
        row.referral.updated_at = Utc::now();
        materialize(row)
    }
}
