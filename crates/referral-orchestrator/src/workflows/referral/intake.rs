use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::Serialize;
use tracing::info;

use super::domain::{NewReferral, ReferralId, ReferralSource};
use super::repository::{ReferralRepository, RepositoryError};

const SOURCE: &str = "source";
const EXTERNAL_ID: &str = "external_id";
const EXTERNAL_PATIENT_ID: &str = "external_patient_id";
const ACCOUNT_ID: &str = "account_id";
const IDENTITY_ID: &str = "identity_id";
const PAYER_ID: &str = "payer_id";

#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error("failed to read referral export: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid referral CSV data: {0}")]
    Csv(#[from] csv::Error),
    #[error("row {row}: no source column and no default source")]
    MissingSource { row: usize },
    #[error("row {row}: unknown referral source '{value}'")]
    UnknownSource { row: usize, value: String },
    #[error("could not store referral: {0}")]
    Repository(#[from] RepositoryError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IntakeReport {
    pub rows: usize,
    pub created: Vec<ReferralId>,
}

/// Turns a source export into new `requested` referrals. Known identifier columns map
/// onto the referral; every other non-empty column is kept in `source_data`.
#[derive(Debug, Clone, Default)]
pub struct ReferralIntake {
    default_source: Option<ReferralSource>,
}

impl ReferralIntake {
    pub fn new() -> Self {
        Self::default()
    }

    /// Source used for rows without a `source` value.
    pub fn with_default_source(mut self, source: ReferralSource) -> Self {
        self.default_source = Some(source);
        self
    }

    pub fn parse<R: Read>(&self, reader: R) -> Result<Vec<NewReferral>, IntakeError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut referrals = Vec::new();
        for (index, record) in csv_reader
            .deserialize::<BTreeMap<String, String>>()
            .enumerate()
        {
            let row = index + 1;
            let mut columns = record?;
            columns.retain(|_, value| !value.is_empty());
            referrals.push(self.referral_from_columns(row, columns)?);
        }

        Ok(referrals)
    }

    pub fn import<Repo, R>(&self, repository: &Repo, reader: R) -> Result<IntakeReport, IntakeError>
    where
        Repo: ReferralRepository + ?Sized,
        R: Read,
    {
        let referrals = self.parse(reader)?;
        let mut report = IntakeReport {
            rows: referrals.len(),
            created: Vec::with_capacity(referrals.len()),
        };

        for referral in referrals {
            report.created.push(repository.insert(referral)?.id);
        }

        info!(rows = report.rows, "referral intake imported");
        Ok(report)
    }

    pub fn import_path<Repo>(&self, repository: &Repo, path: &Path) -> Result<IntakeReport, IntakeError>
    where
        Repo: ReferralRepository + ?Sized,
    {
        let file = File::open(path)?;
        self.import(repository, file)
    }

    fn referral_from_columns(
        &self,
        row: usize,
        mut columns: BTreeMap<String, String>,
    ) -> Result<NewReferral, IntakeError> {
        let source = match columns.remove(SOURCE) {
            Some(value) => value
                .parse::<ReferralSource>()
                .map_err(|_| IntakeError::UnknownSource { row, value })?,
            None => self.default_source.ok_or(IntakeError::MissingSource { row })?,
        };

        let mut referral = NewReferral::new(source);
        referral.external_id = columns.remove(EXTERNAL_ID);
        referral.external_patient_id = columns.remove(EXTERNAL_PATIENT_ID);
        referral.account_id = columns.remove(ACCOUNT_ID);
        referral.identity_id = columns.remove(IDENTITY_ID);
        referral.payer_id = columns.remove(PAYER_ID);
        referral.source_data = columns;
        Ok(referral)
    }
}
