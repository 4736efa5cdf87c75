use std::collections::{HashMap, HashSet};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{CompletionSummary, RequirementStatus, RequirementSubmission};

const BUILTIN_CATALOG: &str = include_str!("../catalog/requirements.json");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequirementGroup {
    Personal,
    Academic,
    Financial,
}

/// Static description of one required document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequirementDefinition {
    pub key: String,
    pub name: String,
    pub description: String,
    pub group: RequirementGroup,
    pub help_tip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_url: Option<String>,
    pub due_date: NaiveDate,
}

/// Read-only set of requirements every application must satisfy.
///
/// The catalog decides *which* keys count; submission rows decide their status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequirementCatalog {
    entries: Vec<RequirementDefinition>,
}

impl RequirementCatalog {
    pub fn new(entries: Vec<RequirementDefinition>) -> Result<Self, CatalogError> {
        let mut seen = HashSet::new();
        for entry in &entries {
            if entry.key.trim().is_empty() {
                return Err(CatalogError::BlankKey);
            }
            if !seen.insert(entry.key.as_str()) {
                return Err(CatalogError::DuplicateKey(entry.key.clone()));
            }
        }
        Ok(Self { entries })
    }

    pub fn from_json(raw: &str) -> Result<Self, CatalogError> {
        let entries: Vec<RequirementDefinition> = serde_json::from_str(raw)?;
        Self::new(entries)
    }

    /// The document set shipped with the service.
    pub fn builtin() -> Result<Self, CatalogError> {
        Self::from_json(BUILTIN_CATALOG)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RequirementDefinition> {
        self.entries.iter()
    }

    pub fn get(&self, key: &str) -> Option<&RequirementDefinition> {
        self.entries.iter().find(|entry| entry.key == key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Counts statuses for every catalog key; keys without a row are `missing`.
    ///
    /// Rows whose key is not in the catalog are ignored.
    pub fn summarize<'a, I>(&self, submissions: I) -> CompletionSummary
    where
        I: IntoIterator<Item = (&'a str, RequirementStatus)>,
    {
        let by_key: HashMap<&str, RequirementStatus> = submissions.into_iter().collect();
        let mut summary = CompletionSummary {
            total: self.entries.len() as u32,
            ..CompletionSummary::default()
        };

        for entry in &self.entries {
            match by_key
                .get(entry.key.as_str())
                .copied()
                .unwrap_or(RequirementStatus::Missing)
            {
                RequirementStatus::Approved => summary.approved += 1,
                RequirementStatus::Pending => summary.pending += 1,
                RequirementStatus::Rejected => summary.rejected += 1,
                RequirementStatus::InProgress => summary.in_progress += 1,
                RequirementStatus::Missing => summary.missing += 1,
            }
        }

        summary
    }

    /// Merges catalog entries with submission rows for display.
    pub fn overview(&self, submissions: &[RequirementSubmission]) -> Vec<RequirementView> {
        self.entries
            .iter()
            .map(|entry| {
                let row = submissions
                    .iter()
                    .find(|submission| submission.requirement_key == entry.key);
                RequirementView {
                    definition: entry.clone(),
                    submission_id: row.map(|row| row.id),
                    status: row.map_or(RequirementStatus::Missing, |row| row.status),
                    progress: row.map_or(0, |row| row.progress),
                    file_name: row.and_then(|row| row.file_name.clone()),
                    file_url: row.and_then(|row| row.file_url.clone()),
                    uploaded_at: row.and_then(|row| row.uploaded_at),
                    notes: row.and_then(|row| row.notes.clone()),
                    validator_notes: row.and_then(|row| row.validator_notes.clone()),
                    validated_at: row.and_then(|row| row.validated_at),
                }
            })
            .collect()
    }
}

/// Catalog entry joined with the applicant's submission state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequirementView {
    #[serde(flatten)]
    pub definition: RequirementDefinition,
    pub submission_id: Option<i64>,
    pub status: RequirementStatus,
    pub progress: u8,
    pub file_name: Option<String>,
    pub file_url: Option<String>,
    pub uploaded_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub validator_notes: Option<String>,
    pub validated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("requirement catalog contains a blank key")]
    BlankKey,
    #[error("requirement key '{0}' appears more than once")]
    DuplicateKey(String),
    #[error("failed to parse requirement catalog: {0}")]
    Parse(#[from] serde_json::Error),
}
