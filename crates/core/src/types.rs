use std::{fmt, str::FromStr};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum length accepted for any free-text notes field.
pub const MAX_NOTES_LEN: usize = 2000;

/// Student profile used for eligibility screening.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Applicant {
    pub id: i64,
    pub full_name: String,
    pub student_number: String,
    pub gpa: f64,
    pub monthly_income: f64,
    pub year_level: u8,
    pub course: String,
    pub college: String,
    pub household_size: u32,
}

/// Scholarship definition including thresholds, window and slot accounting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scholarship {
    pub id: i64,
    pub name: String,
    pub grantor: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub min_gpa: f64,
    pub max_monthly_income: Option<f64>,
    pub max_year_level: Option<u8>,
    pub application_open: NaiveDate,
    pub application_close: NaiveDate,
    pub slots_total: u32,
    pub slots_available: u32,
    pub is_active: bool,
}

/// Application lifecycle status persisted in `applications.status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Draft,
    Submitted,
    UnderReview,
    Approved,
    Rejected,
    Returned,
    Withdrawn,
}

impl ApplicationStatus {
    pub const ALL: [ApplicationStatus; 7] = [
        Self::Draft,
        Self::Submitted,
        Self::UnderReview,
        Self::Approved,
        Self::Rejected,
        Self::Returned,
        Self::Withdrawn,
    ];

    /// Returns the canonical database representation for the status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Submitted => "submitted",
            Self::UnderReview => "under_review",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Returned => "returned",
            Self::Withdrawn => "withdrawn",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Approved | Self::Rejected | Self::Withdrawn)
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApplicationStatus {
    type Err = ParseEnumError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == value)
            .ok_or_else(|| ParseEnumError::new("application status", value))
    }
}

/// Status of one requirement submission. `Missing` is implied when no row exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequirementStatus {
    Missing,
    InProgress,
    Pending,
    Approved,
    Rejected,
}

impl RequirementStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::InProgress => "in_progress",
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for RequirementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequirementStatus {
    type Err = ParseEnumError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "missing" => Ok(Self::Missing),
            "in_progress" => Ok(Self::InProgress),
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            other => Err(ParseEnumError::new("requirement status", other)),
        }
    }
}

/// Staff verdict on requirement submissions, used by single and bulk validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionVerdict {
    Approved,
    Rejected,
}

impl SubmissionVerdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn requirement_status(self) -> RequirementStatus {
        match self {
            Self::Approved => RequirementStatus::Approved,
            Self::Rejected => RequirementStatus::Rejected,
        }
    }

    /// Audit action recorded when the verdict is applied in bulk.
    pub fn review_action(self) -> ReviewAction {
        match self {
            Self::Approved => ReviewAction::Approved,
            Self::Rejected => ReviewAction::Rejected,
        }
    }
}

impl FromStr for SubmissionVerdict {
    type Err = ParseEnumError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            other => Err(ParseEnumError::new("verdict", other)),
        }
    }
}

/// Application-level decision a validator records in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewAction {
    Approved,
    Rejected,
    Returned,
    RequestedInfo,
    ResumedReview,
}

impl ReviewAction {
    pub const ALL: [ReviewAction; 5] = [
        Self::Approved,
        Self::Rejected,
        Self::Returned,
        Self::RequestedInfo,
        Self::ResumedReview,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Returned => "returned",
            Self::RequestedInfo => "requested_info",
            Self::ResumedReview => "resumed_review",
        }
    }
}

impl fmt::Display for ReviewAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReviewAction {
    type Err = ParseEnumError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|action| action.as_str() == value)
            .ok_or_else(|| ParseEnumError::new("review action", value))
    }
}

/// Staff attestation required before an application can be approved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValidationChecklist {
    #[serde(default)]
    pub gpa_met: bool,
    #[serde(default)]
    pub income_met: bool,
    #[serde(default)]
    pub documents_complete: bool,
    #[serde(default)]
    pub enrollment_verified: bool,
}

impl ValidationChecklist {
    /// Names of the attestation fields that are not set.
    pub fn unmet(&self) -> Vec<&'static str> {
        [
            ("gpa_met", self.gpa_met),
            ("income_met", self.income_met),
            ("documents_complete", self.documents_complete),
            ("enrollment_verified", self.enrollment_verified),
        ]
        .into_iter()
        .filter(|(_, met)| !met)
        .map(|(name, _)| name)
        .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.unmet().is_empty()
    }
}

/// Application row. GPA and income are frozen at submission time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub id: i64,
    pub applicant_id: i64,
    pub scholarship_id: i64,
    pub status: ApplicationStatus,
    pub gpa_at_submission: f64,
    pub income_at_submission: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remarks: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One applicant submission for one requirement of one application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequirementSubmission {
    pub id: i64,
    pub application_id: i64,
    pub requirement_key: String,
    pub status: RequirementStatus,
    pub progress: u8,
    pub file_name: Option<String>,
    pub file_url: Option<String>,
    pub uploaded_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub validated_by: Option<i64>,
    pub validated_at: Option<DateTime<Utc>>,
    pub validator_notes: Option<String>,
}

/// Immutable audit log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRecord {
    pub id: i64,
    pub application_id: i64,
    pub validator_id: i64,
    pub action: ReviewAction,
    pub checklist: Option<ValidationChecklist>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Storage reference returned by the upload collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub file_name: Option<String>,
    pub file_url: Option<String>,
}

/// Per-application requirement completion counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionSummary {
    pub total: u32,
    pub approved: u32,
    pub pending: u32,
    pub rejected: u32,
    pub in_progress: u32,
    pub missing: u32,
}

impl CompletionSummary {
    /// `true` when every catalog requirement has been approved.
    pub fn all_approved(&self) -> bool {
        self.total > 0 && self.approved == self.total
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotesError {
    #[error("notes must not exceed {max} characters (got {actual})")]
    TooLong { max: usize, actual: usize },
}

/// Strips markup and surrounding whitespace from free text.
///
/// Blank input becomes `None`.
pub fn normalize_notes(raw: Option<&str>) -> Result<Option<String>, NotesError> {
    let Some(raw) = raw else {
        return Ok(None);
    };

    let mut cleaned = String::with_capacity(raw.len());
    let mut in_tag = false;
    for ch in raw.chars() {
        match ch {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => cleaned.push(ch),
            _ => {}
        }
    }

    let trimmed = cleaned.trim();
    let length = trimmed.chars().count();
    if length > MAX_NOTES_LEN {
        return Err(NotesError::TooLong {
            max: MAX_NOTES_LEN,
            actual: length,
        });
    }

    if trimmed.is_empty() {
        Ok(None)
    } else {
        Ok(Some(trimmed.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_round_trip_through_database_labels() {
        for status in ApplicationStatus::ALL {
            assert_eq!(status.as_str().parse::<ApplicationStatus>(), Ok(status));
        }
        assert!("pending".parse::<ApplicationStatus>().is_err());
        assert_eq!(
            "in_progress".parse::<RequirementStatus>(),
            Ok(RequirementStatus::InProgress)
        );
    }

    #[test]
    fn terminal_statuses() {
        let terminal: Vec<_> = ApplicationStatus::ALL
            .into_iter()
            .filter(|status| status.is_terminal())
            .collect();
        assert_eq!(
            terminal,
            vec![
                ApplicationStatus::Approved,
                ApplicationStatus::Rejected,
                ApplicationStatus::Withdrawn
            ]
        );
    }

    #[test]
    fn checklist_reports_unmet_fields() {
        let checklist = ValidationChecklist {
            gpa_met: false,
            income_met: true,
            documents_complete: false,
            enrollment_verified: true,
        };
        assert_eq!(checklist.unmet(), vec!["gpa_met", "documents_complete"]);
        assert!(!checklist.is_complete());
    }

    #[test]
    fn checklist_defaults_missing_fields_to_false() {
        let checklist: ValidationChecklist =
            serde_json::from_str(r#"{"gpa_met": true}"#).expect("partial checklist parses");
        assert!(checklist.gpa_met);
        assert!(!checklist.income_met);
    }

    #[test]
    fn notes_are_stripped_and_bounded() {
        assert_eq!(normalize_notes(None), Ok(None));
        assert_eq!(normalize_notes(Some("   ")), Ok(None));
        assert_eq!(
            normalize_notes(Some("  <b>Blurry</b> scan ")),
            Ok(Some("Blurry scan".to_string()))
        );

        let long = "x".repeat(MAX_NOTES_LEN + 1);
        assert_eq!(
            normalize_notes(Some(&long)),
            Err(NotesError::TooLong {
                max: MAX_NOTES_LEN,
                actual: MAX_NOTES_LEN + 1
            })
        );
    }

    #[test]
    fn completion_requires_non_empty_catalog() {
        let empty = CompletionSummary::default();
        assert!(!empty.all_approved());

        let done = CompletionSummary {
            total: 3,
            approved: 3,
            ..CompletionSummary::default()
        };
        assert!(done.all_approved());
    }
}
