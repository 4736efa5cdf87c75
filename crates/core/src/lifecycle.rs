//! Application status state machine.
//!
//! Every legal move lives in [`TRANSITIONS`]; anything missing from the
//! table is rejected with [`TransitionError::Illegal`].

use std::{collections::HashMap, fmt, sync::LazyLock};

use serde::Serialize;
use thiserror::Error;

use crate::types::{ApplicationStatus, ReviewAction, ValidationChecklist};

/// Trigger applied to an application, either by staff or by the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Approve,
    Reject,
    Return,
    RequestInfo,
    ResumeReview,
    /// Every catalog requirement has been approved.
    AutoApprove,
    /// A rejected or freshly uploaded document needs staff attention.
    ReturnToReview,
    /// A late or corrective upload on a decided application.
    Reopen,
}

impl Transition {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::Return => "return",
            Self::RequestInfo => "request_info",
            Self::ResumeReview => "resume_review",
            Self::AutoApprove => "auto_approve",
            Self::ReturnToReview => "return_to_review",
            Self::Reopen => "reopen",
        }
    }

    /// `true` for transitions fired by the system rather than a validator.
    pub fn is_system(self) -> bool {
        matches!(
            self,
            Self::AutoApprove | Self::ReturnToReview | Self::Reopen
        )
    }

    /// Status this transition leads to.
    pub fn target(self) -> ApplicationStatus {
        match self {
            Self::Approve | Self::AutoApprove => ApplicationStatus::Approved,
            Self::Reject => ApplicationStatus::Rejected,
            Self::Return => ApplicationStatus::Returned,
            Self::RequestInfo | Self::ResumeReview | Self::ReturnToReview | Self::Reopen => {
                ApplicationStatus::UnderReview
            }
        }
    }

    /// Statuses from which this transition is legal.
    pub fn sources(self) -> Vec<ApplicationStatus> {
        TABLE
            .iter()
            .filter(|(_, transition)| *transition == self)
            .map(|(source, _)| *source)
            .collect()
    }
}

impl From<ReviewAction> for Transition {
    fn from(action: ReviewAction) -> Self {
        match action {
            ReviewAction::Approved => Self::Approve,
            ReviewAction::Rejected => Self::Reject,
            ReviewAction::Returned => Self::Return,
            ReviewAction::RequestedInfo => Self::RequestInfo,
            ReviewAction::ResumedReview => Self::ResumeReview,
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const TABLE: &[(ApplicationStatus, Transition)] = &[
    (ApplicationStatus::UnderReview, Transition::Approve),
    (ApplicationStatus::UnderReview, Transition::Reject),
    (ApplicationStatus::UnderReview, Transition::Return),
    (ApplicationStatus::UnderReview, Transition::RequestInfo),
    (ApplicationStatus::Submitted, Transition::ResumeReview),
    (ApplicationStatus::Returned, Transition::ResumeReview),
    (ApplicationStatus::Submitted, Transition::AutoApprove),
    (ApplicationStatus::UnderReview, Transition::AutoApprove),
    (ApplicationStatus::Submitted, Transition::ReturnToReview),
    (ApplicationStatus::Approved, Transition::Reopen),
    (ApplicationStatus::Rejected, Transition::Reopen),
];

/// Lookup of `(current status, transition) -> next status`.
pub static TRANSITIONS: LazyLock<HashMap<(ApplicationStatus, Transition), ApplicationStatus>> =
    LazyLock::new(|| {
        TABLE
            .iter()
            .map(|&(source, transition)| ((source, transition), transition.target()))
            .collect()
    });

/// Resolves the next status or reports the illegal move.
pub fn next_status(
    current: ApplicationStatus,
    transition: Transition,
) -> Result<ApplicationStatus, TransitionError> {
    TRANSITIONS
        .get(&(current, transition))
        .copied()
        .ok_or(TransitionError::Illegal {
            current,
            transition,
        })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("cannot {transition} an application with status '{current}'")]
    Illegal {
        current: ApplicationStatus,
        transition: Transition,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChecklistError {
    #[error("a validation checklist is required before approving")]
    Missing,
    #[error("all checklist items must be true before approving (unmet: {})", .0.join(", "))]
    Unmet(Vec<&'static str>),
}

/// Second approval gate: all four attestations must be present and true.
pub fn require_checklist(checklist: Option<&ValidationChecklist>) -> Result<(), ChecklistError> {
    let checklist = checklist.ok_or(ChecklistError::Missing)?;
    let unmet = checklist.unmet();
    if unmet.is_empty() {
        Ok(())
    } else {
        Err(ChecklistError::Unmet(unmet))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_TRANSITIONS: [Transition; 8] = [
        Transition::Approve,
        Transition::Reject,
        Transition::Return,
        Transition::RequestInfo,
        Transition::ResumeReview,
        Transition::AutoApprove,
        Transition::ReturnToReview,
        Transition::Reopen,
    ];

    #[test]
    fn staff_decisions_require_under_review() {
        use ApplicationStatus::*;
        assert_eq!(next_status(UnderReview, Transition::Approve), Ok(Approved));
        assert_eq!(next_status(UnderReview, Transition::Reject), Ok(Rejected));
        assert_eq!(next_status(UnderReview, Transition::Return), Ok(Returned));
        assert_eq!(
            next_status(UnderReview, Transition::RequestInfo),
            Ok(UnderReview)
        );
        assert_eq!(
            next_status(Submitted, Transition::Approve),
            Err(TransitionError::Illegal {
                current: Submitted,
                transition: Transition::Approve
            })
        );
    }

    #[test]
    fn every_pair_outside_the_table_is_illegal() {
        for status in ApplicationStatus::ALL {
            for transition in ALL_TRANSITIONS {
                let listed = TABLE.contains(&(status, transition));
                let outcome = next_status(status, transition);
                assert_eq!(listed, outcome.is_ok(), "{status} / {transition}");
                if let Ok(next) = outcome {
                    assert_eq!(next, transition.target());
                }
            }
        }
    }

    #[test]
    fn approved_cannot_be_approved_again() {
        assert!(next_status(ApplicationStatus::Approved, Transition::Approve).is_err());
        assert!(next_status(ApplicationStatus::Approved, Transition::AutoApprove).is_err());
    }

    #[test]
    fn withdrawn_and_draft_are_dead_ends() {
        for transition in ALL_TRANSITIONS {
            assert!(next_status(ApplicationStatus::Withdrawn, transition).is_err());
            assert!(next_status(ApplicationStatus::Draft, transition).is_err());
        }
    }

    #[test]
    fn sources_follow_the_table() {
        assert_eq!(
            Transition::AutoApprove.sources(),
            vec![ApplicationStatus::Submitted, ApplicationStatus::UnderReview]
        );
        assert_eq!(
            Transition::Reopen.sources(),
            vec![ApplicationStatus::Approved, ApplicationStatus::Rejected]
        );
        assert!(Transition::Reopen.is_system());
        assert!(!Transition::ResumeReview.is_system());
    }

    #[test]
    fn conflict_message_names_status_and_action() {
        let err = next_status(ApplicationStatus::Returned, Transition::Approve).unwrap_err();
        assert_eq!(
            err.to_string(),
            "cannot approve an application with status 'returned'"
        );
    }

    #[test]
    fn checklist_gate() {
        assert_eq!(require_checklist(None), Err(ChecklistError::Missing));

        let mut checklist = ValidationChecklist {
            gpa_met: false,
            income_met: true,
            documents_complete: true,
            enrollment_verified: true,
        };
        assert_eq!(
            require_checklist(Some(&checklist)),
            Err(ChecklistError::Unmet(vec!["gpa_met"]))
        );

        checklist.gpa_met = true;
        assert_eq!(require_checklist(Some(&checklist)), Ok(()));
    }
}
