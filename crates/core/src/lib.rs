//! Domain layer for the scholarship application lifecycle.
//!
//! Everything here is pure: no I/O, no clocks. Callers pass `now` and the
//! requirement catalog explicitly.

pub mod catalog;
pub mod eligibility;
pub mod lifecycle;
pub mod types;

pub use catalog::{CatalogError, RequirementCatalog, RequirementDefinition, RequirementGroup};
pub use eligibility::{EligibilityChecks, EligibilityEvaluator, EligibilityReport};
pub use lifecycle::{next_status, require_checklist, ChecklistError, Transition, TransitionError};
pub use types::*;
