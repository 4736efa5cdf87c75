use chrono::{DateTime, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::types::{Applicant, Scholarship};

/// Stateless evaluator checking an applicant snapshot against a scholarship.
///
/// Calendar dates of the application window are interpreted in the
/// configured time zone; the close date is inclusive through the end of
/// that day.
#[derive(Debug, Clone, Copy)]
pub struct EligibilityEvaluator {
    timezone: Tz,
}

impl Default for EligibilityEvaluator {
    fn default() -> Self {
        Self::new(Tz::UTC)
    }
}

impl EligibilityEvaluator {
    pub fn new(timezone: Tz) -> Self {
        Self { timezone }
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Evaluates every criterion independently and collects all failures.
    pub fn evaluate(
        &self,
        applicant: &Applicant,
        scholarship: &Scholarship,
        now: DateTime<Utc>,
    ) -> EligibilityReport {
        let mut reasons = Vec::new();

        let gpa = applicant.gpa >= scholarship.min_gpa;
        if !gpa {
            reasons.push(format!(
                "GPA {:.2} is below the required minimum of {:.2}",
                applicant.gpa, scholarship.min_gpa
            ));
        }

        let income = match scholarship.max_monthly_income {
            Some(cap) if applicant.monthly_income > cap => {
                reasons.push(format!(
                    "Monthly family income {:.2} exceeds the cap of {:.2}",
                    applicant.monthly_income, cap
                ));
                false
            }
            _ => true,
        };

        let year_level = match scholarship.max_year_level {
            Some(max) if applicant.year_level > max => {
                reasons.push(format!(
                    "Year level {} exceeds the maximum allowed year level of {}",
                    applicant.year_level, max
                ));
                false
            }
            _ => true,
        };

        let window = self.window_position(scholarship, now);
        let open_period = window == WindowPosition::Open;
        match window {
            WindowPosition::NotYetOpen => {
                reasons.push("Application period is not yet open".to_string())
            }
            WindowPosition::Closed => {
                reasons.push("Application period is already closed".to_string())
            }
            WindowPosition::Open => {}
        }

        let slots_available = scholarship.slots_available > 0;
        if !slots_available {
            reasons.push("No available slots remaining for this scholarship".to_string());
        }

        EligibilityReport {
            eligible: reasons.is_empty(),
            reasons,
            checks: EligibilityChecks {
                gpa,
                income,
                year_level,
                open_period,
                slots_available,
            },
        }
    }

    fn window_position(&self, scholarship: &Scholarship, now: DateTime<Utc>) -> WindowPosition {
        let opens_at = self.start_of_day(scholarship.application_open);
        if now < opens_at {
            return WindowPosition::NotYetOpen;
        }

        // Inclusive close: anything before the next local midnight is still open.
        match scholarship.application_close.succ_opt() {
            Some(next_day) if now >= self.start_of_day(next_day) => WindowPosition::Closed,
            _ => WindowPosition::Open,
        }
    }

    fn start_of_day(&self, date: NaiveDate) -> DateTime<Utc> {
        let naive = date.and_time(NaiveTime::MIN);
        match self.timezone.from_local_datetime(&naive) {
            LocalResult::Single(local) => local.with_timezone(&Utc),
            LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
            LocalResult::None => Utc.from_utc_datetime(&naive),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WindowPosition {
    NotYetOpen,
    Open,
    Closed,
}

/// Per-criterion pass flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EligibilityChecks {
    pub gpa: bool,
    pub income: bool,
    pub year_level: bool,
    pub open_period: bool,
    pub slots_available: bool,
}

impl EligibilityChecks {
    /// Machine-readable names of the failing criteria.
    pub fn failed(&self) -> Vec<&'static str> {
        [
            ("gpa", self.gpa),
            ("income", self.income),
            ("year_level", self.year_level),
            ("open_period", self.open_period),
            ("slots_available", self.slots_available),
        ]
        .into_iter()
        .filter(|(_, passed)| !passed)
        .map(|(name, _)| name)
        .collect()
    }
}

/// Verdict with one human-readable reason per failing criterion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EligibilityReport {
    pub eligible: bool,
    pub reasons: Vec<String>,
    pub checks: EligibilityChecks,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn applicant(gpa: f64, monthly_income: f64, year_level: u8) -> Applicant {
        Applicant {
            id: 7,
            full_name: "Juan Dela Cruz".to_string(),
            student_number: "2026-DEMO-001".to_string(),
            gpa,
            monthly_income,
            year_level,
            course: "BS Information Technology".to_string(),
            college: "College of Computing".to_string(),
            household_size: 4,
        }
    }

    fn scholarship() -> Scholarship {
        Scholarship {
            id: 3,
            name: "Study Now Pay Later".to_string(),
            grantor: "CHED".to_string(),
            description: None,
            min_gpa: 1.75,
            max_monthly_income: Some(20_000.0),
            max_year_level: None,
            application_open: NaiveDate::from_ymd_opt(2026, 1, 1).expect("date"),
            application_close: NaiveDate::from_ymd_opt(2026, 3, 31).expect("date"),
            slots_total: 10,
            slots_available: 10,
            is_active: true,
        }
    }

    fn at(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw)
            .expect("timestamp")
            .with_timezone(&Utc)
    }

    #[test]
    fn eligible_applicant_has_no_reasons() {
        let report = EligibilityEvaluator::default().evaluate(
            &applicant(1.82, 15_000.0, 3),
            &scholarship(),
            at("2026-02-15T08:00:00Z"),
        );

        assert!(report.eligible);
        assert!(report.reasons.is_empty());
        assert!(report.checks.failed().is_empty());
    }

    #[test]
    fn collects_every_failing_criterion() {
        let report = EligibilityEvaluator::default().evaluate(
            &applicant(1.0, 25_000.0, 2),
            &Scholarship {
                min_gpa: 2.0,
                ..scholarship()
            },
            at("2026-05-01T00:00:00Z"),
        );

        assert!(!report.eligible);
        assert_eq!(report.reasons.len(), 3);
        assert_eq!(report.checks.failed(), vec!["gpa", "income", "open_period"]);
        assert!(report.reasons[2].contains("already closed"));
    }

    #[test]
    fn unset_caps_always_pass() {
        let mut definition = scholarship();
        definition.max_monthly_income = None;
        definition.max_year_level = None;

        let report = EligibilityEvaluator::default().evaluate(
            &applicant(1.9, 1_000_000.0, 9),
            &definition,
            at("2026-02-01T00:00:00Z"),
        );
        assert!(report.checks.income);
        assert!(report.checks.year_level);
    }

    #[test]
    fn year_level_cap_is_inclusive() {
        let mut definition = scholarship();
        definition.max_year_level = Some(3);

        let evaluator = EligibilityEvaluator::default();
        let now = at("2026-02-01T00:00:00Z");
        assert!(evaluator.evaluate(&applicant(2.0, 0.0, 3), &definition, now).eligible);

        let report = evaluator.evaluate(&applicant(2.0, 0.0, 4), &definition, now);
        assert_eq!(report.checks.failed(), vec!["year_level"]);
    }

    #[test]
    fn close_date_is_inclusive_through_end_of_day() {
        let evaluator = EligibilityEvaluator::default();
        let profile = applicant(2.0, 10_000.0, 1);

        let last_moment = at("2026-03-31T23:59:59.999Z");
        assert!(evaluator.evaluate(&profile, &scholarship(), last_moment).checks.open_period);

        let next_day = at("2026-04-01T00:00:00Z");
        assert!(!evaluator.evaluate(&profile, &scholarship(), next_day).checks.open_period);
    }

    #[test]
    fn window_not_yet_open() {
        let report = EligibilityEvaluator::default().evaluate(
            &applicant(2.0, 10_000.0, 1),
            &scholarship(),
            at("2025-12-31T23:59:59Z"),
        );
        assert_eq!(report.reasons, vec!["Application period is not yet open"]);
    }

    #[test]
    fn window_follows_configured_timezone() {
        let evaluator = EligibilityEvaluator::new(chrono_tz::Asia::Manila);
        let profile = applicant(2.0, 10_000.0, 1);

        // 2026-03-31 20:00 UTC is already April 1st in Manila (UTC+8).
        let report = evaluator.evaluate(&profile, &scholarship(), at("2026-03-31T20:00:00Z"));
        assert!(!report.checks.open_period);

        // 2025-12-31 17:00 UTC is January 1st in Manila.
        let report = evaluator.evaluate(&profile, &scholarship(), at("2025-12-31T17:00:00Z"));
        assert!(report.checks.open_period);
    }

    #[test]
    fn exhausted_slots_fail() {
        let mut definition = scholarship();
        definition.slots_available = 0;

        let report = EligibilityEvaluator::default().evaluate(
            &applicant(2.0, 10_000.0, 1),
            &definition,
            at("2026-02-01T00:00:00Z"),
        );
        assert!(!report.eligible);
        assert_eq!(report.checks.failed(), vec!["slots_available"]);
    }
}
