use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool, Transaction};

use iskolar_core::{
    lifecycle::Transition,
    types::{Application, ApplicationStatus},
};

use crate::{is_unique_violation, parse_column, to_rfc3339, StorageError};

/// Repository for the `applications` table.
#[derive(Clone)]
pub struct ApplicationRepository {
    pool: SqlitePool,
}

/// Snapshot captured when an eligible applicant submits.
#[derive(Debug, Clone)]
pub struct NewApplication {
    pub applicant_id: i64,
    pub scholarship_id: i64,
    pub gpa_at_submission: f64,
    pub income_at_submission: f64,
    pub submitted_at: DateTime<Utc>,
}

/// Result of attempting to insert into `applications`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplicationInsertOutcome {
    Inserted(i64),
    /// A non-withdrawn application already exists for the pair.
    Duplicate,
}

/// Filters for the public application listing.
#[derive(Debug, Clone, Default)]
pub struct ApplicationFilter {
    pub status: Option<ApplicationStatus>,
    pub scholarship_id: Option<i64>,
    pub applicant_id: Option<i64>,
}

/// Filters for the staff review queue. Drafts are never listed.
#[derive(Debug, Clone, Default)]
pub struct QueueFilter {
    pub status: Option<ApplicationStatus>,
    /// Matched against applicant name and student number.
    pub search: Option<String>,
}

/// One-based page window with `limit` clamped to `1..=100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: u32,
    pub limit: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            page: 1,
            limit: Self::DEFAULT_LIMIT,
        }
    }
}

impl Page {
    pub const DEFAULT_LIMIT: u32 = 20;
    pub const MAX_LIMIT: u32 = 100;

    pub fn clamped(page: Option<i64>, limit: Option<i64>) -> Self {
        let page = page.unwrap_or(1).clamp(1, i64::from(u32::MAX));
        let limit = limit
            .unwrap_or(i64::from(Self::DEFAULT_LIMIT))
            .clamp(1, i64::from(Self::MAX_LIMIT));
        Self {
            page: page as u32,
            limit: limit as u32,
        }
    }

    pub fn offset(&self) -> i64 {
        (i64::from(self.page) - 1) * i64::from(self.limit)
    }

    pub fn pages(&self, total: u64) -> u64 {
        total.div_ceil(u64::from(self.limit))
    }
}

/// Application joined with applicant and scholarship display columns.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApplicationListing {
    #[serde(flatten)]
    pub application: Application,
    pub applicant_name: String,
    pub student_number: String,
    pub scholarship_name: String,
    pub grantor: String,
}

/// Alias kept for call sites that fetch a single application.
pub type ApplicationDetail = ApplicationListing;

#[derive(Debug, Clone, PartialEq)]
pub struct ApplicationPage {
    pub rows: Vec<ApplicationListing>,
    pub total: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusCount {
    pub status: ApplicationStatus,
    pub count: u64,
}

#[derive(Debug, sqlx::FromRow)]
struct ApplicationRow {
    id: i64,
    applicant_id: i64,
    scholarship_id: i64,
    status: String,
    gpa_at_submission: f64,
    income_at_submission: f64,
    remarks: Option<String>,
    submitted_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ApplicationRow {
    fn into_domain(self) -> Result<Application, StorageError> {
        Ok(Application {
            id: self.id,
            applicant_id: self.applicant_id,
            scholarship_id: self.scholarship_id,
            status: parse_column(&self.status, "status")?,
            gpa_at_submission: self.gpa_at_submission,
            income_at_submission: self.income_at_submission,
            remarks: self.remarks,
            submitted_at: self.submitted_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ListingRow {
    #[sqlx(flatten)]
    application: ApplicationRow,
    applicant_name: String,
    student_number: String,
    scholarship_name: String,
    grantor: String,
}

impl ListingRow {
    fn into_domain(self) -> Result<ApplicationListing, StorageError> {
        Ok(ApplicationListing {
            application: self.application.into_domain()?,
            applicant_name: self.applicant_name,
            student_number: self.student_number,
            scholarship_name: self.scholarship_name,
            grantor: self.grantor,
        })
    }
}

const APPLICATION_COLUMNS: &str = "a.id, a.applicant_id, a.scholarship_id, a.status, \
     a.gpa_at_submission, a.income_at_submission, a.remarks, a.submitted_at, \
     a.created_at, a.updated_at";

const LISTING_FROM: &str = " FROM applications AS a \
     JOIN applicants AS ap ON ap.id = a.applicant_id \
     JOIN scholarships AS s ON s.id = a.scholarship_id";

const QUEUE_ORDER: &str = " ORDER BY CASE a.status \
     WHEN 'submitted' THEN 0 \
     WHEN 'under_review' THEN 1 \
     WHEN 'returned' THEN 2 \
     WHEN 'approved' THEN 3 \
     WHEN 'rejected' THEN 4 \
     ELSE 5 END, a.updated_at DESC, a.id DESC";

fn listing_select() -> String {
    format!(
        "SELECT {APPLICATION_COLUMNS}, ap.full_name AS applicant_name, ap.student_number, \
         s.name AS scholarship_name, s.grantor{LISTING_FROM}"
    )
}

fn push_listing_filters(builder: &mut QueryBuilder<'_, Sqlite>, filter: &ApplicationFilter) {
    builder.push(" WHERE 1 = 1");
    if let Some(status) = filter.status {
        builder.push(" AND a.status = ").push_bind(status.as_str());
    }
    if let Some(scholarship_id) = filter.scholarship_id {
        builder.push(" AND a.scholarship_id = ").push_bind(scholarship_id);
    }
    if let Some(applicant_id) = filter.applicant_id {
        builder.push(" AND a.applicant_id = ").push_bind(applicant_id);
    }
}

fn push_queue_search(builder: &mut QueryBuilder<'_, Sqlite>, search: Option<&str>) {
    builder.push(" WHERE a.status <> 'draft'");
    if let Some(term) = search.map(str::trim).filter(|term| !term.is_empty()) {
        let pattern = format!("%{term}%");
        builder
            .push(" AND (ap.full_name LIKE ")
            .push_bind(pattern.clone())
            .push(" OR ap.student_number LIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

impl ApplicationRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Inserts a `submitted` application. The partial unique index on
    /// `(applicant_id, scholarship_id)` is the authoritative duplicate guard.
    pub async fn insert(
        &self,
        application: &NewApplication,
    ) -> Result<ApplicationInsertOutcome, StorageError> {
        let timestamp = to_rfc3339(application.submitted_at);
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "INSERT INTO applications \
             (applicant_id, scholarship_id, status, gpa_at_submission, income_at_submission, \
              submitted_at, created_at, updated_at) \
             VALUES (?, ?, 'submitted', ?, ?, ?, ?, ?) \
             RETURNING id",
        )
        .bind(application.applicant_id)
        .bind(application.scholarship_id)
        .bind(application.gpa_at_submission)
        .bind(application.income_at_submission)
        .bind(&timestamp)
        .bind(&timestamp)
        .bind(&timestamp)
        .fetch_one(&mut *tx)
        .await;

        match result {
            Ok(row) => {
                let id = row.get("id");
                tx.commit().await?;
                Ok(ApplicationInsertOutcome::Inserted(id))
            }
            Err(err) if is_unique_violation(&err) => Ok(ApplicationInsertOutcome::Duplicate),
            Err(err) => Err(err.into()),
        }
    }

    /// Advisory duplicate check; [`Self::insert`] still has the final word.
    pub async fn find_active_for_pair(
        &self,
        applicant_id: i64,
        scholarship_id: i64,
    ) -> Result<Option<i64>, StorageError> {
        let row = sqlx::query(
            "SELECT id FROM applications \
             WHERE applicant_id = ? AND scholarship_id = ? AND status <> 'withdrawn'",
        )
        .bind(applicant_id)
        .bind(scholarship_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| row.get("id")))
    }

    pub async fn fetch(&self, id: i64) -> Result<Option<Application>, StorageError> {
        let row = sqlx::query_as::<_, ApplicationRow>(&format!(
            "SELECT {APPLICATION_COLUMNS} FROM applications AS a WHERE a.id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ApplicationRow::into_domain).transpose()
    }

    /// Application with applicant and scholarship display columns.
    pub async fn fetch_detail(&self, id: i64) -> Result<Option<ApplicationDetail>, StorageError> {
        let row = sqlx::query_as::<_, ListingRow>(&format!("{} WHERE a.id = ?", listing_select()))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(ListingRow::into_domain).transpose()
    }

    /// Most recent non-withdrawn application of the applicant.
    pub async fn latest_for_applicant(
        &self,
        applicant_id: i64,
    ) -> Result<Option<Application>, StorageError> {
        let row = sqlx::query_as::<_, ApplicationRow>(&format!(
            "SELECT {APPLICATION_COLUMNS} FROM applications AS a \
             WHERE a.applicant_id = ? AND a.status <> 'withdrawn' \
             ORDER BY a.created_at DESC, a.id DESC LIMIT 1"
        ))
        .bind(applicant_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ApplicationRow::into_domain).transpose()
    }

    /// Reads the status inside an open transaction.
    pub async fn status_in(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        id: i64,
    ) -> Result<Option<ApplicationStatus>, StorageError> {
        let row = sqlx::query("SELECT status FROM applications WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?;

        row.map(|row| parse_column(row.get::<&str, _>("status"), "status"))
            .transpose()
    }

    /// Newest first.
    pub async fn list(
        &self,
        filter: &ApplicationFilter,
        page: Page,
    ) -> Result<ApplicationPage, StorageError> {
        let mut count = QueryBuilder::<Sqlite>::new(format!("SELECT COUNT(*) AS total{LISTING_FROM}"));
        push_listing_filters(&mut count, filter);
        let total: i64 = count.build().fetch_one(&self.pool).await?.get("total");

        let mut select = QueryBuilder::<Sqlite>::new(listing_select());
        push_listing_filters(&mut select, filter);
        select
            .push(" ORDER BY a.created_at DESC, a.id DESC LIMIT ")
            .push_bind(i64::from(page.limit))
            .push(" OFFSET ")
            .push_bind(page.offset());
        let rows = select
            .build_query_as::<ListingRow>()
            .fetch_all(&self.pool)
            .await?;

        Ok(ApplicationPage {
            rows: rows
                .into_iter()
                .map(ListingRow::into_domain)
                .collect::<Result<_, _>>()?,
            total: total.max(0) as u64,
        })
    }

    /// Staff review queue: actionable statuses first, then most recently updated.
    pub async fn staff_queue(
        &self,
        filter: &QueueFilter,
        page: Page,
    ) -> Result<ApplicationPage, StorageError> {
        let search = filter.search.as_deref();

        let mut count = QueryBuilder::<Sqlite>::new(format!("SELECT COUNT(*) AS total{LISTING_FROM}"));
        push_queue_search(&mut count, search);
        if let Some(status) = filter.status {
            count.push(" AND a.status = ").push_bind(status.as_str());
        }
        let total: i64 = count.build().fetch_one(&self.pool).await?.get("total");

        let mut select = QueryBuilder::<Sqlite>::new(listing_select());
        push_queue_search(&mut select, search);
        if let Some(status) = filter.status {
            select.push(" AND a.status = ").push_bind(status.as_str());
        }
        select
            .push(QUEUE_ORDER)
            .push(" LIMIT ")
            .push_bind(i64::from(page.limit))
            .push(" OFFSET ")
            .push_bind(page.offset());
        let rows = select
            .build_query_as::<ListingRow>()
            .fetch_all(&self.pool)
            .await?;

        Ok(ApplicationPage {
            rows: rows
                .into_iter()
                .map(ListingRow::into_domain)
                .collect::<Result<_, _>>()?,
            total: total.max(0) as u64,
        })
    }

    /// Per-status counts for the staff queue, ignoring the status filter.
    pub async fn status_summary(
        &self,
        search: Option<&str>,
    ) -> Result<Vec<StatusCount>, StorageError> {
        let mut builder =
            QueryBuilder::<Sqlite>::new(format!("SELECT a.status, COUNT(*) AS total{LISTING_FROM}"));
        push_queue_search(&mut builder, search);
        builder.push(" GROUP BY a.status");

        let rows = builder.build().fetch_all(&self.pool).await?;
        let mut counts = Vec::with_capacity(rows.len());
        for row in rows {
            let total: i64 = row.get("total");
            counts.push(StatusCount {
                status: parse_column(row.get::<&str, _>("status"), "status")?,
                count: total.max(0) as u64,
            });
        }

        counts.sort_by_key(|entry| {
            ApplicationStatus::ALL
                .iter()
                .position(|status| *status == entry.status)
        });
        Ok(counts)
    }

    /// Applies `transition` only if the current status is one of its legal
    /// sources. Returns the new status, or `None` when nothing matched.
    pub async fn apply_transition(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        id: i64,
        transition: Transition,
        remarks: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Option<ApplicationStatus>, StorageError> {
        let target = transition.target();
        let mut builder = QueryBuilder::<Sqlite>::new("UPDATE applications SET status = ");
        builder
            .push_bind(target.as_str())
            .push(", remarks = COALESCE(")
            .push_bind(remarks.map(str::to_owned))
            .push(", remarks), updated_at = ")
            .push_bind(to_rfc3339(now))
            .push(" WHERE id = ")
            .push_bind(id)
            .push(" AND status IN (");
        let mut sources = builder.separated(", ");
        for source in transition.sources() {
            sources.push_bind(source.as_str());
        }
        sources.push_unseparated(") RETURNING status");

        let row = builder.build().fetch_optional(&mut **tx).await?;
        row.map(|row| parse_column(row.get::<&str, _>("status"), "status"))
            .transpose()
    }

    /// Sets the status directly for any application that is not withdrawn.
    /// Returns `false` when the application is missing or withdrawn.
    pub async fn override_status(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        id: i64,
        status: ApplicationStatus,
        remarks: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let result = sqlx::query(
            "UPDATE applications \
             SET status = ?, remarks = COALESCE(?, remarks), updated_at = ? \
             WHERE id = ? AND status <> 'withdrawn'",
        )
        .bind(status.as_str())
        .bind(remarks)
        .bind(to_rfc3339(now))
        .bind(id)
        .execute(&mut **tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;

    async fn set_status(db: &crate::Database, id: i64, status: ApplicationStatus) {
        sqlx::query("UPDATE applications SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(db.pool())
            .await
            .expect("set status");
    }

    #[test]
    fn page_is_clamped() {
        assert_eq!(Page::clamped(None, None), Page { page: 1, limit: 20 });
        assert_eq!(Page::clamped(Some(0), Some(0)), Page { page: 1, limit: 1 });
        assert_eq!(Page::clamped(Some(-4), Some(500)), Page { page: 1, limit: 100 });
        let page = Page::clamped(Some(3), Some(10));
        assert_eq!(page.offset(), 20);
        assert_eq!(page.pages(21), 3);
        assert_eq!(page.pages(0), 0);
    }

    #[tokio::test]
    async fn duplicate_pair_is_reported_not_raised() {
        let (_dir, db) = temp_db().await;
        let applicant_id = seed_applicant(&db, "2026-0100").await;
        let scholarship_id = seed_scholarship(&db, 2).await;
        let first = seed_application(&db, applicant_id, scholarship_id).await;

        let again = db
            .applications()
            .insert(&NewApplication {
                applicant_id,
                scholarship_id,
                gpa_at_submission: 1.5,
                income_at_submission: 10_000.0,
                submitted_at: now(),
            })
            .await
            .expect("insert");
        assert_eq!(again, ApplicationInsertOutcome::Duplicate);

        set_status(&db, first, ApplicationStatus::Withdrawn).await;
        let after_withdrawal = db
            .applications()
            .insert(&NewApplication {
                applicant_id,
                scholarship_id,
                gpa_at_submission: 1.5,
                income_at_submission: 10_000.0,
                submitted_at: now(),
            })
            .await
            .expect("insert after withdrawal");
        assert!(matches!(after_withdrawal, ApplicationInsertOutcome::Inserted(id) if id != first));
    }

    #[tokio::test]
    async fn inserted_rows_are_visible_to_another_handle() {
        let (dir, db) = temp_db().await;
        let url = format!("sqlite://{}", dir.path().join("test.db").display());
        let reader = crate::Database::connect(&url, std::time::Duration::from_secs(5))
            .await
            .expect("second handle");

        let scholarship_id = seed_scholarship(&db, 200).await;
        assert!(reader
            .scholarships()
            .fetch(scholarship_id)
            .await
            .expect("fetch scholarship")
            .is_some());

        let mut missing = 0;
        for index in 0..200 {
            let applicant_id = seed_applicant(&db, &format!("2026-9{index:03}")).await;
            if reader
                .applicants()
                .fetch(applicant_id)
                .await
                .expect("fetch applicant")
                .is_none()
            {
                missing += 1;
            }
            let id = seed_application(&db, applicant_id, scholarship_id).await;
            if reader.applications().fetch(id).await.expect("fetch").is_none() {
                missing += 1;
            }
        }
        assert_eq!(missing, 0);
    }

    #[tokio::test]
    async fn list_filters_and_paginates() {
        let (_dir, db) = temp_db().await;
        let scholarship_id = seed_scholarship(&db, 5).await;
        let mut ids = Vec::new();
        for index in 0..3 {
            let applicant_id = seed_applicant(&db, &format!("2026-02{index}")).await;
            ids.push(seed_application(&db, applicant_id, scholarship_id).await);
        }
        set_status(&db, ids[0], ApplicationStatus::UnderReview).await;

        let repo = db.applications();
        let submitted = repo
            .list(
                &ApplicationFilter {
                    status: Some(ApplicationStatus::Submitted),
                    ..ApplicationFilter::default()
                },
                Page::default(),
            )
            .await
            .expect("list");
        assert_eq!(submitted.total, 2);
        assert!(submitted
            .rows
            .iter()
            .all(|row| row.application.status == ApplicationStatus::Submitted));
        assert_eq!(submitted.rows[0].scholarship_name, "Merit Grant");

        let second_page = repo
            .list(&ApplicationFilter::default(), Page::clamped(Some(2), Some(2)))
            .await
            .expect("list page 2");
        assert_eq!(second_page.total, 3);
        assert_eq!(second_page.rows.len(), 1);
    }

    #[tokio::test]
    async fn staff_queue_orders_actionable_first() {
        let (_dir, db) = temp_db().await;
        let scholarship_id = seed_scholarship(&db, 5).await;
        let approved = {
            let applicant = seed_applicant(&db, "2026-0301").await;
            seed_application(&db, applicant, scholarship_id).await
        };
        let submitted = {
            let applicant = seed_applicant(&db, "2026-0302").await;
            seed_application(&db, applicant, scholarship_id).await
        };
        set_status(&db, approved, ApplicationStatus::Approved).await;

        let repo = db.applications();
        let queue = repo
            .staff_queue(&QueueFilter::default(), Page::default())
            .await
            .expect("queue");
        let order: Vec<i64> = queue.rows.iter().map(|row| row.application.id).collect();
        assert_eq!(order, vec![submitted, approved]);

        let searched = repo
            .staff_queue(
                &QueueFilter {
                    status: None,
                    search: Some("0302".to_string()),
                },
                Page::default(),
            )
            .await
            .expect("search");
        assert_eq!(searched.total, 1);

        let summary = repo.status_summary(None).await.expect("summary");
        assert_eq!(
            summary,
            vec![
                StatusCount {
                    status: ApplicationStatus::Submitted,
                    count: 1
                },
                StatusCount {
                    status: ApplicationStatus::Approved,
                    count: 1
                },
            ]
        );
    }

    #[tokio::test]
    async fn transition_only_moves_from_legal_sources() {
        let (_dir, db) = temp_db().await;
        let applicant_id = seed_applicant(&db, "2026-0400").await;
        let scholarship_id = seed_scholarship(&db, 1).await;
        let id = seed_application(&db, applicant_id, scholarship_id).await;
        let repo = db.applications();

        let mut tx = db.begin().await.expect("begin");
        let moved = repo
            .apply_transition(&mut tx, id, Transition::Approve, Some("ok"), now())
            .await
            .expect("approve from submitted");
        assert_eq!(moved, None);
        assert_eq!(
            repo.status_in(&mut tx, id).await.expect("status"),
            Some(ApplicationStatus::Submitted)
        );

        let moved = repo
            .apply_transition(&mut tx, id, Transition::ResumeReview, None, now())
            .await
            .expect("resume");
        assert_eq!(moved, Some(ApplicationStatus::UnderReview));
        tx.commit().await.expect("commit");

        let application = repo.fetch(id).await.expect("fetch").expect("exists");
        assert_eq!(application.status, ApplicationStatus::UnderReview);
        assert_eq!(application.remarks, None);
    }

    #[tokio::test]
    async fn override_skips_withdrawn() {
        let (_dir, db) = temp_db().await;
        let applicant_id = seed_applicant(&db, "2026-0500").await;
        let scholarship_id = seed_scholarship(&db, 1).await;
        let id = seed_application(&db, applicant_id, scholarship_id).await;
        set_status(&db, id, ApplicationStatus::Withdrawn).await;

        let mut tx = db.begin().await.expect("begin");
        let changed = db
            .applications()
            .override_status(&mut tx, id, ApplicationStatus::Approved, None, now())
            .await
            .expect("override");
        assert!(!changed);
    }

    #[tokio::test]
    async fn latest_for_applicant_ignores_withdrawn() {
        let (_dir, db) = temp_db().await;
        let applicant_id = seed_applicant(&db, "2026-0600").await;
        let scholarship_id = seed_scholarship(&db, 1).await;
        let id = seed_application(&db, applicant_id, scholarship_id).await;

        let latest = db
            .applications()
            .latest_for_applicant(applicant_id)
            .await
            .expect("latest");
        assert_eq!(latest.map(|app| app.id), Some(id));

        set_status(&db, id, ApplicationStatus::Withdrawn).await;
        assert!(db
            .applications()
            .latest_for_applicant(applicant_id)
            .await
            .expect("latest")
            .is_none());
    }
}
