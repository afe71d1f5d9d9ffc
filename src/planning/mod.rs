use std::time::{SystemTime, UNIX_EPOCH};

use chrono::NaiveDate;
use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};

use crate::db::{Database, SqliteAsyncConn, SqlitePooledConn};
use crate::error::{PlanoraError, Result};

pub mod generator;
mod schema;

pub use generator::{generate_structured_plan, StudyLevel};
use schema::{plan_progress, study_plans};

const DATE_FORMAT: &str = "%Y-%m-%d";

pub const STATUS_ACTIVE: &str = "active";
pub const STATUS_ADJUSTED: &str = "adjusted";
pub const STATUS_AI_ADJUSTED_PARTIAL: &str = "ai_adjusted_partial";

/// One dated entry of a plan's content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanDay {
    pub date: NaiveDate,
    pub tasks: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StudyPlan {
    pub id: i32,
    pub user_id: i32,
    pub exam_name: String,
    pub subject: String,
    pub exam_date: NaiveDate,
    pub study_hours_per_day: i32,
    pub level: String,
    pub topics: Vec<String>,
    pub plan_content: Vec<PlanDay>,
    pub status: String,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanProgress {
    pub id: i32,
    pub study_plan_id: i32,
    pub date: NaiveDate,
    pub completed: bool,
    pub completion_percentage: i32,
    pub notes: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewStudyPlan {
    pub exam_name: String,
    pub subject: String,
    pub exam_date: NaiveDate,
    pub study_hours_per_day: i32,
    pub level: String,
    pub topics: Vec<String>,
}

/// A rewrite of part of a plan. Progress rows dated inside
/// `[reset_from, reset_until)` are dropped and one fresh row is inserted per
/// entry of `rewritten_days`.
#[derive(Debug, Clone)]
pub struct PlanRewrite {
    pub plan_content: Vec<PlanDay>,
    pub rewritten_days: Vec<PlanDay>,
    pub study_hours_per_day: Option<i32>,
    pub status: String,
    pub reset_from: NaiveDate,
    pub reset_until: Option<NaiveDate>,
}

#[derive(Queryable)]
struct PlanRow {
    id: i32,
    user_id: i32,
    exam_name: String,
    subject: String,
    exam_date: String,
    study_hours_per_day: i32,
    level: String,
    topics_json: String,
    plan_content: Option<String>,
    status: String,
    created_at: i64,
    updated_at: i64,
}

#[derive(Insertable)]
#[diesel(table_name = study_plans)]
struct NewPlanRow<'a> {
    user_id: i32,
    exam_name: &'a str,
    subject: &'a str,
    exam_date: &'a str,
    study_hours_per_day: i32,
    level: &'a str,
    topics_json: &'a str,
    plan_content: Option<&'a str>,
    status: &'a str,
    created_at: i64,
    updated_at: i64,
}

#[derive(Queryable)]
struct ProgressRow {
    id: i32,
    study_plan_id: i32,
    date: String,
    completed: bool,
    completion_percentage: i32,
    notes: Option<String>,
}

#[derive(Insertable)]
#[diesel(table_name = plan_progress)]
struct NewProgressRow {
    study_plan_id: i32,
    date: String,
    completed: bool,
    completion_percentage: i32,
    notes: Option<String>,
}

pub struct PlanStore {
    db: Database,
}

impl PlanStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Persists the plan together with one empty progress row per day of
    /// `content`.
    pub async fn create_plan(
        &self,
        user_id: i32,
        plan: &NewStudyPlan,
        content: &[PlanDay],
    ) -> Result<StudyPlan> {
        let now = now_ts();
        let exam_date = format_date(plan.exam_date);
        let topics_json = serde_json::to_string(&plan.topics)?;
        let content_json = serde_json::to_string(content)?;
        let new = NewPlanRow {
            user_id,
            exam_name: &plan.exam_name,
            subject: &plan.subject,
            exam_date: &exam_date,
            study_hours_per_day: plan.study_hours_per_day,
            level: &plan.level,
            topics_json: &topics_json,
            plan_content: Some(&content_json),
            status: STATUS_ACTIVE,
            created_at: now,
            updated_at: now,
        };

        let mut conn = self.db.conn().await?;
        let plan_id = conn
            .transaction::<_, PlanoraError, _>(|conn| {
                async move {
                    diesel::insert_into(study_plans::table)
                        .values(&new)
                        .execute(conn)
                        .await?;
                    let plan_id: i32 = study_plans::table
                        .filter(study_plans::user_id.eq(user_id))
                        .select(study_plans::id)
                        .order(study_plans::id.desc())
                        .first(conn)
                        .await?;
                    insert_progress_rows(conn, plan_id, content).await?;
                    Ok(plan_id)
                }
                .scope_boxed()
            })
            .await?;

        tracing::info!(plan_id, user_id, days = content.len(), "Created study plan");
        self.fetch_plan(&mut conn, plan_id).await
    }

    pub async fn list_plans(&self, user_id: i32) -> Result<Vec<StudyPlan>> {
        let mut conn = self.db.conn().await?;
        let rows: Vec<PlanRow> = study_plans::table
            .filter(study_plans::user_id.eq(user_id))
            .order(study_plans::id.asc())
            .load(&mut conn)
            .await?;
        rows.into_iter().map(map_plan_row).collect()
    }

    pub async fn get_plan(&self, id: i32) -> Result<Option<StudyPlan>> {
        let mut conn = self.db.conn().await?;
        let row: Option<PlanRow> = study_plans::table
            .filter(study_plans::id.eq(id))
            .first(&mut conn)
            .await
            .optional()?;
        row.map(map_plan_row).transpose()
    }

    /// Looks the plan up only among `user_id`'s plans, so foreign plans read
    /// as missing.
    pub async fn get_owned_plan(&self, id: i32, user_id: i32) -> Result<StudyPlan> {
        let mut conn = self.db.conn().await?;
        let row: Option<PlanRow> = study_plans::table
            .filter(study_plans::id.eq(id))
            .filter(study_plans::user_id.eq(user_id))
            .first(&mut conn)
            .await
            .optional()?;
        match row {
            Some(row) => map_plan_row(row),
            None => Err(PlanoraError::NotFound("Plan not found".to_string())),
        }
    }

    pub async fn delete_plan(&self, id: i32) -> Result<bool> {
        let mut conn = self.db.conn().await?;
        let deleted = conn
            .transaction::<_, PlanoraError, _>(|conn| {
                async move {
                    diesel::delete(plan_progress::table.filter(plan_progress::study_plan_id.eq(id)))
                        .execute(conn)
                        .await?;
                    let deleted = diesel::delete(study_plans::table.filter(study_plans::id.eq(id)))
                        .execute(conn)
                        .await?;
                    Ok(deleted)
                }
                .scope_boxed()
            })
            .await?;
        Ok(deleted > 0)
    }

    pub async fn list_progress(&self, plan_id: i32) -> Result<Vec<PlanProgress>> {
        let mut conn = self.db.conn().await?;
        let rows: Vec<ProgressRow> = plan_progress::table
            .filter(plan_progress::study_plan_id.eq(plan_id))
            .order((plan_progress::date.asc(), plan_progress::id.asc()))
            .load(&mut conn)
            .await?;
        rows.into_iter().map(map_progress_row).collect()
    }

    pub async fn get_progress(&self, id: i32) -> Result<Option<PlanProgress>> {
        let mut conn = self.db.conn().await?;
        let row: Option<ProgressRow> = plan_progress::table
            .filter(plan_progress::id.eq(id))
            .first(&mut conn)
            .await
            .optional()?;
        row.map(map_progress_row).transpose()
    }

    pub async fn update_progress(
        &self,
        id: i32,
        completed: bool,
        completion_percentage: i32,
        notes: Option<&str>,
    ) -> Result<PlanProgress> {
        if !(0..=100).contains(&completion_percentage) {
            return Err(PlanoraError::Validation(
                "completion_percentage must be between 0 and 100".to_string(),
            ));
        }
        let mut conn = self.db.conn().await?;
        let updated = diesel::update(plan_progress::table.filter(plan_progress::id.eq(id)))
            .set((
                plan_progress::completed.eq(completed),
                plan_progress::completion_percentage.eq(completion_percentage),
                plan_progress::notes.eq(notes),
            ))
            .execute(&mut conn)
            .await?;
        if updated == 0 {
            return Err(PlanoraError::NotFound(
                "Progress entry not found".to_string(),
            ));
        }
        let row: ProgressRow = plan_progress::table
            .filter(plan_progress::id.eq(id))
            .first(&mut conn)
            .await?;
        map_progress_row(row)
    }

    /// Writes new plan content and resets the affected progress rows in a
    /// single transaction.
    pub async fn apply_rewrite(&self, plan_id: i32, rewrite: &PlanRewrite) -> Result<StudyPlan> {
        let now = now_ts();
        let content_json = serde_json::to_string(&rewrite.plan_content)?;
        let reset_from = format_date(rewrite.reset_from);
        let reset_until = rewrite.reset_until.map(format_date);

        let mut conn = self.db.conn().await?;
        conn.transaction::<_, PlanoraError, _>(|conn| {
            async move {
                let updated = diesel::update(study_plans::table.filter(study_plans::id.eq(plan_id)))
                    .set((
                        study_plans::plan_content.eq(Some(content_json.as_str())),
                        study_plans::status.eq(rewrite.status.as_str()),
                        study_plans::updated_at.eq(now),
                    ))
                    .execute(conn)
                    .await?;
                if updated == 0 {
                    return Err(PlanoraError::NotFound("Plan not found".to_string()));
                }
                if let Some(hours) = rewrite.study_hours_per_day {
                    diesel::update(study_plans::table.filter(study_plans::id.eq(plan_id)))
                        .set(study_plans::study_hours_per_day.eq(hours))
                        .execute(conn)
                        .await?;
                }

                let scope = plan_progress::table
                    .filter(plan_progress::study_plan_id.eq(plan_id))
                    .filter(plan_progress::date.ge(reset_from.as_str()));
                let removed = match reset_until.as_deref() {
                    Some(until) => {
                        diesel::delete(scope.filter(plan_progress::date.lt(until)))
                            .execute(conn)
                            .await?
                    }
                    None => diesel::delete(scope).execute(conn).await?,
                };
                insert_progress_rows(conn, plan_id, &rewrite.rewritten_days).await?;
                tracing::debug!(
                    plan_id,
                    removed,
                    inserted = rewrite.rewritten_days.len(),
                    "Reset plan progress rows"
                );
                Ok(())
            }
            .scope_boxed()
        })
        .await?;

        self.fetch_plan(&mut conn, plan_id).await
    }

    async fn fetch_plan(&self, conn: &mut SqlitePooledConn<'_>, id: i32) -> Result<StudyPlan> {
        let row: PlanRow = study_plans::table
            .filter(study_plans::id.eq(id))
            .first(conn)
            .await?;
        map_plan_row(row)
    }
}

async fn insert_progress_rows(
    conn: &mut SqliteAsyncConn,
    plan_id: i32,
    days: &[PlanDay],
) -> Result<()> {
    for day in days {
        diesel::insert_into(plan_progress::table)
            .values(&NewProgressRow {
                study_plan_id: plan_id,
                date: format_date(day.date),
                completed: false,
                completion_percentage: 0,
                notes: None,
            })
            .execute(conn)
            .await?;
    }
    Ok(())
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT)
        .map_err(|e| PlanoraError::Serialization(format!("invalid date '{raw}': {e}")))
}

fn map_plan_row(row: PlanRow) -> Result<StudyPlan> {
    let plan_content = match row.plan_content.as_deref() {
        Some(raw) if !raw.trim().is_empty() => serde_json::from_str(raw)?,
        _ => Vec::new(),
    };
    Ok(StudyPlan {
        id: row.id,
        user_id: row.user_id,
        exam_name: row.exam_name,
        subject: row.subject,
        exam_date: parse_date(&row.exam_date)?,
        study_hours_per_day: row.study_hours_per_day,
        level: row.level,
        topics: serde_json::from_str(&row.topics_json)?,
        plan_content,
        status: row.status,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

fn map_progress_row(row: ProgressRow) -> Result<PlanProgress> {
    Ok(PlanProgress {
        id: row.id,
        study_plan_id: row.study_plan_id,
        date: parse_date(&row.date)?,
        completed: row.completed,
        completion_percentage: row.completion_percentage,
        notes: row.notes,
    })
}

fn now_ts() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
