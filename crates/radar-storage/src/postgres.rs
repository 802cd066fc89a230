use std::collections::{BTreeSet, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use radar_core::{
    AutoApplyRecord, CandidateRadarProfile, JobPosting, Match, Notification, ProfileCompleteness,
    RadarAlert,
};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use crate::{
    AlertStore, ApplicationStore, CandidateFilter, CandidateStore, ClaimOutcome, ClaimRequest,
    InsertOutcome, JobStore, MatchCountFix, NotificationStore, StoreError,
};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations");

/// Postgres-backed store. Uniqueness of matches, claims, applications and
/// notifications is enforced by primary keys. Claims additionally take a
/// per-candidate advisory lock so the quota check and the write are serialized.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }
}

fn corrupt(table: &'static str, detail: impl ToString) -> StoreError {
    StoreError::Corrupt {
        table,
        detail: detail.to_string(),
    }
}

fn score_from_db(table: &'static str, value: i16) -> Result<u8, StoreError> {
    u8::try_from(value)
        .ok()
        .filter(|v| *v <= radar_core::MAX_FIT_SCORE)
        .ok_or_else(|| corrupt(table, format!("score {value} out of range")))
}

fn years_from_db(table: &'static str, value: i32) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| corrupt(table, format!("negative years {value}")))
}

fn skills_to_db(skills: &BTreeSet<String>) -> Vec<String> {
    skills.iter().cloned().collect()
}

fn alert_from_row(row: &PgRow) -> Result<RadarAlert, StoreError> {
    const TABLE: &str = "radar_alerts";
    let work_mode: String = row.try_get("work_mode")?;
    let match_count: i64 = row.try_get("match_count")?;
    Ok(RadarAlert {
        id: row.try_get("id")?,
        recruiter_id: row.try_get("recruiter_id")?,
        name: row.try_get("name")?,
        required_skills: row.try_get::<Vec<String>, _>("required_skills")?.into_iter().collect(),
        min_experience_years: years_from_db(TABLE, row.try_get("min_experience_years")?)?,
        min_fit_score: score_from_db(TABLE, row.try_get("min_fit_score")?)?,
        location: row.try_get("location")?,
        work_mode: work_mode.parse().map_err(|e| corrupt(TABLE, e))?,
        is_active: row.try_get("is_active")?,
        match_count: u64::try_from(match_count).map_err(|_| corrupt(TABLE, "negative match_count"))?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn match_from_row(row: &PgRow) -> Result<Match, StoreError> {
    Ok(Match {
        id: row.try_get("id")?,
        alert_id: row.try_get("alert_id")?,
        candidate_id: row.try_get("candidate_id")?,
        fit_score: score_from_db("radar_matches", row.try_get("fit_score")?)?,
        matched_skills: row.try_get::<Vec<String>, _>("matched_skills")?.into_iter().collect(),
        matched_at: row.try_get("matched_at")?,
    })
}

fn candidate_from_row(row: &PgRow) -> Result<CandidateRadarProfile, StoreError> {
    const TABLE: &str = "candidate_radar_profiles";
    let work_mode: String = row.try_get("work_mode_preference")?;
    let Json(completeness): Json<ProfileCompleteness> = row.try_get("completeness")?;
    Ok(CandidateRadarProfile {
        candidate_id: row.try_get("candidate_id")?,
        skills: row.try_get::<Vec<String>, _>("skills")?.into_iter().collect(),
        experience_years: years_from_db(TABLE, row.try_get("experience_years")?)?,
        city: row.try_get("city")?,
        work_mode_preference: work_mode.parse().map_err(|e| corrupt(TABLE, e))?,
        resume_ref: row.try_get("resume_ref")?,
        talent_radar_opt_in: row.try_get("talent_radar_opt_in")?,
        auto_apply_opt_in: row.try_get("auto_apply_opt_in")?,
        completeness,
    })
}

fn job_from_row(row: &PgRow) -> Result<JobPosting, StoreError> {
    const TABLE: &str = "job_postings";
    let work_mode: String = row.try_get("work_mode")?;
    Ok(JobPosting {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        company: row.try_get("company")?,
        required_skills: row.try_get::<Vec<String>, _>("required_skills")?.into_iter().collect(),
        min_experience_years: years_from_db(TABLE, row.try_get("min_experience_years")?)?,
        city: row.try_get("city")?,
        work_mode: work_mode.parse().map_err(|e| corrupt(TABLE, e))?,
        is_open: row.try_get("is_open")?,
        posted_at: row.try_get("posted_at")?,
    })
}

fn application_from_row(row: &PgRow) -> Result<AutoApplyRecord, StoreError> {
    const TABLE: &str = "auto_apply_records";
    let status: String = row.try_get("status")?;
    Ok(AutoApplyRecord {
        id: row.try_get("id")?,
        candidate_id: row.try_get("candidate_id")?,
        job_id: row.try_get("job_id")?,
        match_score: score_from_db(TABLE, row.try_get("match_score")?)?,
        applied_at: row.try_get("applied_at")?,
        status: status.parse().map_err(|e| corrupt(TABLE, e))?,
    })
}

fn notification_from_row(row: &PgRow) -> Result<Notification, StoreError> {
    let kind: String = row.try_get("kind")?;
    Ok(Notification {
        id: row.try_get("id")?,
        recipient_id: row.try_get("recipient_id")?,
        kind: kind.parse().map_err(|e| corrupt("notifications", e))?,
        ref_id: row.try_get("ref_id")?,
        created_at: row.try_get("created_at")?,
    })
}

const ALERT_COLUMNS: &str = "id, recruiter_id, name, required_skills, min_experience_years, \
     min_fit_score, location, work_mode, is_active, match_count, created_at, updated_at";

#[async_trait]
impl AlertStore for PgStore {
    async fn insert_alert(&self, alert: &RadarAlert) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO radar_alerts
                (id, recruiter_id, name, required_skills, min_experience_years, min_fit_score,
                 location, work_mode, is_active, match_count, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(alert.id)
        .bind(alert.recruiter_id)
        .bind(&alert.name)
        .bind(skills_to_db(&alert.required_skills))
        .bind(alert.min_experience_years as i32)
        .bind(alert.min_fit_score as i16)
        .bind(&alert.location)
        .bind(alert.work_mode.as_str())
        .bind(alert.is_active)
        .bind(alert.match_count as i64)
        .bind(alert.created_at)
        .bind(alert.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_alert(&self, alert: &RadarAlert) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE radar_alerts
               SET name = $2,
                   required_skills = $3,
                   min_experience_years = $4,
                   min_fit_score = $5,
                   location = $6,
                   work_mode = $7,
                   is_active = $8,
                   updated_at = $9
             WHERE id = $1
            "#,
        )
        .bind(alert.id)
        .bind(&alert.name)
        .bind(skills_to_db(&alert.required_skills))
        .bind(alert.min_experience_years as i32)
        .bind(alert.min_fit_score as i16)
        .bind(&alert.location)
        .bind(alert.work_mode.as_str())
        .bind(alert.is_active)
        .bind(alert.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_alert(&self, alert_id: Uuid) -> Result<Option<RadarAlert>, StoreError> {
        let row = sqlx::query(&format!("SELECT {ALERT_COLUMNS} FROM radar_alerts WHERE id = $1"))
            .bind(alert_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(alert_from_row).transpose()
    }

    async fn list_alerts(&self) -> Result<Vec<RadarAlert>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {ALERT_COLUMNS} FROM radar_alerts ORDER BY created_at, id"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(alert_from_row).collect()
    }

    async fn list_alerts_for_recruiter(&self, recruiter_id: Uuid) -> Result<Vec<RadarAlert>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {ALERT_COLUMNS} FROM radar_alerts WHERE recruiter_id = $1 ORDER BY created_at, id"
        ))
        .bind(recruiter_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(alert_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn list_active_alerts(&self) -> Result<Vec<RadarAlert>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {ALERT_COLUMNS} FROM radar_alerts WHERE is_active ORDER BY created_at, id"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(alert_from_row).collect()
    }

    async fn delete_alert(&self, alert_id: Uuid) -> Result<Option<u64>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let removed = sqlx::query("DELETE FROM radar_matches WHERE alert_id = $1")
            .bind(alert_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let deleted = sqlx::query("DELETE FROM radar_alerts WHERE id = $1")
            .bind(alert_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if deleted == 0 {
            tx.rollback().await?;
            return Ok(None);
        }
        tx.commit().await?;
        Ok(Some(removed))
    }

    #[instrument(skip(self, record), fields(alert_id = %record.alert_id, candidate_id = %record.candidate_id))]
    async fn insert_match(&self, record: &Match) -> Result<InsertOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;
        let inserted = sqlx::query(
            r#"
            INSERT INTO radar_matches (alert_id, candidate_id, id, fit_score, matched_skills, matched_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (alert_id, candidate_id) DO NOTHING
            "#,
        )
        .bind(record.alert_id)
        .bind(record.candidate_id)
        .bind(record.id)
        .bind(record.fit_score as i16)
        .bind(skills_to_db(&record.matched_skills))
        .bind(record.matched_at)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            tx.rollback().await?;
            return Ok(InsertOutcome::Duplicate);
        }

        sqlx::query("UPDATE radar_alerts SET match_count = match_count + 1 WHERE id = $1")
            .bind(record.alert_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(InsertOutcome::Inserted)
    }

    async fn matched_candidate_ids(&self, alert_id: Uuid) -> Result<HashSet<Uuid>, StoreError> {
        let rows = sqlx::query("SELECT candidate_id FROM radar_matches WHERE alert_id = $1")
            .bind(alert_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| row.try_get("candidate_id").map_err(StoreError::from))
            .collect()
    }

    async fn get_match(&self, alert_id: Uuid, candidate_id: Uuid) -> Result<Option<Match>, StoreError> {
        let row = sqlx::query(
            "SELECT alert_id, candidate_id, id, fit_score, matched_skills, matched_at \
               FROM radar_matches WHERE alert_id = $1 AND candidate_id = $2",
        )
        .bind(alert_id)
        .bind(candidate_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(match_from_row).transpose()
    }

    async fn list_matches(&self, alert_id: Uuid) -> Result<Vec<Match>, StoreError> {
        let rows = sqlx::query(
            "SELECT alert_id, candidate_id, id, fit_score, matched_skills, matched_at \
               FROM radar_matches WHERE alert_id = $1 ORDER BY matched_at DESC, candidate_id",
        )
        .bind(alert_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(match_from_row).collect()
    }

    async fn update_match_score(&self, record: &Match) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE radar_matches SET fit_score = $3, matched_skills = $4 \
              WHERE alert_id = $1 AND candidate_id = $2",
        )
        .bind(record.alert_id)
        .bind(record.candidate_id)
        .bind(record.fit_score as i16)
        .bind(skills_to_db(&record.matched_skills))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn reconcile_match_counts(&self) -> Result<Vec<MatchCountFix>, StoreError> {
        let mut tx = self.pool.begin().await?;
        // Row locks make a concurrent insert_match wait on its increment until the
        // recount below has committed.
        let locked = sqlx::query("SELECT id, match_count FROM radar_alerts ORDER BY id FOR UPDATE")
            .fetch_all(&mut *tx)
            .await?;
        let mut recorded = std::collections::HashMap::with_capacity(locked.len());
        for row in &locked {
            let id: Uuid = row.try_get("id")?;
            let count: i64 = row.try_get("match_count")?;
            recorded.insert(id, count.max(0) as u64);
        }

        let rows = sqlx::query(
            r#"
            UPDATE radar_alerts a
               SET match_count = c.actual
              FROM (SELECT al.id, COUNT(m.candidate_id) AS actual
                      FROM radar_alerts al
                      LEFT JOIN radar_matches m ON m.alert_id = al.id
                     GROUP BY al.id) c
             WHERE a.id = c.id AND a.match_count <> c.actual
            RETURNING a.id, c.actual
            "#,
        )
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        let mut fixes = Vec::with_capacity(rows.len());
        for row in &rows {
            let alert_id: Uuid = row.try_get("id")?;
            let actual: i64 = row.try_get("actual")?;
            fixes.push(MatchCountFix {
                alert_id,
                recorded: recorded.get(&alert_id).copied().unwrap_or_default(),
                actual: actual.max(0) as u64,
            });
        }
        fixes.sort_by_key(|f| f.alert_id);
        Ok(fixes)
    }
}

const CANDIDATE_COLUMNS: &str = "candidate_id, skills, experience_years, city, work_mode_preference, \
     resume_ref, talent_radar_opt_in, auto_apply_opt_in, completeness";

#[async_trait]
impl CandidateStore for PgStore {
    async fn upsert_candidate(&self, candidate: &CandidateRadarProfile) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO candidate_radar_profiles
                (candidate_id, skills, experience_years, city, work_mode_preference, resume_ref,
                 talent_radar_opt_in, auto_apply_opt_in, completeness)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (candidate_id) DO UPDATE
               SET skills = EXCLUDED.skills,
                   experience_years = EXCLUDED.experience_years,
                   city = EXCLUDED.city,
                   work_mode_preference = EXCLUDED.work_mode_preference,
                   resume_ref = EXCLUDED.resume_ref,
                   talent_radar_opt_in = EXCLUDED.talent_radar_opt_in,
                   auto_apply_opt_in = EXCLUDED.auto_apply_opt_in,
                   completeness = EXCLUDED.completeness
            "#,
        )
        .bind(candidate.candidate_id)
        .bind(skills_to_db(&candidate.skills))
        .bind(candidate.experience_years as i32)
        .bind(&candidate.city)
        .bind(candidate.work_mode_preference.as_str())
        .bind(&candidate.resume_ref)
        .bind(candidate.talent_radar_opt_in)
        .bind(candidate.auto_apply_opt_in)
        .bind(Json(candidate.completeness))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_candidate(&self, candidate_id: Uuid) -> Result<Option<CandidateRadarProfile>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {CANDIDATE_COLUMNS} FROM candidate_radar_profiles WHERE candidate_id = $1"
        ))
        .bind(candidate_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(candidate_from_row).transpose()
    }

    #[instrument(skip(self))]
    async fn query_candidates(&self, filter: &CandidateFilter) -> Result<Vec<CandidateRadarProfile>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {CANDIDATE_COLUMNS}
              FROM candidate_radar_profiles
             WHERE ($1::boolean IS NULL OR talent_radar_opt_in = $1)
               AND ($2::boolean IS NULL OR auto_apply_opt_in = $2)
               AND ($3::text IS NULL OR work_mode_preference = $3 OR work_mode_preference = 'any')
               AND ($4::text IS NULL OR lower(trim(city)) = lower(trim($4)))
             ORDER BY candidate_id
            "#
        ))
        .bind(filter.talent_radar_opt_in)
        .bind(filter.auto_apply_opt_in)
        .bind(filter.work_mode.map(|m| m.as_str()))
        .bind(filter.city.as_deref())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(candidate_from_row).collect()
    }

    async fn set_talent_radar_opt_in(&self, candidate_id: Uuid, enabled: bool) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE candidate_radar_profiles SET talent_radar_opt_in = $2 WHERE candidate_id = $1",
        )
        .bind(candidate_id)
        .bind(enabled)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_auto_apply_opt_in(&self, candidate_id: Uuid, enabled: bool) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE candidate_radar_profiles SET auto_apply_opt_in = $2 WHERE candidate_id = $1",
        )
        .bind(candidate_id)
        .bind(enabled)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

const JOB_COLUMNS: &str =
    "id, title, company, required_skills, min_experience_years, city, work_mode, is_open, posted_at";

#[async_trait]
impl JobStore for PgStore {
    async fn upsert_job(&self, job: &JobPosting) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO job_postings
                (id, title, company, required_skills, min_experience_years, city, work_mode, is_open, posted_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE
               SET title = EXCLUDED.title,
                   company = EXCLUDED.company,
                   required_skills = EXCLUDED.required_skills,
                   min_experience_years = EXCLUDED.min_experience_years,
                   city = EXCLUDED.city,
                   work_mode = EXCLUDED.work_mode,
                   is_open = EXCLUDED.is_open,
                   posted_at = EXCLUDED.posted_at
            "#,
        )
        .bind(job.id)
        .bind(&job.title)
        .bind(&job.company)
        .bind(skills_to_db(&job.required_skills))
        .bind(job.min_experience_years as i32)
        .bind(&job.city)
        .bind(job.work_mode.as_str())
        .bind(job.is_open)
        .bind(job.posted_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<JobPosting>, StoreError> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM job_postings WHERE id = $1"))
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn list_open_jobs(&self) -> Result<Vec<JobPosting>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM job_postings WHERE is_open ORDER BY posted_at DESC, id"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(job_from_row).collect()
    }

    async fn insert_job_application(
        &self,
        candidate_id: Uuid,
        job_id: Uuid,
        submitted_at: DateTime<Utc>,
    ) -> Result<InsertOutcome, StoreError> {
        let result = sqlx::query(
            "INSERT INTO job_applications (candidate_id, job_id, submitted_at) VALUES ($1, $2, $3) \
             ON CONFLICT (candidate_id, job_id) DO NOTHING",
        )
        .bind(candidate_id)
        .bind(job_id)
        .bind(submitted_at)
        .execute(&self.pool)
        .await?;
        Ok(if result.rows_affected() > 0 {
            InsertOutcome::Inserted
        } else {
            InsertOutcome::Duplicate
        })
    }

    async fn list_job_applications(&self, candidate_id: Uuid) -> Result<Vec<Uuid>, StoreError> {
        let rows = sqlx::query("SELECT job_id FROM job_applications WHERE candidate_id = $1 ORDER BY submitted_at")
            .bind(candidate_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| row.try_get("job_id").map_err(StoreError::from))
            .collect()
    }
}

#[async_trait]
impl ApplicationStore for PgStore {
    async fn claimed_job_ids(
        &self,
        candidate_id: Uuid,
        stale_before: DateTime<Utc>,
    ) -> Result<HashSet<Uuid>, StoreError> {
        let rows = sqlx::query(
            "SELECT job_id FROM auto_apply_claims WHERE candidate_id = $1 AND claimed_at >= $2 \
             UNION SELECT job_id FROM auto_apply_records WHERE candidate_id = $1",
        )
        .bind(candidate_id)
        .bind(stale_before)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| row.try_get("job_id").map_err(StoreError::from))
            .collect()
    }

    #[instrument(skip(self, request), fields(candidate_id = %request.candidate_id, job_id = %request.job_id))]
    async fn claim_application(&self, request: &ClaimRequest) -> Result<ClaimOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1::text, 0))")
            .bind(request.candidate_id)
            .execute(&mut *tx)
            .await?;

        let taken: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (SELECT 1 FROM auto_apply_records WHERE candidate_id = $1 AND job_id = $2)
                OR EXISTS (SELECT 1 FROM auto_apply_claims
                            WHERE candidate_id = $1 AND job_id = $2 AND claimed_at >= $3)
            "#,
        )
        .bind(request.candidate_id)
        .bind(request.job_id)
        .bind(request.stale_before)
        .fetch_one(&mut *tx)
        .await?;
        if taken {
            tx.rollback().await?;
            return Ok(ClaimOutcome::AlreadyClaimed);
        }

        if let Some(quota) = request.quota {
            let used: i64 = sqlx::query_scalar(
                r#"
                SELECT COUNT(*) FROM (
                    SELECT job_id FROM auto_apply_claims
                     WHERE candidate_id = $1 AND claimed_at >= $2 AND job_id <> $3
                    UNION
                    SELECT job_id FROM auto_apply_records
                     WHERE candidate_id = $1 AND applied_at >= $2 AND job_id <> $3
                ) used
                "#,
            )
            .bind(request.candidate_id)
            .bind(quota.window_start)
            .bind(request.job_id)
            .fetch_one(&mut *tx)
            .await?;
            if used.max(0) as u64 >= quota.limit {
                tx.rollback().await?;
                return Ok(ClaimOutcome::QuotaExhausted);
            }
        }

        // Any remaining row is an abandoned claim past its lease; take it over.
        sqlx::query(
            r#"
            INSERT INTO auto_apply_claims (candidate_id, job_id, claimed_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (candidate_id, job_id) DO UPDATE SET claimed_at = EXCLUDED.claimed_at
            "#,
        )
        .bind(request.candidate_id)
        .bind(request.job_id)
        .bind(request.claimed_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(ClaimOutcome::Claimed)
    }

    async fn release_application_claim(&self, candidate_id: Uuid, job_id: Uuid) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            DELETE FROM auto_apply_claims
             WHERE candidate_id = $1 AND job_id = $2
               AND NOT EXISTS (
                   SELECT 1 FROM auto_apply_records WHERE candidate_id = $1 AND job_id = $2)
            "#,
        )
        .bind(candidate_id)
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_application(&self, record: &AutoApplyRecord) -> Result<InsertOutcome, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO auto_apply_records (candidate_id, job_id, id, match_score, applied_at, status)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (candidate_id, job_id) DO NOTHING
            "#,
        )
        .bind(record.candidate_id)
        .bind(record.job_id)
        .bind(record.id)
        .bind(record.match_score as i16)
        .bind(record.applied_at)
        .bind(record.status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(if result.rows_affected() > 0 {
            InsertOutcome::Inserted
        } else {
            InsertOutcome::Duplicate
        })
    }

    async fn list_applications(&self, candidate_id: Uuid) -> Result<Vec<AutoApplyRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT candidate_id, job_id, id, match_score, applied_at, status \
               FROM auto_apply_records WHERE candidate_id = $1 ORDER BY applied_at DESC, job_id",
        )
        .bind(candidate_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(application_from_row).collect()
    }

    async fn count_applications_since(
        &self,
        candidate_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM auto_apply_records WHERE candidate_id = $1 AND applied_at >= $2",
        )
        .bind(candidate_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as u64)
    }
}

#[async_trait]
impl NotificationStore for PgStore {
    async fn insert_notification(&self, notification: &Notification) -> Result<InsertOutcome, StoreError> {
        let result = sqlx::query(
            "INSERT INTO notifications (ref_id, id, recipient_id, kind, created_at) \
             VALUES ($1, $2, $3, $4, $5) ON CONFLICT (ref_id) DO NOTHING",
        )
        .bind(notification.ref_id)
        .bind(notification.id)
        .bind(notification.recipient_id)
        .bind(notification.kind.as_str())
        .bind(notification.created_at)
        .execute(&self.pool)
        .await?;
        Ok(if result.rows_affected() > 0 {
            InsertOutcome::Inserted
        } else {
            InsertOutcome::Duplicate
        })
    }

    async fn list_notifications(&self, recipient_id: Uuid) -> Result<Vec<Notification>, StoreError> {
        let rows = sqlx::query(
            "SELECT ref_id, id, recipient_id, kind, created_at FROM notifications \
              WHERE recipient_id = $1 ORDER BY created_at DESC",
        )
        .bind(recipient_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(notification_from_row).collect()
    }
}
