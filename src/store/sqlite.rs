use std::collections::VecDeque;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};

use crate::store::{KnowledgeStore, StoreError};
use crate::types::{
    BookProgress, ItemKind, MistakeLogEntry, MistakeNote, MistakeType, PronunciationRecord,
    PronunciationTrend, RetentionState,
};

const SCHEMA_SQL: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS "retention_states" (
      "learnerId" TEXT NOT NULL,
      "kind" TEXT NOT NULL,
      "itemId" TEXT NOT NULL,
      "id" TEXT NOT NULL,
      "knowledgeLevel" INTEGER NOT NULL DEFAULT 0,
      "easeFactor" REAL NOT NULL DEFAULT 2.5,
      "intervalDays" REAL NOT NULL DEFAULT 0,
      "repetitionCount" INTEGER NOT NULL DEFAULT 0,
      "perfectStreak" INTEGER NOT NULL DEFAULT 0,
      "nextReviewAt" INTEGER NOT NULL,
      "timesSeen" INTEGER NOT NULL DEFAULT 0,
      "timesCorrect" INTEGER NOT NULL DEFAULT 0,
      "timesIncorrect" INTEGER NOT NULL DEFAULT 0,
      "lastSeen" INTEGER,
      "lastCorrect" INTEGER,
      "lastIncorrect" INTEGER,
      "pronunciationScore" REAL NOT NULL DEFAULT 0,
      "pronunciationAttempts" INTEGER NOT NULL DEFAULT 0,
      "recentMistakes" TEXT NOT NULL DEFAULT '[]',
      "recentContexts" TEXT NOT NULL DEFAULT '[]',
      "createdAt" INTEGER NOT NULL,
      "updatedAt" INTEGER NOT NULL,
      PRIMARY KEY ("learnerId", "kind", "itemId")
    )
    "#,
    r#"CREATE INDEX IF NOT EXISTS "idx_retention_due" ON "retention_states" ("learnerId", "kind", "nextReviewAt")"#,
    r#"
    CREATE TABLE IF NOT EXISTS "pronunciation_records" (
      "learnerId" TEXT NOT NULL,
      "sound" TEXT NOT NULL,
      "currentScore" REAL NOT NULL DEFAULT 0,
      "bestScore" REAL NOT NULL DEFAULT 0,
      "totalAttempts" INTEGER NOT NULL DEFAULT 0,
      "recentScores" TEXT NOT NULL DEFAULT '[]',
      "trend" TEXT NOT NULL DEFAULT 'stable',
      "updatedAt" INTEGER NOT NULL,
      PRIMARY KEY ("learnerId", "sound")
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS "mistake_logs" (
      "seq" INTEGER PRIMARY KEY AUTOINCREMENT,
      "id" TEXT NOT NULL UNIQUE,
      "learnerId" TEXT NOT NULL,
      "mistakeType" TEXT NOT NULL,
      "item" TEXT NOT NULL,
      "expected" TEXT NOT NULL,
      "actual" TEXT NOT NULL,
      "occurredAt" INTEGER NOT NULL
    )
    "#,
    r#"CREATE INDEX IF NOT EXISTS "idx_mistake_logs_learner" ON "mistake_logs" ("learnerId", "occurredAt")"#,
    r#"
    CREATE TABLE IF NOT EXISTS "book_progress" (
      "learnerId" TEXT PRIMARY KEY,
      "bookId" TEXT NOT NULL,
      "currentChapter" INTEGER NOT NULL DEFAULT 0,
      "totalChapters" INTEGER NOT NULL DEFAULT 0,
      "completedLessons" INTEGER NOT NULL DEFAULT 0,
      "totalLessons" INTEGER NOT NULL DEFAULT 0,
      "updatedAt" INTEGER NOT NULL
    )
    "#,
];

const RETENTION_COLUMNS: &str = r#"
    "learnerId","kind","itemId","id","knowledgeLevel","easeFactor","intervalDays",
    "repetitionCount","perfectStreak","nextReviewAt","timesSeen","timesCorrect","timesIncorrect",
    "lastSeen","lastCorrect","lastIncorrect","pronunciationScore","pronunciationAttempts",
    "recentMistakes","recentContexts","createdAt","updatedAt"
"#;

#[derive(Clone)]
pub struct SqliteKnowledgeStore {
    pool: SqlitePool,
}

impl SqliteKnowledgeStore {
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Opens (creating if missing) a database file such as `sqlite:tutor.db`.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .busy_timeout(std::time::Duration::from_secs(30));
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Single-connection in-memory database; each connection would otherwise see its own copy.
    pub async fn in_memory() -> Result<Self, StoreError> {
        // The database lives only as long as its one connection, so never reap it.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        for statement in SCHEMA_SQL {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        tracing::debug!("knowledge store schema ensured");
        Ok(())
    }

    pub async fn upsert_book_progress(&self, progress: &BookProgress) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO "book_progress"
              ("learnerId","bookId","currentChapter","totalChapters","completedLessons","totalLessons","updatedAt")
            VALUES (?,?,?,?,?,?,?)
            ON CONFLICT ("learnerId") DO UPDATE SET
              "bookId" = EXCLUDED."bookId",
              "currentChapter" = EXCLUDED."currentChapter",
              "totalChapters" = EXCLUDED."totalChapters",
              "completedLessons" = EXCLUDED."completedLessons",
              "totalLessons" = EXCLUDED."totalLessons",
              "updatedAt" = EXCLUDED."updatedAt"
            "#,
        )
        .bind(&progress.learner_id)
        .bind(&progress.book_id)
        .bind(progress.current_chapter as i64)
        .bind(progress.total_chapters as i64)
        .bind(progress.completed_lessons as i64)
        .bind(progress.total_lessons as i64)
        .bind(progress.updated_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl KnowledgeStore for SqliteKnowledgeStore {
    async fn get_retention_state(
        &self,
        learner_id: &str,
        kind: ItemKind,
        item_id: &str,
    ) -> Result<Option<RetentionState>, StoreError> {
        let sql = format!(
            r#"SELECT {RETENTION_COLUMNS} FROM "retention_states"
               WHERE "learnerId" = ? AND "kind" = ? AND "itemId" = ? LIMIT 1"#
        );
        let row = sqlx::query(&sql)
            .bind(learner_id)
            .bind(kind.as_str())
            .bind(item_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| map_retention_row(&r)).transpose()
    }

    async fn upsert_retention_state(&self, state: &RetentionState) -> Result<(), StoreError> {
        let mistakes = serde_json::to_string(&state.recent_mistakes)?;
        let contexts = serde_json::to_string(&state.recent_contexts)?;

        sqlx::query(
            r#"
            INSERT INTO "retention_states"
              ("learnerId","kind","itemId","id","knowledgeLevel","easeFactor","intervalDays",
               "repetitionCount","perfectStreak","nextReviewAt","timesSeen","timesCorrect","timesIncorrect",
               "lastSeen","lastCorrect","lastIncorrect","pronunciationScore","pronunciationAttempts",
               "recentMistakes","recentContexts","createdAt","updatedAt")
            VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?)
            ON CONFLICT ("learnerId","kind","itemId") DO UPDATE SET
              "knowledgeLevel" = EXCLUDED."knowledgeLevel",
              "easeFactor" = EXCLUDED."easeFactor",
              "intervalDays" = EXCLUDED."intervalDays",
              "repetitionCount" = EXCLUDED."repetitionCount",
              "perfectStreak" = EXCLUDED."perfectStreak",
              "nextReviewAt" = EXCLUDED."nextReviewAt",
              "timesSeen" = EXCLUDED."timesSeen",
              "timesCorrect" = EXCLUDED."timesCorrect",
              "timesIncorrect" = EXCLUDED."timesIncorrect",
              "lastSeen" = EXCLUDED."lastSeen",
              "lastCorrect" = EXCLUDED."lastCorrect",
              "lastIncorrect" = EXCLUDED."lastIncorrect",
              "pronunciationScore" = EXCLUDED."pronunciationScore",
              "pronunciationAttempts" = EXCLUDED."pronunciationAttempts",
              "recentMistakes" = EXCLUDED."recentMistakes",
              "recentContexts" = EXCLUDED."recentContexts",
              "updatedAt" = EXCLUDED."updatedAt"
            "#,
        )
        .bind(&state.learner_id)
        .bind(state.kind.as_str())
        .bind(&state.item_id)
        .bind(&state.id)
        .bind(state.knowledge_level as i64)
        .bind(state.ease_factor)
        .bind(state.interval_days)
        .bind(state.repetition_count as i64)
        .bind(state.perfect_streak as i64)
        .bind(state.next_review_at.timestamp_millis())
        .bind(state.times_seen as i64)
        .bind(state.times_correct as i64)
        .bind(state.times_incorrect as i64)
        .bind(state.last_seen.map(|t| t.timestamp_millis()))
        .bind(state.last_correct.map(|t| t.timestamp_millis()))
        .bind(state.last_incorrect.map(|t| t.timestamp_millis()))
        .bind(state.pronunciation_score)
        .bind(state.pronunciation_attempts as i64)
        .bind(mistakes)
        .bind(contexts)
        .bind(state.created_at.timestamp_millis())
        .bind(state.updated_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_retention_states(
        &self,
        learner_id: &str,
        kind: Option<ItemKind>,
    ) -> Result<Vec<RetentionState>, StoreError> {
        let rows = match kind {
            Some(kind) => {
                let sql = format!(
                    r#"SELECT {RETENTION_COLUMNS} FROM "retention_states"
                       WHERE "learnerId" = ? AND "kind" = ?
                       ORDER BY "createdAt" ASC, "itemId" ASC"#
                );
                sqlx::query(&sql)
                    .bind(learner_id)
                    .bind(kind.as_str())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                let sql = format!(
                    r#"SELECT {RETENTION_COLUMNS} FROM "retention_states"
                       WHERE "learnerId" = ?
                       ORDER BY "createdAt" ASC, "itemId" ASC"#
                );
                sqlx::query(&sql).bind(learner_id).fetch_all(&self.pool).await?
            }
        };
        rows.iter().map(map_retention_row).collect()
    }

    async fn list_due_states(
        &self,
        learner_id: &str,
        kind: ItemKind,
        now: DateTime<Utc>,
    ) -> Result<Vec<RetentionState>, StoreError> {
        let sql = format!(
            r#"SELECT {RETENTION_COLUMNS} FROM "retention_states"
               WHERE "learnerId" = ? AND "kind" = ? AND "nextReviewAt" <= ?
               ORDER BY "nextReviewAt" ASC, "itemId" ASC"#
        );
        let rows = sqlx::query(&sql)
            .bind(learner_id)
            .bind(kind.as_str())
            .bind(now.timestamp_millis())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(map_retention_row).collect()
    }

    async fn get_pronunciation_record(
        &self,
        learner_id: &str,
        sound: &str,
    ) -> Result<Option<PronunciationRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT "learnerId","sound","currentScore","bestScore","totalAttempts","recentScores","trend","updatedAt"
            FROM "pronunciation_records"
            WHERE "learnerId" = ? AND "sound" = ?
            LIMIT 1
            "#,
        )
        .bind(learner_id)
        .bind(sound)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| map_pronunciation_row(&r)).transpose()
    }

    async fn upsert_pronunciation_record(
        &self,
        record: &PronunciationRecord,
    ) -> Result<(), StoreError> {
        let recent = serde_json::to_string(&record.recent_scores)?;
        sqlx::query(
            r#"
            INSERT INTO "pronunciation_records"
              ("learnerId","sound","currentScore","bestScore","totalAttempts","recentScores","trend","updatedAt")
            VALUES (?,?,?,?,?,?,?,?)
            ON CONFLICT ("learnerId","sound") DO UPDATE SET
              "currentScore" = EXCLUDED."currentScore",
              "bestScore" = EXCLUDED."bestScore",
              "totalAttempts" = EXCLUDED."totalAttempts",
              "recentScores" = EXCLUDED."recentScores",
              "trend" = EXCLUDED."trend",
              "updatedAt" = EXCLUDED."updatedAt"
            "#,
        )
        .bind(&record.learner_id)
        .bind(&record.sound)
        .bind(record.current_score)
        .bind(record.best_score)
        .bind(record.total_attempts as i64)
        .bind(recent)
        .bind(record.trend.as_str())
        .bind(record.updated_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_pronunciation_records(
        &self,
        learner_id: &str,
    ) -> Result<Vec<PronunciationRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT "learnerId","sound","currentScore","bestScore","totalAttempts","recentScores","trend","updatedAt"
            FROM "pronunciation_records"
            WHERE "learnerId" = ?
            ORDER BY "sound" ASC
            "#,
        )
        .bind(learner_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_pronunciation_row).collect()
    }

    async fn append_mistake_log(&self, entry: &MistakeLogEntry) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO "mistake_logs"
              ("id","learnerId","mistakeType","item","expected","actual","occurredAt")
            VALUES (?,?,?,?,?,?,?)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.learner_id)
        .bind(entry.mistake_type.as_str())
        .bind(&entry.item)
        .bind(&entry.expected)
        .bind(&entry.actual)
        .bind(entry.occurred_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_mistake_logs(
        &self,
        learner_id: &str,
        limit: usize,
    ) -> Result<Vec<MistakeLogEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT "id","learnerId","mistakeType","item","expected","actual","occurredAt"
            FROM "mistake_logs"
            WHERE "learnerId" = ?
            ORDER BY "occurredAt" DESC, "seq" DESC
            LIMIT ?
            "#,
        )
        .bind(learner_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<MistakeLogEntry, StoreError> {
                let raw_type: String = row.try_get("mistakeType")?;
                let mistake_type = MistakeType::parse(&raw_type).ok_or_else(|| {
                    StoreError::Backend(format!("unknown mistake type {raw_type}"))
                })?;
                Ok(MistakeLogEntry {
                    id: row.try_get("id")?,
                    learner_id: row.try_get("learnerId")?,
                    mistake_type,
                    item: row.try_get("item")?,
                    expected: row.try_get("expected")?,
                    actual: row.try_get("actual")?,
                    occurred_at: millis_to_datetime(row.try_get("occurredAt")?)?,
                })
            })
            .collect()
    }

    async fn get_book_progress(&self, learner_id: &str) -> Result<Option<BookProgress>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT "learnerId","bookId","currentChapter","totalChapters","completedLessons","totalLessons","updatedAt"
            FROM "book_progress"
            WHERE "learnerId" = ?
            LIMIT 1
            "#,
        )
        .bind(learner_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(BookProgress {
            learner_id: row.try_get("learnerId")?,
            book_id: row.try_get("bookId")?,
            current_chapter: to_u32(row.try_get("currentChapter")?),
            total_chapters: to_u32(row.try_get("totalChapters")?),
            completed_lessons: to_u32(row.try_get("completedLessons")?),
            total_lessons: to_u32(row.try_get("totalLessons")?),
            updated_at: millis_to_datetime(row.try_get("updatedAt")?)?,
        }))
    }
}

fn map_retention_row(row: &SqliteRow) -> Result<RetentionState, StoreError> {
    let raw_kind: String = row.try_get("kind")?;
    let kind = ItemKind::parse(&raw_kind)
        .ok_or_else(|| StoreError::Backend(format!("unknown item kind {raw_kind}")))?;
    let mistakes: VecDeque<MistakeNote> =
        serde_json::from_str(&row.try_get::<String, _>("recentMistakes")?)?;
    let contexts: VecDeque<String> =
        serde_json::from_str(&row.try_get::<String, _>("recentContexts")?)?;

    Ok(RetentionState {
        id: row.try_get("id")?,
        learner_id: row.try_get("learnerId")?,
        item_id: row.try_get("itemId")?,
        kind,
        knowledge_level: row.try_get::<i64, _>("knowledgeLevel")?.clamp(0, 7) as u8,
        ease_factor: row.try_get("easeFactor")?,
        interval_days: row.try_get("intervalDays")?,
        repetition_count: to_u32(row.try_get("repetitionCount")?),
        perfect_streak: to_u32(row.try_get("perfectStreak")?),
        next_review_at: millis_to_datetime(row.try_get("nextReviewAt")?)?,
        times_seen: to_u32(row.try_get("timesSeen")?),
        times_correct: to_u32(row.try_get("timesCorrect")?),
        times_incorrect: to_u32(row.try_get("timesIncorrect")?),
        last_seen: optional_datetime(row.try_get("lastSeen")?)?,
        last_correct: optional_datetime(row.try_get("lastCorrect")?)?,
        last_incorrect: optional_datetime(row.try_get("lastIncorrect")?)?,
        pronunciation_score: row.try_get("pronunciationScore")?,
        pronunciation_attempts: to_u32(row.try_get("pronunciationAttempts")?),
        recent_mistakes: mistakes,
        recent_contexts: contexts,
        created_at: millis_to_datetime(row.try_get("createdAt")?)?,
        updated_at: millis_to_datetime(row.try_get("updatedAt")?)?,
    })
}

fn map_pronunciation_row(row: &SqliteRow) -> Result<PronunciationRecord, StoreError> {
    let recent: VecDeque<f64> = serde_json::from_str(&row.try_get::<String, _>("recentScores")?)?;
    let trend: String = row.try_get("trend")?;
    Ok(PronunciationRecord {
        learner_id: row.try_get("learnerId")?,
        sound: row.try_get("sound")?,
        current_score: row.try_get("currentScore")?,
        best_score: row.try_get("bestScore")?,
        total_attempts: to_u32(row.try_get("totalAttempts")?),
        recent_scores: recent,
        trend: PronunciationTrend::parse(&trend),
        updated_at: millis_to_datetime(row.try_get("updatedAt")?)?,
    })
}

fn to_u32(value: i64) -> u32 {
    value.clamp(0, u32::MAX as i64) as u32
}

fn millis_to_datetime(ms: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| StoreError::Backend(format!("timestamp out of range: {ms}")))
}

fn optional_datetime(ms: Option<i64>) -> Result<Option<DateTime<Utc>>, StoreError> {
    ms.map(millis_to_datetime).transpose()
}
