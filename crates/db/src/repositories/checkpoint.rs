use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{sqlite::SqliteRow, Row};
use tracing::debug;

use toolgate_core::domain::{Checkpoint, ConversationState, ThreadId};

use super::{CheckpointStore, RepositoryError};
use crate::DbPool;

pub struct SqlCheckpointStore {
    pool: DbPool,
}

impl SqlCheckpointStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl CheckpointStore for SqlCheckpointStore {
    async fn load(&self, thread_id: &ThreadId) -> Result<Option<Checkpoint>, RepositoryError> {
        let row = sqlx::query(
            "SELECT thread_id, sequence_number, state_json, created_at
             FROM conversation_checkpoint
             WHERE thread_id = ?
             ORDER BY sequence_number DESC
             LIMIT 1",
        )
        .bind(thread_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(checkpoint_from_row).transpose()
    }

    async fn save(
        &self,
        thread_id: &ThreadId,
        expected_sequence: u64,
        state: &ConversationState,
    ) -> Result<Checkpoint, RepositoryError> {
        let state_json = serde_json::to_string(state).map_err(|error| {
            RepositoryError::Decode(format!("could not encode conversation state: {error}"))
        })?;
        let expected = encode_sequence(expected_sequence)?;
        let sequence_number = expected_sequence + 1;
        let created_at = Utc::now();

        // Appends only while `expected` is still the thread's latest sequence number. A racing
        // writer either fails the guard (no row inserted) or trips the primary key.
        let inserted = sqlx::query(
            "INSERT INTO conversation_checkpoint (thread_id, sequence_number, state_json, created_at)
             SELECT ?, ?, ?, ?
             WHERE (
                 SELECT COALESCE(MAX(sequence_number), 0)
                 FROM conversation_checkpoint
                 WHERE thread_id = ?
             ) = ?",
        )
        .bind(thread_id.as_str())
        .bind(expected + 1)
        .bind(&state_json)
        .bind(created_at.to_rfc3339_opts(SecondsFormat::Micros, true))
        .bind(thread_id.as_str())
        .bind(expected)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            let conflict = matches!(
                &error,
                sqlx::Error::Database(database) if database.is_unique_violation()
            );
            if conflict {
                RepositoryError::SequenceConflict(thread_id.clone())
            } else {
                RepositoryError::Database(error)
            }
        })?;

        if inserted.rows_affected() == 0 {
            debug!(
                event_name = "db.checkpoint.conflict",
                thread_id = %thread_id,
                expected_sequence,
                "stale checkpoint write rejected"
            );
            return Err(RepositoryError::SequenceConflict(thread_id.clone()));
        }

        debug!(
            event_name = "db.checkpoint.saved",
            thread_id = %thread_id,
            sequence_number,
            phase = state.phase.as_str(),
            "checkpoint committed"
        );

        Ok(Checkpoint { thread_id: thread_id.clone(), sequence_number, state: state.clone(), created_at })
    }

    async fn list_threads(&self) -> Result<Vec<ThreadId>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT thread_id, MAX(created_at) AS updated_at
             FROM conversation_checkpoint
             GROUP BY thread_id
             ORDER BY updated_at DESC, thread_id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| Ok(ThreadId(row.try_get::<String, _>("thread_id")?)))
            .collect()
    }

    async fn history(&self, thread_id: &ThreadId) -> Result<Vec<Checkpoint>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT thread_id, sequence_number, state_json, created_at
             FROM conversation_checkpoint
             WHERE thread_id = ?
             ORDER BY sequence_number ASC",
        )
        .bind(thread_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(checkpoint_from_row).collect()
    }
}

fn checkpoint_from_row(row: SqliteRow) -> Result<Checkpoint, RepositoryError> {
    let thread_id = ThreadId(row.try_get("thread_id")?);
    let state_json = row.try_get::<String, _>("state_json")?;
    let state = serde_json::from_str::<ConversationState>(&state_json).map_err(|error| {
        RepositoryError::Decode(format!("invalid state_json for thread `{thread_id}`: {error}"))
    })?;

    Ok(Checkpoint {
        sequence_number: decode_sequence(row.try_get("sequence_number")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        thread_id,
        state,
    })
}

fn encode_sequence(value: u64) -> Result<i64, RepositoryError> {
    i64::try_from(value)
        .map_err(|_| RepositoryError::Decode(format!("sequence_number `{value}` out of range")))
}

fn decode_sequence(value: i64) -> Result<u64, RepositoryError> {
    u64::try_from(value)
        .map_err(|_| RepositoryError::Decode(format!("negative sequence_number `{value}`")))
}

fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

#[cfg(test)]
mod tests {
    use toolgate_core::domain::{AssistantMessage, ConversationState, ThreadId};
    use toolgate_core::flows::FlowState;

    use super::SqlCheckpointStore;
    use crate::migrations;
    use crate::repositories::{CheckpointStore, RepositoryError};
    use crate::{connect_with_settings, DbPool};

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    fn state_with(text: &str, phase: FlowState) -> ConversationState {
        let mut state = ConversationState::new(true);
        state.push_user_message(text);
        state.phase = phase;
        state
    }

    #[tokio::test]
    async fn save_assigns_increasing_sequence_numbers() {
        let store = SqlCheckpointStore::new(setup_pool().await);
        let thread = ThreadId::new("chat_1");

        let first = store.save(&thread, 0, &state_with("hi", FlowState::IntentFiltering)).await.expect("save 1");
        let second = store.save(&thread, 1, &state_with("hi", FlowState::Responding)).await.expect("save 2");
        let other = store
            .save(&ThreadId::new("chat_2"), 0, &state_with("yo", FlowState::Idle))
            .await
            .expect("save other");

        assert_eq!(first.sequence_number, 1);
        assert_eq!(second.sequence_number, 2);
        assert_eq!(other.sequence_number, 1);
    }

    #[tokio::test]
    async fn load_reads_latest_snapshot() {
        let store = SqlCheckpointStore::new(setup_pool().await);
        let thread = ThreadId::new("chat_1");

        store.save(&thread, 0, &state_with("hi", FlowState::Responding)).await.expect("save");
        let mut done = state_with("hi", FlowState::Done);
        done.push(AssistantMessage::final_answer("hello"));
        store.save(&thread, 1, &done).await.expect("save done");

        let loaded = store.load(&thread).await.expect("load").expect("checkpoint exists");
        assert_eq!(loaded.sequence_number, 2);
        assert_eq!(loaded.state, done);
        assert_eq!(loaded.state.title.as_deref(), Some("hi"));
    }

    #[tokio::test]
    async fn unknown_thread_loads_none() {
        let store = SqlCheckpointStore::new(setup_pool().await);
        assert!(store.load(&ThreadId::new("missing")).await.expect("load").is_none());
        assert!(store.history(&ThreadId::new("missing")).await.expect("history").is_empty());
    }

    #[tokio::test]
    async fn history_is_append_only_and_ascending() {
        let store = SqlCheckpointStore::new(setup_pool().await);
        let thread = ThreadId::new("chat_1");
        for (expected, phase) in
            [FlowState::IntentFiltering, FlowState::Responding, FlowState::Done].into_iter().enumerate()
        {
            store.save(&thread, expected as u64, &state_with("hi", phase)).await.expect("save");
        }

        let history = store.history(&thread).await.expect("history");
        let phases = history.iter().map(|checkpoint| checkpoint.state.phase).collect::<Vec<_>>();
        assert_eq!(phases, vec![FlowState::IntentFiltering, FlowState::Responding, FlowState::Done]);
        assert_eq!(history.iter().map(|c| c.sequence_number).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn list_threads_returns_each_thread_once() {
        let store = SqlCheckpointStore::new(setup_pool().await);
        for (thread, expected) in [("a", 0), ("b", 0), ("a", 1)] {
            store.save(&ThreadId::new(thread), expected, &state_with("hi", FlowState::Idle)).await.expect("save");
        }

        let mut threads = store.list_threads().await.expect("list");
        threads.sort();
        assert_eq!(threads, vec![ThreadId::new("a"), ThreadId::new("b")]);
    }

    #[tokio::test]
    async fn stale_writer_conflicts_without_touching_history() {
        let store = SqlCheckpointStore::new(setup_pool().await);
        let thread = ThreadId::new("chat_1");
        store.save(&thread, 0, &state_with("hi", FlowState::SuspendedForApproval)).await.expect("save");
        store.save(&thread, 1, &state_with("hi", FlowState::Executing)).await.expect("winner");

        let stale = store.save(&thread, 1, &state_with("hi", FlowState::Done)).await;
        assert!(matches!(stale, Err(RepositoryError::SequenceConflict(ref conflicted)) if conflicted == &thread));

        let ahead = store.save(&thread, 7, &state_with("hi", FlowState::Done)).await;
        assert!(matches!(ahead, Err(RepositoryError::SequenceConflict(_))));

        let latest = store.load(&thread).await.expect("load").expect("checkpoint");
        assert_eq!(latest.sequence_number, 2);
        assert_eq!(latest.state.phase, FlowState::Executing);
        assert_eq!(store.history(&thread).await.expect("history").len(), 2);
    }

    #[tokio::test]
    async fn corrupt_state_surfaces_as_decode_error() {
        let pool = setup_pool().await;
        sqlx::query(
            "INSERT INTO conversation_checkpoint (thread_id, sequence_number, state_json, created_at)
             VALUES ('broken', 1, '{not json', '2026-01-01T00:00:00Z')",
        )
        .execute(&pool)
        .await
        .expect("insert corrupt row");

        let store = SqlCheckpointStore::new(pool);
        let error = store.load(&ThreadId::new("broken")).await.expect_err("decode must fail");
        assert!(matches!(error, RepositoryError::Decode(ref message) if message.contains("broken")));
    }
}
