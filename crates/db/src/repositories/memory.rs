use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::RwLock;

use toolgate_core::domain::{Checkpoint, ConversationState, ThreadId};

use super::{CheckpointStore, RepositoryError};

/// Process-local store; history is lost on exit.
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    threads: RwLock<HashMap<ThreadId, Vec<Checkpoint>>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn load(&self, thread_id: &ThreadId) -> Result<Option<Checkpoint>, RepositoryError> {
        let threads = self.threads.read().await;
        Ok(threads.get(thread_id).and_then(|history| history.last()).cloned())
    }

    async fn save(
        &self,
        thread_id: &ThreadId,
        expected_sequence: u64,
        state: &ConversationState,
    ) -> Result<Checkpoint, RepositoryError> {
        let mut threads = self.threads.write().await;
        let history = threads.entry(thread_id.clone()).or_default();
        let latest = history.last().map_or(0, |checkpoint| checkpoint.sequence_number);
        if latest != expected_sequence {
            return Err(RepositoryError::SequenceConflict(thread_id.clone()));
        }
        let checkpoint = Checkpoint {
            thread_id: thread_id.clone(),
            sequence_number: expected_sequence + 1,
            state: state.clone(),
            created_at: Utc::now(),
        };
        history.push(checkpoint.clone());
        Ok(checkpoint)
    }

    async fn list_threads(&self) -> Result<Vec<ThreadId>, RepositoryError> {
        let threads = self.threads.read().await;
        let mut entries = threads
            .iter()
            .filter_map(|(thread_id, history)| {
                history.last().map(|latest| (latest.created_at, thread_id.clone()))
            })
            .collect::<Vec<_>>();
        entries.sort_by(|left, right| right.0.cmp(&left.0).then_with(|| left.1.cmp(&right.1)));
        Ok(entries.into_iter().map(|(_, thread_id)| thread_id).collect())
    }

    async fn history(&self, thread_id: &ThreadId) -> Result<Vec<Checkpoint>, RepositoryError> {
        let threads = self.threads.read().await;
        Ok(threads.get(thread_id).cloned().unwrap_or_default())
    }
}
