use async_trait::async_trait;
use thiserror::Error;

use toolgate_core::domain::{Checkpoint, ConversationState, ThreadId};

pub mod checkpoint;
pub mod memory;

pub use checkpoint::SqlCheckpointStore;
pub use memory::InMemoryCheckpointStore;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("concurrent checkpoint write for thread `{0}`")]
    SequenceConflict(ThreadId),
}

/// Durable, append-only storage of conversation snapshots keyed by thread.
///
/// `save` is a compare-and-swap: it appends sequence number `expected_sequence + 1` only while
/// `expected_sequence` is still the latest one for the thread (0 for a thread with no
/// checkpoints). A writer holding a stale snapshot gets [`RepositoryError::SequenceConflict`]
/// and history is left untouched. A committed `save` is observed by every later `load`.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Latest checkpoint of the thread, or `None` when the thread is unknown.
    async fn load(&self, thread_id: &ThreadId) -> Result<Option<Checkpoint>, RepositoryError>;

    async fn save(
        &self,
        thread_id: &ThreadId,
        expected_sequence: u64,
        state: &ConversationState,
    ) -> Result<Checkpoint, RepositoryError>;

    /// Known threads, most recently updated first.
    async fn list_threads(&self) -> Result<Vec<ThreadId>, RepositoryError>;

    /// Every checkpoint of the thread in ascending sequence order.
    async fn history(&self, thread_id: &ThreadId) -> Result<Vec<Checkpoint>, RepositoryError>;
}
