//! Worker-level error taxonomy, thin wrappers over the queue and store
//! crates' own error types.

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("queue error: {0}")]
    Queue(#[from] analytics_queue::QueueError),

    #[error("store error: {0}")]
    Store(#[from] analytics_store::StoreError),
}
