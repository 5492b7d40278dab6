/// Failure raised by a persistence collaborator.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The database rejected or failed the query.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored row could not be mapped back into its domain type.
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}
