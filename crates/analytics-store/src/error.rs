//! Error taxonomy for the time-series store gateway.

/// Errors surfaced by [`crate::StoreGateway`]. Distinct from
/// [`analytics_core::AnalyticsError`] because the gateway needs to
/// distinguish pool exhaustion, statement timeouts, and rolled-back
/// transactions for the worker's retry decisions.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("connection pool exhausted")]
    PoolExhausted,

    #[error("query failed: {message}")]
    QueryFailed { message: String },

    #[error("statement exceeded its timeout")]
    StatementTimeout,

    #[error("transaction rolled back: {message}")]
    TransactionRolledBack { message: String },

    #[error("migration failed: {message}")]
    MigrationFailed { message: String },
}

impl StoreError {
    /// Whether the worker should retry the batch by re-pushing it to the
    /// queue. Pool exhaustion and timeouts are transient; a rolled-back
    /// transaction from bad data would fail identically on retry, but since
    /// the batch was already validated before insertion, any rollback here
    /// is treated as transient infrastructure trouble rather than a data
    /// problem.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::MigrationFailed { .. })
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut => Self::PoolExhausted,
            sqlx::Error::PoolClosed => Self::PoolExhausted,
            _ => {
                let message = err.to_string();
                if message.to_lowercase().contains("statement timeout") {
                    Self::StatementTimeout
                } else {
                    Self::QueryFailed { message }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migration_failure_is_the_only_permanent_variant() {
        assert!(!StoreError::MigrationFailed { message: "x".into() }.is_transient());
        assert!(StoreError::PoolExhausted.is_transient());
        assert!(StoreError::QueryFailed { message: "x".into() }.is_transient());
        assert!(StoreError::StatementTimeout.is_transient());
    }
}
