use common_http_errors::ApiError;
use tracing::error;
use uuid::Uuid;

use crate::db::DbError;
use crate::queue::QueueError;
use crate::retention::RetentionError;
use crate::storage::StorageError;

/// Strategy table mapping internal error families onto the wire taxonomy.
/// New error types plug in with a new `From` impl; existing mappings never
/// change shape.
impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound => ApiError::not_found("resource"),
            DbError::UniqueViolation(constraint) => ApiError::conflict(
                "unique_violation",
                format!("A conflicting record already exists ({constraint})"),
            ),
            DbError::ForeignKeyViolation(constraint) => ApiError::validation(
                "foreign_key_violation",
                format!("A referenced record does not exist ({constraint})"),
            ),
            DbError::CheckViolation(constraint) => ApiError::validation(
                "check_violation",
                format!("The request violates a data constraint ({constraint})"),
            ),
            DbError::InvalidIdentifier(name) => ApiError::validation(
                "invalid_identifier",
                format!("'{name}' is not a valid identifier"),
            ),
            DbError::InvalidPagination(message) => {
                ApiError::validation("invalid_pagination", message)
            }
            DbError::BatchTooLarge { len, max } => ApiError::validation(
                "batch_too_large",
                format!("batch of {len} rows exceeds the {max} row cap"),
            ),
            DbError::QueryTimeout => {
                ApiError::unavailable("query_timeout", "The database query timed out")
            }
            DbError::PoolExhausted => ApiError::busy(
                "pool_exhausted",
                "All database connections are busy; retry shortly",
            ),
            DbError::Connection(detail) => {
                internal_with_log("database connection failure", &detail)
            }
            DbError::Other(detail) => internal_with_log("database failure", &detail),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(_) => ApiError::not_found("stored object"),
            StorageError::Validation(message) => {
                ApiError::validation("storage_validation", message)
            }
            StorageError::Connection(detail) => ApiError::Storage {
                code: "storage_connection",
                message: "The storage backend is unreachable".into(),
                upstream: true,
            }
            .logged(&detail),
            StorageError::Upload(detail) => ApiError::Storage {
                code: "storage_upload",
                message: "Writing to the storage backend failed".into(),
                upstream: false,
            }
            .logged(&detail),
            StorageError::Io(detail) => internal_with_log("storage i/o failure", &detail),
        }
    }
}

impl From<QueueError> for ApiError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::UnknownQueue(name) => {
                ApiError::validation("unknown_queue", format!("unknown queue '{name}'"))
            }
            QueueError::NotFound => ApiError::not_found("job"),
            QueueError::Connection(detail) => ApiError::unavailable(
                "queue_unavailable",
                "The job queue is unreachable; retry shortly",
            )
            .logged(&detail),
            QueueError::Serialization(detail) => internal_with_log("job serialization", &detail),
        }
    }
}

impl From<RetentionError> for ApiError {
    fn from(err: RetentionError) -> Self {
        match err {
            RetentionError::ConfirmationRequired => ApiError::validation(
                "confirmation_required",
                "Destructive retention apply requires confirm=true",
            ),
            RetentionError::Db(inner) => inner.into(),
            RetentionError::Storage(inner) => inner.into(),
            RetentionError::Queue(inner) => inner.into(),
        }
    }
}

trait Logged {
    fn logged(self, detail: &str) -> Self;
}

impl Logged for ApiError {
    fn logged(self, detail: &str) -> Self {
        error!(code = self.code(), detail, "request failed");
        self
    }
}

fn internal_with_log(context: &str, detail: &str) -> ApiError {
    let (err, error_id) = ApiError::internal();
    error!(%error_id, context, detail, "internal error");
    err
}

/// Log an arbitrary error and return the opaque 500.
pub fn internal_error<E: std::fmt::Display>(context: &str, err: E) -> ApiError {
    let (api_err, error_id) = ApiError::internal();
    error!(%error_id, context, error = %err, "internal error");
    api_err
}

/// Correlates a response error id with server logs in tests.
pub fn error_id_of(err: &ApiError) -> Option<Uuid> {
    match err {
        ApiError::Internal { error_id } => Some(*error_id),
        _ => None,
    }
}
