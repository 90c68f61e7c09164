/// Terminal engine failures. Nothing here is retried internally — a caller
/// that wants another allocation attempt re-runs the whole operation.
#[derive(Debug)]
pub enum EngineError {
    /// A referenced entity does not exist.
    NotFound { entity: &'static str, id: String },
    /// A business-rule violation: `already_parked`, `no_available_slots`,
    /// `paid`, `invalid_entry_id`, ...
    BadRequest(&'static str),
    /// Storage failure, propagated unchanged.
    Wal(String),
}

impl EngineError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        EngineError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Status code the transport boundary maps this error to.
    pub fn status(&self) -> u16 {
        match self {
            EngineError::NotFound { .. } => 404,
            EngineError::BadRequest(_) => 400,
            EngineError::Wal(_) => 500,
        }
    }

    /// Short machine-readable reason for wire responses.
    pub fn reason(&self) -> &str {
        match self {
            EngineError::NotFound { .. } => "not_found",
            EngineError::BadRequest(reason) => reason,
            EngineError::Wal(_) => "internal",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            EngineError::BadRequest(reason) => write!(f, "bad request: {reason}"),
            EngineError::Wal(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
