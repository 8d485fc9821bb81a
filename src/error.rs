use anyhow::anyhow;

pub type Result<T> = std::result::Result<T, LibError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Database,
    InvalidInput,
    NotFound,
    Unauthorized,
    DepthExceeded,
    InvalidReparent,
    HasChildren,
    Conflict,
    /// The search mirror write failed after the primary store committed.
    /// The primary-store state is final; only the mirror is stale.
    SyncFailure,
    Unknown,
}

#[derive(Debug)]
pub struct LibError {
    pub kind: ErrorKind,
    pub code: &'static str,
    pub public: &'static str,
    pub source: anyhow::Error,
}

impl LibError {
    pub fn database(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::Database,
            code: "database_error",
            public,
            source,
        }
    }

    pub fn invalid(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::InvalidInput,
            code: "invalid_input",
            public,
            source,
        }
    }

    pub fn not_found(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::NotFound,
            code: "not_found",
            public,
            source,
        }
    }

    pub fn unauthorized(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::Unauthorized,
            code: "unauthorized",
            public,
            source,
        }
    }

    pub fn depth_exceeded(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::DepthExceeded,
            code: "depth_exceeded",
            public,
            source,
        }
    }

    pub fn invalid_reparent(
        code: &'static str,
        public: &'static str,
        source: anyhow::Error,
    ) -> Self {
        Self {
            kind: ErrorKind::InvalidReparent,
            code,
            public,
            source,
        }
    }

    pub fn has_children(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::HasChildren,
            code: "has_children",
            public,
            source,
        }
    }

    pub fn conflict(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::Conflict,
            code: "conflict",
            public,
            source,
        }
    }

    pub fn sync(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::SyncFailure,
            code: "sync_failure",
            public,
            source,
        }
    }

    pub fn unknown(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::Unknown,
            code: "unknown_error",
            public,
            source,
        }
    }

    pub fn message(public: &'static str) -> Self {
        Self::unknown(public, anyhow!(public))
    }

    /// Re-tags an error from the search index as a mirror-write failure so
    /// callers can tell it apart from primary-store errors.
    pub fn into_sync_failure(self, public: &'static str) -> Self {
        Self {
            kind: ErrorKind::SyncFailure,
            code: "sync_failure",
            public,
            source: self.source,
        }
    }
}

impl std::fmt::Display for LibError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.public)
    }
}

impl std::error::Error for LibError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

#[cfg(feature = "sqlx")]
impl From<sqlx::Error> for LibError {
    fn from(value: sqlx::Error) -> Self {
        Self::database("Database request failed", anyhow!(value))
    }
}
