use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{message}")]
    BadParams {
        message: String,
        details: Option<serde_json::Value>,
    },
    #[error("{message}")]
    NotFound { message: String },
    #[error("select a workspace first")]
    NoWorkspace,
    #[error("{source}")]
    Storage {
        table: Option<&'static str>,
        #[source]
        source: rusqlite::Error,
    },
    #[error("object store: {message}")]
    ObjectStore { message: String },
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0:#}")]
    Workspace(anyhow::Error),
    #[error("{0:#}")]
    Bundle(anyhow::Error),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

impl ServiceError {
    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::BadParams {
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params_with(message: impl Into<String>, details: serde_json::Value) -> Self {
        Self::BadParams {
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn object_store(message: impl Into<String>) -> Self {
        Self::ObjectStore {
            message: message.into(),
        }
    }

    pub fn storage_in(table: &'static str) -> impl FnOnce(rusqlite::Error) -> Self {
        move |source| Self::Storage {
            table: Some(table),
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Stable wire code for the IPC error object.
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadParams { .. } => "bad_params",
            Self::NotFound { .. } => "not_found",
            Self::NoWorkspace => "no_workspace",
            Self::Storage { .. } => "db_query_failed",
            Self::ObjectStore { .. } => "object_store_failed",
            Self::Io(_) | Self::Bundle(_) => "io_failed",
            Self::Workspace(_) => "db_open_failed",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::BadParams { details, .. } => details.clone(),
            Self::Storage {
                table: Some(table), ..
            } => Some(json!({ "table": table })),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for ServiceError {
    fn from(source: rusqlite::Error) -> Self {
        Self::Storage {
            table: None,
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(ServiceError::bad_params("x").code(), "bad_params");
        assert_eq!(ServiceError::not_found("x").code(), "not_found");
        assert_eq!(ServiceError::NoWorkspace.code(), "no_workspace");
        assert_eq!(ServiceError::object_store("x").code(), "object_store_failed");
        let storage: ServiceError = rusqlite::Error::QueryReturnedNoRows.into();
        assert_eq!(storage.code(), "db_query_failed");
    }

    #[test]
    fn storage_errors_name_their_table() {
        let e = ServiceError::storage_in("behavior_entries")(rusqlite::Error::QueryReturnedNoRows);
        assert_eq!(e.details(), Some(json!({ "table": "behavior_entries" })));
        assert!(!e.is_not_found());
    }
}
