use std::fmt;

/// Coarse error category, for callers that only need to branch on the kind
/// of failure ("no such record" vs "would-be duplicate").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    ConstraintViolation,
    Validation,
    Backend,
}

/// Errors produced by the workspace store, regardless of backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A unique-key read (`…_or_throw`), update or delete matched no row.
    NotFound { model: &'static str, key: String },
    /// A write would duplicate a primary key or a compound-unique key.
    UniqueViolation {
        model: &'static str,
        constraint: String,
        key: String,
    },
    /// A child row references a workspace that does not exist.
    ForeignKeyViolation {
        model: &'static str,
        field: &'static str,
        key: String,
    },
    /// Query arguments or record contents break a declared rule.
    Validation { model: &'static str, message: String },
    /// The backing store failed for reasons unrelated to the data.
    Backend(String),
}

impl StoreError {
    pub fn validation(model: &'static str, message: impl Into<String>) -> Self {
        StoreError::Validation {
            model,
            message: message.into(),
        }
    }

    pub fn not_found(model: &'static str, key: impl fmt::Display) -> Self {
        StoreError::NotFound {
            model,
            key: key.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::NotFound { .. } => ErrorKind::NotFound,
            StoreError::UniqueViolation { .. } | StoreError::ForeignKeyViolation { .. } => {
                ErrorKind::ConstraintViolation
            }
            StoreError::Validation { .. } => ErrorKind::Validation,
            StoreError::Backend(_) => ErrorKind::Backend,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn is_constraint_violation(&self) -> bool {
        self.kind() == ErrorKind::ConstraintViolation
    }

    pub fn is_validation(&self) -> bool {
        self.kind() == ErrorKind::Validation
    }

    /// HTTP status used by the worker routes.
    pub fn http_status(&self) -> u16 {
        match self.kind() {
            ErrorKind::NotFound => 404,
            ErrorKind::ConstraintViolation => 409,
            ErrorKind::Validation => 422,
            ErrorKind::Backend => 500,
        }
    }

    /// Classify a SQLite/D1 error message raised while writing `model`.
    pub fn from_backend_message(model: &'static str, message: &str) -> Self {
        if let Some(rest) = message.split("UNIQUE constraint failed:").nth(1) {
            return StoreError::UniqueViolation {
                model,
                constraint: constraint_columns(rest),
                key: String::new(),
            };
        }
        if message.contains("FOREIGN KEY constraint failed") {
            return StoreError::ForeignKeyViolation {
                model,
                field: "workspaceId",
                key: String::new(),
            };
        }
        if let Some(rest) = message.split("CHECK constraint failed:").nth(1) {
            return StoreError::validation(
                model,
                format!("check constraint failed: {}", rest.trim()),
            );
        }
        StoreError::Backend(message.to_string())
    }
}

/// Table named by a SQLite constraint failure, e.g. `connectors` in
/// "UNIQUE constraint failed: connectors.workspace_id, ...".
pub fn failed_table(message: &str) -> Option<&str> {
    let rest = message.split("constraint failed:").nth(1)?;
    let (table, _) = rest.trim().split_once('.')?;
    Some(table.trim())
}

// "connectors.workspace_id, connectors.platform: SQLITE_CONSTRAINT" -> "workspace_id, platform"
fn constraint_columns(rest: &str) -> String {
    let head = rest.split(':').next().unwrap_or(rest);
    head.split(',')
        .map(|col| {
            let col = col.trim();
            col.rsplit('.').next().unwrap_or(col)
        })
        .filter(|col| !col.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::NotFound { model, key } => {
                write!(f, "{model} not found for key {key}")
            }
            StoreError::UniqueViolation {
                model,
                constraint,
                key,
            } => {
                if key.is_empty() {
                    write!(f, "unique constraint ({constraint}) failed on {model}")
                } else {
                    write!(
                        f,
                        "unique constraint ({constraint}) failed on {model}: {key} already exists"
                    )
                }
            }
            StoreError::ForeignKeyViolation { model, field, key } => {
                if key.is_empty() {
                    write!(f, "foreign key {field} on {model} references a missing workspace")
                } else {
                    write!(f, "foreign key {field} on {model} references missing workspace {key}")
                }
            }
            StoreError::Validation { model, message } => {
                write!(f, "invalid {model}: {message}")
            }
            StoreError::Backend(message) => write!(f, "store backend error: {message}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<StoreError> for worker::Error {
    fn from(err: StoreError) -> Self {
        worker::Error::RustError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_separate_missing_from_duplicate() {
        let missing = StoreError::not_found("Connector", "c1");
        let dup = StoreError::UniqueViolation {
            model: "Connector",
            constraint: "workspaceId_platform_accountId".into(),
            key: "w1, meta, acct1".into(),
        };
        assert!(missing.is_not_found());
        assert!(!missing.is_constraint_violation());
        assert!(dup.is_constraint_violation());
        assert_eq!(missing.http_status(), 404);
        assert_eq!(dup.http_status(), 409);
    }

    #[test]
    fn classifies_sqlite_unique_message() {
        let err = StoreError::from_backend_message(
            "Connector",
            "D1_ERROR: UNIQUE constraint failed: connectors.workspace_id, connectors.platform, connectors.account_id: SQLITE_CONSTRAINT",
        );
        match err {
            StoreError::UniqueViolation { constraint, .. } => {
                assert_eq!(constraint, "workspace_id, platform, account_id");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn classifies_foreign_key_and_check_messages() {
        let fk = StoreError::from_backend_message(
            "WorkspaceRun",
            "D1_ERROR: FOREIGN KEY constraint failed: SQLITE_CONSTRAINT",
        );
        assert!(matches!(fk, StoreError::ForeignKeyViolation { .. }));

        let check = StoreError::from_backend_message(
            "ConsentRecord",
            "D1_ERROR: CHECK constraint failed: consent_window",
        );
        assert!(check.is_validation());

        let other = StoreError::from_backend_message("Workspace", "network is down");
        assert_eq!(other.kind(), ErrorKind::Backend);
    }

    #[test]
    fn display_mentions_model_and_key() {
        let err = StoreError::not_found("DecisionCard", "a1");
        assert_eq!(err.to_string(), "DecisionCard not found for key a1");
    }

    #[test]
    fn failing_table_is_read_from_the_message() {
        assert_eq!(
            failed_table("D1_ERROR: UNIQUE constraint failed: brand_twins.brand_id, brand_twins.snapshot_at: SQLITE_CONSTRAINT"),
            Some("brand_twins")
        );
        assert_eq!(failed_table("FOREIGN KEY constraint failed"), None);
        assert_eq!(failed_table("network error"), None);
    }
}
