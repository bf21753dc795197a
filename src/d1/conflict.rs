//! Attributing D1 constraint failures to the row that caused them.
//!
//! SQLite names only the columns of a failed unique constraint. These
//! helpers rewrite such errors into the constraint names and keys the
//! in-process engine reports.

use std::collections::HashSet;

use crate::error::StoreError;
use crate::models::{Entity, FieldDef};

/// Fields of `E` named by a SQLite column list such as
/// `"workspace_id, platform, account_id"`, in column order.
pub fn constraint_fields<E: Entity>(constraint: &str) -> Vec<E::Field> {
    constraint
        .split(',')
        .map(str::trim)
        .filter_map(|column| E::Field::ALL.iter().copied().find(|f| f.column() == column))
        .collect()
}

/// Names constraints and keys after the colliding row.
pub fn with_row_context<E: Entity>(err: StoreError, row: &E) -> StoreError {
    match err {
        StoreError::UniqueViolation {
            model,
            constraint,
            key,
        } if key.is_empty() => {
            if constraint == E::PRIMARY.column() {
                StoreError::UniqueViolation {
                    model,
                    constraint: E::PRIMARY.name().to_string(),
                    key: row.primary_key().to_string(),
                }
            } else if let Some(index) = row.unique_indexes().into_iter().next() {
                StoreError::UniqueViolation {
                    model,
                    constraint: index.constraint.to_string(),
                    key: index.to_string(),
                }
            } else {
                StoreError::UniqueViolation {
                    model,
                    constraint,
                    key,
                }
            }
        }
        StoreError::ForeignKeyViolation { model, field, key } if key.is_empty() => {
            StoreError::ForeignKeyViolation {
                model,
                field,
                key: row.workspace_ref().unwrap_or_default().to_string(),
            }
        }
        other => other,
    }
}

fn key_of<E: Entity>(row: &E, fields: &[E::Field]) -> Vec<String> {
    fields.iter().map(|f| row.get(*f).key_part()).collect()
}

/// First row of a batch that collides on `fields`, either with an earlier
/// row of the same batch or with a stored row. Stored rows whose primary key
/// is in `replaced` are being rewritten by the batch and do not count.
pub fn batch_culprit<'r, E: Entity>(
    fields: &[E::Field],
    rows: &'r [E],
    stored: &[E],
    replaced: &[String],
) -> Option<&'r E> {
    if fields.is_empty() {
        return None;
    }
    let mut taken: HashSet<Vec<String>> = stored
        .iter()
        .filter(|row| !replaced.iter().any(|pk| pk == row.primary_key()))
        .map(|row| key_of(row, fields))
        .collect();
    rows.iter().find(|row| !taken.insert(key_of(*row, fields)))
}

/// Rewrites a batch failure after the row [`batch_culprit`] picks. A foreign
/// key failure is attributed only when every row names the same workspace.
pub fn with_batch_context<E: Entity>(
    err: StoreError,
    rows: &[E],
    stored: &[E],
    replaced: &[String],
) -> StoreError {
    let culprit = match &err {
        StoreError::UniqueViolation {
            constraint, key, ..
        } if key.is_empty() => {
            batch_culprit(&constraint_fields::<E>(constraint), rows, stored, replaced)
        }
        StoreError::ForeignKeyViolation { key, .. } if key.is_empty() => {
            let first = rows.first().map(|row| row.workspace_ref());
            rows.first()
                .filter(|_| rows.iter().all(|row| Some(row.workspace_ref()) == first))
        }
        _ => None,
    };
    match culprit {
        Some(row) => with_row_context(err, row),
        None => err,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        BrandTwin, Connector, ConnectorField, NullableJson, WorkspaceRun, BRAND_TWIN_SNAPSHOT,
        CONNECTOR_PLATFORM_ACCOUNT,
    };
    use chrono::{DateTime, TimeZone, Utc};
    use serde_json::json;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, 12, 0, 0).unwrap()
    }

    fn connector(id: &str, account: &str) -> Connector {
        Connector {
            connector_id: id.into(),
            workspace_id: "w1".into(),
            platform: "meta".into(),
            account_id: account.into(),
            display_name: "Meta Ads".into(),
            status: "active".into(),
            scopes: NullableJson::DbNull,
            last_connected_at: None,
            owner_contact: None,
            credentials_ref: None,
            created_at: at(1),
            updated_at: at(1),
        }
    }

    fn twin(id: &str, brand: &str, day: u32) -> BrandTwin {
        BrandTwin {
            twin_id: id.into(),
            workspace_id: "w1".into(),
            brand_id: brand.into(),
            snapshot_at: at(day),
            brand_data: json!({}),
            quality_score: None,
            created_at: at(1),
        }
    }

    fn run(id: &str, workspace: &str) -> WorkspaceRun {
        WorkspaceRun {
            run_id: id.into(),
            workspace_id: workspace.into(),
            status: "queued".into(),
            started_at: at(1),
            finished_at: None,
            cost_usd: None,
            readiness_score: None,
            results: NullableJson::DbNull,
            created_at: at(1),
        }
    }

    fn sqlite_unique(model: &'static str, columns: &str) -> StoreError {
        StoreError::UniqueViolation {
            model,
            constraint: columns.into(),
            key: String::new(),
        }
    }

    #[test]
    fn column_lists_resolve_to_fields() {
        assert_eq!(
            constraint_fields::<Connector>("workspace_id, platform, account_id"),
            vec![
                ConnectorField::WorkspaceId,
                ConnectorField::Platform,
                ConnectorField::AccountId
            ]
        );
        assert!(constraint_fields::<Connector>("nope").is_empty());
    }

    #[test]
    fn batch_index_collision_with_stored_row_is_named() {
        let batch = vec![connector("c2", "act_2"), connector("c3", "act_1")];
        let stored = vec![connector("c1", "act_1")];
        let err = with_batch_context(
            sqlite_unique(Connector::MODEL, "workspace_id, platform, account_id"),
            &batch,
            &stored,
            &[],
        );
        match err {
            StoreError::UniqueViolation { constraint, key, .. } => {
                assert_eq!(constraint, CONNECTOR_PLATFORM_ACCOUNT);
                assert_eq!(key, "(w1, meta, act_1)");
            }
            other => panic!("expected unique violation, got {other}"),
        }
    }

    #[test]
    fn batch_duplicate_within_the_batch_is_named() {
        let batch = vec![twin("t1", "b1", 2), twin("t2", "b1", 3), twin("t3", "b1", 2)];
        let err = with_batch_context(
            sqlite_unique(BrandTwin::MODEL, "brand_id, snapshot_at"),
            &batch,
            &[],
            &[],
        );
        match err {
            StoreError::UniqueViolation { constraint, key, .. } => {
                assert_eq!(constraint, BRAND_TWIN_SNAPSHOT);
                assert!(key.starts_with("(b1, "));
            }
            other => panic!("expected unique violation, got {other}"),
        }
    }

    #[test]
    fn primary_key_collision_reports_the_field_name() {
        let batch = vec![run("r1", "w1"), run("r2", "w1")];
        let stored = vec![run("r2", "w1")];
        let err = with_batch_context(sqlite_unique(WorkspaceRun::MODEL, "run_id"), &batch, &stored, &[]);
        match err {
            StoreError::UniqueViolation { constraint, key, .. } => {
                assert_eq!(constraint, "runId");
                assert_eq!(key, "r2");
            }
            other => panic!("expected unique violation, got {other}"),
        }
    }

    #[test]
    fn rows_rewritten_by_the_batch_do_not_collide() {
        // c1 moves away from act_1 while c2 moves onto it.
        let batch = vec![connector("c1", "act_9"), connector("c2", "act_1")];
        let stored = vec![connector("c1", "act_1"), connector("c2", "act_2")];
        let fields = constraint_fields::<Connector>("workspace_id, platform, account_id");
        let replaced = vec!["c1".to_string(), "c2".to_string()];
        assert!(batch_culprit(&fields, &batch, &stored, &replaced).is_none());
        let culprit = batch_culprit(&fields, &batch, &stored, &[]).map(|c| c.connector_id.as_str());
        assert_eq!(culprit, Some("c2"));
    }

    #[test]
    fn foreign_key_needs_a_single_workspace() {
        let fk = || StoreError::ForeignKeyViolation {
            model: WorkspaceRun::MODEL,
            field: "workspaceId",
            key: String::new(),
        };
        let same = vec![run("r1", "w9"), run("r2", "w9")];
        assert!(with_batch_context(fk(), &same, &[], &[]).to_string().contains("w9"));

        let mixed = vec![run("r1", "w1"), run("r2", "w9")];
        match with_batch_context(fk(), &mixed, &[], &[]) {
            StoreError::ForeignKeyViolation { key, .. } => assert!(key.is_empty()),
            other => panic!("expected foreign key violation, got {other}"),
        }
    }
}
