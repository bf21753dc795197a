//! SQL text and bind parameters for the D1 backend.
//!
//! Reads push only conjuncts whose SQLite semantics match the Rust evaluator
//! exactly (binary string comparison, integer and fixed-width timestamp
//! comparison, NULL checks). Everything else is filtered in Rust after the
//! fetch, so the rendered WHERE clause is always a superset of the answer.

use crate::models::values::format_timestamp;
use crate::models::{Entity, FieldDef, FieldKind, KeyLookup, UniqueKey, Value};
use crate::query::{Condition, Filter, JsonNullKind, TextMode};

/// A bind parameter as D1 sees it.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Null,
    Int(i64),
    Text(String),
}

impl SqlParam {
    /// Storage form of a column value: decimals and timestamps as canonical
    /// text, JSON documents serialized (a stored JSON `null` is the text
    /// `null`, a database NULL stays NULL).
    pub fn encode(value: &Value) -> Self {
        match value {
            Value::Null => SqlParam::Null,
            Value::Int(i) => SqlParam::Int(*i),
            Value::Str(s) => SqlParam::Text(s.clone()),
            Value::Decimal(d) => SqlParam::Text(d.to_string()),
            Value::Timestamp(ts) => SqlParam::Text(format_timestamp(ts)),
            Value::Json(doc) => SqlParam::Text(doc.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

#[derive(Default)]
struct Binder {
    params: Vec<SqlParam>,
}

impl Binder {
    fn bind(&mut self, param: SqlParam) -> String {
        self.params.push(param);
        format!("?{}", self.params.len())
    }

    fn finish(self, sql: String) -> Statement {
        Statement {
            sql,
            params: self.params,
        }
    }
}

// ── Reads ───────────────────────────────────────────────────────

/// `SELECT *` narrowed by the pushable part of `filter`, in primary-key order.
pub fn select<E: Entity>(filter: &Filter<E::Field>) -> Statement {
    let mut binder = Binder::default();
    let mut clauses = Vec::new();
    pushdown(filter, &mut binder, &mut clauses);
    let sql = format!(
        "SELECT * FROM {}{} ORDER BY {} ASC",
        E::TABLE,
        where_clause(&clauses),
        E::PRIMARY.column()
    );
    binder.finish(sql)
}

/// Single-row lookup by primary key or compound-unique key.
pub fn select_unique<E: Entity>(key: &E::Key) -> Statement {
    let mut binder = Binder::default();
    let clauses: Vec<String> = match key.lookup() {
        KeyLookup::Primary(pk) => vec![format!(
            "{} = {}",
            E::PRIMARY.column(),
            binder.bind(SqlParam::Text(pk))
        )],
        KeyLookup::Index(_) => key
            .index_columns()
            .iter()
            .map(|(column, value)| format!("{column} = {}", binder.bind(SqlParam::encode(value))))
            .collect(),
    };
    let sql = format!("SELECT * FROM {}{} LIMIT 1", E::TABLE, where_clause(&clauses));
    binder.finish(sql)
}

/// Stored rows sharing a value of `fields` with any of `rows`.
pub fn colliding<E: Entity>(fields: &[E::Field], rows: &[E]) -> Statement {
    let mut binder = Binder::default();
    let groups: Vec<String> = rows
        .iter()
        .map(|row| {
            let parts: Vec<String> = fields
                .iter()
                .map(|f| format!("{} = {}", f.column(), binder.bind(SqlParam::encode(&row.get(*f)))))
                .collect();
            format!("({})", parts.join(" AND "))
        })
        .collect();
    let sql = format!("SELECT * FROM {} WHERE {}", E::TABLE, groups.join(" OR "));
    binder.finish(sql)
}

/// Child counts of one workspace as a single row; `present` is 0 when the
/// workspace itself does not exist.
pub fn child_counts(workspace_id: &str) -> Statement {
    const CHILDREN: [(&str, &str); 8] = [
        ("workspace_runs", "runs"),
        ("audit_bundles", "audit_bundles"),
        ("connectors", "connectors"),
        ("consent_records", "consent_records"),
        ("brand_twins", "brand_twins"),
        ("decision_cards", "decision_cards"),
        ("simulation_results", "simulation_results"),
        ("asset_fingerprints", "asset_fingerprints"),
    ];
    let columns: Vec<String> = std::iter::once(("workspaces", "present"))
        .chain(CHILDREN)
        .map(|(table, alias)| {
            format!("(SELECT COUNT(*) FROM {table} WHERE workspace_id = ?1) AS {alias}")
        })
        .collect();
    Statement {
        sql: format!("SELECT {}", columns.join(", ")),
        params: vec![SqlParam::Text(workspace_id.to_string())],
    }
}

/// Every child of one workspace, in primary-key order.
pub fn children<E: Entity>(workspace_id: &str) -> Statement {
    Statement {
        sql: format!(
            "SELECT * FROM {} WHERE workspace_id = ?1 ORDER BY {} ASC",
            E::TABLE,
            E::PRIMARY.column()
        ),
        params: vec![SqlParam::Text(workspace_id.to_string())],
    }
}

fn where_clause(clauses: &[String]) -> String {
    if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    }
}

fn pushdown<F: FieldDef>(filter: &Filter<F>, binder: &mut Binder, out: &mut Vec<String>) {
    match filter {
        Filter::And(parts) => {
            for part in parts {
                pushdown(part, binder, out);
            }
        }
        Filter::Field(field, condition) => {
            if let Some(clause) = render(*field, condition, binder) {
                out.push(clause);
            }
        }
        Filter::All | Filter::Or(_) | Filter::Not(_) => {}
    }
}

fn render<F: FieldDef>(field: F, condition: &Condition, binder: &mut Binder) -> Option<String> {
    let col = field.column();
    let kind = field.kind();
    match condition {
        Condition::IsNull
        | Condition::Equals(Value::Null)
        | Condition::JsonNull(JsonNullKind::DbNull) => return Some(format!("{col} IS NULL")),
        Condition::IsNotNull | Condition::NotEquals(Value::Null) => {
            return Some(format!("{col} IS NOT NULL"))
        }
        Condition::JsonNull(JsonNullKind::JsonNull) => return Some(format!("{col} = 'null'")),
        Condition::JsonNull(JsonNullKind::AnyNull) => {
            return Some(format!("({col} IS NULL OR {col} = 'null')"))
        }
        _ => {}
    }
    if !matches!(kind, FieldKind::Str | FieldKind::Int | FieldKind::Timestamp) {
        return None;
    }
    let compare = |op: &str, value: &Value, binder: &mut Binder| {
        scalar(value, kind).map(|p| format!("{col} {op} {}", binder.bind(p)))
    };
    match condition {
        Condition::Equals(v) => compare("=", v, binder),
        Condition::NotEquals(v) => compare("<>", v, binder),
        Condition::Lt(v) => compare("<", v, binder),
        Condition::Lte(v) => compare("<=", v, binder),
        Condition::Gt(v) => compare(">", v, binder),
        Condition::Gte(v) => compare(">=", v, binder),
        Condition::In(values) => {
            if values.is_empty() {
                return Some("0 = 1".to_string());
            }
            let params = values
                .iter()
                .map(|v| scalar(v, kind))
                .collect::<Option<Vec<_>>>()?;
            let slots: Vec<String> = params.into_iter().map(|p| binder.bind(p)).collect();
            Some(format!("{col} IN ({})", slots.join(", ")))
        }
        Condition::NotIn(values) => {
            if values.is_empty() {
                return Some(format!("{col} IS NOT NULL"));
            }
            let params = values
                .iter()
                .map(|v| scalar(v, kind))
                .collect::<Option<Vec<_>>>()?;
            let slots: Vec<String> = params.into_iter().map(|p| binder.bind(p)).collect();
            Some(format!("{col} NOT IN ({})", slots.join(", ")))
        }
        Condition::Contains {
            needle,
            mode: TextMode::Default,
        } if kind == FieldKind::Str => Some(format!(
            "instr({col}, {}) > 0",
            binder.bind(SqlParam::Text(needle.clone()))
        )),
        Condition::StartsWith {
            prefix,
            mode: TextMode::Default,
        } if kind == FieldKind::Str => {
            let len = binder.bind(SqlParam::Int(prefix.chars().count() as i64));
            let text = binder.bind(SqlParam::Text(prefix.clone()));
            Some(format!("substr({col}, 1, {len}) = {text}"))
        }
        Condition::EndsWith {
            suffix,
            mode: TextMode::Default,
        } if kind == FieldKind::Str => {
            if suffix.is_empty() {
                return Some(format!("{col} IS NOT NULL"));
            }
            let start = binder.bind(SqlParam::Int(-(suffix.chars().count() as i64)));
            let text = binder.bind(SqlParam::Text(suffix.clone()));
            Some(format!("substr({col}, {start}) = {text}"))
        }
        _ => None,
    }
}

/// Bind form of a comparison operand, when SQLite compares it the same way
/// Rust does.
fn scalar(value: &Value, kind: FieldKind) -> Option<SqlParam> {
    match (value, kind) {
        (Value::Str(_), FieldKind::Str)
        | (Value::Int(_), FieldKind::Int)
        | (Value::Timestamp(_), FieldKind::Timestamp) => Some(SqlParam::encode(value)),
        _ => None,
    }
}

// ── Writes ──────────────────────────────────────────────────────

/// `INSERT` of every column. With `skip_duplicates` a unique-key collision
/// inserts nothing instead of failing.
pub fn insert<E: Entity>(row: &E, skip_duplicates: bool) -> Statement {
    let mut binder = Binder::default();
    let columns: Vec<&str> = E::Field::ALL.iter().map(|f| f.column()).collect();
    let slots: Vec<String> = E::Field::ALL
        .iter()
        .map(|f| binder.bind(SqlParam::encode(&row.get(*f))))
        .collect();
    let conflict = if skip_duplicates {
        " ON CONFLICT DO NOTHING"
    } else {
        ""
    };
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({}){conflict}",
        E::TABLE,
        columns.join(", "),
        slots.join(", ")
    );
    binder.finish(sql)
}

/// Full-row `UPDATE` of the row currently stored under `old_pk`.
pub fn update<E: Entity>(old_pk: &str, row: &E) -> Statement {
    let mut binder = Binder::default();
    let sets: Vec<String> = E::Field::ALL
        .iter()
        .map(|f| format!("{} = {}", f.column(), binder.bind(SqlParam::encode(&row.get(*f)))))
        .collect();
    let key = binder.bind(SqlParam::Text(old_pk.to_string()));
    let sql = format!(
        "UPDATE {} SET {} WHERE {} = {key}",
        E::TABLE,
        sets.join(", "),
        E::PRIMARY.column()
    );
    binder.finish(sql)
}

pub fn delete<E: Entity>(pk: &str) -> Statement {
    Statement {
        sql: format!("DELETE FROM {} WHERE {} = ?1", E::TABLE, E::PRIMARY.column()),
        params: vec![SqlParam::Text(pk.to_string())],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        Connector, ConnectorField, ConnectorKey, Workspace, WorkspaceField, WorkspaceRun,
        WorkspaceRunField,
    };
    use chrono::{TimeZone, Utc};

    fn text(s: &str) -> SqlParam {
        SqlParam::Text(s.to_string())
    }

    #[test]
    fn unfiltered_select_reads_whole_table_in_key_order() {
        let stmt = select::<Workspace>(&Filter::All);
        assert_eq!(stmt.sql, "SELECT * FROM workspaces ORDER BY workspace_id ASC");
        assert!(stmt.params.is_empty());
    }

    #[test]
    fn exact_conjuncts_are_pushed_down() {
        let since = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let filter = Filter::And(vec![
            Filter::eq(WorkspaceRunField::WorkspaceId, "w1"),
            Filter::field(WorkspaceRunField::StartedAt, Condition::Gte(Value::from(since))),
            Filter::field(WorkspaceRunField::FinishedAt, Condition::IsNull),
        ]);
        let stmt = select::<WorkspaceRun>(&filter);
        assert_eq!(
            stmt.sql,
            "SELECT * FROM workspace_runs WHERE workspace_id = ?1 AND started_at >= ?2 \
             AND finished_at IS NULL ORDER BY run_id ASC"
        );
        assert_eq!(
            stmt.params,
            vec![text("w1"), SqlParam::Text(format_timestamp(&since))]
        );
    }

    #[test]
    fn inexact_conditions_stay_in_rust() {
        let filter = Filter::And(vec![
            Filter::field(WorkspaceRunField::CostUsd, Condition::Gt(Value::Int(5))),
            Filter::field(WorkspaceRunField::Status, Condition::contains("ok").insensitive()),
            Filter::Or(vec![
                Filter::eq(WorkspaceRunField::Status, "done"),
                Filter::eq(WorkspaceRunField::Status, "failed"),
            ]),
        ]);
        let stmt = select::<WorkspaceRun>(&filter);
        assert_eq!(stmt.sql, "SELECT * FROM workspace_runs ORDER BY run_id ASC");
    }

    #[test]
    fn text_matching_avoids_like() {
        let filter = Filter::And(vec![
            Filter::field(ConnectorField::DisplayName, Condition::contains("50%")),
            Filter::field(ConnectorField::Platform, Condition::starts_with("goo")),
            Filter::field(ConnectorField::AccountId, Condition::ends_with("_01")),
        ]);
        let stmt = select::<Connector>(&filter);
        assert_eq!(
            stmt.sql,
            "SELECT * FROM connectors WHERE instr(display_name, ?1) > 0 \
             AND substr(platform, 1, ?2) = ?3 AND substr(account_id, ?4) = ?5 \
             ORDER BY connector_id ASC"
        );
        assert_eq!(
            stmt.params,
            vec![
                text("50%"),
                SqlParam::Int(3),
                text("goo"),
                SqlParam::Int(-3),
                text("_01"),
            ]
        );
    }

    #[test]
    fn json_null_kinds_render_separately() {
        let stmt = select::<Workspace>(&Filter::field(
            WorkspaceField::Goals,
            Condition::JsonNull(JsonNullKind::AnyNull),
        ));
        assert!(stmt.sql.contains("WHERE (goals IS NULL OR goals = 'null')"));
        let stmt = select::<Workspace>(&Filter::field(
            WorkspaceField::Goals,
            Condition::JsonNull(JsonNullKind::JsonNull),
        ));
        assert!(stmt.sql.contains("WHERE goals = 'null'"));
    }

    #[test]
    fn empty_in_matches_nothing() {
        let stmt = select::<Workspace>(&Filter::field(WorkspaceField::TenantId, Condition::In(vec![])));
        assert!(stmt.sql.contains("WHERE 0 = 1"));
    }

    #[test]
    fn compound_key_lookup_binds_each_column() {
        let stmt = select_unique::<Connector>(&ConnectorKey::platform_account("w1", "meta", "a1"));
        assert_eq!(
            stmt.sql,
            "SELECT * FROM connectors WHERE workspace_id = ?1 AND platform = ?2 \
             AND account_id = ?3 LIMIT 1"
        );
        assert_eq!(stmt.params, vec![text("w1"), text("meta"), text("a1")]);

        let stmt = select_unique::<Connector>(&ConnectorKey::from("c1"));
        assert_eq!(stmt.sql, "SELECT * FROM connectors WHERE connector_id = ?1 LIMIT 1");
    }

    #[test]
    fn counts_share_one_parameter() {
        let stmt = child_counts("w1");
        assert!(stmt.sql.starts_with(
            "SELECT (SELECT COUNT(*) FROM workspaces WHERE workspace_id = ?1) AS present, "
        ));
        assert!(stmt
            .sql
            .ends_with("(SELECT COUNT(*) FROM asset_fingerprints WHERE workspace_id = ?1) AS asset_fingerprints"));
        assert_eq!(stmt.sql.matches("?1").count(), 9);
        assert_eq!(stmt.params, vec![text("w1")]);

        let stmt = children::<WorkspaceRun>("w1");
        assert_eq!(
            stmt.sql,
            "SELECT * FROM workspace_runs WHERE workspace_id = ?1 ORDER BY run_id ASC"
        );
    }

    #[test]
    fn values_encode_to_storage_form() {
        assert_eq!(SqlParam::encode(&Value::Null), SqlParam::Null);
        assert_eq!(
            SqlParam::encode(&Value::Json(serde_json::Value::Null)),
            text("null")
        );
        assert_eq!(
            SqlParam::encode(&Value::Json(serde_json::json!({"a": [1, 2]}))),
            text(r#"{"a":[1,2]}"#)
        );
        let dec: rust_decimal::Decimal = "12.50".parse().unwrap();
        assert_eq!(SqlParam::encode(&Value::Decimal(dec)), text("12.50"));
    }

    #[test]
    fn update_targets_the_old_key() {
        let stmt = delete::<Connector>("c9");
        assert_eq!(stmt.sql, "DELETE FROM connectors WHERE connector_id = ?1");

        let now = Utc::now();
        let row = Connector {
            connector_id: "c2".to_string(),
            workspace_id: "w1".to_string(),
            platform: "meta".to_string(),
            account_id: "a1".to_string(),
            display_name: "Meta".to_string(),
            status: "active".to_string(),
            scopes: Default::default(),
            last_connected_at: None,
            owner_contact: None,
            credentials_ref: None,
            created_at: now,
            updated_at: now,
        };
        let stmt = update("c1", &row);
        assert!(stmt.sql.starts_with("UPDATE connectors SET connector_id = ?1, "));
        assert!(stmt.sql.ends_with(" WHERE connector_id = ?13"));
        assert_eq!(stmt.params.len(), 13);
        assert_eq!(stmt.params[0], text("c2"));
        assert_eq!(stmt.params[12], text("c1"));

        let stmt = insert(&row, true);
        assert!(stmt.sql.ends_with("ON CONFLICT DO NOTHING"));
        assert_eq!(stmt.params[6], SqlParam::Null);
    }

    #[test]
    fn colliding_rows_are_matched_on_every_constraint_column() {
        let now = Utc::now();
        let row = |id: &str, account: &str| Connector {
            connector_id: id.to_string(),
            workspace_id: "w1".to_string(),
            platform: "meta".to_string(),
            account_id: account.to_string(),
            display_name: "Meta".to_string(),
            status: "active".to_string(),
            scopes: Default::default(),
            last_connected_at: None,
            owner_contact: None,
            credentials_ref: None,
            created_at: now,
            updated_at: now,
        };
        let fields = [
            ConnectorField::WorkspaceId,
            ConnectorField::Platform,
            ConnectorField::AccountId,
        ];
        let stmt = colliding(&fields, &[row("c1", "a1"), row("c2", "a2")]);
        assert_eq!(
            stmt.sql,
            "SELECT * FROM connectors WHERE (workspace_id = ?1 AND platform = ?2 AND account_id = ?3) \
             OR (workspace_id = ?4 AND platform = ?5 AND account_id = ?6)"
        );
        assert_eq!(stmt.params[5], text("a2"));
    }

    const SCHEMA: &str = include_str!("../../migrations/0001_workspace_store.sql");

    #[test]
    fn schema_leaves_domain_invariants_to_validation() {
        use crate::models::DecisionCard;

        assert!(!SCHEMA.contains("CHECK"));

        // A half-approved card passes relaxed validation and is written as-is.
        let now = Utc::now();
        let card = DecisionCard {
            action_id: "a1".to_string(),
            workspace_id: "w1".to_string(),
            title: "Raise budget".to_string(),
            one_line: "Shift spend".to_string(),
            readiness_score: rust_decimal::Decimal::from(80),
            expires_at: now,
            status: "pending".to_string(),
            approved_by: Some("lead@example.com".to_string()),
            approved_at: None,
            card_data: serde_json::json!({}),
            created_at: now,
        };
        assert!(card.validate(false).is_ok());
        assert!(card.validate(true).is_err());
        let stmt = update("a1", &card);
        assert!(stmt.params.contains(&text("lead@example.com")));
        assert!(stmt.sql.contains("approved_at = ?9"));
        assert_eq!(stmt.params[8], SqlParam::Null);
    }
}
