//! Row selection: filter matching, ordering, distinct and cursor windows.

use std::cmp::Ordering;
use std::collections::HashSet;

use super::{Condition, FindArgs, Filter, JsonNullKind, NullsOrder, OrderBy, SortOrder, TextMode};
use crate::error::StoreError;
use crate::models::{Entity, FieldDef, FieldKind, UniqueKey, Value};

// ── Validation ──────────────────────────────────────────────────

/// Rejects conditions that cannot apply to the field's storage kind.
pub fn validate_condition<F: FieldDef>(
    model: &'static str,
    field: F,
    condition: &Condition,
) -> Result<(), StoreError> {
    validate_condition_on(model, field.name(), field.kind(), condition)
}

/// Same check against a value of `kind`, named `target` in errors.
pub fn validate_condition_on(
    model: &'static str,
    target: &str,
    kind: FieldKind,
    condition: &Condition,
) -> Result<(), StoreError> {
    let reject = |what: &str| -> Result<(), StoreError> {
        Err(StoreError::validation(
            model,
            format!("{what} is not supported on {} field {target}", kind_name(kind)),
        ))
    };
    let check_value = |value: &Value| -> Result<(), StoreError> {
        if value.fits(kind) {
            Ok(())
        } else {
            Err(StoreError::validation(
                model,
                format!("value {value:?} does not fit {} field {target}", kind_name(kind)),
            ))
        }
    };

    match condition {
        Condition::Equals(v) | Condition::NotEquals(v) => check_value(v),
        Condition::In(values) | Condition::NotIn(values) => values.iter().try_for_each(check_value),
        Condition::Lt(v) | Condition::Lte(v) | Condition::Gt(v) | Condition::Gte(v) => {
            if !kind.is_orderable() {
                return reject("range comparison");
            }
            if v.is_null() {
                return Err(StoreError::validation(
                    model,
                    format!("range comparison on {target} needs a non-null value"),
                ));
            }
            check_value(v)
        }
        Condition::Contains { .. } | Condition::StartsWith { .. } | Condition::EndsWith { .. } => {
            if kind == FieldKind::Str {
                Ok(())
            } else {
                reject("text matching")
            }
        }
        Condition::IsNull | Condition::IsNotNull => Ok(()),
        Condition::JsonNull(_)
        | Condition::JsonEquals(_)
        | Condition::JsonPath { .. }
        | Condition::JsonArrayContains(_)
        | Condition::JsonStringContains { .. } => {
            if kind == FieldKind::Json {
                Ok(())
            } else {
                reject("JSON filtering")
            }
        }
    }
}

pub fn validate_filter<F: FieldDef>(model: &'static str, filter: &Filter<F>) -> Result<(), StoreError> {
    match filter {
        Filter::All => Ok(()),
        Filter::And(items) | Filter::Or(items) => {
            items.iter().try_for_each(|item| validate_filter(model, item))
        }
        Filter::Not(inner) => validate_filter(model, inner),
        Filter::Field(field, condition) => validate_condition(model, *field, condition),
    }
}

pub fn validate_order<F: FieldDef>(model: &'static str, order: &[OrderBy<F>]) -> Result<(), StoreError> {
    for key in order {
        if !key.field.kind().is_orderable() {
            return Err(StoreError::validation(
                model,
                format!("cannot order by JSON field {}", key.field.name()),
            ));
        }
    }
    Ok(())
}

fn kind_name(kind: FieldKind) -> &'static str {
    match kind {
        FieldKind::Str => "string",
        FieldKind::Int => "integer",
        FieldKind::Decimal => "decimal",
        FieldKind::Timestamp => "timestamp",
        FieldKind::Json => "JSON",
    }
}

// ── Matching ────────────────────────────────────────────────────

pub fn matches<E: Entity>(row: &E, filter: &Filter<E::Field>) -> bool {
    match filter {
        Filter::All => true,
        Filter::And(items) => items.iter().all(|item| matches(row, item)),
        Filter::Or(items) => items.iter().any(|item| matches(row, item)),
        Filter::Not(inner) => !matches(row, inner),
        Filter::Field(field, condition) => condition_matches(&row.get(*field), condition),
    }
}

/// Evaluates one condition against a column value with SQL NULL semantics:
/// apart from the null checks, a NULL column matches nothing.
pub fn condition_matches(value: &Value, condition: &Condition) -> bool {
    match condition {
        Condition::IsNull => return value.is_null(),
        Condition::IsNotNull => return !value.is_null(),
        Condition::JsonNull(kind) => {
            return match kind {
                JsonNullKind::DbNull => value.is_null(),
                JsonNullKind::JsonNull => matches!(value, Value::Json(serde_json::Value::Null)),
                JsonNullKind::AnyNull => {
                    value.is_null() || matches!(value, Value::Json(serde_json::Value::Null))
                }
            }
        }
        Condition::Equals(Value::Null) => return value.is_null(),
        Condition::NotEquals(Value::Null) => return !value.is_null(),
        _ => {}
    }
    if value.is_null() {
        return false;
    }

    match condition {
        Condition::Equals(expected) => value.same_as(expected),
        Condition::NotEquals(expected) => !value.same_as(expected),
        Condition::In(values) => values.iter().any(|v| value.same_as(v)),
        Condition::NotIn(values) => !values.iter().any(|v| value.same_as(v)),
        Condition::Lt(bound) => value.compare(bound) == Some(Ordering::Less),
        Condition::Lte(bound) => matches!(
            value.compare(bound),
            Some(Ordering::Less | Ordering::Equal)
        ),
        Condition::Gt(bound) => value.compare(bound) == Some(Ordering::Greater),
        Condition::Gte(bound) => matches!(
            value.compare(bound),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        Condition::Contains { needle, mode } => {
            text_matches(value, needle, *mode, |hay, n| hay.contains(n))
        }
        Condition::StartsWith { prefix, mode } => {
            text_matches(value, prefix, *mode, |hay, n| hay.starts_with(n))
        }
        Condition::EndsWith { suffix, mode } => {
            text_matches(value, suffix, *mode, |hay, n| hay.ends_with(n))
        }
        Condition::JsonEquals(expected) => json_of(value) == Some(expected),
        Condition::JsonPath { path, equals } => json_of(value)
            .and_then(|doc| json_at(doc, path))
            .is_some_and(|found| found == equals),
        Condition::JsonArrayContains(expected) => {
            match json_of(value) {
                Some(serde_json::Value::Array(items)) => match expected {
                    serde_json::Value::Array(wanted) => wanted.iter().all(|w| items.contains(w)),
                    single => items.contains(single),
                },
                _ => false,
            }
        }
        Condition::JsonStringContains { path, needle } => json_of(value)
            .and_then(|doc| json_at(doc, path))
            .and_then(serde_json::Value::as_str)
            .is_some_and(|s| s.contains(needle.as_str())),
        // Non-null from here on.
        Condition::IsNull | Condition::JsonNull(_) => false,
        Condition::IsNotNull => true,
    }
}

fn text_matches(value: &Value, pattern: &str, mode: TextMode, test: impl Fn(&str, &str) -> bool) -> bool {
    let Some(hay) = value.as_str() else {
        return false;
    };
    match mode {
        TextMode::Default => test(hay, pattern),
        TextMode::Insensitive => test(&hay.to_lowercase(), &pattern.to_lowercase()),
    }
}

fn json_of(value: &Value) -> Option<&serde_json::Value> {
    match value {
        Value::Json(doc) => Some(doc),
        _ => None,
    }
}

/// Walks object keys and array indexes; an empty path is the document itself.
pub fn json_at<'a>(doc: &'a serde_json::Value, path: &[String]) -> Option<&'a serde_json::Value> {
    path.iter().try_fold(doc, |node, segment| match node {
        serde_json::Value::Object(map) => map.get(segment),
        serde_json::Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

// ── Ordering ────────────────────────────────────────────────────

/// Compares two column values for one ordering key. NULL placement does not
/// flip with the direction.
pub fn compare_for_order(a: &Value, b: &Value, order: SortOrder, nulls: NullsOrder) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => match nulls {
            NullsOrder::First => Ordering::Less,
            NullsOrder::Last => Ordering::Greater,
        },
        (false, true) => match nulls {
            NullsOrder::First => Ordering::Greater,
            NullsOrder::Last => Ordering::Less,
        },
        (false, false) => {
            let ord = a.compare(b).unwrap_or(Ordering::Equal);
            match order {
                SortOrder::Asc => ord,
                SortOrder::Desc => ord.reverse(),
            }
        }
    }
}

/// Sorts by the given keys, breaking ties on the primary key ascending.
pub fn sort_rows<E: Entity>(rows: &mut [&E], order: &[OrderBy<E::Field>]) {
    rows.sort_by(|a, b| {
        for key in order {
            let ord = compare_for_order(
                &a.get(key.field),
                &b.get(key.field),
                key.order,
                key.effective_nulls(),
            );
            if ord != Ordering::Equal {
                return ord;
            }
        }
        a.primary_key().cmp(b.primary_key())
    });
}

// ── Selection ───────────────────────────────────────────────────

/// Keeps the first row of each distinct tuple, preserving order.
pub fn distinct_rows<'a, E: Entity>(rows: Vec<&'a E>, fields: &[E::Field]) -> Vec<&'a E> {
    if fields.is_empty() {
        return rows;
    }
    let mut seen = HashSet::new();
    rows.into_iter()
        .filter(|row| {
            let tuple: Vec<String> = fields.iter().map(|f| row.get(*f).key_part()).collect();
            seen.insert(tuple)
        })
        .collect()
}

/// Applies cursor, skip and take to an ordered row list.
///
/// With a negative `take`, the window ends at the cursor (inclusive) or at
/// the end of the list, `skip` counts backwards from there, and the rows keep
/// their original order. An unknown cursor yields nothing.
pub fn window<'a, E: Entity>(
    rows: Vec<&'a E>,
    cursor: Option<&E::Key>,
    take: Option<i64>,
    skip: u64,
) -> Vec<&'a E> {
    let skip = usize::try_from(skip).unwrap_or(usize::MAX);
    let anchor = match cursor {
        Some(key) => {
            let lookup = key.lookup();
            match rows.iter().position(|row| row.matches_key(&lookup)) {
                Some(index) => Some(index),
                None => return Vec::new(),
            }
        }
        None => None,
    };

    match take {
        Some(take) if take < 0 => {
            let count = usize::try_from(take.unsigned_abs()).unwrap_or(usize::MAX);
            let end = match anchor {
                Some(index) => index + 1,
                None => rows.len(),
            }
            .saturating_sub(skip);
            let start = end.saturating_sub(count);
            rows[start..end].to_vec()
        }
        _ => {
            let start = anchor.unwrap_or(0).saturating_add(skip);
            if start >= rows.len() {
                return Vec::new();
            }
            let end = match take {
                Some(take) => start
                    .saturating_add(usize::try_from(take).unwrap_or(usize::MAX))
                    .min(rows.len()),
                None => rows.len(),
            };
            rows[start..end].to_vec()
        }
    }
}

/// Full `find_many` pipeline over candidate rows: filter, order, distinct,
/// then cursor/skip/take.
pub fn select<'a, E: Entity>(
    rows: impl IntoIterator<Item = &'a E>,
    args: &FindArgs<E>,
) -> Result<Vec<&'a E>, StoreError> {
    validate_filter(E::MODEL, &args.filter)?;
    validate_order(E::MODEL, &args.order_by)?;

    let mut selected: Vec<&E> = rows
        .into_iter()
        .filter(|row| matches(*row, &args.filter))
        .collect();
    sort_rows(&mut selected, &args.order_by);
    let selected = distinct_rows(selected, &args.distinct);
    Ok(window(
        selected,
        args.cursor.as_ref(),
        args.take,
        args.skip.unwrap_or(0),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NullableJson, WorkspaceRun, WorkspaceRunField};
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;
    use serde_json::json;

    fn run(id: &str, status: &str, cost: Option<&str>, results: NullableJson) -> WorkspaceRun {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        WorkspaceRun {
            run_id: id.to_string(),
            workspace_id: "ws-1".to_string(),
            status: status.to_string(),
            started_at: at,
            finished_at: None,
            cost_usd: cost.map(|c| c.parse::<Decimal>().unwrap()),
            readiness_score: None,
            results,
            created_at: at,
        }
    }

    fn fixture() -> Vec<WorkspaceRun> {
        vec![
            run("r1", "succeeded", Some("1.50"), NullableJson::Json(json!({"tags": ["a", "b"], "summary": {"note": "Green light"}}))),
            run("r2", "failed", None, NullableJson::DbNull),
            run("r3", "succeeded", Some("0.25"), NullableJson::Json(serde_json::Value::Null)),
            run("r4", "Running", Some("3"), NullableJson::Json(json!({"tags": ["b"]}))),
        ]
    }

    fn ids(rows: &[&WorkspaceRun]) -> Vec<String> {
        rows.iter().map(|r| r.run_id.clone()).collect()
    }

    fn pick(filter: Filter<WorkspaceRunField>) -> Vec<String> {
        let rows = fixture();
        let args = FindArgs::<WorkspaceRun>::new().filter(filter);
        ids(&select(rows.iter(), &args).unwrap())
    }

    // ── filters ──

    #[test]
    fn null_columns_never_match_comparisons() {
        assert_eq!(
            pick(Filter::field(WorkspaceRunField::CostUsd, Condition::Lt(Value::Int(2)))),
            vec!["r1", "r3"]
        );
        assert_eq!(
            pick(Filter::field(
                WorkspaceRunField::CostUsd,
                Condition::NotEquals(Value::Decimal("1.5".parse().unwrap()))
            )),
            vec!["r3", "r4"]
        );
        assert_eq!(
            pick(Filter::field(WorkspaceRunField::CostUsd, Condition::IsNull)),
            vec!["r2"]
        );
    }

    #[test]
    fn text_modes() {
        assert_eq!(
            pick(Filter::field(WorkspaceRunField::Status, Condition::starts_with("run"))),
            Vec::<String>::new()
        );
        assert_eq!(
            pick(Filter::field(
                WorkspaceRunField::Status,
                Condition::starts_with("run").insensitive()
            )),
            vec!["r4"]
        );
        assert_eq!(
            pick(Filter::field(WorkspaceRunField::Status, Condition::ends_with("ed"))),
            vec!["r1", "r2", "r3"]
        );
    }

    #[test]
    fn boolean_combinators() {
        let filter = Filter::eq(WorkspaceRunField::Status, "succeeded")
            .and(Filter::field(WorkspaceRunField::CostUsd, Condition::Gt(Value::Int(1))))
            .or(Filter::eq(WorkspaceRunField::RunId, "r2"));
        assert_eq!(pick(filter), vec!["r1", "r2"]);

        let negated = Filter::eq(WorkspaceRunField::Status, "succeeded").not();
        assert_eq!(pick(negated), vec!["r2", "r4"]);
    }

    #[test]
    fn json_null_kinds_are_distinct() {
        let by = |kind| pick(Filter::field(WorkspaceRunField::Results, Condition::JsonNull(kind)));
        assert_eq!(by(JsonNullKind::DbNull), vec!["r2"]);
        assert_eq!(by(JsonNullKind::JsonNull), vec!["r3"]);
        assert_eq!(by(JsonNullKind::AnyNull), vec!["r2", "r3"]);
    }

    #[test]
    fn json_content_filters() {
        assert_eq!(
            pick(Filter::field(
                WorkspaceRunField::Results,
                Condition::JsonArrayContains(json!("b"))
            )),
            Vec::<String>::new(),
            "array containment applies to the document root"
        );
        assert_eq!(
            pick(Filter::field(
                WorkspaceRunField::Results,
                Condition::JsonPath {
                    path: vec!["tags".into(), "0".into()],
                    equals: json!("a"),
                }
            )),
            vec!["r1"]
        );
        assert_eq!(
            pick(Filter::field(
                WorkspaceRunField::Results,
                Condition::JsonStringContains {
                    path: vec!["summary".into(), "note".into()],
                    needle: "light".into(),
                }
            )),
            vec!["r1"]
        );
        assert_eq!(
            pick(Filter::field(
                WorkspaceRunField::Results,
                Condition::JsonEquals(json!({"tags": ["b"]}))
            )),
            vec!["r4"]
        );
    }

    #[test]
    fn array_containment_on_array_documents() {
        let doc = Value::Json(json!(["ads.read", "ads.write"]));
        assert!(condition_matches(&doc, &Condition::JsonArrayContains(json!("ads.read"))));
        assert!(condition_matches(
            &doc,
            &Condition::JsonArrayContains(json!(["ads.write", "ads.read"]))
        ));
        assert!(!condition_matches(&doc, &Condition::JsonArrayContains(json!("admin"))));
    }

    #[test]
    fn mismatched_conditions_are_rejected() {
        let err = validate_condition(
            "WorkspaceRun",
            WorkspaceRunField::CostUsd,
            &Condition::contains("1"),
        )
        .unwrap_err();
        assert!(err.is_validation());
        assert!(validate_condition(
            "WorkspaceRun",
            WorkspaceRunField::Status,
            &Condition::JsonNull(JsonNullKind::AnyNull)
        )
        .is_err());
        assert!(validate_order("WorkspaceRun", &[OrderBy::asc(WorkspaceRunField::Results)]).is_err());
    }

    // ── ordering and windows ──

    #[test]
    fn nulls_follow_direction_unless_overridden() {
        let rows = fixture();
        let asc = FindArgs::<WorkspaceRun>::new().order_by(OrderBy::asc(WorkspaceRunField::CostUsd));
        assert_eq!(ids(&select(rows.iter(), &asc).unwrap()), vec!["r2", "r3", "r1", "r4"]);

        let desc = FindArgs::<WorkspaceRun>::new().order_by(OrderBy::desc(WorkspaceRunField::CostUsd));
        assert_eq!(ids(&select(rows.iter(), &desc).unwrap()), vec!["r4", "r1", "r3", "r2"]);

        let asc_last = FindArgs::<WorkspaceRun>::new().order_by(OrderBy::asc(WorkspaceRunField::CostUsd).nulls_last());
        assert_eq!(ids(&select(rows.iter(), &asc_last).unwrap()), vec!["r3", "r1", "r4", "r2"]);
    }

    #[test]
    fn cursor_is_inclusive_and_take_can_go_backwards() {
        let rows = fixture();
        let forward = FindArgs::<WorkspaceRun>::new().cursor("r2").take(2);
        assert_eq!(ids(&select(rows.iter(), &forward).unwrap()), vec!["r2", "r3"]);

        let past_cursor = FindArgs::<WorkspaceRun>::new().cursor("r2").skip(1).take(2);
        assert_eq!(ids(&select(rows.iter(), &past_cursor).unwrap()), vec!["r3", "r4"]);

        let backward = FindArgs::<WorkspaceRun>::new().cursor("r3").take(-2);
        assert_eq!(ids(&select(rows.iter(), &backward).unwrap()), vec!["r2", "r3"]);

        let last_two = FindArgs::<WorkspaceRun>::new().take(-2);
        assert_eq!(ids(&select(rows.iter(), &last_two).unwrap()), vec!["r3", "r4"]);

        let unknown = FindArgs::<WorkspaceRun>::new().cursor("nope").take(2);
        assert!(select(rows.iter(), &unknown).unwrap().is_empty());

        let nothing = FindArgs::<WorkspaceRun>::new().take(0);
        assert!(select(rows.iter(), &nothing).unwrap().is_empty());
    }

    #[test]
    fn distinct_keeps_first_in_order_before_paging() {
        let rows = fixture();
        let args = FindArgs::<WorkspaceRun>::new()
            .order_by(OrderBy::desc(WorkspaceRunField::RunId))
            .distinct(WorkspaceRunField::Status)
            .take(2);
        assert_eq!(ids(&select(rows.iter(), &args).unwrap()), vec!["r4", "r3"]);
    }
}
