//! Aggregates and group-by over selected rows.
//!
//! Sums and averages of decimal columns use exact decimal arithmetic; integer
//! sums stay integers and integer averages come back as decimals.

use std::cmp::Ordering;
use std::collections::HashMap;

use rust_decimal::Decimal;

use super::eval::{
    self, compare_for_order, condition_matches, validate_condition, validate_condition_on,
};
use super::{
    AggregateArgs, AggregateFn, AggregateResult, AggregateSelection, GroupByArgs, GroupRow, Having,
};
use crate::error::StoreError;
use crate::models::{Entity, FieldDef, FieldKind, Value};

// ── Validation ──────────────────────────────────────────────────

fn check_fn<F: FieldDef>(model: &'static str, func: AggregateFn, field: F) -> Result<(), StoreError> {
    let kind = field.kind();
    let ok = match func {
        AggregateFn::Count => true,
        AggregateFn::Avg | AggregateFn::Sum => kind.is_numeric(),
        AggregateFn::Min | AggregateFn::Max => kind.is_orderable(),
    };
    if ok {
        Ok(())
    } else {
        Err(StoreError::validation(
            model,
            format!("{func:?} is not supported on field {}", field.name()),
        ))
    }
}

pub fn validate_selection<F: FieldDef>(
    model: &'static str,
    select: &AggregateSelection<F>,
) -> Result<(), StoreError> {
    let groups = [
        (AggregateFn::Count, &select.count),
        (AggregateFn::Avg, &select.avg),
        (AggregateFn::Sum, &select.sum),
        (AggregateFn::Min, &select.min),
        (AggregateFn::Max, &select.max),
    ];
    for (func, fields) in groups {
        for field in fields {
            check_fn(model, func, *field)?;
        }
    }
    Ok(())
}

fn validate_having<F: FieldDef>(model: &'static str, having: &Having<F>) -> Result<(), StoreError> {
    match having {
        Having::All => Ok(()),
        Having::And(items) | Having::Or(items) => {
            items.iter().try_for_each(|item| validate_having(model, item))
        }
        Having::Not(inner) => validate_having(model, inner),
        Having::Key(field, condition) => validate_condition(model, *field, condition),
        Having::Aggregate {
            func,
            field,
            condition,
        } => {
            check_fn(model, *func, *field)?;
            let target = format!("_{}({})", format!("{func:?}").to_ascii_lowercase(), field.name());
            validate_condition_on(model, &target, result_kind(*func, *field), condition)
        }
        Having::CountAll(condition) => {
            validate_condition_on(model, "_count(_all)", FieldKind::Int, condition)
        }
    }
}

/// Kind of value an aggregate yields: counts are integers, averages
/// decimals, the rest keep the field's kind.
fn result_kind<F: FieldDef>(func: AggregateFn, field: F) -> FieldKind {
    match func {
        AggregateFn::Count => FieldKind::Int,
        AggregateFn::Avg => FieldKind::Decimal,
        AggregateFn::Sum | AggregateFn::Min | AggregateFn::Max => field.kind(),
    }
}

/// `by` must be non-empty, and ordering and `having` may only reference
/// grouped fields.
pub fn validate_group_by<E: Entity>(args: &GroupByArgs<E>) -> Result<(), StoreError> {
    if args.by.is_empty() {
        return Err(StoreError::validation(E::MODEL, "groupBy requires at least one field in by"));
    }
    for key in &args.order_by {
        if !args.by.contains(&key.field) {
            return Err(StoreError::validation(
                E::MODEL,
                format!("orderBy field {} must be part of by", key.field.name()),
            ));
        }
    }
    let mut referenced = Vec::new();
    args.having.fields(&mut referenced);
    for field in referenced {
        if !args.by.contains(&field) {
            return Err(StoreError::validation(
                E::MODEL,
                format!("having field {} must be part of by", field.name()),
            ));
        }
    }
    eval::validate_filter(E::MODEL, &args.filter)?;
    eval::validate_order(E::MODEL, &args.order_by)?;
    validate_having(E::MODEL, &args.having)?;
    validate_selection(E::MODEL, &args.select)
}

// ── Computation ─────────────────────────────────────────────────

fn non_null<E: Entity>(rows: &[&E], field: E::Field) -> Vec<Value> {
    rows.iter()
        .map(|row| row.get(field))
        .filter(|v| !v.is_null())
        .collect()
}

fn overflow(model: &'static str, field: &str) -> StoreError {
    StoreError::validation(model, format!("aggregate overflow on {field}"))
}

fn sum_values(model: &'static str, field: &str, kind: FieldKind, values: &[Value]) -> Result<Value, StoreError> {
    if values.is_empty() {
        return Ok(Value::Null);
    }
    match kind {
        FieldKind::Int => {
            let mut total: i64 = 0;
            for v in values {
                if let Value::Int(i) = v {
                    total = total.checked_add(*i).ok_or_else(|| overflow(model, field))?;
                }
            }
            Ok(Value::Int(total))
        }
        _ => {
            let mut total = Decimal::ZERO;
            for v in values {
                if let Some(d) = v.as_decimal() {
                    total = total.checked_add(d).ok_or_else(|| overflow(model, field))?;
                }
            }
            Ok(Value::Decimal(total))
        }
    }
}

fn avg_values(model: &'static str, field: &str, values: &[Value]) -> Result<Value, StoreError> {
    if values.is_empty() {
        return Ok(Value::Null);
    }
    let mut total = Decimal::ZERO;
    for v in values {
        if let Some(d) = v.as_decimal() {
            total = total.checked_add(d).ok_or_else(|| overflow(model, field))?;
        }
    }
    total
        .checked_div(Decimal::from(values.len()))
        .map(Value::Decimal)
        .ok_or_else(|| overflow(model, field))
}

fn extreme(values: Vec<Value>, want: Ordering) -> Value {
    values
        .into_iter()
        .reduce(|best, v| if v.compare(&best) == Some(want) { v } else { best })
        .unwrap_or(Value::Null)
}

/// One aggregate of one field over a set of rows.
pub fn aggregate_value<E: Entity>(
    rows: &[&E],
    func: AggregateFn,
    field: E::Field,
) -> Result<Value, StoreError> {
    let values = non_null(rows, field);
    match func {
        AggregateFn::Count => Ok(Value::Int(values.len() as i64)),
        AggregateFn::Sum => sum_values(E::MODEL, field.name(), field.kind(), &values),
        AggregateFn::Avg => avg_values(E::MODEL, field.name(), &values),
        AggregateFn::Min => Ok(extreme(values, Ordering::Less)),
        AggregateFn::Max => Ok(extreme(values, Ordering::Greater)),
    }
}

pub fn compute<E: Entity>(
    rows: &[&E],
    select: &AggregateSelection<E::Field>,
) -> Result<AggregateResult<E::Field>, StoreError> {
    let mut result = AggregateResult::default();
    if select.count_all {
        result.count_all = Some(rows.len() as u64);
    }
    for field in &select.count {
        result.count.push((*field, non_null(rows, *field).len() as u64));
    }
    for field in &select.avg {
        result.avg.push((*field, aggregate_value(rows, AggregateFn::Avg, *field)?));
    }
    for field in &select.sum {
        result.sum.push((*field, aggregate_value(rows, AggregateFn::Sum, *field)?));
    }
    for field in &select.min {
        result.min.push((*field, aggregate_value(rows, AggregateFn::Min, *field)?));
    }
    for field in &select.max {
        result.max.push((*field, aggregate_value(rows, AggregateFn::Max, *field)?));
    }
    Ok(result)
}

/// `aggregate`: selects the row window, then computes the requested values.
pub fn aggregate<'a, E: Entity>(
    rows: impl IntoIterator<Item = &'a E>,
    args: &AggregateArgs<E>,
) -> Result<AggregateResult<E::Field>, StoreError> {
    validate_selection(E::MODEL, &args.select)?;
    let mut window = args.rows.clone();
    window.distinct.clear();
    let selected = eval::select(rows, &window)?;
    compute(&selected, &args.select)
}

// ── Group by ────────────────────────────────────────────────────

fn having_matches<E: Entity>(
    having: &Having<E::Field>,
    by: &[E::Field],
    key: &[Value],
    rows: &[&E],
) -> Result<bool, StoreError> {
    Ok(match having {
        Having::All => true,
        Having::And(items) => {
            for item in items {
                if !having_matches(item, by, key, rows)? {
                    return Ok(false);
                }
            }
            true
        }
        Having::Or(items) => {
            for item in items {
                if having_matches(item, by, key, rows)? {
                    return Ok(true);
                }
            }
            false
        }
        Having::Not(inner) => !having_matches(inner, by, key, rows)?,
        Having::Key(field, condition) => by
            .iter()
            .position(|f| f == field)
            .is_some_and(|i| condition_matches(&key[i], condition)),
        Having::Aggregate {
            func,
            field,
            condition,
        } => condition_matches(&aggregate_value(rows, *func, *field)?, condition),
        Having::CountAll(condition) => {
            condition_matches(&Value::Int(rows.len() as i64), condition)
        }
    })
}

/// `group_by`: filters, partitions by the `by` tuple, applies `having`,
/// orders and pages the groups.
pub fn group_by<'a, E: Entity>(
    rows: impl IntoIterator<Item = &'a E>,
    args: &GroupByArgs<E>,
) -> Result<Vec<GroupRow<E::Field>>, StoreError> {
    validate_group_by(args)?;

    let mut slots: HashMap<Vec<String>, usize> = HashMap::new();
    let mut groups: Vec<(Vec<Value>, Vec<&E>)> = Vec::new();
    for row in rows.into_iter().filter(|row| eval::matches(*row, &args.filter)) {
        let key: Vec<Value> = args.by.iter().map(|f| row.get(*f)).collect();
        let tag: Vec<String> = key.iter().map(Value::key_part).collect();
        let slot = *slots.entry(tag).or_insert_with(|| {
            groups.push((key, Vec::new()));
            groups.len() - 1
        });
        groups[slot].1.push(row);
    }

    let mut kept = Vec::with_capacity(groups.len());
    for (key, members) in groups {
        if having_matches(&args.having, &args.by, &key, &members)? {
            let aggregates = compute(&members, &args.select)?;
            kept.push((key, aggregates));
        }
    }

    kept.sort_by(|(a, _), (b, _)| {
        for order in &args.order_by {
            if let Some(i) = args.by.iter().position(|f| *f == order.field) {
                let ord = compare_for_order(&a[i], &b[i], order.order, order.effective_nulls());
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
        a.iter()
            .zip(b.iter())
            .map(|(x, y)| compare_for_order(x, y, super::SortOrder::Asc, super::NullsOrder::First))
            .find(|ord| *ord != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    });

    let skip = usize::try_from(args.skip.unwrap_or(0)).unwrap_or(usize::MAX);
    let take = args
        .take
        .map(|t| usize::try_from(t).unwrap_or(usize::MAX))
        .unwrap_or(usize::MAX);

    Ok(kept
        .into_iter()
        .skip(skip)
        .take(take)
        .map(|(key, aggregates)| GroupRow {
            key: args.by.iter().copied().zip(key).collect(),
            aggregates,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{Condition, Filter, FindArgs, OrderBy};
    use crate::models::{SimulationResult, SimulationResultField as F};
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn sim(id: &str, ws: &str, readiness: &str, cost: &str) -> SimulationResult {
        SimulationResult {
            simulation_id: id.to_string(),
            workspace_id: ws.to_string(),
            readiness_score: dec(readiness),
            policy_pass_pct: dec("90"),
            citation_coverage: dec("0.8"),
            duplication_risk: dec("0.1"),
            cost_estimate_usd: dec(cost),
            traces: Default::default(),
            simulation_data: json!({}),
            created_at: Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap(),
        }
    }

    fn fixture() -> Vec<SimulationResult> {
        vec![
            sim("s1", "ws-a", "80", "0.1"),
            sim("s2", "ws-a", "60", "0.2"),
            sim("s3", "ws-b", "95", "0.3"),
            sim("s4", "ws-c", "40", "1.10"),
        ]
    }

    #[test]
    fn decimal_sums_are_exact() {
        let rows = fixture();
        let args = AggregateArgs::<SimulationResult>::new(
            AggregateSelection::new()
                .count_all()
                .sum(F::CostEstimateUsd)
                .avg(F::ReadinessScore)
                .min(F::ReadinessScore)
                .max(F::WorkspaceId),
        );
        let result = aggregate(rows.iter(), &args).unwrap();
        assert_eq!(result.count_all, Some(4));
        assert_eq!(result.sum_of(F::CostEstimateUsd), Some(&Value::Decimal(dec("1.7"))));
        assert_eq!(result.avg_of(F::ReadinessScore), Some(&Value::Decimal(dec("68.75"))));
        assert_eq!(result.min_of(F::ReadinessScore), Some(&Value::Decimal(dec("40"))));
        assert_eq!(result.max_of(F::WorkspaceId), Some(&Value::from("ws-c")));
    }

    #[test]
    fn aggregates_respect_the_row_window() {
        let rows = fixture();
        let args = AggregateArgs::new(AggregateSelection::new().count_all().sum(F::CostEstimateUsd))
            .rows(
                FindArgs::<SimulationResult>::new()
                    .order_by(OrderBy::desc(F::ReadinessScore))
                    .take(2),
            );
        let result = aggregate(rows.iter(), &args).unwrap();
        assert_eq!(result.count_all, Some(2));
        assert_eq!(result.sum_of(F::CostEstimateUsd), Some(&Value::Decimal(dec("0.4"))));
    }

    #[test]
    fn empty_input_yields_null_aggregates() {
        let rows: Vec<SimulationResult> = Vec::new();
        let args = AggregateArgs::<SimulationResult>::new(
            AggregateSelection::new().count_all().avg(F::ReadinessScore).count(F::Traces),
        );
        let result = aggregate(rows.iter(), &args).unwrap();
        assert_eq!(result.count_all, Some(0));
        assert_eq!(result.count_of(F::Traces), Some(0));
        assert_eq!(result.avg_of(F::ReadinessScore), Some(&Value::Null));
    }

    #[test]
    fn sum_on_text_is_rejected() {
        let rows = fixture();
        let args = AggregateArgs::<SimulationResult>::new(AggregateSelection::new().sum(F::WorkspaceId));
        assert!(aggregate(rows.iter(), &args).unwrap_err().is_validation());
    }

    #[test]
    fn group_by_partitions_filters_and_orders() {
        let rows = fixture();
        let args = GroupByArgs::<SimulationResult>::by(vec![F::WorkspaceId])
            .filter(Filter::field(F::ReadinessScore, Condition::Gte(Value::Int(50))))
            .order_by(OrderBy::desc(F::WorkspaceId))
            .select(AggregateSelection::new().count_all().sum(F::CostEstimateUsd));
        let groups = group_by(rows.iter(), &args).unwrap();

        let keys: Vec<_> = groups.iter().map(|g| g.key_value(F::WorkspaceId).cloned()).collect();
        assert_eq!(keys, vec![Some(Value::from("ws-b")), Some(Value::from("ws-a"))]);
        assert_eq!(groups[1].aggregates.count_all, Some(2));
        assert_eq!(
            groups[1].aggregates.sum_of(F::CostEstimateUsd),
            Some(&Value::Decimal(dec("0.3")))
        );
    }

    #[test]
    fn having_filters_groups_by_aggregate() {
        let rows = fixture();
        let args = GroupByArgs::<SimulationResult>::by(vec![F::WorkspaceId])
            .having(Having::Or(vec![
                Having::Aggregate {
                    func: AggregateFn::Count,
                    field: F::WorkspaceId,
                    condition: Condition::Gt(Value::Int(1)),
                },
                Having::Key(F::WorkspaceId, Condition::Equals(Value::from("ws-c"))),
            ]))
            .select(AggregateSelection::new().count_all());
        let groups = group_by(rows.iter(), &args).unwrap();
        let keys: Vec<_> = groups.iter().map(|g| g.key[0].1.clone()).collect();
        assert_eq!(keys, vec![Value::from("ws-a"), Value::from("ws-c")]);

        let paged = GroupByArgs::<SimulationResult>::by(vec![F::WorkspaceId])
            .having(Having::CountAll(Condition::Equals(Value::Int(1))))
            .skip(1)
            .take(1);
        let groups = group_by(rows.iter(), &paged).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].key_value(F::WorkspaceId), Some(&Value::from("ws-c")));
    }

    #[test]
    fn group_by_argument_errors() {
        let rows = fixture();
        let empty = GroupByArgs::<SimulationResult>::by(Vec::new());
        assert!(group_by(rows.iter(), &empty).unwrap_err().is_validation());

        let stray_order = GroupByArgs::<SimulationResult>::by(vec![F::WorkspaceId])
            .order_by(OrderBy::asc(F::ReadinessScore));
        assert!(group_by(rows.iter(), &stray_order).unwrap_err().is_validation());

        let stray_having = GroupByArgs::<SimulationResult>::by(vec![F::WorkspaceId]).having(
            Having::Aggregate {
                func: AggregateFn::Sum,
                field: F::CostEstimateUsd,
                condition: Condition::Gt(Value::Int(0)),
            },
        );
        assert!(group_by(rows.iter(), &stray_having).unwrap_err().is_validation());
    }

    #[test]
    fn having_operands_must_fit_the_aggregate() {
        let rows = fixture();
        let by = || GroupByArgs::<SimulationResult>::by(vec![F::WorkspaceId, F::CostEstimateUsd]);

        let text_sum = by().having(Having::Aggregate {
            func: AggregateFn::Sum,
            field: F::CostEstimateUsd,
            condition: Condition::Gt(Value::from("a lot")),
        });
        let err = group_by(rows.iter(), &text_sum).unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("_sum(costEstimateUsd)"));

        let text_count = by().having(Having::CountAll(Condition::Equals(Value::from("one"))));
        assert!(group_by(rows.iter(), &text_count).unwrap_err().is_validation());

        let numeric = by().having(Having::Aggregate {
            func: AggregateFn::Avg,
            field: F::CostEstimateUsd,
            condition: Condition::Gte(Value::Int(0)),
        });
        assert_eq!(group_by(rows.iter(), &numeric).unwrap().len(), rows.len());
    }
}
