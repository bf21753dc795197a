//! Query arguments shared by both backends: filters, ordering, cursor
//! pagination, distinct, aggregates and group-by.
//!
//! Evaluation lives in `eval` (row selection) and `aggregate` (aggregates and
//! grouping). The D1 backend renders the SQL-exact part of a filter through
//! `crate::d1::sql` and runs the same evaluator over the fetched rows.

pub mod aggregate;
pub mod eval;

use crate::models::{Entity, FieldDef, Value};

// ── Filters ─────────────────────────────────────────────────────

/// Case handling for text conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextMode {
    #[default]
    Default,
    Insensitive,
}

/// Which null a JSON null-filter matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonNullKind {
    /// SQL NULL column.
    DbNull,
    /// Stored JSON `null` document.
    JsonNull,
    /// Either of the above.
    AnyNull,
}

/// A predicate on one column value.
///
/// Comparisons against a NULL column never match; use `IsNull`, or
/// `JsonNull` for JSON columns.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Equals(Value),
    NotEquals(Value),
    In(Vec<Value>),
    NotIn(Vec<Value>),
    Lt(Value),
    Lte(Value),
    Gt(Value),
    Gte(Value),
    Contains { needle: String, mode: TextMode },
    StartsWith { prefix: String, mode: TextMode },
    EndsWith { suffix: String, mode: TextMode },
    IsNull,
    IsNotNull,
    JsonNull(JsonNullKind),
    JsonEquals(serde_json::Value),
    JsonPath {
        path: Vec<String>,
        equals: serde_json::Value,
    },
    JsonArrayContains(serde_json::Value),
    JsonStringContains { path: Vec<String>, needle: String },
}

impl Condition {
    pub fn contains(needle: impl Into<String>) -> Self {
        Condition::Contains {
            needle: needle.into(),
            mode: TextMode::Default,
        }
    }

    pub fn starts_with(prefix: impl Into<String>) -> Self {
        Condition::StartsWith {
            prefix: prefix.into(),
            mode: TextMode::Default,
        }
    }

    pub fn ends_with(suffix: impl Into<String>) -> Self {
        Condition::EndsWith {
            suffix: suffix.into(),
            mode: TextMode::Default,
        }
    }

    /// Switches a text condition to case-insensitive matching.
    pub fn insensitive(self) -> Self {
        match self {
            Condition::Contains { needle, .. } => Condition::Contains {
                needle,
                mode: TextMode::Insensitive,
            },
            Condition::StartsWith { prefix, .. } => Condition::StartsWith {
                prefix,
                mode: TextMode::Insensitive,
            },
            Condition::EndsWith { suffix, .. } => Condition::EndsWith {
                suffix,
                mode: TextMode::Insensitive,
            },
            other => other,
        }
    }
}

/// Boolean filter tree over the fields of one entity (the `where` argument).
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Filter<F> {
    #[default]
    All,
    And(Vec<Filter<F>>),
    Or(Vec<Filter<F>>),
    Not(Box<Filter<F>>),
    Field(F, Condition),
}

impl<F: FieldDef> Filter<F> {
    pub fn all() -> Self {
        Filter::All
    }

    pub fn field(field: F, condition: Condition) -> Self {
        Filter::Field(field, condition)
    }

    pub fn eq(field: F, value: impl Into<Value>) -> Self {
        Filter::Field(field, Condition::Equals(value.into()))
    }

    pub fn and(self, other: Filter<F>) -> Self {
        match (self, other) {
            (Filter::All, other) => other,
            (this, Filter::All) => this,
            (Filter::And(mut items), other) => {
                items.push(other);
                Filter::And(items)
            }
            (this, other) => Filter::And(vec![this, other]),
        }
    }

    pub fn or(self, other: Filter<F>) -> Self {
        match self {
            Filter::Or(mut items) => {
                items.push(other);
                Filter::Or(items)
            }
            this => Filter::Or(vec![this, other]),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Filter::Not(Box::new(self))
    }

    pub(crate) fn fields(&self, out: &mut Vec<F>) {
        match self {
            Filter::All => {}
            Filter::And(items) | Filter::Or(items) => {
                for item in items {
                    item.fields(out);
                }
            }
            Filter::Not(inner) => inner.fields(out),
            Filter::Field(field, _) => out.push(*field),
        }
    }
}

// ── Ordering ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullsOrder {
    First,
    Last,
}

/// One ordering key. NULLs sort first ascending and last descending unless
/// `nulls` says otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderBy<F> {
    pub field: F,
    pub order: SortOrder,
    pub nulls: Option<NullsOrder>,
}

impl<F> OrderBy<F> {
    pub fn asc(field: F) -> Self {
        Self {
            field,
            order: SortOrder::Asc,
            nulls: None,
        }
    }

    pub fn desc(field: F) -> Self {
        Self {
            field,
            order: SortOrder::Desc,
            nulls: None,
        }
    }

    pub fn nulls_first(mut self) -> Self {
        self.nulls = Some(NullsOrder::First);
        self
    }

    pub fn nulls_last(mut self) -> Self {
        self.nulls = Some(NullsOrder::Last);
        self
    }

    pub(crate) fn effective_nulls(&self) -> NullsOrder {
        self.nulls.unwrap_or(match self.order {
            SortOrder::Asc => NullsOrder::First,
            SortOrder::Desc => NullsOrder::Last,
        })
    }
}

// ── find / count ────────────────────────────────────────────────

/// Arguments of `find_first`, `find_many` and `count`.
///
/// `cursor` is inclusive. A negative `take` returns the rows before the
/// cursor (or the last rows of the result) in their original order.
/// `distinct` keeps the first row of each distinct tuple after ordering and
/// applies before cursor, skip and take.
#[derive(Debug, Clone)]
pub struct FindArgs<E: Entity> {
    pub filter: Filter<E::Field>,
    pub order_by: Vec<OrderBy<E::Field>>,
    pub cursor: Option<E::Key>,
    pub take: Option<i64>,
    pub skip: Option<u64>,
    pub distinct: Vec<E::Field>,
}

impl<E: Entity> Default for FindArgs<E> {
    fn default() -> Self {
        Self {
            filter: Filter::All,
            order_by: Vec::new(),
            cursor: None,
            take: None,
            skip: None,
            distinct: Vec::new(),
        }
    }
}

impl<E: Entity> FindArgs<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Filter<E::Field>) -> Self {
        self.filter = filter;
        self
    }

    pub fn order_by(mut self, order: OrderBy<E::Field>) -> Self {
        self.order_by.push(order);
        self
    }

    pub fn cursor(mut self, key: impl Into<E::Key>) -> Self {
        self.cursor = Some(key.into());
        self
    }

    pub fn take(mut self, take: i64) -> Self {
        self.take = Some(take);
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn distinct(mut self, field: E::Field) -> Self {
        self.distinct.push(field);
        self
    }
}

impl<E: Entity> From<Filter<E::Field>> for FindArgs<E> {
    fn from(filter: Filter<E::Field>) -> Self {
        Self::new().filter(filter)
    }
}

// ── Aggregates ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFn {
    Count,
    Avg,
    Sum,
    Min,
    Max,
}

/// Aggregates to compute: `_count`, `_avg`, `_sum`, `_min`, `_max`.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateSelection<F> {
    pub count_all: bool,
    pub count: Vec<F>,
    pub avg: Vec<F>,
    pub sum: Vec<F>,
    pub min: Vec<F>,
    pub max: Vec<F>,
}

impl<F> Default for AggregateSelection<F> {
    fn default() -> Self {
        Self {
            count_all: false,
            count: Vec::new(),
            avg: Vec::new(),
            sum: Vec::new(),
            min: Vec::new(),
            max: Vec::new(),
        }
    }
}

impl<F> AggregateSelection<F> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count_all(mut self) -> Self {
        self.count_all = true;
        self
    }

    pub fn count(mut self, field: F) -> Self {
        self.count.push(field);
        self
    }

    pub fn avg(mut self, field: F) -> Self {
        self.avg.push(field);
        self
    }

    pub fn sum(mut self, field: F) -> Self {
        self.sum.push(field);
        self
    }

    pub fn min(mut self, field: F) -> Self {
        self.min.push(field);
        self
    }

    pub fn max(mut self, field: F) -> Self {
        self.max.push(field);
        self
    }
}

/// Arguments of `aggregate`: the row window (as for `find_many`, distinct
/// ignored) and the aggregates to compute over it.
#[derive(Debug, Clone)]
pub struct AggregateArgs<E: Entity> {
    pub rows: FindArgs<E>,
    pub select: AggregateSelection<E::Field>,
}

impl<E: Entity> AggregateArgs<E> {
    pub fn new(select: AggregateSelection<E::Field>) -> Self {
        Self {
            rows: FindArgs::new(),
            select,
        }
    }

    pub fn rows(mut self, rows: FindArgs<E>) -> Self {
        self.rows = rows;
        self
    }
}

/// Aggregate values. Aggregates over zero non-null values are `Value::Null`.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateResult<F> {
    pub count_all: Option<u64>,
    pub count: Vec<(F, u64)>,
    pub avg: Vec<(F, Value)>,
    pub sum: Vec<(F, Value)>,
    pub min: Vec<(F, Value)>,
    pub max: Vec<(F, Value)>,
}

impl<F> Default for AggregateResult<F> {
    fn default() -> Self {
        Self {
            count_all: None,
            count: Vec::new(),
            avg: Vec::new(),
            sum: Vec::new(),
            min: Vec::new(),
            max: Vec::new(),
        }
    }
}

impl<F: FieldDef> AggregateResult<F> {
    pub fn count_of(&self, field: F) -> Option<u64> {
        self.count.iter().find(|(f, _)| *f == field).map(|(_, n)| *n)
    }

    pub fn avg_of(&self, field: F) -> Option<&Value> {
        lookup(&self.avg, field)
    }

    pub fn sum_of(&self, field: F) -> Option<&Value> {
        lookup(&self.sum, field)
    }

    pub fn min_of(&self, field: F) -> Option<&Value> {
        lookup(&self.min, field)
    }

    pub fn max_of(&self, field: F) -> Option<&Value> {
        lookup(&self.max, field)
    }
}

fn lookup<F: FieldDef>(values: &[(F, Value)], field: F) -> Option<&Value> {
    values.iter().find(|(f, _)| *f == field).map(|(_, v)| v)
}

// ── Group by ────────────────────────────────────────────────────

/// Filter over groups. Every field referenced must also appear in `by`.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Having<F> {
    #[default]
    All,
    And(Vec<Having<F>>),
    Or(Vec<Having<F>>),
    Not(Box<Having<F>>),
    /// Condition on a group-key value.
    Key(F, Condition),
    /// Condition on an aggregate of a field within the group.
    Aggregate {
        func: AggregateFn,
        field: F,
        condition: Condition,
    },
    /// Condition on the number of rows in the group.
    CountAll(Condition),
}

impl<F: FieldDef> Having<F> {
    pub(crate) fn fields(&self, out: &mut Vec<F>) {
        match self {
            Having::All | Having::CountAll(_) => {}
            Having::And(items) | Having::Or(items) => {
                for item in items {
                    item.fields(out);
                }
            }
            Having::Not(inner) => inner.fields(out),
            Having::Key(field, _) | Having::Aggregate { field, .. } => out.push(*field),
        }
    }
}

/// Arguments of `group_by`. `order_by` may only name fields in `by`; groups
/// are otherwise ordered by their key values ascending.
#[derive(Debug, Clone)]
pub struct GroupByArgs<E: Entity> {
    pub by: Vec<E::Field>,
    pub filter: Filter<E::Field>,
    pub having: Having<E::Field>,
    pub order_by: Vec<OrderBy<E::Field>>,
    pub skip: Option<u64>,
    pub take: Option<u64>,
    pub select: AggregateSelection<E::Field>,
}

impl<E: Entity> GroupByArgs<E> {
    pub fn by(fields: Vec<E::Field>) -> Self {
        Self {
            by: fields,
            filter: Filter::All,
            having: Having::All,
            order_by: Vec::new(),
            skip: None,
            take: None,
            select: AggregateSelection::new(),
        }
    }

    pub fn filter(mut self, filter: Filter<E::Field>) -> Self {
        self.filter = filter;
        self
    }

    pub fn having(mut self, having: Having<E::Field>) -> Self {
        self.having = having;
        self
    }

    pub fn order_by(mut self, order: OrderBy<E::Field>) -> Self {
        self.order_by.push(order);
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn take(mut self, take: u64) -> Self {
        self.take = Some(take);
        self
    }

    pub fn select(mut self, select: AggregateSelection<E::Field>) -> Self {
        self.select = select;
        self
    }
}

/// One group: its key values (in `by` order) and its aggregates.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupRow<F> {
    pub key: Vec<(F, Value)>,
    pub aggregates: AggregateResult<F>,
}

impl<F: FieldDef> GroupRow<F> {
    pub fn key_value(&self, field: F) -> Option<&Value> {
        lookup(&self.key, field)
    }
}
