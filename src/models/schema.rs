use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use std::hash::Hash;

use super::values::{FieldKind, Value};
use crate::error::StoreError;

/// A column of an entity table.
pub trait FieldDef: Copy + Eq + Hash + fmt::Debug + 'static {
    const ALL: &'static [Self];

    /// camelCase name, as exposed on the wire.
    fn name(self) -> &'static str;
    /// snake_case column in the D1 schema.
    fn column(self) -> &'static str;
    fn kind(self) -> FieldKind;
    fn nullable(self) -> bool;
}

/// Declares a field enum and its `FieldDef` table.
macro_rules! entity_fields {
    (
        $(#[$meta:meta])*
        $name:ident {
            $($variant:ident => $field:literal, $column:literal, $kind:ident, $nullable:literal;)+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $crate::models::schema::FieldDef for $name {
            const ALL: &'static [Self] = &[$($name::$variant),+];

            fn name(self) -> &'static str {
                match self {
                    $($name::$variant => $field),+
                }
            }

            fn column(self) -> &'static str {
                match self {
                    $($name::$variant => $column),+
                }
            }

            fn kind(self) -> $crate::models::values::FieldKind {
                match self {
                    $($name::$variant => $crate::models::values::FieldKind::$kind),+
                }
            }

            fn nullable(self) -> bool {
                match self {
                    $($name::$variant => $nullable),+
                }
            }
        }
    };
}

pub(crate) use entity_fields;

/// Normalized value of a compound-unique index for one row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexKey {
    pub constraint: &'static str,
    pub parts: Vec<String>,
}

impl IndexKey {
    pub fn new(constraint: &'static str, values: &[Value]) -> Self {
        Self {
            constraint,
            parts: values.iter().map(Value::key_part).collect(),
        }
    }
}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<&str> = self
            .parts
            .iter()
            .map(|p| p.split_once(':').map(|(_, v)| v).unwrap_or(p))
            .collect();
        write!(f, "({})", parts.join(", "))
    }
}

/// How a unique key resolves to a row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyLookup {
    Primary(String),
    Index(IndexKey),
}

impl fmt::Display for KeyLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyLookup::Primary(pk) => write!(f, "{pk}"),
            KeyLookup::Index(key) => write!(f, "{}{key}", key.constraint),
        }
    }
}

/// Argument type of `find_unique`, `update`, `delete` and `upsert`.
pub trait UniqueKey: Clone + fmt::Debug {
    fn lookup(&self) -> KeyLookup;

    /// Column/value pairs of a compound key; empty for a primary key.
    fn index_columns(&self) -> Vec<(&'static str, Value)> {
        Vec::new()
    }
}

impl UniqueKey for String {
    fn lookup(&self) -> KeyLookup {
        KeyLookup::Primary(self.clone())
    }
}

/// Builds a new record from a create input.
pub trait CreateInput<E>: Clone + fmt::Debug {
    fn into_record(self, now: DateTime<Utc>) -> Result<E, StoreError>;
}

/// Applies an update input to an existing record in place.
pub trait UpdateInput<E>: Clone + fmt::Debug {
    fn apply_to(&self, record: &mut E, now: DateTime<Utc>) -> Result<(), StoreError>;
}

/// A persisted record kind: one table, one primary key, optional
/// compound-unique indexes.
pub trait Entity: Clone + fmt::Debug + Serialize + 'static {
    type Field: FieldDef;
    type Key: UniqueKey;
    type Create: CreateInput<Self>;
    type Update: UpdateInput<Self>;

    const MODEL: &'static str;
    const TABLE: &'static str;
    const PRIMARY: Self::Field;

    fn primary_key(&self) -> &str;

    /// Owning workspace for child records, `None` for the workspace itself.
    fn workspace_ref(&self) -> Option<&str>;

    /// Attaches a child record to another workspace. No-op on the root.
    fn set_workspace_ref(&mut self, workspace_id: &str);

    fn get(&self, field: Self::Field) -> Value;

    fn unique_indexes(&self) -> Vec<IndexKey> {
        Vec::new()
    }

    /// Checks record-level invariants. `enforce_domain_invariants` toggles
    /// the rules the relational schema itself does not declare.
    fn validate(&self, enforce_domain_invariants: bool) -> Result<(), StoreError>;

    fn matches_key(&self, key: &KeyLookup) -> bool {
        match key {
            KeyLookup::Primary(pk) => self.primary_key() == pk,
            KeyLookup::Index(index) => self.unique_indexes().iter().any(|own| own == index),
        }
    }
}

// ── Validation helpers ──────────────────────────────────────────

pub(crate) fn require_non_empty(
    model: &'static str,
    field: &str,
    value: &str,
) -> Result<(), StoreError> {
    if value.trim().is_empty() {
        return Err(StoreError::validation(model, format!("{field} must not be empty")));
    }
    Ok(())
}

pub(crate) fn require_range(
    model: &'static str,
    field: &str,
    value: Decimal,
    min: Decimal,
    max: Decimal,
) -> Result<(), StoreError> {
    if value < min || value > max {
        return Err(StoreError::validation(
            model,
            format!("{field} must be within [{min}, {max}], got {value}"),
        ));
    }
    Ok(())
}

pub(crate) fn require_non_negative(
    model: &'static str,
    field: &str,
    value: Decimal,
) -> Result<(), StoreError> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(StoreError::validation(
            model,
            format!("{field} must not be negative, got {value}"),
        ));
    }
    Ok(())
}

/// [0, 100]: readiness and quality scores, pass percentages.
pub(crate) fn percent_bounds() -> (Decimal, Decimal) {
    (Decimal::ZERO, Decimal::ONE_HUNDRED)
}

/// [0, 1]: coverage and risk ratios.
pub(crate) fn ratio_bounds() -> (Decimal, Decimal) {
    (Decimal::ZERO, Decimal::ONE)
}
