use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;

use crate::error::StoreError;

// ── Column values ───────────────────────────────────────────────

/// A single column value, as seen by filters, ordering, aggregates and the
/// D1 binder. `Null` is a database NULL; `Json(serde_json::Value::Null)` is a
/// stored JSON `null`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Str(String),
    Decimal(Decimal),
    Timestamp(DateTime<Utc>),
    Json(serde_json::Value),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Value::Decimal(d) => Some(*d),
            Value::Int(i) => Some(Decimal::from(*i)),
            _ => None,
        }
    }

    /// Ordering between two non-null scalars of compatible types.
    /// Returns `None` for NULLs, JSON and mismatched types.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            (Value::Decimal(a), Value::Decimal(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Decimal(b)) => Some(Decimal::from(*a).cmp(b)),
            (Value::Decimal(a), Value::Int(b)) => Some(a.cmp(&Decimal::from(*b))),
            (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Equality with decimal normalization (`1.50 == 1.5`) and JSON
    /// structural equality.
    pub fn same_as(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Json(a), Value::Json(b)) => a == b,
            (Value::Null, Value::Null) => true,
            _ => self.compare(other) == Some(Ordering::Equal),
        }
    }

    /// Stable, type-tagged text form used for unique-index and distinct keys.
    pub fn key_part(&self) -> String {
        match self {
            Value::Null => "n:".to_string(),
            Value::Int(i) => format!("d:{}", Decimal::from(*i).normalize()),
            Value::Decimal(d) => format!("d:{}", d.normalize()),
            Value::Str(s) => format!("s:{s}"),
            Value::Timestamp(ts) => format!("t:{}", format_timestamp(ts)),
            Value::Json(v) => format!("j:{v}"),
        }
    }

    /// Whether this value can be stored in / compared with a column of `kind`.
    pub fn fits(&self, kind: FieldKind) -> bool {
        matches!(
            (self, kind),
            (Value::Null, _)
                | (Value::Str(_), FieldKind::Str)
                | (Value::Int(_), FieldKind::Int)
                | (Value::Int(_), FieldKind::Decimal)
                | (Value::Decimal(_), FieldKind::Decimal)
                | (Value::Timestamp(_), FieldKind::Timestamp)
                | (Value::Json(_), FieldKind::Json)
        )
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<&String> for Value {
    fn from(v: &String) -> Self {
        Value::Str(v.clone())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<Decimal> for Value {
    fn from(v: Decimal) -> Self {
        Value::Decimal(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Json(v)
    }
}

impl From<&NullableJson> for Value {
    fn from(v: &NullableJson) -> Self {
        match v {
            NullableJson::DbNull => Value::Null,
            NullableJson::Json(json) => Value::Json(json.clone()),
        }
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Storage type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Str,
    Int,
    Decimal,
    Timestamp,
    Json,
}

impl FieldKind {
    pub fn is_numeric(self) -> bool {
        matches!(self, FieldKind::Int | FieldKind::Decimal)
    }

    pub fn is_orderable(self) -> bool {
        !matches!(self, FieldKind::Json)
    }
}

// ── Timestamps ──────────────────────────────────────────────────

/// Fixed-width RFC 3339 UTC, so lexical order equals chronological order.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

// ── Nullable JSON columns ───────────────────────────────────────

/// Content of a nullable JSON column. `DbNull` is SQL NULL; `Json(Null)` is a
/// stored JSON `null` document. On the wire both serialize as `null`, and a
/// `null` read from the wire is taken as `DbNull`.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum NullableJson {
    #[default]
    DbNull,
    Json(serde_json::Value),
}

impl NullableJson {
    pub fn value(&self) -> Option<&serde_json::Value> {
        match self {
            NullableJson::DbNull => None,
            NullableJson::Json(v) => Some(v),
        }
    }

    pub fn is_db_null(&self) -> bool {
        matches!(self, NullableJson::DbNull)
    }

    pub fn is_json_null(&self) -> bool {
        matches!(self, NullableJson::Json(serde_json::Value::Null))
    }
}

impl From<serde_json::Value> for NullableJson {
    fn from(v: serde_json::Value) -> Self {
        NullableJson::Json(v)
    }
}

impl Serialize for NullableJson {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            NullableJson::DbNull => serializer.serialize_none(),
            NullableJson::Json(v) => v.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for NullableJson {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match Option::<serde_json::Value>::deserialize(deserializer)? {
            Some(v) => NullableJson::Json(v),
            None => NullableJson::DbNull,
        })
    }
}

// ── Update wrappers ─────────────────────────────────────────────

/// Update of a JSON column. `Unset` leaves the column untouched, `JsonNull`
/// stores a JSON `null` document, `DbNull` clears the column to SQL NULL.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum JsonUpdate {
    #[default]
    Unset,
    JsonNull,
    DbNull,
    Set(serde_json::Value),
}

impl JsonUpdate {
    /// `Set(null)` is normalized to `JsonNull`.
    pub fn set(v: serde_json::Value) -> Self {
        if v.is_null() {
            JsonUpdate::JsonNull
        } else {
            JsonUpdate::Set(v)
        }
    }

    pub fn is_unset(&self) -> bool {
        matches!(self, JsonUpdate::Unset)
    }

    pub fn apply_nullable(&self, target: &mut NullableJson) {
        match self {
            JsonUpdate::Unset => {}
            JsonUpdate::JsonNull => *target = NullableJson::Json(serde_json::Value::Null),
            JsonUpdate::DbNull => *target = NullableJson::DbNull,
            JsonUpdate::Set(v) => *target = NullableJson::Json(v.clone()),
        }
    }

    /// Required JSON columns accept a JSON `null` but never SQL NULL.
    pub fn apply_required(
        &self,
        model: &'static str,
        field: &str,
        target: &mut serde_json::Value,
    ) -> Result<(), StoreError> {
        match self {
            JsonUpdate::Unset => {}
            JsonUpdate::JsonNull => *target = serde_json::Value::Null,
            JsonUpdate::DbNull => {
                return Err(StoreError::validation(
                    model,
                    format!("{field} is required and cannot be set to database null"),
                ))
            }
            JsonUpdate::Set(v) => *target = v.clone(),
        }
        Ok(())
    }
}

/// Update of a scalar column. Nullable columns use `FieldUpdate<Option<T>>`.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldUpdate<T> {
    Unset,
    Set(T),
}

impl<T> Default for FieldUpdate<T> {
    fn default() -> Self {
        FieldUpdate::Unset
    }
}

impl<T: Clone> FieldUpdate<T> {
    pub fn is_unset(&self) -> bool {
        matches!(self, FieldUpdate::Unset)
    }

    pub fn apply(&self, target: &mut T) {
        if let FieldUpdate::Set(v) = self {
            *target = v.clone();
        }
    }
}

impl<T> From<T> for FieldUpdate<T> {
    fn from(v: T) -> Self {
        FieldUpdate::Set(v)
    }
}

/// Arithmetic needed by atomic number updates.
pub trait Numeric: Copy + PartialEq {
    fn checked_add(self, rhs: Self) -> Option<Self>;
    fn checked_sub(self, rhs: Self) -> Option<Self>;
    fn checked_mul(self, rhs: Self) -> Option<Self>;
    fn checked_div(self, rhs: Self) -> Option<Self>;
    fn is_zero(self) -> bool;
}

impl Numeric for i32 {
    fn checked_add(self, rhs: Self) -> Option<Self> {
        i32::checked_add(self, rhs)
    }
    fn checked_sub(self, rhs: Self) -> Option<Self> {
        i32::checked_sub(self, rhs)
    }
    fn checked_mul(self, rhs: Self) -> Option<Self> {
        i32::checked_mul(self, rhs)
    }
    fn checked_div(self, rhs: Self) -> Option<Self> {
        i32::checked_div(self, rhs)
    }
    fn is_zero(self) -> bool {
        self == 0
    }
}

impl Numeric for Decimal {
    fn checked_add(self, rhs: Self) -> Option<Self> {
        Decimal::checked_add(self, rhs)
    }
    fn checked_sub(self, rhs: Self) -> Option<Self> {
        Decimal::checked_sub(self, rhs)
    }
    fn checked_mul(self, rhs: Self) -> Option<Self> {
        Decimal::checked_mul(self, rhs)
    }
    fn checked_div(self, rhs: Self) -> Option<Self> {
        Decimal::checked_div(self, rhs)
    }
    fn is_zero(self) -> bool {
        Decimal::is_zero(&self)
    }
}

/// Update of a numeric column, including atomic arithmetic.
#[derive(Debug, Clone, PartialEq)]
pub enum NumberUpdate<T> {
    Unset,
    Set(T),
    /// Clears a nullable column; rejected on required columns.
    SetNull,
    Increment(T),
    Decrement(T),
    Multiply(T),
    Divide(T),
}

impl<T> Default for NumberUpdate<T> {
    fn default() -> Self {
        NumberUpdate::Unset
    }
}

impl<T: Numeric> NumberUpdate<T> {
    pub fn is_unset(&self) -> bool {
        matches!(self, NumberUpdate::Unset)
    }

    fn compute(&self, model: &'static str, field: &str, current: T) -> Result<T, StoreError> {
        let result = match *self {
            NumberUpdate::Unset | NumberUpdate::SetNull => Some(current),
            NumberUpdate::Set(v) => Some(v),
            NumberUpdate::Increment(v) => current.checked_add(v),
            NumberUpdate::Decrement(v) => current.checked_sub(v),
            NumberUpdate::Multiply(v) => current.checked_mul(v),
            NumberUpdate::Divide(v) => {
                if v.is_zero() {
                    return Err(StoreError::validation(
                        model,
                        format!("division by zero on {field}"),
                    ));
                }
                current.checked_div(v)
            }
        };
        result.ok_or_else(|| StoreError::validation(model, format!("arithmetic overflow on {field}")))
    }

    pub fn apply(&self, model: &'static str, field: &str, target: &mut T) -> Result<(), StoreError> {
        if let NumberUpdate::SetNull = self {
            return Err(StoreError::validation(
                model,
                format!("{field} is required and cannot be set to null"),
            ));
        }
        *target = self.compute(model, field, *target)?;
        Ok(())
    }

    /// Arithmetic on a NULL column leaves it NULL.
    pub fn apply_nullable(
        &self,
        model: &'static str,
        field: &str,
        target: &mut Option<T>,
    ) -> Result<(), StoreError> {
        match (self, *target) {
            (NumberUpdate::Unset, _) => {}
            (NumberUpdate::SetNull, _) => *target = None,
            (NumberUpdate::Set(v), _) => *target = Some(*v),
            (_, None) => {}
            (_, Some(current)) => *target = Some(self.compute(model, field, current)?),
        }
        Ok(())
    }
}

// ── Ids and content hashes ──────────────────────────────────────

/// Random 128-bit id, hex encoded.
pub fn generate_id() -> Result<String, StoreError> {
    let mut buf = [0u8; 16];
    getrandom::getrandom(&mut buf)
        .map_err(|err| StoreError::Backend(format!("failed to generate id: {err}")))?;
    Ok(hex::encode(buf))
}

/// Content address in the `sha256:<hex>` form used for asset fingerprints and
/// policy bundle checksums.
pub fn sha256_fingerprint(bytes: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn decimals_compare_after_normalization() {
        assert!(Value::Decimal(dec("1.50")).same_as(&Value::Decimal(dec("1.5"))));
        assert_eq!(
            Value::Decimal(dec("1.50")).key_part(),
            Value::Decimal(dec("1.5")).key_part()
        );
        assert_eq!(
            Value::Int(2).compare(&Value::Decimal(dec("2.5"))),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn null_and_json_are_not_orderable() {
        assert_eq!(Value::Null.compare(&Value::Int(1)), None);
        assert_eq!(Value::Json(json!(1)).compare(&Value::Json(json!(2))), None);
    }

    #[test]
    fn timestamps_format_fixed_width() {
        let ts = parse_timestamp("2026-01-01T00:00:00Z").unwrap();
        assert_eq!(format_timestamp(&ts), "2026-01-01T00:00:00.000000000Z");
        assert_eq!(parse_timestamp(&format_timestamp(&ts)), Some(ts));
    }

    #[test]
    fn json_update_keeps_three_states_apart() {
        let mut col = NullableJson::Json(json!({"a": 1}));
        JsonUpdate::Unset.apply_nullable(&mut col);
        assert_eq!(col, NullableJson::Json(json!({"a": 1})));

        JsonUpdate::JsonNull.apply_nullable(&mut col);
        assert!(col.is_json_null());
        assert!(!col.is_db_null());

        JsonUpdate::DbNull.apply_nullable(&mut col);
        assert!(col.is_db_null());

        assert_eq!(JsonUpdate::set(serde_json::Value::Null), JsonUpdate::JsonNull);
    }

    #[test]
    fn required_json_rejects_db_null() {
        let mut doc = json!({"k": "v"});
        let err = JsonUpdate::DbNull
            .apply_required("AuditBundle", "bundleData", &mut doc)
            .unwrap_err();
        assert!(err.is_validation());
        JsonUpdate::JsonNull
            .apply_required("AuditBundle", "bundleData", &mut doc)
            .unwrap();
        assert!(doc.is_null());
    }

    #[test]
    fn number_updates_do_exact_arithmetic() {
        let mut cost = Some(dec("0.1"));
        for _ in 0..9 {
            NumberUpdate::Increment(dec("0.1"))
                .apply_nullable("WorkspaceRun", "costUsd", &mut cost)
                .unwrap();
        }
        assert_eq!(cost, Some(dec("1.0")));

        let mut missing: Option<Decimal> = None;
        NumberUpdate::Increment(dec("5"))
            .apply_nullable("WorkspaceRun", "costUsd", &mut missing)
            .unwrap();
        assert_eq!(missing, None);

        let mut ttl = 24i32;
        NumberUpdate::Multiply(2)
            .apply("Workspace", "ttlHours", &mut ttl)
            .unwrap();
        assert_eq!(ttl, 48);
        assert!(NumberUpdate::Divide(0)
            .apply("Workspace", "ttlHours", &mut ttl)
            .is_err());
        assert!(NumberUpdate::Increment(i32::MAX)
            .apply("Workspace", "ttlHours", &mut ttl)
            .is_err());
        assert!(NumberUpdate::<i32>::SetNull
            .apply("Workspace", "ttlHours", &mut ttl)
            .is_err());
    }

    #[test]
    fn nullable_json_wire_form() {
        let doc = NullableJson::Json(json!({"scopes": ["ads.read"]}));
        assert_eq!(serde_json::to_value(&doc).unwrap(), json!({"scopes": ["ads.read"]}));
        let parsed: NullableJson = serde_json::from_value(json!(null)).unwrap();
        assert!(parsed.is_db_null());
    }

    #[test]
    fn fingerprint_is_content_addressed() {
        let a = sha256_fingerprint(b"creative-v1");
        let b = sha256_fingerprint(b"creative-v1");
        let c = sha256_fingerprint(b"creative-v2");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("sha256:"));
        assert_eq!(a.len(), "sha256:".len() + 64);
    }

    #[test]
    fn generated_ids_are_hex_and_unique() {
        let a = generate_id().unwrap();
        let b = generate_id().unwrap();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }
}
