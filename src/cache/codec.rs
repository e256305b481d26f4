//! Conversion between executor values and cache-safe JSON.
//!
//! `freeze` lowers dates to ISO-8601 strings and decimals to their canonical
//! string; `thaw` restores them, guided by the target model's field kinds.
//! The two are inverses whenever the descriptors describe the payload.

use std::str::FromStr;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use serde_json::{Map, Value as JsonValue};
use time::format_description::BorrowedFormatItem;
use time::format_description::well_known::iso8601::{Config, EncodedConfig};
use time::format_description::well_known::{Iso8601, Rfc3339};
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

use crate::schema::{FieldKind, FieldMap, ScalarKind, Schema};
use crate::value::Value;

/// Result keys of aggregate and groupBy reads whose members are fields of
/// the queried model.
const AGGREGATE_BUCKETS: [&str; 4] = ["_min", "_max", "_sum", "_avg"];

/// ISO-8601 with a signed six-digit year, for years RFC 3339 cannot carry.
const EXTENDED_YEAR: EncodedConfig = Config::DEFAULT.set_year_is_six_digits(true).encode();

/// Local time with a full offset, for instants whose UTC form is out of range.
const WITH_OFFSET_SECONDS: &[BorrowedFormatItem<'_>] = format_description!(
    "[year sign:mandatory]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:9][offset_hour sign:mandatory]:[offset_minute]:[offset_second]"
);

static ISO_DATE_TIME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:\d{4}|[+-]\d{4,6})-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}")
        .expect("valid date-time prefix pattern")
});

/// Reconstructs decimals from their frozen form.
///
/// Injected at construction; when absent, decimal fields thaw as plain
/// strings or numbers.
pub trait DecimalSupport: Send + Sync {
    fn restore(&self, raw: &JsonValue) -> Option<Decimal>;
}

/// [`DecimalSupport`] backed by `rust_decimal`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RustDecimal;

impl DecimalSupport for RustDecimal {
    fn restore(&self, raw: &JsonValue) -> Option<Decimal> {
        let text = match raw {
            JsonValue::String(text) => text.clone(),
            JsonValue::Number(number) => number.to_string(),
            _ => return None,
        };
        Decimal::from_str(&text)
            .or_else(|_| Decimal::from_scientific(&text))
            .ok()
    }
}

#[derive(Clone)]
pub struct Codec {
    schema: Arc<Schema>,
    decimal: Option<Arc<dyn DecimalSupport>>,
}

impl Codec {
    /// Codec with `rust_decimal` restoration enabled.
    pub fn new(schema: Arc<Schema>) -> Self {
        Self::with_decimal_support(schema, Arc::new(RustDecimal))
    }

    pub fn without_decimal_support(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            decimal: None,
        }
    }

    pub fn with_decimal_support(schema: Arc<Schema>, decimal: Arc<dyn DecimalSupport>) -> Self {
        Self {
            schema,
            decimal: Some(decimal),
        }
    }

    pub fn has_decimal_support(&self) -> bool {
        self.decimal.is_some()
    }

    /// Lower a value into its cache-safe form. Never fails.
    pub fn freeze(&self, value: &Value) -> JsonValue {
        match value {
            Value::Null => JsonValue::Null,
            Value::Bool(flag) => JsonValue::Bool(*flag),
            Value::Number(number) => JsonValue::Number(number.clone()),
            Value::String(text) => JsonValue::String(text.clone()),
            Value::DateTime(at) => JsonValue::String(format_date_time(at)),
            Value::Decimal(decimal) => JsonValue::String(decimal.to_string()),
            Value::List(items) => {
                JsonValue::Array(items.iter().map(|item| self.freeze(item)).collect())
            }
            Value::Map(entries) => JsonValue::Object(
                entries
                    .iter()
                    .map(|(key, item)| (key.clone(), self.freeze(item)))
                    .collect(),
            ),
        }
    }

    /// Restore a cached value read for `model`.
    ///
    /// Recursion follows the payload, so cyclic relation graphs terminate at
    /// the data's own depth.
    pub fn thaw(&self, value: JsonValue, model: &str) -> Value {
        match value {
            JsonValue::Array(items) => Value::List(
                items
                    .into_iter()
                    .map(|item| self.thaw(item, model))
                    .collect(),
            ),
            JsonValue::Object(entries) => self.thaw_record(entries, model),
            other => Value::from(other),
        }
    }

    fn thaw_record(&self, entries: Map<String, JsonValue>, model: &str) -> Value {
        let fields = self.schema.fields_of(model);
        Value::Map(
            entries
                .into_iter()
                .map(|(key, item)| {
                    let thawed = self.thaw_field(&key, item, model, fields);
                    (key, thawed)
                })
                .collect(),
        )
    }

    fn thaw_field(&self, key: &str, item: JsonValue, model: &str, fields: &FieldMap) -> Value {
        if item.is_null() {
            return Value::Null;
        }
        if AGGREGATE_BUCKETS.contains(&key) {
            return self.thaw(item, model);
        }

        match fields.get(key).map(|field| &field.kind) {
            Some(FieldKind::Relation(edge)) => self.thaw(item, &edge.model),
            Some(FieldKind::Scalar(kind)) => self.thaw_scalar(item, *kind),
            None => Value::from(item),
        }
    }

    fn thaw_scalar(&self, item: JsonValue, kind: ScalarKind) -> Value {
        match (kind, item) {
            (_, JsonValue::Array(items)) => Value::List(
                items
                    .into_iter()
                    .map(|entry| self.thaw_scalar(entry, kind))
                    .collect(),
            ),
            (ScalarKind::DateTime, JsonValue::String(text)) => match parse_date_time(&text) {
                Some(at) => Value::DateTime(at),
                None => Value::String(text),
            },
            (ScalarKind::Decimal, raw @ (JsonValue::String(_) | JsonValue::Number(_))) => {
                match self.decimal.as_ref().and_then(|support| support.restore(&raw)) {
                    Some(decimal) => Value::Decimal(decimal),
                    None => Value::from(raw),
                }
            }
            (_, other) => Value::from(other),
        }
    }
}

/// Frozen form of an instant. Normalized to UTC so offset seconds never
/// reach the RFC 3339 formatter; years outside `0..=9999` use the extended
/// ISO-8601 year.
fn format_date_time(at: &OffsetDateTime) -> String {
    let Some(utc) = at.checked_to_offset(UtcOffset::UTC) else {
        return format_with_offset(at);
    };
    let formatted = if (0..=9999).contains(&utc.year()) {
        utc.format(&Rfc3339)
    } else {
        utc.format(&Iso8601::<EXTENDED_YEAR>)
    };
    formatted.unwrap_or_else(|_| format_with_offset(at))
}

/// Writes [`WITH_OFFSET_SECONDS`] by hand; every component is in range.
fn format_with_offset(at: &OffsetDateTime) -> String {
    let offset = at.offset();
    let (hours, minutes, seconds) = offset.as_hms();
    let sign = if offset.is_negative() { '-' } else { '+' };
    format!(
        "{:+05}-{:02}-{:02}T{:02}:{:02}:{:02}.{:09}{sign}{:02}:{:02}:{:02}",
        at.year(),
        u8::from(at.month()),
        at.day(),
        at.hour(),
        at.minute(),
        at.second(),
        at.nanosecond(),
        hours.unsigned_abs(),
        minutes.unsigned_abs(),
        seconds.unsigned_abs(),
    )
}

fn parse_date_time(text: &str) -> Option<OffsetDateTime> {
    if !ISO_DATE_TIME.is_match(text) {
        return None;
    }
    OffsetDateTime::parse(text, &Rfc3339)
        .or_else(|_| OffsetDateTime::parse(text, &Iso8601::DEFAULT))
        .or_else(|_| OffsetDateTime::parse(text, WITH_OFFSET_SECONDS))
        .ok()
}
