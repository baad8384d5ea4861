//! Conversion from Tiberius rows to JSON values.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::{Map, Number, Value};
use tiberius::{ColumnData, Row};

/// Convert a result row into a JSON object keyed by column name.
pub fn row_to_json(row: &Row) -> Value {
    let mut map = Map::with_capacity(row.columns().len());
    for (idx, (column, data)) in row.cells().enumerate() {
        map.insert(column.name().to_string(), cell_to_json(row, idx, data));
    }
    Value::Object(map)
}

fn cell_to_json(row: &Row, idx: usize, data: &ColumnData<'_>) -> Value {
    match data {
        ColumnData::Bit(v) => v.map(Value::Bool).unwrap_or(Value::Null),
        ColumnData::U8(v) => v.map(|n| Value::Number(n.into())).unwrap_or(Value::Null),
        ColumnData::I16(v) => v.map(|n| Value::Number(n.into())).unwrap_or(Value::Null),
        ColumnData::I32(v) => v.map(|n| Value::Number(n.into())).unwrap_or(Value::Null),
        ColumnData::I64(v) => v.map(|n| Value::Number(n.into())).unwrap_or(Value::Null),
        ColumnData::F32(v) => float_to_json(v.map(f64::from)),
        ColumnData::F64(v) => float_to_json(*v),
        ColumnData::Numeric(v) => float_to_json(v.map(f64::from)),
        ColumnData::String(v) => v
            .as_ref()
            .map(|s| Value::String(s.to_string()))
            .unwrap_or(Value::Null),
        ColumnData::Guid(v) => v
            .map(|g| Value::String(g.to_string()))
            .unwrap_or(Value::Null),
        ColumnData::Binary(v) => v
            .as_ref()
            .map(|b| Value::String(hex_string(b)))
            .unwrap_or(Value::Null),
        ColumnData::Date(_) => temporal(row.try_get::<NaiveDate, _>(idx).ok().flatten()),
        ColumnData::Time(_) => temporal(row.try_get::<NaiveTime, _>(idx).ok().flatten()),
        ColumnData::SmallDateTime(_) | ColumnData::DateTime(_) | ColumnData::DateTime2(_) => {
            temporal(row.try_get::<NaiveDateTime, _>(idx).ok().flatten())
        }
        ColumnData::DateTimeOffset(_) => {
            temporal(row.try_get::<DateTime<Utc>, _>(idx).ok().flatten())
        }
        ColumnData::Xml(v) => v
            .as_ref()
            .map(|x| Value::String(x.to_string()))
            .unwrap_or(Value::Null),
    }
}

fn float_to_json(value: Option<f64>) -> Value {
    value
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

fn temporal<T: ToString>(value: Option<T>) -> Value {
    value
        .map(|v| Value::String(v.to_string()))
        .unwrap_or(Value::Null)
}

fn hex_string(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("0x");
    for byte in bytes {
        use std::fmt::Write;
        let _ = write!(out, "{byte:02x}");
    }
    out
}
