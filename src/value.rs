use chrono::{NaiveDate, NaiveDateTime};
use serde_json::{Map, Number};

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// A value produced by the warehouse before it is turned into JSON.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Sequence(Vec<Value>),
    Mapping(Row),
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<NaiveDate> for Value {
    fn from(d: NaiveDate) -> Self {
        Value::Date(d)
    }
}

/// One aggregation output row. Column order is the order of the select list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<(String, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.insert(column, value.into());
        self
    }

    /// Sets `column`, replacing an existing value in place.
    pub fn insert(&mut self, column: &str, value: Value) {
        match self.columns.iter_mut().find(|(name, _)| name == column) {
            Some((_, existing)) => *existing = value,
            None => self.columns.push((column.to_string(), value)),
        }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn columns(&self) -> impl Iterator<Item = &(String, Value)> {
        self.columns.iter()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Converts values into JSON. Dates and datetimes become fixed-format strings,
/// containers are visited recursively.
pub trait Visitor {
    type Output;

    fn visit(&mut self, value: &Value) -> Self::Output {
        match value {
            Value::String(s) => self.visit_string(s),
            Value::Mapping(row) => self.visit_mapping(row),
            Value::Sequence(items) => self.visit_sequence(items),
            Value::DateTime(dt) => self.visit_datetime(dt),
            Value::Date(d) => self.visit_date(d),
            scalar => self.visit_scalar(scalar),
        }
    }

    fn visit_string(&mut self, s: &str) -> Self::Output;
    fn visit_mapping(&mut self, row: &Row) -> Self::Output;
    fn visit_sequence(&mut self, items: &[Value]) -> Self::Output;
    fn visit_datetime(&mut self, dt: &NaiveDateTime) -> Self::Output;
    fn visit_date(&mut self, d: &NaiveDate) -> Self::Output;
    fn visit_scalar(&mut self, scalar: &Value) -> Self::Output;
}

pub struct Stringify;

impl Visitor for Stringify {
    type Output = serde_json::Value;

    fn visit_string(&mut self, s: &str) -> serde_json::Value {
        serde_json::Value::String(s.to_string())
    }

    fn visit_mapping(&mut self, row: &Row) -> serde_json::Value {
        let mut map = Map::with_capacity(row.len());
        for (column, value) in row.columns() {
            map.insert(column.clone(), self.visit(value));
        }
        serde_json::Value::Object(map)
    }

    fn visit_sequence(&mut self, items: &[Value]) -> serde_json::Value {
        serde_json::Value::Array(items.iter().map(|item| self.visit(item)).collect())
    }

    fn visit_datetime(&mut self, dt: &NaiveDateTime) -> serde_json::Value {
        serde_json::Value::String(dt.format(DATETIME_FORMAT).to_string())
    }

    fn visit_date(&mut self, d: &NaiveDate) -> serde_json::Value {
        serde_json::Value::String(d.format(DATE_FORMAT).to_string())
    }

    fn visit_scalar(&mut self, scalar: &Value) -> serde_json::Value {
        match scalar {
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Integer(n) => serde_json::Value::Number(Number::from(*n)),
            // NaN and infinities have no JSON form
            Value::Float(f) => Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            _ => serde_json::Value::Null,
        }
    }
}

pub fn stringify(value: &Value) -> serde_json::Value {
    Stringify.visit(value)
}

pub fn stringify_rows(rows: &[Row]) -> serde_json::Value {
    serde_json::Value::Array(
        rows.iter()
            .map(|row| Stringify.visit_mapping(row))
            .collect(),
    )
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_dates_use_fixed_formats() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        let datetime = date.and_hms_opt(7, 8, 9).unwrap();

        assert_eq!(stringify(&Value::Date(date)), json!("2024-01-05"));
        assert_eq!(
            stringify(&Value::DateTime(datetime)),
            json!("2024-01-05T07:08:09")
        );
    }

    #[test]
    fn test_nested_containers_are_visited() {
        let date = NaiveDate::from_ymd_opt(2023, 12, 31).unwrap();
        let inner = Row::new().with("when", date).with("n", 3i64);
        let value = Value::Sequence(vec![
            Value::Mapping(inner),
            Value::Null,
            Value::Bool(true),
            Value::Float(1.5),
        ]);

        assert_eq!(
            stringify(&value),
            json!([{"when": "2023-12-31", "n": 3}, null, true, 1.5])
        );
    }

    #[test]
    fn test_rows_keep_column_order() {
        let rows = vec![Row::new().with("FLIGHT_DATE", "x").with("depct", 1i64).with("arrct", 2i64)];
        let body = serde_json::to_string(&stringify_rows(&rows)).unwrap();
        assert_eq!(body, r#"[{"FLIGHT_DATE":"x","depct":1,"arrct":2}]"#);
    }

    #[test]
    fn test_insert_replaces_existing_column() {
        let mut row = Row::new().with("ct", 1i64);
        row.insert("ct", Value::Integer(2));
        assert_eq!(row.len(), 1);
        assert_eq!(row.get("ct"), Some(&Value::Integer(2)));
    }

    #[test]
    fn test_non_finite_float_is_null() {
        assert_eq!(stringify(&Value::Float(f64::NAN)), json!(null));
    }
}
