use std::fmt;
use std::str::FromStr;

use crate::query::{
    Aggregation, DateRange, ARRIVAL_COUNT_ALIAS, CARRIER, CARRIERS, COUNT_ALIAS,
    DEPARTURE_COUNT_ALIAS, FLIGHT_DATE,
};
use crate::value::DATE_FORMAT;

/// A table identifier, optionally qualified by database and schema.
#[derive(PartialEq, Eq, Debug, Clone)]
pub struct TableName(String);

impl FromStr for TableName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, String> {
        let parts: Vec<&str> = s.split('.').collect();
        if parts.len() > 3 {
            return Err(format!("table name {} has too many parts", s));
        }
        for part in &parts {
            let valid = !part.is_empty()
                && !part.starts_with(|c: char| c.is_ascii_digit())
                && part
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$');
            if !valid {
                return Err(format!("invalid table name {}", s));
            }
        }
        Ok(TableName(s.to_string()))
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// SQL text with `?` placeholders and their values, in placeholder order.
#[derive(PartialEq, Eq, Debug, Clone)]
pub struct Statement {
    pub sql: String,
    pub bindings: Vec<String>,
}

#[derive(Default)]
struct Builder {
    sql: String,
    bindings: Vec<String>,
}

impl Builder {
    fn push(&mut self, sql: &str) -> &mut Self {
        self.sql.push_str(sql);
        self
    }

    fn bind(&mut self, value: impl Into<String>) -> &mut Self {
        self.sql.push('?');
        self.bindings.push(value.into());
        self
    }

    fn date_range(&mut self, range: &DateRange) -> &mut Self {
        self.push(FLIGHT_DATE)
            .push(" >= TO_DATE(")
            .bind(range.begin.format(DATE_FORMAT).to_string())
            .push(") AND ")
            .push(FLIGHT_DATE)
            .push(" <= TO_DATE(")
            .bind(range.end.format(DATE_FORMAT).to_string())
            .push(")")
    }

    fn finish(self) -> Statement {
        Statement {
            sql: self.sql,
            bindings: self.bindings,
        }
    }
}

fn alias(name: &str) -> String {
    format!("\"{}\"", name)
}

/// Renders the aggregation against `table`. Every request-supplied value is bound.
pub fn render(aggregation: &Aggregation, table: &TableName) -> Statement {
    let mut b = Builder::default();
    match aggregation {
        Aggregation::BusyAirports {
            range,
            direction,
            limit,
        } => {
            let column = direction.column();
            b.push(&format!(
                "SELECT {column}, COUNT({column}) AS {ct} FROM {table}",
                ct = alias(COUNT_ALIAS)
            ));
            if let Some(range) = range {
                b.push(" WHERE ").date_range(range);
            }
            b.push(&format!(
                " GROUP BY {column} ORDER BY {ct} DESC, {column} ASC LIMIT {limit}",
                ct = alias(COUNT_ALIAS)
            ));
        }
        Aggregation::AirportDaily { airport, range } => {
            b.push(&format!("SELECT {FLIGHT_DATE}, SUM(IFF(DEPAPT = "))
                .bind(airport.as_str())
                .push(&format!(", 1, 0)) AS {}, SUM(IFF(ARRAPT = ", alias(DEPARTURE_COUNT_ALIAS)))
                .bind(airport.as_str())
                .push(&format!(", 1, 0)) AS {} FROM {table}", alias(ARRIVAL_COUNT_ALIAS)));
            if let Some(range) = range {
                b.push(" WHERE ").date_range(range);
            }
            b.push(&format!(
                " GROUP BY {FLIGHT_DATE} ORDER BY {FLIGHT_DATE} ASC"
            ));
        }
        Aggregation::AirportDailyCarriers {
            airport,
            range,
            direction,
        } => {
            b.push(&format!(
                "SELECT {FLIGHT_DATE}, {CARRIER}, COUNT({FLIGHT_DATE}) AS {} FROM {table} WHERE ",
                alias(COUNT_ALIAS)
            ));
            if let Some(range) = range {
                b.date_range(range).push(" AND ");
            }
            b.push(CARRIER).push(" IN (");
            for (i, code) in CARRIERS.iter().enumerate() {
                if i > 0 {
                    b.push(", ");
                }
                b.bind(*code);
            }
            b.push(") AND ")
                .push(direction.column())
                .push(" = ")
                .bind(airport.as_str());
            b.push(&format!(
                " GROUP BY {FLIGHT_DATE}, {CARRIER} ORDER BY {FLIGHT_DATE} ASC, {CARRIER} ASC"
            ));
        }
    }
    b.finish()
}
