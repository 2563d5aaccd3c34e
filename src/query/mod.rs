//! Translation of HTTP parameters into the three fixed flight aggregations.
//!
//! Parameter handling follows a few fixed rules:
//! - a date range is applied only when both bounds parse as ISO dates and
//!   `begin <= end`; otherwise it is dropped with a warning and the query runs
//!   over every date,
//! - `deparr` selects the arrival column only for the exact value `ARRAPT`,
//! - `nrows` falls back to [`DEFAULT_ROW_LIMIT`] when absent or not a number.

use std::fmt;

use chrono::NaiveDate;
use tracing::warn;

use crate::warehouse::WarehouseError;

pub mod sql;

pub const FLIGHT_DATE: &str = "FLIGHT_DATE";
pub const CARRIER: &str = "CARRIER";
pub const COUNT_ALIAS: &str = "ct";
pub const DEPARTURE_COUNT_ALIAS: &str = "depct";
pub const ARRIVAL_COUNT_ALIAS: &str = "arrct";

pub const DEFAULT_ROW_LIMIT: u32 = 20;

/// Carriers reported by the daily carriers aggregation: American, Delta,
/// United, JetBlue, Southwest and Alaska.
pub const CARRIERS: [&str; 6] = ["AA", "DL", "UA", "B6", "WN", "AS"];

pub fn is_listed_carrier(code: &str) -> bool {
    CARRIERS.contains(&code)
}

#[derive(thiserror::Error, Debug)]
pub enum QueryError {
    /// The request was understood but its parameters can't be aggregated.
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Warehouse(#[from] WarehouseError),
}

impl QueryError {
    /// Message to report back to the caller as a 400, if this is a client error.
    pub fn validation_message(&self) -> Option<&str> {
        match self {
            QueryError::Validation(message) => Some(message),
            QueryError::Warehouse(_) => None,
        }
    }
}

#[derive(PartialEq, Eq, Debug, Clone, Copy, Default)]
pub enum Direction {
    #[default]
    Departure,
    Arrival,
}

impl Direction {
    /// Anything other than exactly `ARRAPT` means departures.
    pub fn from_param(raw: Option<&str>) -> Self {
        match raw {
            Some("ARRAPT") => Direction::Arrival,
            _ => Direction::Departure,
        }
    }

    pub fn column(&self) -> &'static str {
        match self {
            Direction::Departure => "DEPAPT",
            Direction::Arrival => "ARRAPT",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.column())
    }
}

/// Inclusive range of flight dates.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub struct DateRange {
    pub begin: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// Builds the range from raw parameters. Any problem drops the whole range.
    pub fn from_params(begin: Option<&str>, end: Option<&str>) -> Option<DateRange> {
        let (begin, end) = match (begin, end) {
            (Some(begin), Some(end)) => (begin, end),
            (None, None) => return None,
            (begin, end) => {
                warn!(
                    ?begin,
                    ?end,
                    "only one date bound supplied, running without date filter"
                );
                return None;
            }
        };

        let parsed = parse_date(begin).and_then(|b| parse_date(end).map(|e| (b, e)));
        let (begin, end) = match parsed {
            Ok(bounds) => bounds,
            Err(e) => {
                warn!("{}, running without date filter", e);
                return None;
            }
        };

        if begin > end {
            warn!(%begin, %end, "begin is after end, running without date filter");
            return None;
        }

        Some(DateRange { begin, end })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.begin <= date && date <= self.end
    }
}

fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), crate::value::DATE_FORMAT)
        .map_err(|e| format!("invalid date {:?} - {}", raw, e))
}

/// `nrows` as a row limit; values that aren't integers fall back to the
/// default. Zero is a valid limit and yields no rows.
pub fn row_limit(raw: Option<&str>) -> Result<u32, QueryError> {
    let Some(n) = raw.and_then(|raw| raw.trim().parse::<i64>().ok()) else {
        return Ok(DEFAULT_ROW_LIMIT);
    };

    if n < 0 {
        return Err(QueryError::Validation(format!(
            "nrows must not be negative, got {}",
            n
        )));
    }

    Ok(u32::try_from(n).unwrap_or(u32::MAX))
}

/// The path value is used as given; only a missing or blank one is rejected.
fn airport(raw: Option<&str>) -> Result<String, QueryError> {
    match raw {
        Some(airport) if !airport.trim().is_empty() => Ok(airport.to_string()),
        _ => Err(QueryError::Validation(
            "airport path parameter is required".to_string(),
        )),
    }
}

#[derive(PartialEq, Eq, Debug, Clone)]
pub struct QueryFilter {
    pub range: Option<DateRange>,
    pub direction: Direction,
    pub row_limit: u32,
}

impl QueryFilter {
    pub fn from_params(
        begin: Option<&str>,
        end: Option<&str>,
        deparr: Option<&str>,
        nrows: Option<&str>,
    ) -> Result<QueryFilter, QueryError> {
        Ok(QueryFilter {
            range: DateRange::from_params(begin, end),
            direction: Direction::from_param(deparr),
            row_limit: row_limit(nrows)?,
        })
    }
}

/// One of the three aggregations the service can run.
#[derive(PartialEq, Eq, Debug, Clone)]
pub enum Aggregation {
    /// Flights per airport in the chosen direction, busiest first.
    BusyAirports {
        range: Option<DateRange>,
        direction: Direction,
        limit: u32,
    },
    /// Departures from and arrivals into one airport, per day.
    AirportDaily {
        airport: String,
        range: Option<DateRange>,
    },
    /// Flights per day and listed carrier for one airport in the chosen direction.
    AirportDailyCarriers {
        airport: String,
        range: Option<DateRange>,
        direction: Direction,
    },
}

impl Aggregation {
    pub fn busy_airports(
        begin: Option<&str>,
        end: Option<&str>,
        deparr: Option<&str>,
        nrows: Option<&str>,
    ) -> Result<Aggregation, QueryError> {
        let filter = QueryFilter::from_params(begin, end, deparr, nrows)?;
        Ok(Aggregation::BusyAirports {
            range: filter.range,
            direction: filter.direction,
            limit: filter.row_limit,
        })
    }

    pub fn airport_daily(
        airport_param: Option<&str>,
        begin: Option<&str>,
        end: Option<&str>,
    ) -> Result<Aggregation, QueryError> {
        Ok(Aggregation::AirportDaily {
            airport: airport(airport_param)?,
            range: DateRange::from_params(begin, end),
        })
    }

    pub fn airport_daily_carriers(
        airport_param: Option<&str>,
        begin: Option<&str>,
        end: Option<&str>,
        deparr: Option<&str>,
    ) -> Result<Aggregation, QueryError> {
        Ok(Aggregation::AirportDailyCarriers {
            airport: airport(airport_param)?,
            range: DateRange::from_params(begin, end),
            direction: Direction::from_param(deparr),
        })
    }

    pub fn range(&self) -> Option<&DateRange> {
        match self {
            Aggregation::BusyAirports { range, .. }
            | Aggregation::AirportDaily { range, .. }
            | Aggregation::AirportDailyCarriers { range, .. } => range.as_ref(),
        }
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Aggregation::BusyAirports { direction, limit, .. } => {
                write!(f, "busy airports by {} (top {})", direction, limit)
            }
            Aggregation::AirportDaily { airport, .. } => write!(f, "airport daily for {}", airport),
            Aggregation::AirportDailyCarriers {
                airport, direction, ..
            } => write!(f, "airport daily carriers for {} by {}", airport, direction),
        }
    }
}
