use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use itertools::Itertools;
use serde::Deserialize;

use crate::query::{
    is_listed_carrier, Aggregation, DateRange, Direction, ARRIVAL_COUNT_ALIAS, CARRIER,
    COUNT_ALIAS, DEPARTURE_COUNT_ALIAS, FLIGHT_DATE,
};
use crate::value::Row;
use crate::warehouse::{ConnectionFactory, Warehouse, WarehouseError};

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub struct FlightRecord {
    pub flight_date: NaiveDate,
    pub carrier: String,
    pub depapt: String,
    pub arrapt: String,
}

impl FlightRecord {
    pub fn new(flight_date: NaiveDate, carrier: &str, depapt: &str, arrapt: &str) -> Self {
        FlightRecord {
            flight_date,
            carrier: carrier.to_string(),
            depapt: depapt.to_string(),
            arrapt: arrapt.to_string(),
        }
    }

    fn airport(&self, direction: Direction) -> &str {
        match direction {
            Direction::Departure => &self.depapt,
            Direction::Arrival => &self.arrapt,
        }
    }
}

/// Flight table held in process, aggregated the same way the warehouse does.
#[derive(Debug, Clone, Default)]
pub struct MemoryWarehouse {
    records: Arc<Vec<FlightRecord>>,
}

impl MemoryWarehouse {
    pub fn new(records: Vec<FlightRecord>) -> Self {
        MemoryWarehouse {
            records: Arc::new(records),
        }
    }

    pub fn from_json(data: &[u8]) -> Result<Self, serde_json::Error> {
        Ok(Self::new(serde_json::from_slice(data)?))
    }

    fn in_range<'a>(
        &'a self,
        range: Option<&'a DateRange>,
    ) -> impl Iterator<Item = &'a FlightRecord> + 'a {
        self.records
            .iter()
            .filter(move |r| range.map_or(true, |range| range.contains(r.flight_date)))
    }

    fn busy_airports(&self, range: Option<&DateRange>, direction: Direction, limit: u32) -> Vec<Row> {
        self.in_range(range)
            .map(|r| r.airport(direction))
            .counts()
            .into_iter()
            .sorted_by(|(a, a_ct), (b, b_ct)| b_ct.cmp(a_ct).then_with(|| a.cmp(b)))
            .take(limit as usize)
            .map(|(airport, ct)| {
                Row::new()
                    .with(direction.column(), airport)
                    .with(COUNT_ALIAS, ct as i64)
            })
            .collect()
    }

    fn airport_daily(&self, range: Option<&DateRange>, airport: &str) -> Vec<Row> {
        let mut days: BTreeMap<NaiveDate, (i64, i64)> = BTreeMap::new();
        for r in self.in_range(range) {
            let (dep, arr) = days.entry(r.flight_date).or_default();
            *dep += i64::from(r.depapt == airport);
            *arr += i64::from(r.arrapt == airport);
        }
        days.into_iter()
            .map(|(date, (depct, arrct))| {
                Row::new()
                    .with(FLIGHT_DATE, date)
                    .with(DEPARTURE_COUNT_ALIAS, depct)
                    .with(ARRIVAL_COUNT_ALIAS, arrct)
            })
            .collect()
    }

    fn airport_daily_carriers(
        &self,
        range: Option<&DateRange>,
        airport: &str,
        direction: Direction,
    ) -> Vec<Row> {
        let mut groups: BTreeMap<(NaiveDate, &str), i64> = BTreeMap::new();
        for r in self.in_range(range) {
            if is_listed_carrier(&r.carrier) && r.airport(direction) == airport {
                *groups.entry((r.flight_date, r.carrier.as_str())).or_default() += 1;
            }
        }
        groups
            .into_iter()
            .map(|((date, carrier), ct)| {
                Row::new()
                    .with(FLIGHT_DATE, date)
                    .with(CARRIER, carrier)
                    .with(COUNT_ALIAS, ct)
            })
            .collect()
    }
}

#[async_trait]
impl Warehouse for MemoryWarehouse {
    async fn aggregate(&self, aggregation: &Aggregation) -> Result<Vec<Row>, WarehouseError> {
        let rows = match aggregation {
            Aggregation::BusyAirports {
                range,
                direction,
                limit,
            } => self.busy_airports(range.as_ref(), *direction, *limit),
            Aggregation::AirportDaily { airport, range } => {
                self.airport_daily(range.as_ref(), airport)
            }
            Aggregation::AirportDailyCarriers {
                airport,
                range,
                direction,
            } => self.airport_daily_carriers(range.as_ref(), airport, *direction),
        };
        Ok(rows)
    }
}

#[async_trait]
impl ConnectionFactory for MemoryWarehouse {
    type Connection = MemoryWarehouse;

    async fn connect(&self) -> Result<MemoryWarehouse, WarehouseError> {
        Ok(self.clone())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::value::Value;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn warehouse() -> MemoryWarehouse {
        MemoryWarehouse::new(vec![
            FlightRecord::new(day(2), "AA", "JFK", "LAX"),
            FlightRecord::new(day(1), "DL", "LAX", "JFK"),
            FlightRecord::new(day(1), "NK", "JFK", "MIA"),
            FlightRecord::new(day(1), "AA", "JFK", "SFO"),
            FlightRecord::new(day(3), "UA", "SFO", "JFK"),
        ])
    }

    #[tokio::test]
    async fn test_busy_airports_counts_and_orders() {
        let rows = warehouse()
            .aggregate(&Aggregation::BusyAirports {
                range: None,
                direction: Direction::Departure,
                limit: 20,
            })
            .await
            .unwrap();

        assert_eq!(
            rows,
            vec![
                Row::new().with("DEPAPT", "JFK").with("ct", 3i64),
                Row::new().with("DEPAPT", "LAX").with("ct", 1i64),
                Row::new().with("DEPAPT", "SFO").with("ct", 1i64),
            ]
        );
    }

    #[tokio::test]
    async fn test_airport_daily_includes_days_without_matches() {
        let rows = warehouse()
            .aggregate(&Aggregation::AirportDaily {
                airport: "LAX".to_string(),
                range: Some(DateRange {
                    begin: day(1),
                    end: day(3),
                }),
            })
            .await
            .unwrap();

        let dates: Vec<_> = rows.iter().map(|r| r.get(FLIGHT_DATE).cloned()).collect();
        assert_eq!(
            dates,
            vec![
                Some(Value::Date(day(1))),
                Some(Value::Date(day(2))),
                Some(Value::Date(day(3)))
            ]
        );
        assert_eq!(rows[0].get("depct"), Some(&Value::Integer(1)));
        assert_eq!(rows[1].get("arrct"), Some(&Value::Integer(1)));
        assert_eq!(rows[2].get("depct"), Some(&Value::Integer(0)));
        assert_eq!(rows[2].get("arrct"), Some(&Value::Integer(0)));
    }

    #[tokio::test]
    async fn test_carriers_drop_unlisted() {
        let rows = warehouse()
            .aggregate(&Aggregation::AirportDailyCarriers {
                airport: "JFK".to_string(),
                range: None,
                direction: Direction::Departure,
            })
            .await
            .unwrap();

        assert_eq!(
            rows,
            vec![
                Row::new().with(FLIGHT_DATE, day(1)).with(CARRIER, "AA").with("ct", 1i64),
                Row::new().with(FLIGHT_DATE, day(2)).with(CARRIER, "AA").with("ct", 1i64),
            ]
        );
    }

    #[test]
    fn test_records_from_json() {
        let warehouse = MemoryWarehouse::from_json(
            br#"[{"FLIGHT_DATE": "2024-01-02", "CARRIER": "AA", "DEPAPT": "JFK", "ARRAPT": "LAX"}]"#,
        )
        .unwrap();
        assert_eq!(
            warehouse.records.as_slice(),
            &[FlightRecord::new(day(2), "AA", "JFK", "LAX")]
        );
    }
}
