use std::str::FromStr;
use std::string::String;
use std::{env, fmt};

use crate::query::sql::TableName;

/// Credentials the authorizer accepts.
#[derive(Clone)]
pub struct AuthorizerConfig {
    pub username: String,
    pub password: String,
}

impl AuthorizerConfig {
    pub fn load_from_env() -> Result<AuthorizerConfig, String> {
        Ok(AuthorizerConfig {
            username: env::var("USERNAME").map_err(|e| format!("USERNAME not set - {}", e))?,
            password: env::var("PASSWORD").map_err(|e| format!("PASSWORD not set - {}", e))?,
        })
    }
}

impl fmt::Debug for AuthorizerConfig {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("AuthorizerConfig")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Which aggregation endpoint a deployment of the query service serves.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum Endpoint {
    BusyAirports,
    AirportDaily,
    AirportDailyCarriers,
}

impl FromStr for Endpoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "busy_airports" => Ok(Endpoint::BusyAirports),
            "airport_daily" => Ok(Endpoint::AirportDaily),
            "airport_daily_carriers" => Ok(Endpoint::AirportDailyCarriers),
            other => Err(format!("Invalid or Unsupported query handler {}", other)),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Endpoint::BusyAirports => f.write_str("busy_airports"),
            Endpoint::AirportDaily => f.write_str("airport_daily"),
            Endpoint::AirportDailyCarriers => f.write_str("airport_daily_carriers"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueryConfig {
    pub table: TableName,
    pub secret_id: String,
    pub warehouse: String,
    pub endpoint: Endpoint,
}

impl QueryConfig {
    pub fn load_from_env() -> Result<QueryConfig, String> {
        let conf = QueryConfig {
            table: env::var("SNOW_TABLE")
                .map_err(|e| format!("SNOW_TABLE not set - {}", e))
                .and_then(|s| s.parse::<TableName>())?,
            secret_id: env::var("DB_SECRET_NAME")
                .map_err(|e| format!("DB_SECRET_NAME not set - {}", e))?,
            warehouse: env::var("DB_WAREHOUSE")
                .map_err(|e| format!("DB_WAREHOUSE not set - {}", e))?,
            endpoint: env::var("QUERY_HANDLER")
                .map_err(|e| format!("QUERY_HANDLER not set - {}", e))
                .and_then(|s| s.parse::<Endpoint>())?,
        };

        Ok(conf)
    }
}
