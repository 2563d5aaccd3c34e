//! Snowflake over its SQL REST API.
//!
//! Credentials come from a Secrets Manager secret holding a JSON document with
//! at least `account` and `token`. Statements are submitted with positional
//! text bindings, long-running statements are polled on their handle, and
//! results spread across partitions are fetched in partition order.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_secretsmanager::operation::get_secret_value::GetSecretValueError;
use aws_sdk_secretsmanager::Client as SecretsClient;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeDelta};
use http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use http::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, error, info};

use crate::config::QueryConfig;
use crate::query::sql::{self, Statement, TableName};
use crate::query::Aggregation;
use crate::value::{Row, Value};
use crate::warehouse::{ConnectionFactory, Warehouse, WarehouseError};

const STATEMENTS_PATH: &str = "/api/v2/statements";
const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(thiserror::Error, Debug)]
pub enum CredentialsError {
    #[error("Failed to access AWS Secrets Manager. Please make sure the lambda function has permissions to access the {secret_id} secret. Error: {error:?}")]
    FailedToAccessSecretsManager {
        secret_id: String,
        error: GetSecretValueError,
    },
    #[error("Didn't find the {secret_id} secret in AWS secretsmanager")]
    MissingSecret { secret_id: String },
    #[error("The {secret_id} secret is not a valid warehouse credentials document - {error}")]
    InvalidSecret {
        secret_id: String,
        error: serde_json::Error,
    },
}

#[derive(Deserialize, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub account: String,
    pub token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    pub database: Option<String>,
    pub schema: Option<String>,
    pub role: Option<String>,
    /// Overrides `https://<account>.snowflakecomputing.com`.
    pub host: Option<String>,
}

fn default_token_type() -> String {
    "OAUTH".to_string()
}

impl Credentials {
    pub fn base_url(&self) -> String {
        match &self.host {
            Some(host) => host.trim_end_matches('/').to_string(),
            None => format!("https://{}.snowflakecomputing.com", self.account),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("account", &self.account)
            .field("token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("database", &self.database)
            .field("schema", &self.schema)
            .field("role", &self.role)
            .field("host", &self.host)
            .finish()
    }
}

pub async fn get_credentials_from_secrets_manager(
    secretsmanager: &SecretsClient,
    secret_id: &str,
) -> Result<Credentials, CredentialsError> {
    let response = secretsmanager
        .get_secret_value()
        .secret_id(secret_id)
        .send()
        .await
        .map_err(|error| CredentialsError::FailedToAccessSecretsManager {
            secret_id: secret_id.to_string(),
            error: error.into_service_error(),
        })?;
    let secret = response
        .secret_string
        .ok_or_else(|| CredentialsError::MissingSecret {
            secret_id: secret_id.to_string(),
        })?;
    serde_json::from_str(&secret).map_err(|error| CredentialsError::InvalidSecret {
        secret_id: secret_id.to_string(),
        error,
    })
}

/// Opens [`SqlApiSession`]s using credentials from Secrets Manager.
pub struct SnowflakeConnector {
    secretsmanager: SecretsClient,
    http: reqwest::Client,
    secret_id: String,
    warehouse: String,
    table: TableName,
}

impl SnowflakeConnector {
    pub fn new(aws_config: &SdkConfig, config: &QueryConfig) -> Self {
        Self::with_clients(SecretsClient::new(aws_config), reqwest::Client::new(), config)
    }

    pub fn with_clients(
        secretsmanager: SecretsClient,
        http: reqwest::Client,
        config: &QueryConfig,
    ) -> Self {
        SnowflakeConnector {
            secretsmanager,
            http,
            secret_id: config.secret_id.clone(),
            warehouse: config.warehouse.clone(),
            table: config.table.clone(),
        }
    }
}

#[async_trait]
impl ConnectionFactory for SnowflakeConnector {
    type Connection = SqlApiSession;

    async fn connect(&self) -> Result<SqlApiSession, WarehouseError> {
        let credentials = get_credentials_from_secrets_manager(&self.secretsmanager, &self.secret_id)
            .await
            .inspect_err(|e| error!("Failed to retrieve credentials from Secrets Manager: {}", e))?;
        debug!(?credentials, "retrieved warehouse credentials");
        Ok(SqlApiSession::new(
            self.http.clone(),
            credentials,
            &self.warehouse,
            self.table.clone(),
        ))
    }
}

#[derive(Serialize, Debug)]
struct Binding<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    value: &'a str,
}

#[derive(Serialize, Debug)]
struct StatementRequest<'a> {
    statement: &'a str,
    warehouse: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    database: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    schema: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    bindings: BTreeMap<String, Binding<'a>>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct StatementResponse {
    result_set_meta_data: Option<ResultSetMetaData>,
    #[serde(default)]
    data: Vec<Vec<Option<String>>>,
    statement_handle: Option<String>,
    message: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct ResultSetMetaData {
    #[serde(default)]
    row_type: Vec<ColumnType>,
    #[serde(default)]
    partition_info: Vec<serde_json::Value>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ColumnType {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub scale: Option<i64>,
}

/// A connection to one Snowflake account and warehouse.
#[derive(Debug)]
pub struct SqlApiSession {
    http: reqwest::Client,
    credentials: Credentials,
    base_url: String,
    warehouse: String,
    table: TableName,
}

impl SqlApiSession {
    pub fn new(
        http: reqwest::Client,
        credentials: Credentials,
        warehouse: &str,
        table: TableName,
    ) -> Self {
        SqlApiSession {
            http,
            base_url: credentials.base_url(),
            credentials,
            warehouse: warehouse.to_string(),
            table,
        }
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header(AUTHORIZATION, format!("Bearer {}", self.credentials.token))
            .header(
                "X-Snowflake-Authorization-Token-Type",
                self.credentials.token_type.as_str(),
            )
            .header(ACCEPT, "application/json")
            .header(
                USER_AGENT,
                concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")),
            )
    }

    pub async fn execute(&self, statement: &Statement) -> Result<Vec<Row>, WarehouseError> {
        let bindings = statement
            .bindings
            .iter()
            .enumerate()
            .map(|(i, value)| {
                (
                    (i + 1).to_string(),
                    Binding {
                        kind: "TEXT",
                        value,
                    },
                )
            })
            .collect();
        let body = StatementRequest {
            statement: &statement.sql,
            warehouse: &self.warehouse,
            database: self.credentials.database.as_deref(),
            schema: self.credentials.schema.as_deref(),
            role: self.credentials.role.as_deref(),
            bindings,
        };

        debug!(sql = %statement.sql, bindings = ?statement.bindings, "submitting statement");
        let response = self
            .request(self.http.post(format!("{}{}", self.base_url, STATEMENTS_PATH)))
            .header(CONTENT_TYPE, "application/json")
            .json(&body)
            .send()
            .await?;
        let mut result = read_response(response).await?;

        while result.status == StatusCode::ACCEPTED {
            let handle = statement_handle(&result.body)?;
            debug!(%handle, "statement still running");
            tokio::time::sleep(POLL_INTERVAL).await;
            result = read_response(self.get_statement(&handle, None).await?).await?;
        }

        let mut body = result.body;
        let meta = body
            .result_set_meta_data
            .take()
            .ok_or_else(|| WarehouseError::Decode("response has no result set metadata".to_string()))?;

        let mut data = std::mem::take(&mut body.data);
        if meta.partition_info.len() > 1 {
            let handle = statement_handle(&body)?;
            for partition in 1..meta.partition_info.len() {
                let response = self.get_statement(&handle, Some(partition)).await?;
                let mut page = read_response(response).await?;
                data.append(&mut page.body.data);
            }
        }

        info!("Received {} rows from warehouse", data.len());
        decode_rows(&meta.row_type, data)
    }

    async fn get_statement(
        &self,
        handle: &str,
        partition: Option<usize>,
    ) -> Result<reqwest::Response, WarehouseError> {
        let mut builder = self
            .request(self.http.get(format!("{}{}/{}", self.base_url, STATEMENTS_PATH, handle)));
        if let Some(partition) = partition {
            builder = builder.query(&[("partition", partition)]);
        }
        Ok(builder.send().await?)
    }
}

#[async_trait]
impl Warehouse for SqlApiSession {
    async fn aggregate(&self, aggregation: &Aggregation) -> Result<Vec<Row>, WarehouseError> {
        info!("Running {}", aggregation);
        let statement = sql::render(aggregation, &self.table);
        self.execute(&statement).await
    }
}

struct ApiResult {
    status: StatusCode,
    body: StatementResponse,
}

async fn read_response(response: reqwest::Response) -> Result<ApiResult, WarehouseError> {
    let status = response.status();
    let text = response.text().await?;
    let body: StatementResponse = if text.trim().is_empty() {
        StatementResponse::default()
    } else {
        serde_json::from_str(&text).map_err(|e| {
            WarehouseError::Decode(format!("status {} with unreadable body - {}", status, e))
        })?
    };

    if status == StatusCode::UNPROCESSABLE_ENTITY {
        let message = body
            .message
            .unwrap_or_else(|| "statement could not be executed".to_string());
        return Err(WarehouseError::InvalidStatement(message));
    }
    if !status.is_success() {
        return Err(WarehouseError::Status {
            status: status.as_u16(),
            message: body.message.unwrap_or_default(),
        });
    }

    Ok(ApiResult { status, body })
}

fn statement_handle(body: &StatementResponse) -> Result<String, WarehouseError> {
    body.statement_handle
        .clone()
        .ok_or_else(|| WarehouseError::Decode("response has no statement handle".to_string()))
}

fn decode_rows(
    columns: &[ColumnType],
    data: Vec<Vec<Option<String>>>,
) -> Result<Vec<Row>, WarehouseError> {
    data.into_iter()
        .map(|values| {
            if values.len() != columns.len() {
                return Err(WarehouseError::Decode(format!(
                    "row has {} values for {} columns",
                    values.len(),
                    columns.len()
                )));
            }
            let mut row = Row::new();
            for (column, value) in columns.iter().zip(values) {
                row.insert(&column.name, decode_value(column, value)?);
            }
            Ok(row)
        })
        .collect()
}

/// Decodes one JSON result value according to its declared column type.
pub fn decode_value(column: &ColumnType, raw: Option<String>) -> Result<Value, WarehouseError> {
    let Some(raw) = raw else {
        return Ok(Value::Null);
    };
    let invalid = |e: &dyn fmt::Display| {
        WarehouseError::Decode(format!(
            "invalid {} value {:?} in column {} - {}",
            column.kind, raw, column.name, e
        ))
    };

    let value = match column.kind.to_ascii_lowercase().as_str() {
        "fixed" if column.scale.unwrap_or(0) == 0 => match raw.parse::<i64>() {
            Ok(n) => Value::Integer(n),
            // NUMBER(38, 0) can exceed i64
            Err(_) => Value::Float(raw.parse::<f64>().map_err(|e| invalid(&e))?),
        },
        "fixed" | "real" => Value::Float(raw.parse::<f64>().map_err(|e| invalid(&e))?),
        "boolean" => Value::Bool(raw.parse::<bool>().map_err(|e| invalid(&e))?),
        "date" => {
            let days = raw.parse::<i64>().map_err(|e| invalid(&e))?;
            Value::Date(date_from_epoch_days(days).ok_or_else(|| invalid(&"out of range"))?)
        }
        "timestamp_ntz" | "timestamp_ltz" | "timestamp_tz" => {
            // timestamp_tz carries the offset after a space
            let seconds = raw.split_whitespace().next().unwrap_or_default();
            Value::DateTime(datetime_from_epoch(seconds).ok_or_else(|| invalid(&"out of range"))?)
        }
        _ => Value::String(raw.clone()),
    };
    Ok(value)
}

fn date_from_epoch_days(days: i64) -> Option<NaiveDate> {
    DateTime::UNIX_EPOCH
        .date_naive()
        .checked_add_signed(TimeDelta::try_days(days)?)
}

fn datetime_from_epoch(raw: &str) -> Option<NaiveDateTime> {
    let (seconds, fraction) = raw.split_once('.').unwrap_or((raw, "0"));
    let mut seconds = seconds.parse::<i64>().ok()?;
    if fraction.len() > 9 || !fraction.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let mut nanos = format!("{:0<9}", fraction).parse::<u32>().ok()?;
    if raw.starts_with('-') && nanos > 0 {
        seconds -= 1;
        nanos = 1_000_000_000 - nanos;
    }
    DateTime::from_timestamp(seconds, nanos).map(|dt| dt.naive_utc())
}

#[cfg(test)]
mod test {
    use super::*;

    fn column(kind: &str, scale: Option<i64>) -> ColumnType {
        ColumnType {
            name: "C".to_string(),
            kind: kind.to_string(),
            scale,
        }
    }

    #[test]
    fn test_decode_scalars() {
        assert_eq!(
            decode_value(&column("fixed", Some(0)), Some("42".to_string())).unwrap(),
            Value::Integer(42)
        );
        assert_eq!(
            decode_value(&column("fixed", Some(2)), Some("4.25".to_string())).unwrap(),
            Value::Float(4.25)
        );
        assert_eq!(
            decode_value(&column("boolean", None), Some("true".to_string())).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            decode_value(&column("text", None), Some("JFK".to_string())).unwrap(),
            Value::String("JFK".to_string())
        );
        assert_eq!(decode_value(&column("text", None), None).unwrap(), Value::Null);
    }

    #[test]
    fn test_decode_dates() {
        assert_eq!(
            decode_value(&column("date", None), Some("19723".to_string())).unwrap(),
            Value::Date(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())
        );
        assert_eq!(
            decode_value(&column("timestamp_ntz", Some(9)), Some("1704067205.500000000".to_string()))
                .unwrap(),
            Value::DateTime(
                NaiveDate::from_ymd_opt(2024, 1, 1)
                    .unwrap()
                    .and_hms_milli_opt(0, 0, 5, 500)
                    .unwrap()
            )
        );
        assert_eq!(
            decode_value(&column("timestamp_tz", Some(9)), Some("1704067200.000000000 1440".to_string()))
                .unwrap(),
            Value::DateTime(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_negative_timestamp() {
        assert_eq!(
            datetime_from_epoch("-1.250000000"),
            NaiveDate::from_ymd_opt(1969, 12, 31)
                .unwrap()
                .and_hms_milli_opt(23, 59, 58, 750)
        );
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_value(&column("fixed", Some(0)), Some("abc".to_string())).is_err());
        assert!(decode_value(&column("date", None), Some("2024-01-01".to_string())).is_err());
    }

    #[test]
    fn test_decode_rows_checks_width() {
        let columns = vec![column("text", None)];
        let err = decode_rows(&columns, vec![vec![Some("a".to_string()), None]]).unwrap_err();
        assert!(matches!(err, WarehouseError::Decode(_)));
    }

    #[test]
    fn test_credentials_debug_hides_token() {
        let credentials: Credentials =
            serde_json::from_str(r#"{"account": "xy12345", "token": "s3cr3t"}"#).unwrap();
        assert_eq!(credentials.token_type, "OAUTH");
        assert_eq!(credentials.base_url(), "https://xy12345.snowflakecomputing.com");
        assert!(!format!("{:?}", credentials).contains("s3cr3t"));
    }
}
