use aws_lambda_events::apigw::{ApiGatewayProxyRequest, ApiGatewayProxyResponse};
use aws_lambda_events::encodings::Body;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue};
use lambda_runtime::{Error, LambdaEvent};
use serde_json::json;
use tracing::{error, info, warn};

use crate::config::Endpoint;
use crate::events::redacted_request;
use crate::query::{Aggregation, QueryError};
use crate::value::{stringify_rows, Row};
use crate::warehouse::{ConnectionFactory, Session, Warehouse};

fn query_parameter<'a>(request: &'a ApiGatewayProxyRequest, key: &str) -> Option<&'a str> {
    request.query_string_parameters.first(key)
}

fn path_parameter<'a>(request: &'a ApiGatewayProxyRequest, key: &str) -> Option<&'a str> {
    request.path_parameters.get(key).map(String::as_str)
}

fn json_response(status_code: i64, body: String) -> ApiGatewayProxyResponse {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    ApiGatewayProxyResponse {
        status_code,
        headers,
        body: Some(Body::Text(body)),
        ..Default::default()
    }
}

pub fn wrap_return(rows: &[Row]) -> Result<ApiGatewayProxyResponse, Error> {
    Ok(json_response(200, serde_json::to_string(&stringify_rows(rows))?))
}

pub fn bad_request(message: &str) -> Result<ApiGatewayProxyResponse, Error> {
    Ok(json_response(
        400,
        serde_json::to_string(&json!({ "error": message }))?,
    ))
}

/// Maps the request parameters onto the aggregation for `endpoint`.
pub fn translate(
    endpoint: Endpoint,
    request: &ApiGatewayProxyRequest,
) -> Result<Aggregation, QueryError> {
    let begin = query_parameter(request, "begin");
    let end = query_parameter(request, "end");
    match endpoint {
        Endpoint::BusyAirports => Aggregation::busy_airports(
            begin,
            end,
            query_parameter(request, "deparr"),
            query_parameter(request, "nrows"),
        ),
        Endpoint::AirportDaily => {
            Aggregation::airport_daily(path_parameter(request, "airport"), begin, end)
        }
        Endpoint::AirportDailyCarriers => Aggregation::airport_daily_carriers(
            path_parameter(request, "airport"),
            begin,
            end,
            query_parameter(request, "deparr"),
        ),
    }
}

async fn run<F: ConnectionFactory>(
    session: &Session<F>,
    endpoint: Endpoint,
    request: &ApiGatewayProxyRequest,
) -> Result<Vec<Row>, QueryError> {
    let aggregation = translate(endpoint, request)?;
    let warehouse = session.connection().await?;
    Ok(warehouse.aggregate(&aggregation).await?)
}

// lambda handler
pub async fn handler<F: ConnectionFactory>(
    session: &Session<F>,
    endpoint: Endpoint,
    evt: LambdaEvent<ApiGatewayProxyRequest>,
) -> Result<ApiGatewayProxyResponse, Error> {
    info!(
        "EVENT: {}",
        serde_json::to_string(&redacted_request(&evt.payload))?
    );

    match run(session, endpoint, &evt.payload).await {
        Ok(rows) => {
            info!("{} returned {} rows", endpoint, rows.len());
            wrap_return(&rows)
        }
        Err(e) => match e.validation_message() {
            Some(message) => {
                warn!("Rejecting {} request - {}", endpoint, message);
                bad_request(message)
            }
            None => {
                error!("{} failed - {}", endpoint, e);
                Err(e.into())
            }
        },
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashMap;

    fn request(query: &[(&str, &str)], path: &[(&str, &str)]) -> ApiGatewayProxyRequest {
        let query: HashMap<String, String> = query
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let mut request = ApiGatewayProxyRequest {
            query_string_parameters: query.into(),
            ..Default::default()
        };
        for (k, v) in path {
            request.path_parameters.insert(k.to_string(), v.to_string());
        }
        request
    }

    #[test]
    fn test_translate_busy_airports() {
        let aggregation = translate(
            Endpoint::BusyAirports,
            &request(&[("deparr", "ARRAPT"), ("nrows", "5")], &[]),
        )
        .unwrap();
        assert_eq!(
            aggregation,
            Aggregation::BusyAirports {
                range: None,
                direction: crate::query::Direction::Arrival,
                limit: 5
            }
        );
    }

    #[test]
    fn test_translate_reads_airport_from_path_only() {
        let err = translate(
            Endpoint::AirportDaily,
            &request(&[("airport", "JFK")], &[]),
        )
        .unwrap_err();
        assert!(err.validation_message().is_some());

        let aggregation = translate(
            Endpoint::AirportDaily,
            &request(&[], &[("airport", "JFK")]),
        )
        .unwrap();
        assert_eq!(
            aggregation,
            Aggregation::AirportDaily {
                airport: "JFK".to_string(),
                range: None
            }
        );
    }

    #[test]
    fn test_bad_request_envelope() {
        let response = bad_request("nrows must not be negative, got -1").unwrap();
        assert_eq!(response.status_code, 400);
        assert_eq!(
            response.headers.get(CONTENT_TYPE).unwrap(),
            "application/json"
        );
        match response.body {
            Some(Body::Text(body)) => assert_eq!(
                body,
                r#"{"error":"nrows must not be negative, got -1"}"#
            ),
            other => panic!("unexpected body {:?}", other),
        }
    }
}
