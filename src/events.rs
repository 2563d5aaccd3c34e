use std::collections::HashMap;

use aws_lambda_events::apigw::ApiGatewayProxyRequest;
use http::header::AUTHORIZATION;
use http::HeaderValue;
use serde::de::{self, Deserialize, Deserializer};
use serde::Serialize;
use serde_json::{Map, Value};

const REDACTED: &str = "<redacted>";

/// ARN of the API method (REST APIs) or route (HTTP APIs) being authorized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvokedArn {
    Method(String),
    Route(String),
}

impl InvokedArn {
    pub fn as_str(&self) -> &str {
        match self {
            InvokedArn::Method(arn) | InvokedArn::Route(arn) => arn,
        }
    }
}

/// Request-type authorizer event from either API flavour.
#[derive(Debug, Clone)]
pub struct AuthorizerEvent {
    pub headers: HashMap<String, String>,
    pub arn: Option<InvokedArn>,
    raw: Value,
}

impl AuthorizerEvent {
    /// Authorization header value. The lowercase `authorization` key wins;
    /// otherwise the first key matching without regard to case, by name order.
    pub fn authorization(&self) -> Option<&str> {
        if let Some(value) = self.headers.get(AUTHORIZATION.as_str()) {
            return Some(value.as_str());
        }
        self.headers
            .iter()
            .filter(|(name, _)| name.eq_ignore_ascii_case(AUTHORIZATION.as_str()))
            .min_by(|(a, _), (b, _)| a.cmp(b))
            .map(|(_, value)| value.as_str())
    }

    /// The event as received, with credentials blanked out, for logging.
    pub fn redacted(&self) -> Value {
        let mut raw = self.raw.clone();
        for key in ["headers", "multiValueHeaders"] {
            if let Some(Value::Object(headers)) = raw.get_mut(key) {
                redact_headers(headers);
            }
        }
        // REQUEST authorizers may also receive the token in identitySource
        if let Some(Value::Array(sources)) = raw.get_mut("identitySource") {
            sources.iter_mut().for_each(|s| *s = Value::from(REDACTED));
        }
        if raw.get("authorizationToken").is_some() {
            raw["authorizationToken"] = Value::from(REDACTED);
        }
        raw
    }
}

fn redact_headers(headers: &mut Map<String, Value>) {
    for (name, value) in headers.iter_mut() {
        if name.eq_ignore_ascii_case(AUTHORIZATION.as_str()) {
            *value = match value {
                Value::Array(values) => Value::Array(vec![Value::from(REDACTED); values.len()]),
                _ => Value::from(REDACTED),
            };
        }
    }
}

impl<'de> Deserialize<'de> for AuthorizerEvent {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Value = Deserialize::deserialize(deserializer)?;
        if !raw.is_object() {
            return Err(de::Error::custom(format!(
                "unsupported authorizer event: {raw}"
            )));
        }

        let headers = match raw.get("headers") {
            None | Some(Value::Null) => HashMap::new(),
            Some(headers) => HashMap::<String, String>::deserialize(headers)
                .map_err(|e| de::Error::custom(format!("invalid authorizer headers - {e}")))?,
        };

        let arn_field = |field: &str| raw.get(field).and_then(Value::as_str).map(str::to_string);
        let arn = if let Some(arn) = arn_field("methodArn") {
            tracing::debug!("rest api authorizer event detected");
            Some(InvokedArn::Method(arn))
        } else if let Some(arn) = arn_field("routeArn") {
            tracing::debug!("http api authorizer event detected");
            Some(InvokedArn::Route(arn))
        } else {
            None
        };

        Ok(AuthorizerEvent { headers, arn, raw })
    }
}

impl Serialize for AuthorizerEvent {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.redacted().serialize(serializer)
    }
}

/// Proxy request with its Authorization header blanked out, for logging.
pub fn redacted_request(request: &ApiGatewayProxyRequest) -> ApiGatewayProxyRequest {
    let mut request = request.clone();
    let redacted = HeaderValue::from_static(REDACTED);
    if request.headers.contains_key(AUTHORIZATION) {
        request.headers.insert(AUTHORIZATION, redacted.clone());
    }
    if request.multi_value_headers.contains_key(AUTHORIZATION) {
        request.multi_value_headers.insert(AUTHORIZATION, redacted);
    }
    request
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rest_event() {
        let event: AuthorizerEvent = serde_json::from_value(json!({
            "type": "REQUEST",
            "methodArn": "arn:aws:execute-api:us-east-1:123456789012:abcdef123/prod/GET/busy_airports",
            "headers": {"Authorization": "Basic YWRtaW46c2VjcmV0"}
        }))
        .unwrap();

        assert_eq!(
            event.arn,
            Some(InvokedArn::Method(
                "arn:aws:execute-api:us-east-1:123456789012:abcdef123/prod/GET/busy_airports"
                    .to_string()
            ))
        );
        assert_eq!(event.authorization(), Some("Basic YWRtaW46c2VjcmV0"));
    }

    #[test]
    fn test_http_event_with_lowercase_header() {
        let event: AuthorizerEvent = serde_json::from_value(json!({
            "version": "2.0",
            "type": "REQUEST",
            "routeArn": "arn:aws:execute-api:us-east-1:123456789012:abcdef123/$default/GET/airport_daily/JFK",
            "headers": {"authorization": "Basic YWRtaW46c2VjcmV0"}
        }))
        .unwrap();

        assert!(matches!(event.arn, Some(InvokedArn::Route(_))));
        assert_eq!(event.authorization(), Some("Basic YWRtaW46c2VjcmV0"));
    }

    #[test]
    fn test_lowercase_authorization_header_wins() {
        let event: AuthorizerEvent = serde_json::from_value(json!({
            "methodArn": "arn:aws:execute-api:us-east-1:123456789012:abcdef123/prod/GET/x",
            "headers": {
                "Authorization": "Basic dXBwZXI6Y2FzZQ==",
                "authorization": "Basic bG93ZXI6Y2FzZQ==",
                "AUTHORIZATION": "Basic c2hvdXQ6Y2FzZQ=="
            }
        }))
        .unwrap();
        assert_eq!(event.authorization(), Some("Basic bG93ZXI6Y2FzZQ=="));
    }

    #[test]
    fn test_missing_headers_and_arn() {
        let event: AuthorizerEvent = serde_json::from_value(json!({"headers": null})).unwrap();
        assert!(event.headers.is_empty());
        assert_eq!(event.arn, None);
        assert_eq!(event.authorization(), None);
    }

    #[test]
    fn test_redacted_event_hides_credentials() {
        let event: AuthorizerEvent = serde_json::from_value(json!({
            "methodArn": "arn:aws:execute-api:us-east-1:123456789012:abcdef123/prod/GET/x",
            "headers": {"Authorization": "Basic YWRtaW46c2VjcmV0", "Host": "example.com"},
            "multiValueHeaders": {"authorization": ["Basic YWRtaW46c2VjcmV0"]},
            "identitySource": ["Basic YWRtaW46c2VjcmV0"]
        }))
        .unwrap();

        let logged = serde_json::to_string(&event).unwrap();
        assert!(!logged.contains("YWRtaW46c2VjcmV0"), "{}", logged);
        assert!(logged.contains("example.com"));
        assert!(logged.contains("methodArn"));
    }

    #[test]
    fn test_redacted_request() {
        let mut request = ApiGatewayProxyRequest::default();
        request.headers.insert(
            AUTHORIZATION,
            HeaderValue::from_static("Basic YWRtaW46c2VjcmV0"),
        );
        request
            .headers
            .insert("x-trace", HeaderValue::from_static("abc"));

        let redacted = redacted_request(&request);
        assert_eq!(redacted.headers.get(AUTHORIZATION).unwrap(), REDACTED);
        assert_eq!(redacted.headers.get("x-trace").unwrap(), "abc");
        assert!(!redacted.multi_value_headers.contains_key(AUTHORIZATION));
    }
}
