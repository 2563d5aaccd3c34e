//! API Gateway request authorizer checking Basic credentials.

use std::fmt;

use base64::prelude::*;
use lambda_runtime::{Error, LambdaEvent};
use serde::Serialize;
use subtle::ConstantTimeEq;
use tracing::{info, warn};

use crate::config::AuthorizerConfig;
use crate::events::AuthorizerEvent;

pub const POLICY_VERSION: &str = "2012-10-17";
pub const INVOKE_ACTION: &str = "execute-api:Invoke";
pub const ANONYMOUS_PRINCIPAL: &str = "anonymous";

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum AuthorizerError {
    #[error("authorizer event has neither methodArn nor routeArn")]
    MissingArn,
    #[error("invalid execute-api arn {0}")]
    InvalidArn(String),
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum CredentialError {
    #[error("authorization header has no credential token")]
    MissingToken,
    #[error("credential token is not valid base64 - {0}")]
    Encoding(#[from] base64::DecodeError),
    #[error("credential token is not valid utf-8")]
    Utf8,
    #[error("credential token has no ':' separator")]
    MissingSeparator,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Allow,
    Deny,
}

/// Username and password carried by a Basic authorization header.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    /// Parses `"<scheme> <base64(user:pass)>"`. The last space-separated token
    /// is the credential; the password is everything after the first `:`.
    pub fn from_header(header: &str) -> Result<Credentials, CredentialError> {
        let token = header
            .split(' ')
            .next_back()
            .filter(|token| !token.is_empty())
            .ok_or(CredentialError::MissingToken)?;
        let decoded = BASE64_STANDARD.decode(token)?;
        let decoded = String::from_utf8(decoded).map_err(|_| CredentialError::Utf8)?;
        let (username, password) = decoded
            .split_once(':')
            .ok_or(CredentialError::MissingSeparator)?;
        Ok(Credentials {
            username: username.to_string(),
            password: password.to_string(),
        })
    }

    pub fn matches(&self, config: &AuthorizerConfig) -> bool {
        let username = self.username.as_bytes().ct_eq(config.username.as_bytes());
        let password = self.password.as_bytes().ct_eq(config.password.as_bytes());
        (username & password).into()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// `arn:aws:execute-api:<region>:<account>:<apiId>/<stage>/*/*` for the API
/// and stage of the invoked method or route.
pub fn resource_pattern(arn: &str) -> Result<String, AuthorizerError> {
    let invalid = || AuthorizerError::InvalidArn(arn.to_string());
    let parts: Vec<&str> = arn.split(':').collect();
    if parts.len() < 6 || parts[0] != "arn" {
        return Err(invalid());
    }
    let (region, account) = (parts[3], parts[4]);
    let mut api = parts[5].split('/');
    let (api_id, stage) = match (api.next(), api.next()) {
        (Some(api_id), Some(stage)) => (api_id, stage),
        _ => return Err(invalid()),
    };
    if [region, account, api_id, stage].iter().any(|p| p.is_empty()) {
        return Err(invalid());
    }

    Ok(format!(
        "arn:aws:execute-api:{}:{}:{}/{}/*/*",
        region, account, api_id, stage
    ))
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct Statement {
    pub action: String,
    pub effect: Effect,
    pub resource: Vec<String>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    pub version: String,
    pub statement: Vec<Statement>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizerResponse {
    pub principal_id: String,
    pub policy_document: PolicyDocument,
}

impl AuthorizerResponse {
    pub fn new(principal_id: &str, effect: Effect, resource: String) -> Self {
        AuthorizerResponse {
            principal_id: principal_id.to_string(),
            policy_document: PolicyDocument {
                version: POLICY_VERSION.to_string(),
                statement: vec![Statement {
                    action: INVOKE_ACTION.to_string(),
                    effect,
                    resource: vec![resource],
                }],
            },
        }
    }

    pub fn effect(&self) -> Effect {
        self.policy_document
            .statement
            .iter()
            .map(|s| s.effect)
            .find(|effect| *effect == Effect::Deny)
            .unwrap_or(Effect::Allow)
    }
}

/// Decides access for one event. Credential problems are a Deny; a missing or
/// malformed invocation ARN is an error.
pub fn authorize(
    config: &AuthorizerConfig,
    event: &AuthorizerEvent,
) -> Result<AuthorizerResponse, AuthorizerError> {
    let arn = event.arn.as_ref().ok_or(AuthorizerError::MissingArn)?;
    let resource = resource_pattern(arn.as_str())?;

    let Some(header) = event.authorization() else {
        info!("No authorization header, denying");
        return Ok(AuthorizerResponse::new(ANONYMOUS_PRINCIPAL, Effect::Deny, resource));
    };

    let credentials = match Credentials::from_header(header) {
        Ok(credentials) => credentials,
        Err(e) => {
            warn!("Unreadable authorization header, denying - {}", e);
            return Ok(AuthorizerResponse::new(ANONYMOUS_PRINCIPAL, Effect::Deny, resource));
        }
    };

    let effect = if credentials.matches(config) {
        Effect::Allow
    } else {
        info!("Invalid username or password");
        Effect::Deny
    };

    Ok(AuthorizerResponse::new(&credentials.username, effect, resource))
}

// lambda handler
pub async fn handler(
    config: &AuthorizerConfig,
    evt: LambdaEvent<AuthorizerEvent>,
) -> Result<AuthorizerResponse, Error> {
    info!("EVENT: {}", serde_json::to_string(&evt.payload)?);
    let response = authorize(config, &evt.payload)?;
    info!(
        principal = %response.principal_id,
        effect = ?response.effect(),
        "authorization decided"
    );
    Ok(response)
}
