use reqwest::Client;
use serde::Deserialize;

use crate::error::MailError;

const CLIENT_ID_VAR: &str = "K1MAIL_CLIENT_ID";
const CLIENT_SECRET_VAR: &str = "K1MAIL_CLIENT_SECRET";
const TENANT_ID_VAR: &str = "K1MAIL_TENANT_ID";
const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";

/// App registration used for the client-credentials grant.
#[derive(Clone)]
pub struct GraphCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub tenant_id: String,
}

impl std::fmt::Debug for GraphCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphCredentials")
            .field("client_id", &self.client_id)
            .field("tenant_id", &self.tenant_id)
            .finish_non_exhaustive()
    }
}

impl GraphCredentials {
    /// Reads the three `K1MAIL_*` variables (a `.env` file is honored).
    pub fn from_env() -> Result<Self, MailError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, MailError> {
        let get = |name: &'static str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or(MailError::MissingCredential(name))
        };
        Ok(Self {
            client_id: get(CLIENT_ID_VAR)?,
            client_secret: get(CLIENT_SECRET_VAR)?,
            tenant_id: get(TENANT_ID_VAR)?,
        })
    }

    pub fn token_url(&self) -> String {
        format!(
            "https://login.microsoftonline.com/{}/oauth2/v2.0/token",
            self.tenant_id
        )
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Bearer token for Microsoft Graph.
pub async fn fetch_access_token(client: &Client, creds: &GraphCredentials) -> Result<String, MailError> {
    tracing::info!("Requesting Graph access token for client {}", creds.client_id);

    let resp = client
        .post(creds.token_url())
        .form(&[
            ("grant_type", "client_credentials"),
            ("client_id", creds.client_id.as_str()),
            ("client_secret", creds.client_secret.as_str()),
            ("scope", GRAPH_SCOPE),
        ])
        .send()
        .await?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(MailError::Token {
            status: status.as_u16(),
            body,
        });
    }

    let token: TokenResponse = resp.json().await?;
    Ok(token.access_token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn reads_all_three_variables() {
        let vars: HashMap<&str, &str> = [
            (CLIENT_ID_VAR, "app-id"),
            (CLIENT_SECRET_VAR, "s3cret"),
            (TENANT_ID_VAR, "tenant-1"),
        ]
        .into();
        let creds = GraphCredentials::from_lookup(|n| vars.get(n).map(|v| v.to_string())).unwrap();
        assert_eq!(creds.client_id, "app-id");
        assert_eq!(
            creds.token_url(),
            "https://login.microsoftonline.com/tenant-1/oauth2/v2.0/token"
        );
        assert!(!format!("{creds:?}").contains("s3cret"));
    }

    #[test]
    fn blank_or_missing_variable_is_reported_by_name() {
        let vars: HashMap<&str, &str> = [(CLIENT_ID_VAR, "app-id"), (CLIENT_SECRET_VAR, " ")].into();
        let err = GraphCredentials::from_lookup(|n| vars.get(n).map(|v| v.to_string())).unwrap_err();
        assert!(matches!(err, MailError::MissingCredential(CLIENT_SECRET_VAR)));
    }
}
