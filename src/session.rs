use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use reqwest::blocking::Client;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use serde_json::Value;

use crate::error::EcoError;

/// Tokens older than this are renewed before the next authenticated call.
pub const REFRESH_AFTER: Duration = Duration::from_secs(120);

pub const LIBRARY_HEADER: &str = "ecoinvent-api-client-library";
pub const LIBRARY_VERSION_HEADER: &str = "ecoinvent-api-client-library-version";

#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub client_id: String,
}

#[derive(Debug, Clone)]
struct Tokens {
    access_token: String,
    refresh_token: String,
    last_refresh: Instant,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Fresh,
    Stale,
}

/// OAuth password-grant session, owned by a single client.
///
/// Tokens are only replaced after a successful identity response, so a
/// failed login or refresh leaves the previous state untouched.
#[derive(Debug)]
pub struct Session {
    client: Client,
    token_url: String,
    credentials: Credentials,
    headers: HeaderMap,
    tokens: Option<Tokens>,
}

impl Session {
    pub fn new(
        client: Client,
        token_url: impl Into<String>,
        credentials: Credentials,
        headers: HeaderMap,
    ) -> Self {
        Self {
            client,
            token_url: token_url.into(),
            credentials,
            headers,
            tokens: None,
        }
    }

    pub fn username(&self) -> &str {
        &self.credentials.username
    }

    pub fn state(&self) -> SessionState {
        self.state_at(Instant::now())
    }

    pub fn state_at(&self, now: Instant) -> SessionState {
        match &self.tokens {
            None => SessionState::Unauthenticated,
            Some(tokens) if now.saturating_duration_since(tokens.last_refresh) > REFRESH_AFTER => {
                SessionState::Stale
            }
            Some(_) => SessionState::Fresh,
        }
    }

    pub fn login(&mut self) -> Result<(), EcoError> {
        let form = [
            ("username", self.credentials.username.as_str()),
            ("password", self.credentials.password.as_str()),
            ("client_id", self.credentials.client_id.as_str()),
            ("grant_type", "password"),
        ];
        let tokens = self.request_tokens(&form)?;
        self.tokens = Some(tokens);
        tracing::debug!(user = %self.credentials.username, "got initial credentials");
        Ok(())
    }

    pub fn refresh(&mut self) -> Result<(), EcoError> {
        let Some(refresh_token) = self
            .tokens
            .as_ref()
            .map(|tokens| tokens.refresh_token.clone())
        else {
            return self.login();
        };
        let form = [
            ("client_id", self.credentials.client_id.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.as_str()),
        ];
        let tokens = self.request_tokens(&form)?;
        self.tokens = Some(tokens);
        tracing::debug!(user = %self.credentials.username, "renewed credentials");
        Ok(())
    }

    /// Logs in or refreshes as needed and returns the current access token.
    pub fn ensure_fresh(&mut self) -> Result<&str, EcoError> {
        match self.state() {
            SessionState::Unauthenticated => self.login()?,
            SessionState::Stale => self.refresh()?,
            SessionState::Fresh => {}
        }
        self.tokens
            .as_ref()
            .map(|tokens| tokens.access_token.as_str())
            .ok_or_else(|| EcoError::Authentication {
                status: 0,
                message: "no access token after login".to_string(),
            })
    }

    /// Identity headers plus a bearer token, refreshed first if needed.
    pub fn authorized_headers(&mut self) -> Result<HeaderMap, EcoError> {
        let token = self.ensure_fresh()?.to_string();
        let mut headers = self.headers.clone();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|err| EcoError::Authentication {
                    status: 0,
                    message: err.to_string(),
                })?,
        );
        Ok(headers)
    }

    fn request_tokens(&self, form: &[(&str, &str)]) -> Result<Tokens, EcoError> {
        let response = self
            .client
            .post(&self.token_url)
            .headers(self.headers.clone())
            .form(form)
            .send()
            .map_err(|err| EcoError::Http(err.to_string()))?;

        let status = response.status();
        if status.is_success() {
            let body: TokenResponse = response
                .json()
                .map_err(|err| EcoError::Json(err.to_string()))?;
            return Ok(Tokens {
                access_token: body.access_token,
                refresh_token: body.refresh_token,
                last_refresh: Instant::now(),
            });
        }

        let text = response.text().unwrap_or_default();
        Err(EcoError::Authentication {
            status: status.as_u16(),
            message: login_error_message(&text),
        })
    }
}

/// Library identity headers merged with caller headers.
///
/// Caller headers are applied last, so a caller header with the same name
/// replaces the library one.
pub fn identity_headers(custom: &BTreeMap<String, String>) -> Result<HeaderMap, EcoError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        LIBRARY_HEADER,
        HeaderValue::from_static(env!("CARGO_PKG_NAME")),
    );
    headers.insert(
        LIBRARY_VERSION_HEADER,
        HeaderValue::from_static(env!("CARGO_PKG_VERSION")),
    );
    for (name, value) in custom {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|err| EcoError::Http(format!("invalid header {name}: {err}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|err| EcoError::Http(format!("invalid value for header {name}: {err}")))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

fn login_error_message(body: &str) -> String {
    let messages = serde_json::from_str::<BTreeMap<String, Value>>(body)
        .map(|fields| {
            fields
                .into_iter()
                .filter(|(key, _)| key.to_lowercase().contains("error"))
                .map(|(_, value)| match value {
                    Value::String(text) => text,
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    if messages.is_empty() {
        return "given credentials can't log in".to_string();
    }
    if messages
        .iter()
        .any(|message| message.contains("Account is not fully set up"))
    {
        tracing::warn!("action required: log in to ecoquery to update your account");
    }
    messages.join("; ")
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use mockito::Matcher;

    use super::*;

    const TOKENS: &str = r#"{"access_token": "access-1", "refresh_token": "refresh-1"}"#;

    fn session(server: &mockito::Server) -> Session {
        let credentials = Credentials {
            username: "blue".to_string(),
            password: "red".to_string(),
            client_id: "apiv2".to_string(),
        };
        let headers = identity_headers(&BTreeMap::new()).unwrap();
        Session::new(
            Client::new(),
            format!("{}/token", server.url()),
            credentials,
            headers,
        )
    }

    #[test]
    fn login_then_fresh_until_stale() {
        let mut server = mockito::Server::new();
        let login = server
            .mock("POST", "/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "password".into()),
                Matcher::UrlEncoded("username".into(), "blue".into()),
                Matcher::UrlEncoded("client_id".into(), "apiv2".into()),
            ]))
            .match_header(LIBRARY_HEADER, env!("CARGO_PKG_NAME"))
            .with_status(200)
            .with_body(TOKENS)
            .expect(1)
            .create();
        let refresh = server
            .mock("POST", "/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
                Matcher::UrlEncoded("refresh_token".into(), "refresh-1".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"access_token": "access-2", "refresh_token": "refresh-2"}"#)
            .expect(1)
            .create();

        let mut session = session(&server);
        assert_eq!(session.state(), SessionState::Unauthenticated);
        assert_eq!(session.ensure_fresh().unwrap(), "access-1");
        assert_eq!(session.ensure_fresh().unwrap(), "access-1");
        assert_eq!(session.state(), SessionState::Fresh);

        let later = Instant::now() + REFRESH_AFTER + Duration::from_secs(1);
        assert_eq!(session.state_at(later), SessionState::Stale);

        if let Some(tokens) = session.tokens.as_mut() {
            tokens.last_refresh = Instant::now()
                .checked_sub(REFRESH_AFTER + Duration::from_secs(1))
                .unwrap();
        }
        assert_eq!(session.ensure_fresh().unwrap(), "access-2");

        login.assert();
        refresh.assert();
    }

    #[test]
    fn failed_login_reports_status_and_keeps_state() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("POST", "/token")
            .with_status(401)
            .with_body(r#"{"error": "invalid_grant", "error_description": "Invalid user credentials"}"#)
            .create();

        let mut session = session(&server);
        let err = session.login().unwrap_err();
        assert_matches!(
            err,
            EcoError::Authentication { status: 401, ref message } if message.contains("Invalid user credentials")
        );
        assert_eq!(session.state(), SessionState::Unauthenticated);
    }

    #[test]
    fn custom_headers_override_library_headers() {
        let mut custom = BTreeMap::new();
        custom.insert(LIBRARY_HEADER.to_string(), "other".to_string());
        custom.insert(
            "ecoinvent-api-client-library-is-test".to_string(),
            "true".to_string(),
        );
        let headers = identity_headers(&custom).unwrap();
        assert_eq!(headers.get(LIBRARY_HEADER).unwrap(), "other");
        assert_eq!(
            headers.get("ecoinvent-api-client-library-is-test").unwrap(),
            "true"
        );
        assert_eq!(
            headers.get(LIBRARY_VERSION_HEADER).unwrap(),
            env!("CARGO_PKG_VERSION")
        );
    }
}
