//! Spreadsheet values API client.
//!
//! The mirror is reached only through three operations: list every row,
//! overwrite one row, append one row. [`SheetsClient`] implements them on
//! top of the Google Sheets v4 `values` endpoints.

use std::sync::Arc;

use agenda_core::MirrorDocumentId;
use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::instrument;

use super::MirrorError;
use super::token::{TokenSource, token_source};
use crate::config::MirrorConfig;

/// Row-level access to a tenant's mirror document.
///
/// Row indices are zero-based and count the header as row 0.
#[async_trait]
pub trait MirrorService: Send + Sync {
    /// Every row of the document, header first. Trailing blank cells may be
    /// omitted.
    async fn list_rows(&self, document: &MirrorDocumentId) -> Result<Vec<Vec<String>>, MirrorError>;

    /// Overwrite the row at `index` with `cells`.
    async fn update_row(
        &self,
        document: &MirrorDocumentId,
        index: usize,
        cells: &[String],
    ) -> Result<(), MirrorError>;

    /// Append `cells` after the last row.
    async fn add_row(&self, document: &MirrorDocumentId, cells: &[String]) -> Result<(), MirrorError>;
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ValueRangeBody<'a> {
    major_dimension: &'static str,
    values: [&'a [String]; 1],
}

fn cell_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Google Sheets v4 client.
///
/// A request the API answers with 401 is sent once more with a freshly
/// obtained token.
#[derive(Clone)]
pub struct SheetsClient {
    inner: Arc<SheetsClientInner>,
}

struct SheetsClientInner {
    client: reqwest::Client,
    base_url: String,
    tokens: Box<dyn TokenSource>,
    sheet_name: String,
}

impl SheetsClient {
    /// Create a new spreadsheet client sharing `client`.
    #[must_use]
    pub fn new(client: reqwest::Client, config: &MirrorConfig) -> Self {
        Self {
            inner: Arc::new(SheetsClientInner {
                tokens: token_source(client.clone(), &config.credentials),
                client,
                base_url: config.base_url.as_str().trim_end_matches('/').to_owned(),
                sheet_name: config.sheet_name.clone(),
            }),
        }
    }

    /// A1 range on the configured sheet, e.g. `'Agendamentos'!A3`.
    fn range(&self, cells: &str) -> String {
        let sheet = self.inner.sheet_name.replace('\'', "''");
        if cells.is_empty() {
            format!("'{sheet}'")
        } else {
            format!("'{sheet}'!{cells}")
        }
    }

    fn values_url(&self, document: &MirrorDocumentId, range: &str, suffix: &str) -> String {
        format!(
            "{}/{}/values/{}{suffix}",
            self.inner.base_url,
            urlencoding::encode(document.as_str()),
            urlencoding::encode(range)
        )
    }

    /// Send a request and map HTTP failures to [`MirrorError`].
    async fn send(
        &self,
        document: &MirrorDocumentId,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, MirrorError> {
        let retry = request.try_clone();
        let mut response = self.authorized(request).await?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED
            && let Some(retry) = retry
            && self.inner.tokens.invalidate().await
        {
            tracing::info!(document = %document, "Mirror token rejected, retrying with a fresh one");
            response = self.authorized(retry).await?;
        }

        let status = response.status();

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            let text = response.text().await.unwrap_or_default();
            return Err(MirrorError::Unauthorized(text.chars().take(200).collect()));
        }

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(1);
            return Err(MirrorError::RateLimited(retry_after));
        }

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(MirrorError::DocumentNotFound(document.to_string()));
        }

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(MirrorError::Status {
                status: status.as_u16(),
                body: text.chars().take(200).collect(),
            });
        }

        Ok(response)
    }

    async fn authorized(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, MirrorError> {
        let token = self.inner.tokens.access_token().await?;
        Ok(request.bearer_auth(token.expose_secret()).send().await?)
    }
}

#[async_trait]
impl MirrorService for SheetsClient {
    #[instrument(skip(self), fields(document = %document))]
    async fn list_rows(&self, document: &MirrorDocumentId) -> Result<Vec<Vec<String>>, MirrorError> {
        let url = self.values_url(document, &self.range(""), "?majorDimension=ROWS");
        let response = self.send(document, self.inner.client.get(&url)).await?;
        let range: ValueRange = response.json().await?;

        Ok(range
            .values
            .into_iter()
            .map(|row| row.into_iter().map(cell_text).collect())
            .collect())
    }

    #[instrument(skip(self, cells), fields(document = %document))]
    async fn update_row(
        &self,
        document: &MirrorDocumentId,
        index: usize,
        cells: &[String],
    ) -> Result<(), MirrorError> {
        let url = self.values_url(
            document,
            &self.range(&format!("A{}", index + 1)),
            "?valueInputOption=RAW",
        );
        let body = ValueRangeBody {
            major_dimension: "ROWS",
            values: [cells],
        };
        self.send(document, self.inner.client.put(&url).json(&body))
            .await?;
        Ok(())
    }

    #[instrument(skip(self, cells), fields(document = %document))]
    async fn add_row(&self, document: &MirrorDocumentId, cells: &[String]) -> Result<(), MirrorError> {
        let url = self.values_url(
            document,
            &self.range("A1"),
            ":append?valueInputOption=RAW&insertDataOption=INSERT_ROWS",
        );
        let body = ValueRangeBody {
            major_dimension: "ROWS",
            values: [cells],
        };
        self.send(document, self.inner.client.post(&url).json(&body))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::MirrorCredentials;
    use secrecy::SecretString;
    use url::Url;
    use wiremock::matchers::{header, method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(sheet: &str) -> SheetsClient {
        SheetsClient::new(
            reqwest::Client::new(),
            &MirrorConfig {
                base_url: Url::parse("https://sheets.example.com/v4/spreadsheets/").unwrap(),
                credentials: MirrorCredentials::AccessToken(SecretString::from("token")),
                sheet_name: sheet.to_owned(),
            },
        )
    }

    fn served_by(server: &MockServer, credentials: MirrorCredentials) -> SheetsClient {
        SheetsClient::new(
            reqwest::Client::new(),
            &MirrorConfig {
                base_url: Url::parse(&format!("{}/v4/spreadsheets", server.uri())).unwrap(),
                credentials,
                sheet_name: "Agendamentos".to_owned(),
            },
        )
    }

    async fn mount_token_endpoint(server: &MockServer, tokens: &[&str]) {
        for (n, token) in tokens.iter().enumerate() {
            Mock::given(method("POST"))
                .and(path("/token"))
                .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                    "access_token": token,
                    "expires_in": 3599
                })))
                .up_to_n_times(1)
                .with_priority(u8::try_from(n + 1).unwrap())
                .expect(1)
                .mount(server)
                .await;
        }
    }

    #[tokio::test]
    async fn test_expired_token_is_refreshed_and_request_retried() {
        let server = MockServer::start().await;
        mount_token_endpoint(&server, &["stale", "fresh"]).await;
        Mock::given(method("GET"))
            .and(path_regex("^/v4/spreadsheets/doc1/values/"))
            .and(header("authorization", "Bearer stale"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path_regex("^/v4/spreadsheets/doc1/values/"))
            .and(header("authorization", "Bearer fresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "values": [["id"], ["1"]]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = served_by(
            &server,
            MirrorCredentials::RefreshToken {
                token_url: Url::parse(&format!("{}/token", server.uri())).unwrap(),
                client_id: "agenda-client".to_owned(),
                client_secret: SecretString::from("client-secret"),
                refresh_token: SecretString::from("refresh-token"),
            },
        );

        let rows = client.list_rows(&MirrorDocumentId::new("doc1")).await.unwrap();
        assert_eq!(rows, vec![vec!["id".to_owned()], vec!["1".to_owned()]]);
    }

    #[tokio::test]
    async fn test_rejected_static_token_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path_regex("^/v4/spreadsheets/doc1/values/"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid credentials"))
            .expect(1)
            .mount(&server)
            .await;

        let client = served_by(
            &server,
            MirrorCredentials::AccessToken(SecretString::from("expired")),
        );

        let err = client
            .update_row(&MirrorDocumentId::new("doc1"), 0, &["id".to_owned()])
            .await
            .unwrap_err();
        assert!(matches!(err, MirrorError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_rate_limit_reports_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path_regex(":append$"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "7"))
            .mount(&server)
            .await;

        let client = served_by(
            &server,
            MirrorCredentials::AccessToken(SecretString::from("token")),
        );

        let err = client
            .add_row(&MirrorDocumentId::new("doc1"), &["1".to_owned()])
            .await
            .unwrap_err();
        assert!(matches!(err, MirrorError::RateLimited(7)));
    }

    #[test]
    fn test_range_quotes_sheet_name() {
        let client = client("Jo's Agenda");
        assert_eq!(client.range(""), "'Jo''s Agenda'");
        assert_eq!(client.range("A3"), "'Jo''s Agenda'!A3");
    }

    #[test]
    fn test_values_url_encodes_range() {
        let client = client("Agendamentos");
        let url = client.values_url(
            &MirrorDocumentId::new("doc1"),
            &client.range("A2"),
            "?valueInputOption=RAW",
        );
        assert_eq!(
            url,
            "https://sheets.example.com/v4/spreadsheets/doc1/values/%27Agendamentos%27%21A2?valueInputOption=RAW"
        );
    }

    #[test]
    fn test_value_range_cells_become_text() {
        let range: ValueRange = serde_json::from_value(serde_json::json!({
            "range": "Agendamentos!A1:C2",
            "values": [["id", "confirmed"], ["1", true], [null, 3]]
        }))
        .unwrap();
        let rows: Vec<Vec<String>> = range
            .values
            .into_iter()
            .map(|row| row.into_iter().map(cell_text).collect())
            .collect();
        assert_eq!(rows[1], vec!["1".to_owned(), "true".to_owned()]);
        assert_eq!(rows[2], vec![String::new(), "3".to_owned()]);
    }

    #[test]
    fn test_empty_sheet_has_no_values() {
        let range: ValueRange =
            serde_json::from_value(serde_json::json!({"range": "Agendamentos!A1:Z1000"})).unwrap();
        assert!(range.values.is_empty());
    }
}
