use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error};

use sheetmirror_api::{MutationRequest, MutationResponse, ReadResponse, Result, SyncError, Value};
use sheetmirror_core::RemoteStore;

use crate::config::{AppsScriptConfig, AppsScriptConfigError};

/// Longest response excerpt kept in error messages
const BODY_EXCERPT: usize = 500;

/// `RemoteStore` over the deployed script's web endpoint.
///
/// Reads are `GET ?action=read&sheetName=..`; writes are a `POST` whose body
/// is the JSON request sent as `text/plain`, which the script endpoint
/// accepts without a CORS preflight. Only reads carry a timeout; a write
/// waits for the endpoint's answer however long it takes.
pub struct AppsScriptClient {
    script_url: String,
    read_timeout: Duration,
    client: reqwest::Client,
}

impl AppsScriptClient {
    pub fn new(config: &AppsScriptConfig) -> std::result::Result<Self, AppsScriptConfigError> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| AppsScriptConfigError::Client(e.to_string()))?;

        Ok(Self {
            script_url: config.script_url.trim().to_string(),
            read_timeout: config.request_timeout(),
            client,
        })
    }

    pub fn script_url(&self) -> &str {
        &self.script_url
    }

    /// Map a transport failure onto the sync error taxonomy
    fn classify_reqwest_error(e: reqwest::Error, operation: &str) -> SyncError {
        if e.is_timeout() {
            SyncError::Timeout {
                message: format!("{}: request took too long", operation),
            }
        } else if e.is_decode() {
            SyncError::Decode {
                message: format!("{}: unexpected response format: {}", operation, e),
            }
        } else if e.is_connect() {
            SyncError::Network {
                message: format!(
                    "{}: connection error, check network connectivity and DNS: {}",
                    operation, e
                ),
            }
        } else if e.is_request() || e.is_redirect() {
            SyncError::Network {
                message: format!("{}: request error: {}", operation, e),
            }
        } else {
            SyncError::Network {
                message: format!("{}: {} ({:?})", operation, e, e),
            }
        }
    }

    /// Read the body; a non-2xx status is a network failure carrying an
    /// excerpt of what came back
    async fn handle_response(response: reqwest::Response, operation: &str) -> Result<String> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Self::classify_reqwest_error(e, operation))?;

        if !status.is_success() {
            return Err(SyncError::Network {
                message: format!(
                    "{}: HTTP {}: {}",
                    operation,
                    status.as_u16(),
                    excerpt(&body)
                ),
            });
        }
        Ok(body)
    }
}

fn excerpt(body: &str) -> String {
    if body.len() > BODY_EXCERPT {
        let cut: String = body.chars().take(BODY_EXCERPT).collect();
        format!("{}... (truncated)", cut)
    } else {
        body.to_string()
    }
}

/// Accepts plain JSON or a JSONP `callback({...})` wrapper
fn strip_jsonp(body: &str) -> &str {
    let trimmed = body.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return trimmed;
    }
    match (trimmed.find('('), trimmed.rfind(')')) {
        (Some(open), Some(close)) if open < close => &trimmed[open + 1..close],
        _ => trimmed,
    }
}

pub(crate) fn parse_read_response(body: &str) -> Result<Vec<Vec<Value>>> {
    let response: ReadResponse =
        serde_json::from_str(strip_jsonp(body)).map_err(|e| SyncError::Decode {
            message: format!("read response: {}: {}", e, excerpt(body)),
        })?;
    response.into_rows()
}

pub(crate) fn parse_mutation_response(body: &str) -> Result<MutationResponse> {
    serde_json::from_str(strip_jsonp(body)).map_err(|e| SyncError::Decode {
        message: format!("write response: {}: {}", e, excerpt(body)),
    })
}

#[async_trait]
impl RemoteStore for AppsScriptClient {
    fn store_name(&self) -> &str {
        "appscript"
    }

    #[tracing::instrument(name = "appscript.read_sheet", skip(self))]
    async fn read_sheet(&self, sheet_name: &str, bust_cache: bool) -> Result<Vec<Vec<Value>>> {
        let operation = format!("read {}", sheet_name);
        let mut query = vec![
            ("action", "read".to_string()),
            ("sheetName", sheet_name.to_string()),
        ];
        if bust_cache {
            query.push(("_t", chrono::Utc::now().timestamp_millis().to_string()));
        }

        let response = self
            .client
            .get(&self.script_url)
            .query(&query)
            .timeout(self.read_timeout)
            .send()
            .await
            .map_err(|e| {
                let err = Self::classify_reqwest_error(e, &operation);
                error!("[AppsScriptClient] {}", err);
                err
            })?;

        let body = Self::handle_response(response, &operation).await?;
        let rows = parse_read_response(&body)?;
        debug!(
            "[AppsScriptClient] Read {} rows from {}",
            rows.len().saturating_sub(1),
            sheet_name
        );
        Ok(rows)
    }

    #[tracing::instrument(
        name = "appscript.send_mutation",
        skip(self, request),
        fields(action = request.action.as_str(), sheet = %request.sheet_name)
    )]
    async fn send_mutation(&self, request: &MutationRequest) -> Result<MutationResponse> {
        let operation = format!("{} {}", request.action.as_str(), request.sheet_name);
        let body = serde_json::to_string(request)?;

        let response = self
            .client
            .post(&self.script_url)
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(body)
            .send()
            .await
            .map_err(|e| {
                let err = Self::classify_reqwest_error(e, &operation);
                error!("[AppsScriptClient] {}", err);
                err
            })?;

        let text = Self::handle_response(response, &operation).await?;
        let reply = parse_mutation_response(&text)?;
        debug!(
            "[AppsScriptClient] {} answered {:?}",
            operation, reply.status
        );
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sheetmirror_api::ResponseStatus;

    #[test]
    fn client_requires_a_valid_url() {
        assert!(AppsScriptClient::new(&AppsScriptConfig::default()).is_err());
        let client =
            AppsScriptClient::new(&AppsScriptConfig::new(" https://example.test/exec ")).unwrap();
        assert_eq!(client.script_url(), "https://example.test/exec");
        assert_eq!(client.store_name(), "appscript");
    }

    #[test]
    fn read_response_rows() {
        let rows = parse_read_response(
            r#"{"status":"success","data":[["ID_Cliente","Nombre_Cliente"],[1,"ACME"]]}"#,
        )
        .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1][0], Value::Integer(1));
    }

    #[test]
    fn read_error_status_is_remote() {
        let err = parse_read_response(r#"{"status":"error","message":"Sheet not found: X"}"#)
            .unwrap_err();
        assert_eq!(err, SyncError::remote("Sheet not found: X"));
    }

    #[test]
    fn jsonp_wrapper_is_accepted() {
        let rows = parse_read_response(r#"cb_123({"status":"success","data":[["ID_Marca"]]});"#)
            .unwrap();
        assert_eq!(rows, vec![vec![Value::from("ID_Marca")]]);
    }

    #[test]
    fn html_error_page_is_a_decode_error() {
        let err = parse_read_response("<html><body>Script function not found</body></html>")
            .unwrap_err();
        assert!(matches!(err, SyncError::Decode { .. }));
        assert!(err.is_transient());
    }

    #[test]
    fn mutation_reply_keeps_error_status() {
        let reply = parse_mutation_response(r#"{"status":"error","message":"Row not found"}"#)
            .unwrap();
        assert_eq!(reply.status, ResponseStatus::Error);
        assert_eq!(reply.message.as_deref(), Some("Row not found"));
    }

    /// Accepts connections and never answers
    async fn silent_endpoint() -> anyhow::Result<AppsScriptConfig> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let mut open = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                open.push(socket);
            }
        });
        Ok(AppsScriptConfig {
            script_url: format!("http://{}/exec", addr),
            request_timeout_ms: 300,
        })
    }

    #[tokio::test]
    async fn slow_read_times_out() -> anyhow::Result<()> {
        let client = AppsScriptClient::new(&silent_endpoint().await?)?;
        let err = client.read_sheet("Clientes", false).await.unwrap_err();
        assert!(matches!(err, SyncError::Timeout { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn slow_write_is_not_cut_off() -> anyhow::Result<()> {
        let client = AppsScriptClient::new(&silent_endpoint().await?)?;
        let request = MutationRequest::delete("Clientes", "7");
        let still_waiting =
            tokio::time::timeout(Duration::from_secs(1), client.send_mutation(&request)).await;
        assert!(still_waiting.is_err());
        Ok(())
    }

    #[test]
    fn long_bodies_are_truncated() {
        let body = "x".repeat(2_000);
        let cut = excerpt(&body);
        assert!(cut.ends_with("(truncated)"));
        assert!(cut.len() < 600);
    }
}
