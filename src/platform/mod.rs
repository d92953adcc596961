/// Orbit platform REST client
///
/// Authenticated client for the platform control API. Success and failure are
/// discriminated by the response envelope, not only the transport status: a
/// 200 body may carry `failed: true`, a 201 is always success, a 403 is
/// always permission denied, and an empty body is success with nothing to
/// decode.
pub mod ingress;
pub mod models;
pub mod task;

use chrono::NaiveDateTime;
use reqwest::{header, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use url::Url;

use crate::config::PlatformContext;
use models::Envelope;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Errors from the platform API, split by kind
///
/// Permission failures are distinct from generic transport failures so
/// callers can message the operator precisely.
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    /// The platform answered 200 but flagged the request as failed
    #[error("{message}")]
    ApiFailed { message: String },

    #[error("You do not have the permissions!")]
    PermissionDenied,

    /// Any transport status other than 200, 201 or 403
    #[error("{status}")]
    Transport { status: String },

    #[error("Invalid platform server URL: {0}")]
    BaseUrl(#[from] url::ParseError),

    #[error("Platform request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to decode platform response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("You are not logged in to the platform")]
    NotLoggedIn,
}

/// Authenticated client for the Orbit control API
pub struct PlatformClient {
    base: Url,
    http: reqwest::Client,
    context: PlatformContext,
}

impl PlatformClient {
    /// Build a client from a session context
    pub fn new(context: PlatformContext) -> Result<Self, PlatformError> {
        let base = Url::parse(&context.server)?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            base,
            http,
            context,
        })
    }

    /// Project the session operates in; 0 means unset
    pub fn project_id(&self) -> u64 {
        self.context.project_id
    }

    /// Environment the session operates in; 0 means unset
    pub fn env_id(&self) -> u64 {
        self.context.env_id
    }

    /// Render the session scope for operator-facing output
    pub fn context_info(&self) -> String {
        self.context.context_info()
    }

    /// Guard for operations that need an authenticated session
    pub fn check_logged_in(&self) -> Result<(), PlatformError> {
        if self.context.token.is_empty() {
            return Err(PlatformError::NotLoggedIn);
        }
        Ok(())
    }

    /// Build an authenticated JSON request
    ///
    /// Every request carries the session bearer token and accepts JSON; a
    /// JSON body sets the content type accordingly.
    pub(crate) fn new_request<B: Serialize>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&B>,
    ) -> Result<reqwest::Request, PlatformError> {
        let url = self.base.join(path)?;
        let mut builder = self
            .http
            .request(method, url)
            .header(header::ACCEPT, "application/json")
            .bearer_auth(&self.context.token);
        if !query.is_empty() {
            builder = builder.query(query);
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }
        Ok(builder.build()?)
    }

    /// Build an authenticated form-encoded request
    pub(crate) fn new_request_with_form(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        form: &[(&str, String)],
    ) -> Result<reqwest::Request, PlatformError> {
        let url = self.base.join(path)?;
        let mut builder = self
            .http
            .request(method, url)
            .header(header::ACCEPT, "application/json")
            .bearer_auth(&self.context.token)
            .form(form);
        if !query.is_empty() {
            builder = builder.query(query);
        }
        Ok(builder.build()?)
    }

    /// Execute a request and decode the response into `T`
    ///
    /// The body is read once into a buffer; the envelope check and the target
    /// decode are two independent passes over those same bytes. An empty body
    /// is success with the default value.
    pub(crate) async fn execute<T: DeserializeOwned + Default>(
        &self,
        request: reqwest::Request,
    ) -> Result<T, PlatformError> {
        let response = self.http.execute(request).await?;
        let status = response.status();
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Ok(T::default());
        }
        evaluate_envelope(status, &bytes)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Execute a request and return the raw response text
    pub(crate) async fn execute_text(
        &self,
        request: reqwest::Request,
    ) -> Result<String, PlatformError> {
        let response = self.http.execute(request).await?;
        let status = response.status();
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Ok(String::new());
        }
        evaluate_envelope(status, &bytes)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// Decide success or failure from transport status plus body envelope
///
/// A 200 body that decodes into an envelope with `failed: true` fails with
/// the envelope's message; an undecodable 200 body is not an envelope and
/// passes. 201 always passes regardless of body.
pub(crate) fn evaluate_envelope(status: StatusCode, body: &[u8]) -> Result<(), PlatformError> {
    match status {
        StatusCode::OK => {
            if let Ok(envelope) = serde_json::from_slice::<Envelope>(body) {
                if envelope.failed {
                    return Err(PlatformError::ApiFailed {
                        message: envelope.message,
                    });
                }
            }
            Ok(())
        }
        StatusCode::CREATED => Ok(()),
        StatusCode::FORBIDDEN => Err(PlatformError::PermissionDenied),
        other => Err(PlatformError::Transport {
            status: other.to_string(),
        }),
    }
}

/// Render a duration in seconds as a coarse relative time
///
/// Buckets are closed on the lower bound and open on the upper, with floor
/// division at each boundary.
pub fn relative_time(seconds: u64) -> String {
    const MINUTE: u64 = 60;
    const HOUR: u64 = 60 * MINUTE;
    const DAY: u64 = 24 * HOUR;
    const MONTH: u64 = 30 * DAY;
    const YEAR: u64 = 12 * MONTH;

    if seconds < MINUTE {
        "just now".to_string()
    } else if seconds < HOUR {
        format!("{} minutes ago", seconds / MINUTE)
    } else if seconds < DAY {
        format!("{} hours ago", seconds / HOUR)
    } else if seconds < MONTH {
        format!("{} days ago", seconds / DAY)
    } else if seconds < YEAR {
        format!("{} months ago", seconds / MONTH)
    } else {
        format!("{} years ago", seconds / YEAR)
    }
}

/// Map a platform command status to its operator-facing label
pub fn status_label(status: &str) -> &'static str {
    match status {
        "failed" => "failed",
        "success" => "success",
        "operating" | "doing" => "in-progress",
        _ => "unknown",
    }
}

/// Seconds elapsed since a platform timestamp, None if unparseable
pub(crate) fn seconds_since(timestamp: &str) -> Option<u64> {
    let parsed = NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT).ok()?;
    let elapsed = chrono::Utc::now().naive_utc() - parsed;
    u64::try_from(elapsed.num_seconds()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> PlatformContext {
        PlatformContext {
            server: "http://platform.example.com/api/".to_string(),
            token: "token-123".to_string(),
            project_id: 42,
            env_id: 7,
            ..Default::default()
        }
    }

    #[test]
    fn test_envelope_ok_when_not_failed() {
        let body = br#"{"failed":false,"list":[]}"#;
        assert!(evaluate_envelope(StatusCode::OK, body).is_ok());
        // The same bytes still decode into the caller's target shape.
        let page: models::Page<models::Ingress> = serde_json::from_slice(body).unwrap();
        assert!(page.list.is_empty());
    }

    #[test]
    fn test_envelope_failed_carries_message() {
        let body = br#"{"failed":true,"message":"X"}"#;
        let err = evaluate_envelope(StatusCode::OK, body).unwrap_err();
        assert_eq!(err.to_string(), "X");
    }

    #[test]
    fn test_created_is_success_regardless_of_body() {
        let body = br#"{"failed":true,"message":"ignored"}"#;
        assert!(evaluate_envelope(StatusCode::CREATED, body).is_ok());
    }

    #[test]
    fn test_forbidden_is_fixed_permission_message() {
        let err = evaluate_envelope(StatusCode::FORBIDDEN, b"anything").unwrap_err();
        assert_eq!(err.to_string(), "You do not have the permissions!");
    }

    #[test]
    fn test_other_status_is_transport_failure() {
        let err = evaluate_envelope(StatusCode::BAD_GATEWAY, b"{}").unwrap_err();
        assert!(matches!(err, PlatformError::Transport { .. }));
        assert!(err.to_string().contains("502"));
    }

    #[test]
    fn test_non_envelope_body_passes() {
        assert!(evaluate_envelope(StatusCode::OK, b"[1,2,3]").is_ok());
    }

    #[test]
    fn test_relative_time_buckets() {
        assert_eq!(relative_time(0), "just now");
        assert_eq!(relative_time(59), "just now");
        assert_eq!(relative_time(60), "1 minutes ago");
        assert_eq!(relative_time(3599), "59 minutes ago");
        assert_eq!(relative_time(3600), "1 hours ago");
        assert_eq!(relative_time(86399), "23 hours ago");
        assert_eq!(relative_time(86400), "1 days ago");
        assert_eq!(relative_time(86400 * 30 - 1), "29 days ago");
        assert_eq!(relative_time(86400 * 30), "1 months ago");
        assert_eq!(relative_time(86400 * 30 * 12 - 1), "11 months ago");
        assert_eq!(relative_time(86400 * 30 * 12), "1 years ago");
        assert_eq!(relative_time(86400 * 30 * 12 * 3), "3 years ago");
    }

    #[test]
    fn test_status_label_mapping() {
        assert_eq!(status_label("failed"), "failed");
        assert_eq!(status_label("success"), "success");
        assert_eq!(status_label("operating"), "in-progress");
        assert_eq!(status_label("doing"), "in-progress");
        assert_eq!(status_label("rolling"), "unknown");
        assert_eq!(status_label(""), "unknown");
        // Idempotent: same input, same output.
        assert_eq!(status_label("rolling"), status_label("rolling"));
    }

    #[test]
    fn test_request_carries_auth_and_accept() {
        let client = PlatformClient::new(context()).unwrap();
        let request = client
            .new_request(
                Method::POST,
                "devops/v1/projects/42/ingress",
                &[("page", "0".to_string())],
                Some(&serde_json::json!({"name": "web"})),
            )
            .unwrap();
        let headers = request.headers();
        assert_eq!(headers.get(header::ACCEPT).unwrap(), "application/json");
        assert_eq!(
            headers.get(header::AUTHORIZATION).unwrap(),
            "Bearer token-123"
        );
        assert_eq!(
            headers.get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
        assert!(request.url().path().ends_with("devops/v1/projects/42/ingress"));
        assert_eq!(request.url().query(), Some("page=0"));
    }

    #[test]
    fn test_form_request_sets_urlencoded_content_type() {
        let client = PlatformClient::new(context()).unwrap();
        let request = client
            .new_request_with_form(
                Method::POST,
                "devops/v1/projects/42/deployment_tasks/web/status",
                &[],
                &[("status", "deleted".to_string())],
            )
            .unwrap();
        assert_eq!(
            request.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/x-www-form-urlencoded"
        );
    }

    #[test]
    fn test_base_url_reference_resolution() {
        let client = PlatformClient::new(context()).unwrap();
        let request = client
            .new_request::<()>(Method::GET, "devops/v1/ping", &[], None)
            .unwrap();
        assert_eq!(
            request.url().as_str(),
            "http://platform.example.com/api/devops/v1/ping"
        );
    }

    #[test]
    fn test_not_logged_in_guard() {
        let mut ctx = context();
        ctx.token = String::new();
        let client = PlatformClient::new(ctx).unwrap();
        assert!(matches!(
            client.check_logged_in(),
            Err(PlatformError::NotLoggedIn)
        ));
    }

    #[test]
    fn test_seconds_since_parses_platform_timestamps() {
        assert!(seconds_since("not a timestamp").is_none());
        let past = (chrono::Utc::now() - chrono::Duration::hours(2))
            .format(TIMESTAMP_FORMAT)
            .to_string();
        let elapsed = seconds_since(&past).unwrap();
        assert!((7100..7300).contains(&elapsed));
    }
}
