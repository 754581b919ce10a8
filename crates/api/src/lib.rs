pub mod error;
pub mod retry;
pub mod verbose;

use chrono::Utc;
use error::{ErrorResult, Result};
use reqwest::header::{HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::multipart::Form;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use retry::{sleep_or_cancel, RetryConfig};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

pub use error::ApiError;
pub use reqwest::multipart;
pub use verbose::VerboseLog;

/// Versioned prefix every request path is appended to.
pub const API_PREFIX: &str = "/rest/api/3";

const JSON: &str = "application/json";
const ANTI_CSRF: &str = "X-Atlassian-Token";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// One logical call. Retried attempts re-send it unchanged.
#[derive(Clone, Debug)]
pub struct Request {
    pub method: Method,
    pub path: String,
    pub body: Option<Vec<u8>>,
    /// Set for multipart uploads; suppresses the JSON content type.
    pub content_type: Option<String>,
    pub form: Option<FormFactory>,
}

/// Produces the multipart form for each attempt. A `Form` is consumed when
/// sent, so a retried upload needs a fresh one.
#[derive(Clone)]
pub struct FormFactory(Arc<dyn Fn() -> Form + Send + Sync>);

impl FormFactory {
    pub fn new(make: impl Fn() -> Form + Send + Sync + 'static) -> Self {
        Self(Arc::new(make))
    }

    fn build(&self) -> Form {
        (self.0)()
    }
}

impl fmt::Debug for FormFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FormFactory")
    }
}

impl Request {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            content_type: None,
            form: None,
        }
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_form(mut self, form: FormFactory) -> Self {
        self.form = Some(form);
        self
    }

    fn is_multipart(&self) -> bool {
        self.content_type.is_some() || self.form.is_some()
    }
}

/// Successful response of a raw download.
#[derive(Clone, Debug)]
pub struct RawResponse {
    pub body: Vec<u8>,
    pub content_type: Option<String>,
}

#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    email: String,
    token: String,
    timeout: Duration,
    retry_config: RetryConfig,
    verbose: Option<VerboseLog>,
    cancel: CancellationToken,
}

impl ApiClient {
    pub fn new(base_url: impl AsRef<str>) -> Result<Self> {
        let base_url = base_url.as_ref().trim_end_matches('/');
        Url::parse(base_url)?;

        let client = Client::builder()
            .user_agent(format!("jira-cli/{}", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.to_string(),
            email: String::new(),
            token: String::new(),
            timeout: DEFAULT_TIMEOUT,
            retry_config: RetryConfig::default(),
            verbose: None,
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_basic_auth(mut self, email: impl Into<String>, token: impl Into<String>) -> Self {
        self.email = email.into();
        self.token = token.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }

    pub fn with_verbose(mut self, log: VerboseLog) -> Self {
        self.verbose = Some(log);
        self
    }

    /// Replaces the token whose cancellation aborts pending retry waits.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn get(&self, path: &str) -> Result<Vec<u8>> {
        self.send(Request::new(Method::GET, path)).await
    }

    pub async fn post(&self, path: &str, body: Option<Vec<u8>>) -> Result<Vec<u8>> {
        self.send(Self::json_request(Method::POST, path, body)).await
    }

    pub async fn put(&self, path: &str, body: Option<Vec<u8>>) -> Result<Vec<u8>> {
        self.send(Self::json_request(Method::PUT, path, body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<Vec<u8>> {
        self.send(Request::new(Method::DELETE, path)).await
    }

    /// GET returning the body together with its declared content type.
    pub async fn get_raw(&self, path: &str) -> Result<RawResponse> {
        let (body, content_type) = self.execute(&Request::new(Method::GET, path)).await?;
        Ok(RawResponse { body, content_type })
    }

    /// POST of a pre-encoded multipart body. `content_type` carries the
    /// boundary, e.g. `multipart/form-data; boundary=...`.
    pub async fn post_multipart(
        &self,
        path: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<Vec<u8>> {
        let request = Request::new(Method::POST, path)
            .with_body(body)
            .with_content_type(content_type);
        self.send(request).await
    }

    /// POST of a `multipart/form-data` form built by `make_form`, which is
    /// called again for every retried attempt.
    pub async fn post_form(
        &self,
        path: &str,
        make_form: impl Fn() -> Form + Send + Sync + 'static,
    ) -> Result<Vec<u8>> {
        let request = Request::new(Method::POST, path).with_form(FormFactory::new(make_form));
        self.send(request).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        decode(&self.get(path).await?)
    }

    pub async fn post_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let body = serde_json::to_vec(body)?;
        decode(&self.post(path, Some(body)).await?)
    }

    pub async fn put_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let body = serde_json::to_vec(body)?;
        decode(&self.put(path, Some(body)).await?)
    }

    pub async fn send(&self, request: Request) -> Result<Vec<u8>> {
        self.execute(&request).await.map(|(body, _)| body)
    }

    fn json_request(method: Method, path: &str, body: Option<Vec<u8>>) -> Request {
        let request = Request::new(method, path);
        match body {
            Some(body) => request.with_body(body),
            None => request,
        }
    }

    async fn execute(&self, request: &Request) -> Result<(Vec<u8>, Option<String>)> {
        let url = self.url_for(&request.path)?;
        let max_retries = self.retry_config.max_retries;
        let mut attempt = 0;

        loop {
            debug!(method = %request.method, url = %url, attempt, "Sending request");
            let started = Instant::now();

            let response = match self.build(request, url.clone()).send().await {
                Ok(response) => response,
                Err(err) => {
                    self.log_attempt(request, "error", started.elapsed());
                    warn!(method = %request.method, path = %request.path, error = %err, "Request failed");
                    return Err(err.into());
                }
            };

            let status = response.status();

            if status == StatusCode::TOO_MANY_REQUESTS && attempt < max_retries {
                self.log_attempt(request, status.as_u16(), started.elapsed());
                let wait = self
                    .retry_config
                    .wait_for(response.headers(), attempt, Utc::now());
                warn!(
                    path = %request.path,
                    attempt = attempt + 1,
                    wait_ms = wait.as_millis() as u64,
                    "Rate limited, retrying"
                );
                if let Some(log) = &self.verbose {
                    log.line(format_args!(
                        "rate limited, waiting {:?} before retry {}/{}",
                        wait,
                        attempt + 1,
                        max_retries
                    ));
                }

                sleep_or_cancel(wait, &self.cancel).await?;
                attempt += 1;
                continue;
            }

            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let body = match response.bytes().await {
                Ok(body) => body,
                Err(err) => {
                    self.log_attempt(request, "error", started.elapsed());
                    warn!(method = %request.method, path = %request.path, error = %err, "Reading response body failed");
                    return Err(err.into());
                }
            };
            self.log_attempt(request, status.as_u16(), started.elapsed());

            if status.as_u16() >= 400 {
                if status == StatusCode::TOO_MANY_REQUESTS {
                    warn!(attempts = attempt + 1, "Max retries exceeded");
                }
                return Err(Self::error_result(request, status, &body).into());
            }

            if attempt > 0 {
                debug!(attempts = attempt + 1, "Request succeeded after retries");
            }
            return Ok((body.to_vec(), content_type));
        }
    }

    fn error_result(request: &Request, status: StatusCode, body: &[u8]) -> ErrorResult {
        let method = request.method.clone();

        if request.is_multipart() && status == StatusCode::PAYLOAD_TOO_LARGE {
            return ErrorResult::size_limit(method, &request.path);
        }

        ErrorResult::from_body(status, method, &request.path, body)
    }

    fn url_for(&self, path: &str) -> Result<Url> {
        let separator = if path.starts_with('/') { "" } else { "/" };
        let joined = format!("{}{}{}{}", self.base_url, API_PREFIX, separator, path);
        Ok(Url::parse(&joined)?)
    }

    fn build(&self, request: &Request, url: Url) -> RequestBuilder {
        let mut req = self
            .client
            .request(request.method.clone(), url)
            .basic_auth(&self.email, Some(&self.token))
            .timeout(self.timeout)
            .header(ACCEPT, HeaderValue::from_static(JSON));

        if let Some(form) = &request.form {
            // reqwest sets the multipart Content-Type with the form's boundary.
            return req.header(ANTI_CSRF, "no-check").multipart(form.build());
        }

        match &request.content_type {
            Some(content_type) => {
                req = req
                    .header(CONTENT_TYPE, content_type.as_str())
                    .header(ANTI_CSRF, "no-check");
            }
            None if request.body.is_some() => {
                req = req.header(CONTENT_TYPE, HeaderValue::from_static(JSON));
            }
            None => {}
        }

        if let Some(body) = &request.body {
            req = req.body(body.clone());
        }

        req
    }

    fn log_attempt(&self, request: &Request, outcome: impl fmt::Display, elapsed: Duration) {
        if let Some(log) = &self.verbose {
            log.line(format_args!(
                "{} {} -> {} ({:?})",
                request.method,
                request.path,
                outcome,
                verbose::round_millis(elapsed)
            ));
        }
    }
}

fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    // 204 responses carry no body; decode them as JSON null.
    let body = if body.is_empty() { b"null" as &[u8] } else { body };
    Ok(serde_json::from_slice(body)?)
}
