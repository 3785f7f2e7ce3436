use std::sync::Arc;

use anyhow::Context;
use http::{
    header::{AUTHORIZATION, CONTENT_TYPE},
    HeaderName, HeaderValue, Method, Response, StatusCode,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::{
    config::Config,
    core::{
        token::{AuthToken, PasswordGrant, TokenManager},
        util::{base_request, body_text, AsyncHttpClient},
    },
    error::ExchangeError,
};

/// How many times a request is repeated with a refreshed token after a 401.
const MAX_AUTH_RETRIES: usize = 1;

/// An outbound call to the issuance or verification API.
///
/// The bearer token is not part of the request; [ExchangeClient::send] adds the current one.
#[derive(Debug, Clone)]
pub struct ExchangeRequest {
    method: Method,
    url: Url,
    headers: Vec<(HeaderName, HeaderValue)>,
    body: Vec<u8>,
}

impl ExchangeRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// A POST request with a JSON body.
    pub fn post_json<T: Serialize + ?Sized>(url: Url, body: &T) -> Result<Self, ExchangeError> {
        let body = serde_json::to_vec(body).context("unable to serialize request body")?;
        Ok(Self::new(Method::POST, url)
            .with_header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .with_body(body))
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.push((name, value));
        self
    }

    /// Add a header whose name and value are only known at runtime.
    pub fn try_with_header(self, name: &str, value: &str) -> Result<Self, ExchangeError> {
        let name = HeaderName::try_from(name)
            .with_context(|| format!("invalid header name '{name}'"))?;
        let value = HeaderValue::try_from(value)
            .with_context(|| format!("invalid value for header '{name}'"))?;
        Ok(self.with_header(name, value))
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    fn to_http(&self, token: &AuthToken) -> Result<http::Request<Vec<u8>>, ExchangeError> {
        let mut request = base_request()
            .method(self.method.clone())
            .uri(self.url.as_str())
            .body(self.body.clone())
            .context("failed to construct request")?;

        // Request specific headers replace the defaults.
        let headers = request.headers_mut();
        for (name, value) in &self.headers {
            headers.insert(name.clone(), value.clone());
        }
        let mut authorization =
            HeaderValue::try_from(token.bearer()).context("bearer token is not a valid header")?;
        authorization.set_sensitive(true);
        headers.insert(AUTHORIZATION, authorization);

        Ok(request)
    }
}

/// Authenticated access to the issuance and verification APIs.
#[derive(Clone)]
pub struct ExchangeClient {
    http_client: Arc<dyn AsyncHttpClient + Send + Sync>,
    tokens: Arc<TokenManager>,
}

impl std::fmt::Debug for ExchangeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeClient")
            .field("tokens", &self.tokens)
            .finish_non_exhaustive()
    }
}

impl ExchangeClient {
    pub fn new(
        http_client: Arc<dyn AsyncHttpClient + Send + Sync>,
        tokens: Arc<TokenManager>,
    ) -> Self {
        Self {
            http_client,
            tokens,
        }
    }

    /// Authenticate with the configured password grant and return a client carrying the token.
    pub async fn connect(
        http_client: Arc<dyn AsyncHttpClient + Send + Sync>,
        config: &Config,
    ) -> Result<Self, ExchangeError> {
        let grant = PasswordGrant::from_config(http_client.clone(), config);
        let tokens = TokenManager::start(Arc::new(grant)).await?;
        Ok(Self::new(http_client, tokens))
    }

    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    /// Send the request with the current bearer token.
    ///
    /// A 401 triggers one token refresh and one retry; a second 401 fails with
    /// [ExchangeError::AuthFailed]. Other non-success statuses fail with
    /// [ExchangeError::RemoteRequestFailed] and are never retried.
    pub async fn send(
        &self,
        request: &ExchangeRequest,
    ) -> Result<Response<Vec<u8>>, ExchangeError> {
        let mut token = self.tokens.current_token().await?;
        let mut retries = 0;

        loop {
            let response = self
                .http_client
                .execute(request.to_http(&token)?)
                .await
                .with_context(|| format!("{} {} failed", request.method, request.url))?;
            let status = response.status();
            debug!(method = %request.method, url = %request.url, %status, "exchange call");

            if status == StatusCode::UNAUTHORIZED {
                if retries == MAX_AUTH_RETRIES {
                    return Err(ExchangeError::auth_failed(format!(
                        "{} {} is still unauthorized after refreshing the token",
                        request.method, request.url
                    )));
                }
                retries += 1;
                warn!(url = %request.url, "unauthorized, refreshing bearer token");
                token = self.tokens.replace_rejected(&token).await?;
                continue;
            }

            if !status.is_success() {
                let body = body_text(response).unwrap_or_default();
                return Err(ExchangeError::RemoteRequestFailed { status, body });
            }

            return Ok(response);
        }
    }

    /// Send the request and return the response body as text.
    pub async fn send_text(&self, request: &ExchangeRequest) -> Result<String, ExchangeError> {
        let response = self.send(request).await?;
        Ok(body_text(response)?)
    }

    /// Send the request and parse the JSON response body into `T`.
    pub async fn send_json<T: DeserializeOwned>(
        &self,
        request: &ExchangeRequest,
    ) -> Result<T, ExchangeError> {
        let body = self.send_text(request).await?;
        serde_json::from_str(&body).map_err(|e| {
            ExchangeError::invalid_response(format!(
                "{} {} returned an unexpected body: {e}",
                request.method, request.url
            ))
        })
    }
}
