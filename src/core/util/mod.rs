use anyhow::Context;
use anyhow::Result;
use async_trait::async_trait;
use http::{header::ACCEPT, Request, Response};

/// Generic HTTP client.
///
/// A trait is used here so that the exchange can run over any transport, and so tests can
/// stand in for the remote identity platform.
#[async_trait]
pub trait AsyncHttpClient {
    async fn execute(&self, request: Request<Vec<u8>>) -> Result<Response<Vec<u8>>>;
}

pub(crate) fn base_request() -> http::request::Builder {
    Request::builder().header(ACCEPT, "application/json")
}

/// Read a response body as UTF-8 text.
pub(crate) fn body_text(response: Response<Vec<u8>>) -> Result<String> {
    let status = response.status();
    String::from_utf8(response.into_body())
        .with_context(|| format!("response body is not valid UTF-8 (status: {status})"))
}

#[derive(Debug)]
pub struct ReqwestClient(reqwest::Client);

impl AsRef<reqwest::Client> for ReqwestClient {
    fn as_ref(&self) -> &reqwest::Client {
        &self.0
    }
}

impl ReqwestClient {
    pub fn new() -> Result<Self> {
        reqwest::Client::builder()
            .use_rustls_tls()
            .build()
            .context("unable to build http_client")
            .map(Self)
    }
}

#[async_trait]
impl AsyncHttpClient for ReqwestClient {
    async fn execute(&self, request: Request<Vec<u8>>) -> Result<Response<Vec<u8>>> {
        let response = self
            .0
            .execute(request.try_into().context("unable to convert request")?)
            .await
            .context("http request failed")?;

        let mut builder = Response::builder()
            .status(response.status())
            .version(response.version());

        builder
            .headers_mut()
            .context("unable to set headers")?
            .extend(response.headers().clone());

        builder
            .body(
                response
                    .bytes()
                    .await
                    .context("failed to extract response body")?
                    .to_vec(),
            )
            .context("unable to construct response")
    }
}

#[cfg(test)]
mod test {
    use http::{header::ACCEPT, Response, StatusCode};

    use super::*;

    #[test]
    fn base_request_accepts_json() {
        let request = base_request().uri("https://example.com").body(()).unwrap();
        assert_eq!(request.headers()[ACCEPT], "application/json");
    }

    #[test]
    fn body_text_rejects_invalid_utf8() {
        let response = Response::builder()
            .status(StatusCode::OK)
            .body(vec![0xff, 0xfe])
            .unwrap();
        assert!(body_text(response).is_err());
    }
}
