//! HTTP gateway for content fetching.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use super::GatewayError;

const USER_AGENT: &str = concat!("newsmill/", env!("CARGO_PKG_VERSION"));

/// A fetched response with its body already read.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub final_url: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type").map(String::as_str)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Body and headers of a successfully fetched page.
pub type FetchedPage = (String, HashMap<String, String>);

/// Facade over the HTTP client with stable method signatures.
#[async_trait]
pub trait HttpGateway: Send + Sync {
    /// GET a URL and read the whole body, whatever the status.
    async fn fetch(
        &self,
        url: &str,
        headers: Option<&HashMap<String, String>>,
    ) -> Result<HttpResponse, GatewayError>;

    /// GET a URL expecting a successful text response.
    ///
    /// Non-2xx statuses become classified gateway errors.
    async fn fetch_content(
        &self,
        url: &str,
        headers: Option<&HashMap<String, String>>,
    ) -> Result<FetchedPage, GatewayError> {
        let response = self.fetch(url, headers).await?;
        if !response.is_success() {
            return Err(GatewayError::from_status(
                StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                url,
            ));
        }
        Ok((response.text(), response.headers))
    }

    /// HEAD a URL. `allow_statuses` suppresses the error for listed codes.
    async fn head(
        &self,
        url: &str,
        headers: Option<&HashMap<String, String>>,
        allow_statuses: Option<&[u16]>,
    ) -> Result<HttpResponse, GatewayError>;

    /// Download a (possibly large) binary body.
    async fn download(&self, url: &str) -> Result<Vec<u8>, GatewayError>;
}

/// Production implementation backed by reqwest.
#[derive(Clone)]
pub struct ReqwestHttpGateway {
    client: Client,
}

impl ReqwestHttpGateway {
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .gzip(true)
            .brotli(true)
            .build()
            .expect("Failed to create HTTP client");
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl HttpGateway for ReqwestHttpGateway {
    async fn fetch(
        &self,
        url: &str,
        headers: Option<&HashMap<String, String>>,
    ) -> Result<HttpResponse, GatewayError> {
        let mut request = self.client.get(url);
        if let Some(headers) = headers {
            for (name, value) in headers {
                request = request.header(name, value);
            }
        }

        let response = request.send().await?;
        let status = response.status();
        let final_url = response.url().to_string();
        let response_headers = header_map(&response);
        let body = response.bytes().await?.to_vec();

        Ok(HttpResponse {
            status: status.as_u16(),
            headers: response_headers,
            body,
            final_url,
        })
    }

    async fn head(
        &self,
        url: &str,
        headers: Option<&HashMap<String, String>>,
        allow_statuses: Option<&[u16]>,
    ) -> Result<HttpResponse, GatewayError> {
        let mut request = self.client.head(url);
        if let Some(headers) = headers {
            for (name, value) in headers {
                request = request.header(name, value);
            }
        }

        let response = request.send().await?;
        let status = response.status();
        let allowed = allow_statuses
            .map(|codes| codes.contains(&status.as_u16()))
            .unwrap_or(false);
        if !status.is_success() && !allowed {
            return Err(GatewayError::from_status(status, url));
        }

        Ok(HttpResponse {
            status: status.as_u16(),
            headers: header_map(&response),
            body: Vec::new(),
            final_url: response.url().to_string(),
        })
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, GatewayError> {
        use futures::StreamExt;

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::from_status(status, url));
        }

        let mut body = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            body.extend_from_slice(&chunk?);
        }
        Ok(body)
    }
}

fn header_map(response: &reqwest::Response) -> HashMap<String, String> {
    response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_helpers() {
        let response = HttpResponse {
            status: 200,
            headers: HashMap::from([("content-type".to_string(), "text/html".to_string())]),
            body: b"<html></html>".to_vec(),
            final_url: "https://a.example".to_string(),
        };
        assert!(response.is_success());
        assert_eq!(response.content_type(), Some("text/html"));
        assert_eq!(response.text(), "<html></html>");

        let failed = HttpResponse {
            status: 404,
            ..response
        };
        assert!(!failed.is_success());
    }
}
