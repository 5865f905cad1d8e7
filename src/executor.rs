// Request executor: one HTTP call per request, authenticated with the caller's session token

use crate::config::ClientConfig;
use crate::error::{ClientError, Failure};
use crate::session::SessionToken;
use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            query: Vec::new(),
            headers: Vec::new(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Post, path).body(body)
    }

    pub fn put(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Put, path).body(body)
    }

    pub fn patch(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Patch, path).body(body)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

// A 2xx response. Anything else comes back as Failure::Status.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Option<Value>,
}

impl ApiResponse {
    pub fn new(status: u16, body: Option<Value>) -> Self {
        Self { status, body }
    }

    pub fn ok(body: Value) -> Self {
        Self::new(200, Some(body))
    }

    pub fn accepted() -> Self {
        Self::new(202, None)
    }
}

#[async_trait]
pub trait RequestExecutor: Send + Sync + 'static {
    async fn execute(
        &self,
        token: &SessionToken,
        request: ApiRequest,
    ) -> Result<ApiResponse, Failure>;
}

pub struct HttpExecutor {
    client: reqwest::Client,
    base_url: String,
}

impl HttpExecutor {
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(config.user_agent.as_str())
            .connect_timeout(Duration::from_millis(config.request_timeout_ms.min(10_000)))
            .build()
            .map_err(|e| ClientError::Init(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }
}

#[async_trait]
impl RequestExecutor for HttpExecutor {
    async fn execute(
        &self,
        token: &SessionToken,
        request: ApiRequest,
    ) -> Result<ApiResponse, Failure> {
        let url = self.url(&request.path);
        tracing::debug!(method = ?request.method, %url, "sending request");

        let mut builder = self
            .client
            .request(request.method.into(), &url)
            .header(AUTHORIZATION, token.as_str());

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let text = response.text().await?;

        if !(200..300).contains(&status) {
            tracing::debug!(status, %url, "upstream returned error status");
            return Err(Failure::Status { status, body: text });
        }

        let body = if text.trim().is_empty() {
            None
        } else {
            Some(serde_json::from_str(&text).map_err(|e| Failure::Decode(e.to_string()))?)
        };

        Ok(ApiResponse { status, body })
    }
}
