//! Network seam: everything that leaves the process goes through [`Network`].

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::header::CONTENT_TYPE;

use super::request::{Request, Response};

/// Something that can turn a request into a response.
///
/// An `Err` means the request never produced an HTTP response (DNS failure,
/// refused connection, dropped link). HTTP error statuses are still `Ok`.
#[async_trait]
pub trait Network: Send + Sync {
  async fn fetch(&self, request: Request) -> Result<Response>;
}

/// Network backed by a shared reqwest client.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
}

impl HttpNetwork {
  pub fn new() -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("warren/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

#[async_trait]
impl Network for HttpNetwork {
  async fn fetch(&self, request: Request) -> Result<Response> {
    let Request {
      method,
      url,
      headers,
      body,
      ..
    } = request;

    let mut builder = self.client.request(method.clone(), url.clone());
    for (name, value) in &headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = body {
      builder = builder.body(body);
    }

    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("{} {} failed: {}", method, url, e))?;

    let status = response.status().as_u16();
    let content_type = response
      .headers()
      .get(CONTENT_TYPE)
      .and_then(|v| v.to_str().ok())
      .map(String::from);

    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read response body from {}: {}", url, e))?;

    Ok(Response {
      status,
      content_type,
      body: body.to_vec(),
    })
  }
}
