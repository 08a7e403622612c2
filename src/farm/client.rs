use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::Serialize;
use std::sync::Arc;
use url::Url;

use crate::config::Config;
use crate::farm::api_types::{
  ApiBreeding, ApiEnvelope, ApiHutch, ApiRabbit, ApiRemoval, ApiRow, IntoDomain,
};
use crate::farm::types::{
  BreedingRecord, Hutch, NewBreeding, NewHutch, NewRabbit, NewRow, Rabbit, RemovalRecord,
  RemovalRequest, Row,
};
use crate::offline::{Destination, Network, Request, Response};

/// Farm REST API client
///
/// Requests go through a [`Network`], which in the application is the offline
/// controller.
#[derive(Clone)]
pub struct FarmClient {
  network: Arc<dyn Network>,
  base_url: Url,
  token: Option<String>,
}

impl FarmClient {
  pub fn new(config: &Config, network: Arc<dyn Network>) -> Result<Self> {
    Ok(Self::with_base_url(
      config.api_url()?,
      network,
      Config::get_api_token().ok(),
    ))
  }

  pub fn with_base_url(base_url: Url, network: Arc<dyn Network>, token: Option<String>) -> Self {
    Self {
      network,
      base_url,
      token,
    }
  }

  /// Build an endpoint URL from path segments, each percent-encoded.
  fn endpoint(&self, segments: &[&str]) -> Result<Url> {
    let mut url = self.base_url.clone();
    url
      .path_segments_mut()
      .map_err(|_| eyre!("API url {} cannot take a path", self.base_url))?
      .pop_if_empty()
      .extend(segments);
    Ok(url)
  }

  fn request(&self, method: Method, segments: &[&str]) -> Result<Request> {
    let url = self.endpoint(segments)?;
    Ok(Request::new(method, url, Destination::Other).with_header("accept", "application/json"))
  }

  /// Writes must carry the bearer token.
  fn authorized(&self, request: Request) -> Result<Request> {
    let token = self.token.as_deref().ok_or_else(|| {
      eyre!("API token not found. Set WARREN_API_TOKEN to make changes on the server.")
    })?;
    Ok(request.with_header("authorization", &format!("Bearer {}", token)))
  }

  async fn send<T: DeserializeOwned>(&self, request: Request) -> Result<ApiEnvelope<T>> {
    let description = format!("{} {}", request.method, request.url.path());
    let response = self.network.fetch(request).await?;
    decode(&description, response)
  }

  async fn get<A>(&self, segments: &[&str]) -> Result<A::Output>
  where
    A: IntoDomain + DeserializeOwned,
  {
    let request = self.request(Method::GET, segments)?;
    self.send::<A>(request).await?.into_data()?.into_domain()
  }

  async fn post<B, A>(&self, segments: &[&str], body: &B) -> Result<A::Output>
  where
    B: Serialize,
    A: IntoDomain + DeserializeOwned,
  {
    let body = serde_json::to_vec(body).map_err(|e| eyre!("Failed to encode request: {}", e))?;
    let request = self.authorized(self.request(Method::POST, segments)?.with_json_body(body))?;
    self.send::<A>(request).await?.into_data()?.into_domain()
  }

  async fn delete(&self, segments: &[&str]) -> Result<()> {
    let request = self.authorized(self.request(Method::DELETE, segments)?)?;
    self.send::<IgnoredAny>(request).await?.ensure_success()
  }

  /// List rabbits on a farm
  pub async fn list_rabbits(&self, farm_id: &str) -> Result<Vec<Rabbit>> {
    self.get::<Vec<ApiRabbit>>(&["rabbits", farm_id]).await
  }

  pub async fn create_rabbit(&self, farm_id: &str, rabbit: &NewRabbit) -> Result<Rabbit> {
    self.post::<_, ApiRabbit>(&["rabbits", farm_id], rabbit).await
  }

  pub async fn list_hutches(&self, farm_id: &str) -> Result<Vec<Hutch>> {
    self.get::<Vec<ApiHutch>>(&["hutches", farm_id]).await
  }

  pub async fn create_hutch(&self, farm_id: &str, hutch: &NewHutch) -> Result<Hutch> {
    self.post::<_, ApiHutch>(&["hutches", farm_id], hutch).await
  }

  pub async fn delete_hutch(&self, farm_id: &str, hutch_id: &str) -> Result<()> {
    self.delete(&["hutches", farm_id, hutch_id]).await
  }

  pub async fn list_rows(&self, farm_id: &str) -> Result<Vec<Row>> {
    self.get::<Vec<ApiRow>>(&["rows", farm_id]).await
  }

  pub async fn create_row(&self, farm_id: &str, row: &NewRow) -> Result<Row> {
    self.post::<_, ApiRow>(&["rows", farm_id], row).await
  }

  pub async fn delete_row(&self, farm_id: &str, row_name: &str) -> Result<()> {
    self.delete(&["rows", farm_id, row_name]).await
  }

  /// Removal history of a farm
  pub async fn list_removals(&self, farm_id: &str) -> Result<Vec<RemovalRecord>> {
    self
      .get::<Vec<ApiRemoval>>(&["rabbits", "rabbit_removals", farm_id])
      .await
  }

  /// Record a rabbit leaving the farm; the server drops it from the rabbit list
  pub async fn remove_rabbit(
    &self,
    farm_id: &str,
    rabbit_id: &str,
    removal: &RemovalRequest,
  ) -> Result<RemovalRecord> {
    self
      .post::<_, ApiRemoval>(&["rabbits", "rabbit_removals", farm_id, rabbit_id], removal)
      .await
  }

  pub async fn list_breedings(&self, farm_id: &str) -> Result<Vec<BreedingRecord>> {
    self.get::<Vec<ApiBreeding>>(&["breeds", farm_id]).await
  }

  pub async fn record_breeding(&self, farm_id: &str, breeding: &NewBreeding) -> Result<BreedingRecord> {
    self.post::<_, ApiBreeding>(&["breeds", farm_id], breeding).await
  }
}

/// Decode an API envelope, keeping the server's message for error statuses.
fn decode<T: DeserializeOwned>(description: &str, response: Response) -> Result<ApiEnvelope<T>> {
  match serde_json::from_slice::<ApiEnvelope<T>>(&response.body) {
    Ok(envelope) if response.is_success() => Ok(envelope),
    Ok(envelope) => Err(eyre!(
      "{} failed with status {}: {}",
      description,
      response.status,
      envelope.message.as_deref().unwrap_or("no message")
    )),
    Err(_) if !response.is_success() => Err(eyre!(
      "{} failed with status {}",
      description,
      response.status
    )),
    Err(e) => Err(eyre!("Failed to parse response of {}: {}", description, e)),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use async_trait::async_trait;
  use std::sync::Mutex;

  /// Network that answers with one canned response and records requests.
  struct CannedNetwork {
    response: Response,
    seen: Mutex<Vec<Request>>,
  }

  impl CannedNetwork {
    fn new(status: u16, body: &str) -> Arc<Self> {
      Arc::new(Self {
        response: Response::new(status, Some("application/json"), body.as_bytes().to_vec()),
        seen: Mutex::new(Vec::new()),
      })
    }

    fn last(&self) -> Request {
      self.seen.lock().unwrap().last().cloned().unwrap()
    }
  }

  #[async_trait]
  impl Network for CannedNetwork {
    async fn fetch(&self, request: Request) -> Result<Response> {
      self.seen.lock().unwrap().push(request);
      Ok(self.response.clone())
    }
  }

  fn client(network: Arc<CannedNetwork>, token: Option<&str>) -> FarmClient {
    FarmClient::with_base_url(
      Url::parse("https://api.farm.example/v1/").unwrap(),
      network,
      token.map(String::from),
    )
  }

  fn header<'a>(request: &'a Request, name: &str) -> Option<&'a str> {
    request
      .headers
      .iter()
      .find(|(n, _)| n == name)
      .map(|(_, v)| v.as_str())
  }

  #[tokio::test]
  async fn test_list_rows() {
    let network = CannedNetwork::new(
      200,
      r#"{"success":true,"data":[{"name":"North","capacity":12,"levels":["A","B"]}]}"#,
    );
    let rows = client(network.clone(), None).list_rows("farm 1").await.unwrap();

    assert_eq!(rows[0].name, "North");
    assert_eq!(rows[0].levels, vec!["A", "B"]);
    let request = network.last();
    assert_eq!(request.method, Method::GET);
    assert_eq!(request.url.as_str(), "https://api.farm.example/v1/rows/farm%201");
    assert_eq!(header(&request, "authorization"), None);
  }

  #[tokio::test]
  async fn test_writes_need_token() {
    let network = CannedNetwork::new(200, r#"{"success":true}"#);
    let err = client(network.clone(), None)
      .delete_hutch("f1", "A1")
      .await
      .unwrap_err();
    assert!(err.to_string().contains("WARREN_API_TOKEN"));
    assert!(network.seen.lock().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_delete_sends_bearer_token() {
    let network = CannedNetwork::new(200, r#"{"success":true,"message":"deleted"}"#);
    client(network.clone(), Some("s3cret"))
      .delete_hutch("f1", "A1")
      .await
      .unwrap();

    let request = network.last();
    assert_eq!(request.method, Method::DELETE);
    assert_eq!(request.url.path(), "/v1/hutches/f1/A1");
    assert_eq!(header(&request, "authorization"), Some("Bearer s3cret"));
  }

  #[tokio::test]
  async fn test_remove_rabbit_posts_removal() {
    let network = CannedNetwork::new(
      201,
      r#"{"success":true,"data":{"rabbit_id":"RB-7","reason":"sold","date":"2024-06-01","sale_amount":25.0}}"#,
    );
    let removal = RemovalRequest {
      reason: "sold".into(),
      notes: None,
      date: chrono::NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
      sale_amount: Some(25.0),
    };

    let record = client(network.clone(), Some("t"))
      .remove_rabbit("f1", "RB-7", &removal)
      .await
      .unwrap();

    assert_eq!(record.rabbit_id, "RB-7");
    let request = network.last();
    assert_eq!(request.url.path(), "/v1/rabbits/rabbit_removals/f1/RB-7");
    assert_eq!(header(&request, "content-type"), Some("application/json"));
    let body: serde_json::Value = serde_json::from_slice(request.body.as_ref().unwrap()).unwrap();
    assert_eq!(body["reason"], "sold");
  }

  #[tokio::test]
  async fn test_error_status_keeps_server_message() {
    let network = CannedNetwork::new(409, r#"{"success":false,"message":"Hutch is occupied"}"#);
    let err = client(network, Some("t"))
      .delete_hutch("f1", "A1")
      .await
      .unwrap_err();
    assert!(err.to_string().contains("409"));
    assert!(err.to_string().contains("Hutch is occupied"));
  }

  #[tokio::test]
  async fn test_unsuccessful_envelope_with_ok_status() {
    let network = CannedNetwork::new(200, r#"{"success":false,"message":"Invalid farm"}"#);
    let err = client(network, None).list_rabbits("f1").await.unwrap_err();
    assert_eq!(err.to_string(), "Invalid farm");
  }

  #[tokio::test]
  async fn test_non_json_error_page() {
    let network = CannedNetwork::new(502, "<html>Bad Gateway</html>");
    let err = client(network, None).list_hutches("f1").await.unwrap_err();
    assert!(err.to_string().contains("502"));
  }
}
