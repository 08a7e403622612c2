//! Request and response values routed through the offline controller.

use reqwest::Method;
use sha2::{Digest, Sha256};
use url::Url;

/// What the requester intends to do with the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
  /// Top-level navigation (an HTML page)
  Document,
  Image,
  Script,
  Style,
  Font,
  Manifest,
  /// Anything else, including API calls
  Other,
}

impl Destination {
  /// Guess the destination from a URL path, the way a browser would label a
  /// subresource by its extension.
  pub fn from_path(path: &str) -> Self {
    let file = path.rsplit('/').next().unwrap_or_default().to_lowercase();
    let ext = match file.rsplit_once('.') {
      Some((_, ext)) => ext,
      None => return Destination::Document,
    };

    match ext {
      "html" | "htm" => Destination::Document,
      "png" | "jpg" | "jpeg" | "gif" | "svg" | "webp" | "ico" | "avif" => Destination::Image,
      "js" | "mjs" => Destination::Script,
      "css" => Destination::Style,
      "woff" | "woff2" | "ttf" | "otf" => Destination::Font,
      "webmanifest" => Destination::Manifest,
      "json" if file == "manifest.json" => Destination::Manifest,
      _ => Destination::Other,
    }
  }
}

/// An outbound HTTP request.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub destination: Destination,
  pub headers: Vec<(String, String)>,
  pub body: Option<Vec<u8>>,
}

impl Request {
  pub fn new(method: Method, url: Url, destination: Destination) -> Self {
    Self {
      method,
      url,
      destination,
      headers: Vec::new(),
      body: None,
    }
  }

  pub fn get(url: Url, destination: Destination) -> Self {
    Self::new(Method::GET, url, destination)
  }

  /// A top-level page navigation.
  pub fn navigate(url: Url) -> Self {
    Self::get(url, Destination::Document)
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  /// Attach a JSON body and the matching content type.
  pub fn with_json_body(mut self, body: Vec<u8>) -> Self {
    self.body = Some(body);
    self.with_header("content-type", "application/json")
  }

  pub fn key(&self) -> RequestKey {
    RequestKey::new(&self.method, &self.url)
  }
}

/// A fully buffered HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub content_type: Option<String>,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, content_type: Option<&str>, body: Vec<u8>) -> Self {
    Self {
      status,
      content_type: content_type.map(String::from),
      body,
    }
  }

  /// True for any 2xx status.
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }
}

/// Identity of a cache entry: method plus normalized URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
  description: String,
}

impl RequestKey {
  pub fn new(method: &Method, url: &Url) -> Self {
    // Url parsing already lowercases scheme and host and resolves dot segments
    let mut normalized = url.clone();
    normalized.set_fragment(None);

    Self {
      description: format!("{} {}", method.as_str(), normalized),
    }
  }

  /// Human-readable form, e.g. `GET https://farm.example/offline.html`.
  pub fn description(&self) -> &str {
    &self.description
  }

  /// SHA256 hash for stable, fixed-length storage keys.
  pub fn hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.description.as_bytes());
    hex::encode(hasher.finalize())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  #[test]
  fn test_destination_from_path() {
    assert_eq!(Destination::from_path("/"), Destination::Document);
    assert_eq!(Destination::from_path("/rabbits"), Destination::Document);
    assert_eq!(Destination::from_path("/offline.html"), Destination::Document);
    assert_eq!(
      Destination::from_path("/icons/icon-192x192.PNG"),
      Destination::Image
    );
    assert_eq!(Destination::from_path("/app.js"), Destination::Script);
    assert_eq!(Destination::from_path("/manifest.json"), Destination::Manifest);
    assert_eq!(Destination::from_path("/data.json"), Destination::Other);
  }

  #[test]
  fn test_key_ignores_fragment_and_host_case() {
    let a = RequestKey::new(&Method::GET, &url("https://Farm.Example/rabbits#top"));
    let b = RequestKey::new(&Method::GET, &url("https://farm.example/rabbits"));
    assert_eq!(a, b);
    assert_eq!(a.hash(), b.hash());
    assert_eq!(a.description(), "GET https://farm.example/rabbits");
  }

  #[test]
  fn test_key_distinguishes_method() {
    let get = RequestKey::new(&Method::GET, &url("https://farm.example/rabbits"));
    let head = RequestKey::new(&Method::HEAD, &url("https://farm.example/rabbits"));
    assert_ne!(get.hash(), head.hash());
  }

  #[test]
  fn test_json_body_sets_content_type() {
    let req = Request::new(
      Method::POST,
      url("https://api.example/rabbits/f1"),
      Destination::Other,
    )
    .with_json_body(b"{}".to_vec());
    assert_eq!(
      req.headers,
      vec![("content-type".to_string(), "application/json".to_string())]
    );
  }
}
