//! Decides which requests the offline controller may cache.

use reqwest::Method;
use std::fmt;
use url::{Origin, Url};

use super::request::Request;

/// Paths never cached: API calls, build-tool artifacts, source maps and screenshots.
pub const DEFAULT_EXCLUSIONS: &[&str] = &[
  "/api/*",
  "*/_next/*",
  "*webpack*",
  "*hot-update*",
  "*.map",
  "*screenshot*",
];

/// A single path exclusion pattern.
///
/// `/api/*` matches a prefix, `*.map` a suffix, `*webpack*` a substring;
/// anything without a `*` must match the whole path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exclusion {
  Exact(String),
  Prefix(String),
  Suffix(String),
  Contains(String),
}

impl Exclusion {
  pub fn parse(pattern: &str) -> Self {
    let starts = pattern.starts_with('*');
    let ends = pattern.len() > 1 && pattern.ends_with('*');
    let inner = pattern.trim_matches('*').to_lowercase();

    match (starts, ends) {
      (true, true) => Exclusion::Contains(inner),
      (true, false) => Exclusion::Suffix(inner),
      (false, true) => Exclusion::Prefix(inner),
      (false, false) => Exclusion::Exact(inner),
    }
  }

  pub fn matches(&self, path: &str) -> bool {
    let path = path.to_lowercase();
    match self {
      Exclusion::Exact(p) => path == *p,
      Exclusion::Prefix(p) => path.starts_with(p.as_str()),
      Exclusion::Suffix(p) => path.ends_with(p.as_str()),
      Exclusion::Contains(p) => path.contains(p.as_str()),
    }
  }
}

/// Why a request was not cacheable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Skip {
  /// Only GET responses are cached
  Method(Method),
  /// Non-http(s) schemes such as browser extensions
  Scheme(String),
  /// Requests addressed to the REST API origin
  ApiOrigin,
  /// Path matched an exclusion pattern
  Excluded(Exclusion),
}

impl fmt::Display for Skip {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Skip::Method(method) => write!(f, "{} request", method),
      Skip::Scheme(scheme) => write!(f, "{} scheme", scheme),
      Skip::ApiOrigin => f.write_str("API origin"),
      Skip::Excluded(pattern) => write!(f, "excluded by {:?}", pattern),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
  Cacheable,
  NotCacheable(Skip),
}

/// Pure predicate over requests.
#[derive(Debug, Clone)]
pub struct Classifier {
  exclusions: Vec<Exclusion>,
  api_origin: Option<Origin>,
}

impl Classifier {
  pub fn new<S: AsRef<str>>(patterns: &[S], api_url: Option<&Url>) -> Self {
    Self {
      exclusions: patterns.iter().map(|p| Exclusion::parse(p.as_ref())).collect(),
      api_origin: api_url.map(Url::origin),
    }
  }

  pub fn classify(&self, request: &Request) -> Classification {
    if request.method != Method::GET {
      return Classification::NotCacheable(Skip::Method(request.method.clone()));
    }

    let scheme = request.url.scheme();
    if scheme != "http" && scheme != "https" {
      return Classification::NotCacheable(Skip::Scheme(scheme.to_string()));
    }

    if let Some(origin) = &self.api_origin {
      if request.url.origin() == *origin {
        return Classification::NotCacheable(Skip::ApiOrigin);
      }
    }

    let path = request.url.path();
    match self.exclusions.iter().find(|e| e.matches(path)) {
      Some(exclusion) => Classification::NotCacheable(Skip::Excluded(exclusion.clone())),
      None => Classification::Cacheable,
    }
  }
}

impl Default for Classifier {
  fn default() -> Self {
    Self::new(DEFAULT_EXCLUSIONS, None)
  }
}
