//! Responses synthesized when neither the network nor the cache can answer.

use super::request::{Destination, Response};

/// Smallest valid transparent GIF: 1x1 pixel, two-colour table, index 0 transparent.
pub const TRANSPARENT_GIF: [u8; 43] = [
  0x47, 0x49, 0x46, 0x38, 0x39, 0x61, // GIF89a
  0x01, 0x00, 0x01, 0x00, 0x80, 0x00, 0x00, // 1x1, global colour table
  0x00, 0x00, 0x00, 0xff, 0xff, 0xff, // black, white
  0x21, 0xf9, 0x04, 0x01, 0x00, 0x00, 0x00, 0x00, // transparency extension
  0x2c, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, // image descriptor
  0x02, 0x02, 0x44, 0x01, 0x00, // image data
  0x3b, // trailer
];

const OFFLINE_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>Offline - Rabbit Farm</title>
  <style>
    body { font-family: system-ui, sans-serif; text-align: center; padding: 3rem 1rem; color: #333; }
    button { margin-top: 1.5rem; padding: 0.6rem 1.2rem; border: 0; border-radius: 6px; background: #16a34a; color: #fff; }
  </style>
</head>
<body>
  <h1>You're currently offline</h1>
  <p>Your farm records will be available again once the connection returns.</p>
  <button onclick="window.location.reload()">Try again</button>
</body>
</html>
"#;

/// Last-resort page for navigations.
pub fn offline_document() -> Response {
  Response::new(
    200,
    Some("text/html; charset=utf-8"),
    OFFLINE_HTML.as_bytes().to_vec(),
  )
}

pub fn placeholder_image() -> Response {
  Response::new(200, Some("image/gif"), TRANSPARENT_GIF.to_vec())
}

pub fn empty_asset() -> Response {
  Response::new(204, None, Vec::new())
}

/// Degraded answer for a failed subresource: images get a placeholder so
/// layouts survive, everything else gets an empty 204.
pub fn degraded_asset(destination: Destination) -> Response {
  match destination {
    Destination::Image => placeholder_image(),
    _ => empty_asset(),
  }
}
