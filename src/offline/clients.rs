//! Open application windows and which controller version controls them.

/// An open application window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientWindow {
  pub id: u64,
  pub url: String,
}

/// Registry of open windows.
///
/// At most one controller version controls the windows at any time; claiming
/// replaces the previous controller for every window at once.
#[derive(Debug, Default)]
pub struct Clients {
  windows: Vec<ClientWindow>,
  controller: Option<String>,
  next_id: u64,
}

impl Clients {
  pub fn new() -> Self {
    Self::default()
  }

  /// Version of the controller currently in charge, if any.
  pub fn controller(&self) -> Option<&str> {
    self.controller.as_deref()
  }

  /// Take control of all open windows.
  pub fn claim(&mut self, version: &str) -> Option<String> {
    self.controller.replace(version.to_string())
  }

  /// Open a window at `url`. Ids start at 1.
  pub fn open_window(&mut self, url: &str) -> u64 {
    self.next_id += 1;
    self.windows.push(ClientWindow {
      id: self.next_id,
      url: url.to_string(),
    });
    self.next_id
  }

  /// First window already showing `url`.
  pub fn focus_matching(&self, url: &str) -> Option<u64> {
    self.windows.iter().find(|w| w.url == url).map(|w| w.id)
  }
}
