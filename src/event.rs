use tokio::sync::mpsc;

/// Lifecycle signals emitted by the offline controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
  /// A controller version finished installing
  Installed { version: String },
  /// A new version is installed while an older one still controls clients
  UpdateAvailable { current: String, next: String },
  /// A controller version took control of all clients
  Activated { version: String },
}

/// Receiving half of the lifecycle channel, held by the application shell
pub struct LifecycleEvents {
  rx: mpsc::UnboundedReceiver<LifecycleEvent>,
}

impl LifecycleEvents {
  /// Create a channel; the sender goes to the controller
  pub fn channel() -> (mpsc::UnboundedSender<LifecycleEvent>, Self) {
    let (tx, rx) = mpsc::unbounded_channel();
    (tx, Self { rx })
  }

  /// Drain every event already queued without waiting
  pub fn drain(&mut self) -> Vec<LifecycleEvent> {
    let mut events = Vec::new();
    while let Ok(event) = self.rx.try_recv() {
      events.push(event);
    }
    events
  }
}
