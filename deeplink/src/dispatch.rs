use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use url::Url;

/// Where a deep link came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    /// This process's own command line.
    Launch,
    /// Relayed by a later launch of the application.
    Relayed { event_id: String, sender_pid: u32 },
}

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Origin::Launch => f.write_str("launch"),
            Origin::Relayed { sender_pid: 0, .. } => f.write_str("relayed"),
            Origin::Relayed { sender_pid, .. } => write!(f, "relayed from pid {sender_pid}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeepLinkEvent {
    pub url: Url,
    pub origin: Origin,
}

/// The application's event queue, as seen from the IPC side.
///
/// `deliver` must not block; ordering against other application events is the
/// sink's business.
pub trait EventSink: Send + Sync + 'static {
    fn deliver(&self, event: DeepLinkEvent);
}

impl EventSink for mpsc::UnboundedSender<DeepLinkEvent> {
    fn deliver(&self, event: DeepLinkEvent) {
        if let Err(mpsc::error::SendError(ev)) = self.send(event) {
            log::debug!("dispatch: sink closed, dropped {}", ev.url);
        }
    }
}

/// Fire-and-forget delivery of parsed URLs to the injected sink.
#[derive(Clone)]
pub struct Dispatcher {
    sink: Arc<dyn EventSink>,
    delivered: Arc<AtomicU64>,
}

impl Dispatcher {
    pub fn new(sink: impl EventSink) -> Self {
        Self {
            sink: Arc::new(sink),
            delivered: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn dispatch(&self, url: Url, origin: Origin) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
        self.sink.deliver(DeepLinkEvent { url, origin });
    }

    /// Parse and dispatch each non-empty argument in order.
    ///
    /// A malformed argument is logged and skipped; its siblings are still
    /// delivered. Returns how many events were dispatched.
    pub fn dispatch_args(&self, args: &[String], origin: &Origin) -> usize {
        let mut n = 0;
        for arg in args {
            if arg.is_empty() {
                continue;
            }
            match Url::parse(arg) {
                Ok(url) => {
                    self.dispatch(url, origin.clone());
                    n += 1;
                }
                Err(e) => log::warn!("dispatch: dropped malformed deep link {:?}: {}", arg, e),
            }
        }
        n
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_fragment_does_not_stop_siblings() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let d = Dispatcher::new(tx);
        let args = vec![
            "not a url".to_string(),
            "https://ok/1".to_string(),
            String::new(),
            "myapp://open/2".to_string(),
        ];
        assert_eq!(d.dispatch_args(&args, &Origin::Launch), 2);

        let first = rx.try_recv().unwrap();
        assert_eq!(first.url.as_str(), "https://ok/1");
        assert_eq!(first.origin, Origin::Launch);
        assert_eq!(rx.try_recv().unwrap().url.as_str(), "myapp://open/2");
        assert!(rx.try_recv().is_err());
        assert_eq!(d.delivered(), 2);
    }

    #[test]
    fn closed_sink_drops_silently() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let d = Dispatcher::new(tx);
        assert_eq!(d.dispatch_args(&["https://gone/1".to_string()], &Origin::Launch), 1);
    }

    #[test]
    fn origin_display() {
        assert_eq!(Origin::Launch.to_string(), "launch");
        let o = Origin::Relayed { event_id: "e".into(), sender_pid: 42 };
        assert_eq!(o.to_string(), "relayed from pid 42");
    }
}
