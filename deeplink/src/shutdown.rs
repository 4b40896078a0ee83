use std::io;
use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{watch, Mutex, OnceCell};
use tokio::task::JoinHandle;

use crate::paths::Endpoint;
use crate::platform;

/// Tears the leader down exactly once. `shutdown()` stops the accept loop
/// (which drops the listener), waits for it, then unlinks the socket file.
pub struct ShutdownCoordinator {
    endpoint: Endpoint,
    stop_tx: watch::Sender<bool>,
    server: Mutex<Option<JoinHandle<()>>>,
    done: OnceCell<()>,
}

impl ShutdownCoordinator {
    pub fn new(endpoint: Endpoint) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            endpoint,
            stop_tx,
            server: Mutex::new(None),
            done: OnceCell::new(),
        }
    }

    /// Cancellation signal handed to the accept loop.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.stop_tx.subscribe()
    }

    pub(crate) async fn attach_server(&self, handle: JoinHandle<()>) {
        *self.server.lock().await = Some(handle);
    }

    pub fn is_triggered(&self) -> bool {
        *self.stop_tx.borrow()
    }

    pub fn is_done(&self) -> bool {
        self.done.initialized()
    }

    /// Run the teardown. Concurrent and repeated calls wait for the first one
    /// to finish; only that call returns `true`.
    pub async fn shutdown(&self) -> bool {
        let mut first = false;
        self.done
            .get_or_init(|| {
                first = true;
                self.run()
            })
            .await;
        first
    }

    /// Resolves once shutdown has been requested, by a signal or by `shutdown()`.
    pub async fn triggered(&self) {
        let mut rx = self.subscribe();
        loop {
            let stopped = *rx.borrow_and_update();
            if stopped || rx.changed().await.is_err() {
                return;
            }
        }
    }

    async fn run(&self) {
        self.stop_tx.send_replace(true);

        let server = self.server.lock().await.take();
        if let Some(server) = server {
            if let Err(e) = server.await {
                log::warn!("shutdown: server task ended abnormally: {}", e);
            }
        }

        let path = self.endpoint.socket_path();
        match platform::remove_artifact(path) {
            Ok(()) => log::info!("shutdown: removed {}", path.display()),
            Err(e) => log::warn!("shutdown: could not remove {}: {}", path.display(), e),
        }
    }

    /// Run `shutdown()` on the first SIGINT or SIGTERM. Further signals are
    /// absorbed by the installed handlers and change nothing.
    pub fn spawn_signal_listener(self: &Arc<Self>) -> io::Result<JoinHandle<()>> {
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let this = Arc::clone(self);

        Ok(tokio::spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => log::info!("shutdown: SIGTERM"),
                _ = sigint.recv() => log::info!("shutdown: SIGINT"),
                _ = this.triggered() => return,
            }
            this.shutdown().await;
        }))
    }

    /// Synchronous last resort for a leader dropped without `shutdown()`.
    ///
    /// It cannot await the accept loop, so the socket file is unlinked while the
    /// listener may still be open; the loop drops it on its next wakeup. Only
    /// `shutdown()` guarantees close-then-unlink.
    pub(crate) fn shutdown_blocking(&self) {
        if self.is_done() {
            return;
        }
        self.stop_tx.send_replace(true);
        if let Err(e) = platform::remove_artifact(self.endpoint.socket_path()) {
            log::warn!(
                "shutdown: could not remove {}: {}",
                self.endpoint.socket_path().display(),
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Dispatcher;
    use crate::paths::resolve_endpoint;
    use crate::probe::{probe, ProbeState};
    use crate::server::{serve, ServerOpts};
    use std::time::Duration;
    use tokio::net::UnixListener;
    use tokio::sync::mpsc;

    async fn leader(dir: &std::path::Path) -> (Endpoint, Arc<ShutdownCoordinator>) {
        let ep = resolve_endpoint("app", Some(dir)).unwrap();
        let listener = UnixListener::bind(ep.socket_path()).unwrap();
        let coord = Arc::new(ShutdownCoordinator::new(ep.clone()));
        let (tx, _rx) = mpsc::unbounded_channel();
        let server = tokio::spawn(serve(
            listener,
            Dispatcher::new(tx),
            ServerOpts::default(),
            coord.subscribe(),
        ));
        coord.attach_server(server).await;
        (ep, coord)
    }

    #[tokio::test]
    async fn shutdown_twice_cleans_up_once() {
        let dir = tempfile::tempdir().unwrap();
        let (ep, coord) = leader(dir.path()).await;
        assert!(ep.socket_path().exists());

        assert!(coord.shutdown().await);
        assert!(!coord.shutdown().await);
        assert!(coord.is_done());
        assert!(!ep.socket_path().exists());
        assert_eq!(probe(&ep).unwrap().state(), ProbeState::Absent);
    }

    #[tokio::test]
    async fn concurrent_shutdowns_run_once() {
        let dir = tempfile::tempdir().unwrap();
        let (ep, coord) = leader(dir.path()).await;

        let (a, b) = tokio::join!(coord.shutdown(), coord.shutdown());
        assert!(a ^ b, "exactly one call performs the teardown");
        assert!(!ep.socket_path().exists());
    }

    #[tokio::test]
    async fn artifact_removed_elsewhere_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let (ep, coord) = leader(dir.path()).await;
        std::fs::remove_file(ep.socket_path()).unwrap();
        assert!(coord.shutdown().await);
    }

    #[tokio::test]
    async fn triggered_resolves_after_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let (_ep, coord) = leader(dir.path()).await;
        let waiter = {
            let coord = coord.clone();
            tokio::spawn(async move { coord.triggered().await })
        };
        coord.shutdown().await;
        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("waiter wakes")
            .unwrap();
        assert!(coord.is_triggered());
    }

    #[tokio::test]
    async fn sigterm_runs_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let (ep, coord) = leader(dir.path()).await;
        let listener = coord.spawn_signal_listener().unwrap();

        unsafe {
            libc::kill(libc::getpid(), libc::SIGTERM);
        }
        tokio::time::timeout(Duration::from_secs(5), listener)
            .await
            .expect("signal handled")
            .unwrap();
        assert!(coord.is_done());
        assert!(!ep.socket_path().exists());
    }
}
