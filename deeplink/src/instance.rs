use std::io;
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::config::InstanceConfig;
use crate::desktop;
use crate::dispatch::{Dispatcher, EventSink, Origin};
use crate::error::{InstanceError, Result};
use crate::paths::Endpoint;
use crate::platform;
use crate::role::{self, Decision, InstanceRole, Relayed};
use crate::server;
use crate::shutdown::ShutdownCoordinator;

/// Built once at startup from the config; decides the role exactly once.
pub struct Instance {
    config: InstanceConfig,
    app_name: String,
    endpoint: Endpoint,
}

pub enum Startup {
    Leader(Leader),
    /// Arguments were handed to the running instance; exit without starting the app.
    Follower(Relayed),
}

impl Startup {
    pub fn role(&self) -> InstanceRole {
        match self {
            Startup::Leader(_) => InstanceRole::Leader,
            Startup::Follower(_) => InstanceRole::Follower,
        }
    }
}

impl Instance {
    pub fn new(config: InstanceConfig) -> Result<Self> {
        let app_name = config.app_name()?;
        let endpoint = config.endpoint()?;
        Ok(Self {
            config,
            app_name,
            endpoint,
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    /// Decide the role and, for the leader, start serving relays into `sink`.
    ///
    /// The probe/bind step (lock, connect, relay) runs on the blocking pool, so
    /// a current-thread runtime keeps serving meanwhile. The leader's own URL
    /// arguments are delivered to `sink` as well.
    pub async fn start(self, args: Vec<String>, sink: impl EventSink) -> Result<Startup> {
        let decision = {
            let endpoint = self.endpoint.clone();
            let args = args.clone();
            tokio::task::spawn_blocking(move || role::decide(&endpoint, &args))
                .await
                .map_err(|e| InstanceError::Bind {
                    path: self.endpoint.socket_path().to_path_buf(),
                    source: io::Error::new(io::ErrorKind::Other, e),
                })??
        };
        let handle = match decision {
            Decision::Follower(relayed) => {
                log::info!(
                    "instance: relayed {} arg(s) to running instance event_id={}",
                    relayed.args,
                    relayed.event_id
                );
                return Ok(Startup::Follower(relayed));
            }
            Decision::Leader(handle) => handle,
        };

        if let Err(e) = desktop::install(&self.config.desktop, &self.app_name) {
            drop(handle);
            let path = self.endpoint.socket_path();
            if let Err(re) = platform::remove_artifact(path) {
                log::warn!("instance: could not remove {}: {}", path.display(), re);
            }
            return Err(e);
        }

        let (listener, endpoint) = handle.into_tokio().map_err(|e| InstanceError::Bind {
            path: self.endpoint.socket_path().to_path_buf(),
            source: e,
        })?;

        let dispatcher = Dispatcher::new(sink);
        let coordinator = Arc::new(ShutdownCoordinator::new(endpoint.clone()));
        let server = tokio::spawn(server::serve(
            listener,
            dispatcher.clone(),
            self.config.server_opts(),
            coordinator.subscribe(),
        ));
        coordinator.attach_server(server).await;

        let signals = if self.config.handle_signals {
            match coordinator.spawn_signal_listener() {
                Ok(h) => Some(h),
                Err(e) => {
                    log::warn!("instance: signal handlers not installed: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let own = dispatcher.dispatch_args(&args, &Origin::Launch);
        log::debug!("instance: dispatched {} launch link(s)", own);

        Ok(Startup::Leader(Leader {
            endpoint,
            dispatcher,
            coordinator,
            signals,
        }))
    }
}

/// A running leader. Dropping it without `shutdown()` still unlinks the socket.
pub struct Leader {
    endpoint: Endpoint,
    dispatcher: Dispatcher,
    coordinator: Arc<ShutdownCoordinator>,
    signals: Option<JoinHandle<()>>,
}

impl Leader {
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Events handed to the sink so far.
    pub fn delivered(&self) -> u64 {
        self.dispatcher.delivered()
    }

    pub fn coordinator(&self) -> Arc<ShutdownCoordinator> {
        Arc::clone(&self.coordinator)
    }

    /// Resolves when a termination signal (or another holder of the
    /// coordinator) requested shutdown.
    pub async fn wait(&self) {
        self.coordinator.triggered().await;
    }

    pub async fn shutdown(&self) -> bool {
        self.coordinator.shutdown().await
    }
}

impl Drop for Leader {
    fn drop(&mut self) {
        if let Some(h) = self.signals.take() {
            h.abort();
        }
        self.coordinator.shutdown_blocking();
    }
}
