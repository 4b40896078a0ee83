use anyhow::{bail, Context};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;

use utils::{Framing, LaunchRequest};

use crate::consts::{DEFAULT_MAX_PAYLOAD_BYTES, DEFAULT_READ_TIMEOUT_MS};
use crate::dispatch::{Dispatcher, Origin};

#[derive(Debug, Clone, Copy)]
pub struct ServerOpts {
    /// Upper bound on reading one payload; `None` waits for the peer to close.
    pub read_timeout: Option<Duration>,
    pub max_payload_bytes: usize,
}

impl Default for ServerOpts {
    fn default() -> Self {
        Self {
            read_timeout: Some(Duration::from_millis(DEFAULT_READ_TIMEOUT_MS)),
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
        }
    }
}

/// Accept relays until `shutdown` flips to true (or its sender goes away).
///
/// Each connection is read on its own task, so a peer that never closes cannot
/// hold up the next accept. The listener is dropped on return.
pub async fn serve(
    listener: UnixListener,
    dispatcher: Dispatcher,
    opts: ServerOpts,
    mut shutdown: watch::Receiver<bool>,
) {
    let conn_ids = Arc::new(AtomicU64::new(0));
    log::info!(
        "server: accepting read_timeout={:?} max_payload_bytes={}",
        opts.read_timeout,
        opts.max_payload_bytes
    );

    let stopped = *shutdown.borrow();
    if !stopped {
        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                accept = listener.accept() => match accept {
                    Ok((stream, _addr)) => {
                        let id = conn_ids.fetch_add(1, Ordering::Relaxed) + 1;
                        let dispatcher = dispatcher.clone();
                        tokio::spawn(async move {
                            match handle_conn(stream, &dispatcher, opts).await {
                                Ok(n) => log::debug!("server: conn={} dispatched={}", id, n),
                                Err(e) => log::warn!("server: conn={} abandoned: {:#}", id, e),
                            }
                        });
                    }
                    Err(e) => {
                        // Usually fd exhaustion; back off instead of spinning.
                        log::warn!("server: accept failed: {}", e);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                },
            }
        }
    }

    drop(listener);
    log::info!("server: stopped");
}

/// Read one connection to EOF and dispatch every URL in its payload.
pub(crate) async fn handle_conn(
    stream: UnixStream,
    dispatcher: &Dispatcher,
    opts: ServerOpts,
) -> anyhow::Result<usize> {
    let limit = opts.max_payload_bytes;
    let mut buf = Vec::new();
    let mut reader = stream.take(limit as u64 + 1);
    let read = reader.read_to_end(&mut buf);
    match opts.read_timeout {
        Some(d) => {
            tokio::time::timeout(d, read)
                .await
                .map_err(|_| anyhow::anyhow!("read timed out after {:?}", d))?
                .context("read payload")?;
        }
        None => {
            read.await.context("read payload")?;
        }
    }
    if buf.len() > limit {
        bail!("payload exceeds {} bytes", limit);
    }

    let (req, framing) = LaunchRequest::try_from_bytes(&buf).context("decode payload")?;
    if framing == Framing::Legacy && !buf.is_empty() {
        log::debug!("server: legacy newline payload bytes={}", buf.len());
    }
    let origin = Origin::Relayed {
        event_id: req.event_id,
        sender_pid: req.sender_pid,
    };
    Ok(dispatcher.dispatch_args(&req.args, &origin))
}
