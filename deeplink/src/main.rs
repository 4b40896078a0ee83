use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use tokio::sync::mpsc;

use deeplink::config::{self, InstanceConfig};
use deeplink::desktop;
use deeplink::error::InstanceError;
use deeplink::paths;
use deeplink::probe::{self, ProbeState};
use deeplink::role;
use deeplink::{DeepLinkEvent, Instance, Startup};
use utils::Framing;

#[derive(Parser, Debug)]
#[command(name = "deeplink-host")]
struct Cli {
    /// Directory holding the rendezvous socket (default: $XDG_RUNTIME_DIR or the temp dir).
    #[arg(long, global = true)]
    socket_dir: Option<PathBuf>,

    /// Application identity (default: executable name). Also names the socket.
    #[arg(long, global = true)]
    name: Option<String>,

    /// Config file (default: ~/.config/<name>/deeplink.toml when present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Report whether an instance is running. Never removes anything.
    Status {
        #[arg(long)]
        json: bool,
    },

    /// Relay links to the running instance; fail instead of starting one.
    Send {
        #[arg(required = true)]
        urls: Vec<String>,
        /// Newline-joined payload, for instances that predate the versioned format.
        #[arg(long)]
        legacy: bool,
    },

    /// Register the application as URL scheme handler (writes a .desktop entry).
    InstallDesktop {
        /// Comma separated, e.g. x-scheme-handler/myapp
        #[arg(long)]
        mime_type: Option<String>,
        #[arg(long)]
        icon: Option<PathBuf>,
    },

    /// Anything that is not a subcommand is a deep link to open (`Exec=<bin> %U`).
    #[command(external_subcommand)]
    Open(Vec<String>),
}

#[derive(Serialize)]
struct StatusReport {
    state: ProbeState,
    socket: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();

    let cli = Cli::parse();
    let cfg = load_config(&cli)?;

    match cli.cmd {
        None => run(cfg, Vec::new()).await,
        Some(Commands::Open(args)) => run(cfg, args).await,
        Some(Commands::Status { json }) => status(&cfg, json),
        Some(Commands::Send { urls, legacy }) => send(&cfg, &urls, legacy),
        Some(Commands::InstallDesktop { mime_type, icon }) => {
            install_desktop(cfg, mime_type, icon)
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<InstanceConfig> {
    let app = match &cli.name {
        Some(n) => n.clone(),
        None => paths::app_binary_name().context("cannot determine application name")?,
    };
    let mut cfg = config::load_config(cli.config.as_deref(), &app)?;
    if let Some(n) = &cli.name {
        cfg.app_name = Some(n.clone());
    }
    if let Some(d) = &cli.socket_dir {
        cfg.socket_dir = Some(d.clone());
    }
    Ok(cfg)
}

/// Exit status for an error that ends a relay: 2 when no leader took the
/// links, `None` when the error is fatal and propagates.
fn relay_exit_code(e: &InstanceError) -> Option<i32> {
    if e.is_fatal() {
        None
    } else {
        Some(2)
    }
}

fn relay_failure(e: InstanceError) -> anyhow::Error {
    if let Some(code) = relay_exit_code(&e) {
        eprintln!("deeplink-host: {e}");
        std::process::exit(code);
    }
    anyhow::Error::new(e)
}

async fn run(cfg: InstanceConfig, args: Vec<String>) -> anyhow::Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel::<DeepLinkEvent>();
    let instance = Instance::new(cfg)?;
    let socket = instance.endpoint().socket_path().to_path_buf();

    let leader = match instance.start(args, tx).await.map_err(relay_failure)? {
        Startup::Follower(relayed) => {
            log::info!(
                "another instance is running at {}; handed over {} arg(s)",
                socket.display(),
                relayed.args
            );
            return Ok(());
        }
        Startup::Leader(leader) => leader,
    };
    println!("deeplink-host: serving on {}", socket.display());

    loop {
        tokio::select! {
            ev = rx.recv() => match ev {
                Some(ev) => println!("deep link ({}): {}", ev.origin, ev.url),
                None => break,
            },
            _ = leader.wait() => break,
        }
    }

    leader.shutdown().await;
    log::info!("deeplink-host: delivered {} link(s)", leader.delivered());
    Ok(())
}

fn status(cfg: &InstanceConfig, json: bool) -> anyhow::Result<()> {
    let endpoint = cfg.endpoint()?;
    let state = probe::inspect(&endpoint)?.state();
    let report = StatusReport {
        state,
        socket: endpoint.socket_path().to_path_buf(),
    };
    if json {
        println!("{}", serde_json::to_string(&report).context("encode status")?);
    } else {
        println!("{} {}", report.state, report.socket.display());
    }
    Ok(())
}

fn send(cfg: &InstanceConfig, urls: &[String], legacy: bool) -> anyhow::Result<()> {
    let endpoint = cfg.endpoint()?;
    let framing = if legacy { Framing::Legacy } else { Framing::Versioned };
    let relayed = role::send(&endpoint, urls, framing).map_err(relay_failure)?;
    println!("sent {} link(s) event_id={}", relayed.args, relayed.event_id);
    Ok(())
}

fn install_desktop(
    mut cfg: InstanceConfig,
    mime_type: Option<String>,
    icon: Option<PathBuf>,
) -> anyhow::Result<()> {
    if let Some(m) = mime_type {
        cfg.desktop.mime_type = m;
    }
    if let Some(i) = icon {
        cfg.desktop.icon_path = Some(i);
    }
    let app = cfg.app_name()?;
    match desktop::install(&cfg.desktop, &app)? {
        Some(installed) => println!("installed {}", installed.entry_path.display()),
        None => anyhow::bail!("no MIME type configured; pass --mime-type x-scheme-handler/<scheme>"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::io;

    fn parse(argv: &[&str]) -> Cli {
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn subcommand_after_global_flags() {
        let cli = parse(&["deeplink-host", "--name", "app", "status"]);
        assert_eq!(cli.name.as_deref(), Some("app"));
        assert!(matches!(cli.cmd, Some(Commands::Status { json: false })));

        let cli = parse(&["deeplink-host", "--socket-dir", "/tmp/d", "--name", "app", "send", "x://y"]);
        assert_eq!(cli.socket_dir, Some(PathBuf::from("/tmp/d")));
        match cli.cmd {
            Some(Commands::Send { urls, legacy }) => {
                assert_eq!(urls, vec!["x://y"]);
                assert!(!legacy);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = parse(&["deeplink-host", "status", "--json", "--name", "app"]);
        assert_eq!(cli.name.as_deref(), Some("app"));
        assert!(matches!(cli.cmd, Some(Commands::Status { json: true })));
    }

    #[test]
    fn bare_links_open() {
        let cli = parse(&["deeplink-host", "--name", "app", "myapp://a", "https://b/c"]);
        match cli.cmd {
            Some(Commands::Open(args)) => assert_eq!(args, vec!["myapp://a", "https://b/c"]),
            other => panic!("unexpected {other:?}"),
        }
        assert!(parse(&["deeplink-host"]).cmd.is_none());
    }

    #[test]
    fn send_requires_a_link() {
        assert!(Cli::try_parse_from(["deeplink-host", "send"]).is_err());
    }

    #[test]
    fn failed_relay_exits_2_and_fatal_errors_propagate() {
        let no_leader = InstanceError::NoLeader(PathBuf::from("/run/app.sock"));
        assert_eq!(relay_exit_code(&no_leader), Some(2));

        let broken = InstanceError::Transmission(io::Error::from(io::ErrorKind::BrokenPipe));
        assert_eq!(relay_exit_code(&broken), Some(2));

        let bind = InstanceError::Bind {
            path: PathBuf::from("/run/app.sock"),
            source: io::Error::from(io::ErrorKind::PermissionDenied),
        };
        assert_eq!(relay_exit_code(&bind), None);
    }
}
