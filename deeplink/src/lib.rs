// Single-instance coordination and deep-link relay for desktop applications.
//
// The first launch binds a Unix socket and becomes the leader; later launches
// find it there, hand over their arguments and exit. The `deeplink-host`
// binary is a thin shell around `instance::Instance`.

pub mod config;
pub mod consts;
pub mod desktop;
pub mod dispatch;
pub mod error;
pub mod instance;
pub mod paths;
pub mod platform;
pub mod probe;
pub mod role;
pub mod server;
pub mod shutdown;

pub use dispatch::{DeepLinkEvent, EventSink, Origin};
pub use error::InstanceError;
pub use instance::{Instance, Leader, Startup};
pub use role::InstanceRole;
