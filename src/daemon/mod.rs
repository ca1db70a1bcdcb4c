// Daemon modules
pub mod reconciler;
pub mod server;

pub use server::{run_daemon, DaemonOptions};
