//! Blady library root.

pub mod actions;
pub mod agent;
pub mod buttons;
pub mod cli;
pub mod config;
pub mod contacts;
pub mod core;
pub mod daemon;
pub mod error;
pub mod history;
pub mod logging;
pub mod memory;
pub mod prompt;
pub mod providers;
pub mod store;
pub mod transport;
pub mod watcher;

#[cfg(test)]
mod testing;

pub use cli::Commands;
pub use config::{load_settings, Settings};
pub use daemon::Daemon;
pub use error::{Error, Result};
pub use providers::Provider;
pub use transport::Transport;
