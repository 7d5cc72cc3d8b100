pub mod audio;
pub mod cli;
pub mod config;
pub mod error;
pub mod listeners;
pub mod service;

// Re-export for convenience
pub use audio::*;
pub use config::{EngineConfig, EngineKind};
pub use error::{AudioError, Result};
pub use listeners::{ListenerRegistry, Subscription};
pub use service::AudioEngine;

/// Run a parsed command line on a fresh multi-threaded runtime
///
/// Tracing should already be initialized by the caller.
pub fn run(cli: cli::Cli) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(cli::execute(cli))
}
