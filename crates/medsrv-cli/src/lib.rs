//! `medsrv`: start, stop and query the local MEDomics gateway.
//!
//! The supervisor launches the gateway as a detached child, learns its port
//! through a one-shot readiness handshake and records it in a small JSON
//! state file that later invocations read back.

pub mod cli;
pub mod client;
pub mod commands;
pub mod error;
pub mod handshake;
pub mod launcher;
pub mod state_store;

use std::time::Duration;

pub use cli::{Cli, Command, SupervisorOptions};
pub use commands::CommandReport;
pub use error::SupervisorError;
pub use state_store::StateStore;

pub async fn run(cli: Cli) -> Result<CommandReport, SupervisorError> {
    let options = cli.options();
    let store = StateStore::new(&cli.state_file);

    match &cli.command {
        Command::Start(_) => commands::start(&options, &store).await,
        Command::Stop { grace } => commands::stop(&store, Duration::from_millis(*grace)).await,
        Command::Status => commands::status(&store).await,
        Command::Ensure(_) => commands::ensure(&options, &store).await,
        Command::Install(_) => commands::install(&options, &store).await,
        Command::Upgrade { manifest_url } => commands::upgrade(manifest_url.as_deref()).await,
    }
}
