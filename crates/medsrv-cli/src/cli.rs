use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::state_store::DEFAULT_STATE_FILE;

#[derive(Debug, Parser)]
#[command(name = "medsrv", version, about = "Start and supervise the local MEDomics backend")]
pub struct Cli {
    /// Supervisor state file
    #[arg(long, global = true, env = "MEDSRV_STATE_FILE", default_value = DEFAULT_STATE_FILE)]
    pub state_file: PathBuf,

    /// Print machine-readable JSON on stdout
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Launch the gateway and wait until it reports readiness
    Start(LaunchArgs),
    /// Stop the recorded gateway and remove the state file
    Stop {
        /// Milliseconds to wait after SIGTERM before killing
        #[arg(long, default_value_t = 5000)]
        grace: u64,
    },
    /// Query the running gateway's status
    Status,
    /// Ask the running gateway to start services
    Ensure(EnsureArgs),
    /// Check requirements and install what is missing
    Install(LaunchArgs),
    /// Check an update manifest for a newer release
    Upgrade {
        /// URL of a JSON manifest with `version` and `url` fields
        #[arg(long, env = "MEDSRV_UPDATE_MANIFEST")]
        manifest_url: Option<String>,
    },
}

#[derive(Debug, Clone, Args)]
pub struct LaunchArgs {
    /// Readiness timeout in milliseconds
    #[arg(long, default_value_t = 15000)]
    pub timeout: u64,

    /// Run the gateway with MEDSRV_ENV=production
    #[arg(long)]
    pub production: bool,

    /// Gateway executable to launch
    #[arg(long, env = "MEDSRV_GATEWAY_BIN")]
    pub gateway_bin: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
pub struct EnsureArgs {
    /// Workspace to use instead of the gateway's current one
    #[arg(long)]
    pub workspace: Option<PathBuf>,

    #[arg(long)]
    pub go: bool,

    #[arg(long)]
    pub mongo: bool,

    #[arg(long)]
    pub jupyter: bool,
}

/// Options shared by every supervisor command.
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    pub timeout: Duration,
    pub json: bool,
    pub production: bool,
    pub gateway_bin: Option<PathBuf>,
    pub workspace: Option<PathBuf>,
    pub go: bool,
    pub mongo: bool,
    pub jupyter: bool,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(15000),
            json: false,
            production: false,
            gateway_bin: None,
            workspace: None,
            go: false,
            mongo: false,
            jupyter: false,
        }
    }
}

impl SupervisorOptions {
    /// Services `ensure` should touch; none selected means database and notebook.
    pub fn ensure_targets(&self) -> (bool, bool, bool) {
        if self.go || self.mongo || self.jupyter {
            (self.go, self.mongo, self.jupyter)
        } else {
            (false, true, true)
        }
    }
}

impl Cli {
    pub fn options(&self) -> SupervisorOptions {
        let mut options = SupervisorOptions {
            json: self.json,
            ..SupervisorOptions::default()
        };
        match &self.command {
            Command::Start(launch) | Command::Install(launch) => {
                options.timeout = Duration::from_millis(launch.timeout);
                options.production = launch.production;
                options.gateway_bin = launch.gateway_bin.clone();
            }
            Command::Ensure(ensure) => {
                options.workspace = ensure.workspace.clone();
                options.go = ensure.go;
                options.mongo = ensure.mongo;
                options.jupyter = ensure.jupyter;
            }
            Command::Stop { .. } | Command::Status | Command::Upgrade { .. } => {}
        }
        options
    }
}
