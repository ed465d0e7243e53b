//! Service management for the medsrv gateway.
//!
//! This crate owns everything the gateway does to the outside world:
//! finding executables, claiming ports, spawning and stopping the database
//! and notebook processes, and checking or installing their prerequisites.
//!
//! # Features
//!
//! - **Binary location**: private install dir, then `PATH`, then platform defaults
//! - **Port allocation**: first free port in an inclusive range
//! - **Database manager**: one `mongod` per gateway, serialized start/stop
//! - **Notebook manager**: probe, configure, spawn and stop a Jupyter server
//! - **Python packages**: list installed packages and find missing ones
//! - **Requirements**: report missing prerequisites and offer installs
//! - **Workspace**: path normalization, provisioning and directory listings
//!
//! # Architecture
//!
//! - `locator`: ordered executable search
//! - `port`: port probing
//! - `process`: child handles, probe runner seam, pid utilities
//! - `database`: [`DatabaseManager`]
//! - `notebook`: [`NotebookManager`], config patching and stop strategies
//! - `python_env`: `pip list` parsing and required package names
//! - `requirements`: [`RequirementChecker`] and platform installers
//! - `workspace`: workspace layout and directory tree

pub mod config;
pub mod database;
pub mod error;
pub mod locator;
pub mod notebook;
pub mod platform;
pub mod port;
pub mod process;
pub mod python_env;
pub mod requirements;
pub mod version;
pub mod workspace;

pub use config::{ConfigError, ServiceConfig};
pub use database::DatabaseManager;
pub use error::ServiceError;
pub use locator::{BinaryLocator, ServiceBinary};
pub use notebook::NotebookManager;
pub use platform::{Architecture, Platform};
pub use port::{allocate, allocate_on, is_port_free};
pub use process::{ProbeCommand, ProbeOutput, ProbeRunner, ProcessUtils, SystemProbeRunner};
pub use requirements::{InstallPolicy, RequirementChecker};
pub use version::Version;
