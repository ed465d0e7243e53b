//! Shared types for the medsrv supervisor and gateway.
//!
//! Everything that crosses a process boundary lives here: the persisted
//! supervisor state, the readiness message, HTTP request bodies and the
//! response envelopes the gateway returns.

pub mod api;
pub mod readiness;
pub mod requirements;
pub mod state;

pub use api::*;
pub use readiness::*;
pub use requirements::*;
pub use state::*;
