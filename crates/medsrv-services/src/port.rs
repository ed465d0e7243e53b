//! Port allocation by probe-binding.
//!
//! A port counts as free when a listener can be bound to it right now. The
//! probe listener is dropped before returning, so the caller must bind the
//! port itself and be ready to retry if another process wins the race.

use std::net::{IpAddr, Ipv4Addr, TcpListener};

use medsrv_types::PortRange;
use tracing::{debug, trace};

use crate::error::ServiceError;

/// Lowest free port of `range` on the loopback interface
pub fn allocate(range: &PortRange) -> Result<u16, ServiceError> {
    allocate_on(IpAddr::V4(Ipv4Addr::LOCALHOST), range)
}

/// Lowest free port of `range` on `host`
pub fn allocate_on(host: IpAddr, range: &PortRange) -> Result<u16, ServiceError> {
    for port in range.ports() {
        if is_port_free_on(host, port) {
            debug!(%host, port, "Allocated port");
            return Ok(port);
        }
    }

    Err(ServiceError::NoPortAvailable {
        start: range.start(),
        end: range.end(),
    })
}

pub fn is_port_free(port: u16) -> bool {
    is_port_free_on(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
}

fn is_port_free_on(host: IpAddr, port: u16) -> bool {
    match TcpListener::bind((host, port)) {
        Ok(_listener) => true,
        Err(e) => {
            // Permission or address errors are indistinguishable from "busy" here
            trace!(%host, port, error = %e, "Port unavailable");
            false
        }
    }
}
