//! Finds the next free TCP port for a new worker (§4.1).

use std::collections::HashSet;
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;
use tracing::debug;

use crate::error::{DispatcherError, Result};

const PROBE_TIMEOUT: Duration = Duration::from_millis(100);

pub struct PortAllocator {
    range_start: u16,
    range_len: u16,
}

impl PortAllocator {
    pub fn new(range_start: u16, range_len: u16) -> Self {
        Self {
            range_start,
            range_len,
        }
    }

    /// Scan `range_start..range_start + range_len` for the first port that
    /// is neither claimed by a tracked (non-Dead) worker nor already
    /// accepting TCP connections from something else on the host.
    pub fn allocate(&self, claimed_ports: &HashSet<u16>) -> Result<u16> {
        for offset in 0..self.range_len {
            let port = self.range_start.wrapping_add(offset);
            if claimed_ports.contains(&port) {
                continue;
            }
            if port_is_listening(port) {
                debug!(port, "port already bound by another process, skipping");
                continue;
            }
            return Ok(port);
        }
        Err(DispatcherError::NoFreePort)
    }
}

/// Returns true if something is already accepting TCP connections on
/// `localhost:port`.
fn port_is_listening(port: u16) -> bool {
    let addr: SocketAddr = ([127, 0, 0, 1], port).into();
    TcpStream::connect_timeout(&addr, PROBE_TIMEOUT).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn allocates_first_port_when_range_is_free() {
        // Pick a high, unlikely-to-collide base so the test is hermetic.
        let allocator = PortAllocator::new(18001, 16);
        let claimed = HashSet::new();
        let port = allocator.allocate(&claimed).expect("should find a port");
        assert_eq!(port, 18001);
    }

    #[test]
    fn skips_ports_claimed_by_the_registry() {
        let allocator = PortAllocator::new(18101, 16);
        let mut claimed = HashSet::new();
        claimed.insert(18101);
        claimed.insert(18102);
        let port = allocator.allocate(&claimed).expect("should find a port");
        assert_eq!(port, 18103);
    }

    #[test]
    fn skips_ports_with_a_live_listener() {
        let base = 18201u16;
        let _listener = TcpListener::bind(("127.0.0.1", base)).expect("bind test listener");
        let allocator = PortAllocator::new(base, 4);
        let claimed = HashSet::new();
        let port = allocator.allocate(&claimed).expect("should find a port");
        assert_eq!(port, base + 1);
    }

    #[test]
    fn fails_with_no_free_port_when_range_exhausted() {
        let base = 18301u16;
        let allocator = PortAllocator::new(base, 3);
        let mut claimed = HashSet::new();
        claimed.insert(base);
        claimed.insert(base + 1);
        claimed.insert(base + 2);
        let err = allocator.allocate(&claimed).unwrap_err();
        assert!(matches!(err, DispatcherError::NoFreePort));
    }
}
