//! Registry of live control connections.
//!
//! Used only for shutdown bookkeeping and status listings. The mutex guards
//! map edits and enumeration; no socket call is made while it is held.

use std::collections::HashMap;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::transport::Cancellation;

/// Server-side record of one live control connection.
#[derive(Debug)]
struct ConnectionRecord {
    peer: SocketAddr,
    opened_at: Instant,
    path: Option<String>,
    ports: Vec<u16>,
    /// Second handle to the control socket, for forced shutdown.
    control: Option<Arc<TcpStream>>,
    cancel: Cancellation,
}

/// Read-only view of a connection for listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSummary {
    pub id: u64,
    pub peer: SocketAddr,
    /// Requested path, once the request has been read.
    pub path: Option<String>,
    /// Data ports bound for this connection, in partition order.
    pub ports: Vec<u16>,
    pub age: Duration,
}

/// Live connections keyed by connection id.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    next_id: AtomicU64,
    records: Mutex<HashMap<u64, ConnectionRecord>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection and return a guard that removes it when dropped.
    pub fn register(
        self: &Arc<Self>,
        peer: SocketAddr,
        control: &TcpStream,
        cancel: Cancellation,
    ) -> Registration {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;

        // Cloned before taking the lock.
        let control = match control.try_clone() {
            Ok(stream) => Some(Arc::new(stream)),
            Err(e) => {
                warn!(conn = id, error = %e, "Cannot clone control socket, forced shutdown will only cancel");
                None
            }
        };

        let record = ConnectionRecord {
            peer,
            opened_at: Instant::now(),
            path: None,
            ports: Vec::new(),
            control,
            cancel,
        };
        self.records.lock().insert(id, record);
        debug!(conn = id, peer = %peer, "Connection registered");

        Registration {
            registry: Arc::clone(self),
            id,
        }
    }

    /// Record the request path and the bound data ports.
    pub fn update(&self, id: u64, path: &str, ports: &[u16]) {
        if let Some(record) = self.records.lock().get_mut(&id) {
            record.path = Some(path.to_string());
            record.ports = ports.to_vec();
        }
    }

    fn remove(&self, id: u64) {
        if self.records.lock().remove(&id).is_some() {
            debug!(conn = id, "Connection deregistered");
        }
    }

    /// Snapshot of all live connections, ordered by id.
    pub fn snapshot(&self) -> Vec<ConnectionSummary> {
        let now = Instant::now();
        let mut summaries: Vec<_> = self
            .records
            .lock()
            .iter()
            .map(|(id, record)| ConnectionSummary {
                id: *id,
                peer: record.peer,
                path: record.path.clone(),
                ports: record.ports.clone(),
                age: now.saturating_duration_since(record.opened_at),
            })
            .collect();
        summaries.sort_by_key(|s| s.id);
        summaries
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancel every connection and shut down its control socket.
    ///
    /// Returns the number of connections that were cancelled.
    pub fn cancel_all(&self) -> usize {
        let targets = self.cancel_targets();
        let count = targets.len();
        shutdown_all(targets);
        count
    }

    /// Cancellation flags and control handles, copied out under the lock.
    fn cancel_targets(&self) -> Vec<CancelTarget> {
        self.records
            .lock()
            .iter()
            .map(|(id, record)| CancelTarget {
                id: *id,
                cancel: record.cancel.clone(),
                control: record.control.clone(),
            })
            .collect()
    }
}

struct CancelTarget {
    id: u64,
    cancel: Cancellation,
    control: Option<Arc<TcpStream>>,
}

fn shutdown_all(targets: Vec<CancelTarget>) {
    for target in targets {
        target.cancel.cancel();
        if let Some(control) = target.control {
            // Already-closed sockets report NotConnected.
            if let Err(e) = control.shutdown(Shutdown::Both) {
                debug!(conn = target.id, error = %e, "Control socket shutdown failed");
            }
        }
    }
}

/// Keeps a connection registered for as long as it is alive.
#[derive(Debug)]
pub struct Registration {
    registry: Arc<ConnectionRegistry>,
    id: u64,
}

impl Registration {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn update(&self, path: &str, ports: &[u16]) {
        self.registry.update(self.id, path, ports);
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.remove(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;

    fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    #[test]
    fn test_registration_removed_on_drop() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (_client, server) = socket_pair();
        let peer = server.peer_addr().unwrap();

        let registration = registry.register(peer, &server, Cancellation::new());
        assert_eq!(registry.len(), 1);

        drop(registration);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_ids_are_unique_and_snapshot_is_ordered() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (_c1, s1) = socket_pair();
        let (_c2, s2) = socket_pair();

        let first = registry.register(s1.peer_addr().unwrap(), &s1, Cancellation::new());
        let second = registry.register(s2.peer_addr().unwrap(), &s2, Cancellation::new());
        second.update("/srv/file.bin", &[4000, 4001]);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].id, first.id());
        assert_eq!(snapshot[1].id, second.id());
        assert!(snapshot[0].path.is_none());
        assert_eq!(snapshot[1].path.as_deref(), Some("/srv/file.bin"));
        assert_eq!(snapshot[1].ports, vec![4000, 4001]);
    }

    #[test]
    fn test_cancel_all_raises_flags_and_closes_control() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (mut client, server) = socket_pair();
        let cancel = Cancellation::new();

        let _registration = registry.register(server.peer_addr().unwrap(), &server, cancel.clone());

        assert_eq!(registry.cancel_all(), 1);
        assert!(cancel.is_cancelled());

        let mut buf = [0u8; 1];
        assert_eq!(client.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_shutdown_happens_outside_the_lock() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (mut client, server) = socket_pair();
        let cancel = Cancellation::new();
        let registration = registry.register(server.peer_addr().unwrap(), &server, cancel.clone());

        let targets = registry.cancel_targets();
        assert_eq!(targets.len(), 1);

        // The connection can deregister between collection and shutdown.
        drop(registration);
        assert!(registry.is_empty());

        shutdown_all(targets);
        assert!(cancel.is_cancelled());
        let mut buf = [0u8; 1];
        assert_eq!(client.read(&mut buf).unwrap(), 0);
    }
}
