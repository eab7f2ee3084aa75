//! Session multiplexing and port allocation.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::error::{Result, RtpError};
use crate::session::{PayloadSink, RtpSession, RtpSessionConfig};

/// Even-only RTP port pool inside a configured range.
///
/// Allocation and release happen under one critical section; ports are
/// stepped by two so the odd RTCP companion port stays implicitly paired.
pub struct RtpPortPool {
    start: u16,
    end: u16,
    used: Mutex<HashSet<u16>>,
}

impl RtpPortPool {
    pub fn new(start: u16, end: u16) -> Self {
        // Round up to the first even port in the range.
        let start = start + (start % 2);
        Self {
            start,
            end,
            used: Mutex::new(HashSet::new()),
        }
    }

    /// Allocate the lowest free even port.
    pub fn allocate(&self) -> Result<u16> {
        let mut used = self.used.lock();
        let mut port = self.start;
        while port < self.end {
            if !used.contains(&port) {
                used.insert(port);
                return Ok(port);
            }
            port += 2;
        }
        Err(RtpError::PortsExhausted(self.start, self.end))
    }

    /// Return a port to the pool.
    pub fn release(&self, port: u16) {
        self.used.lock().remove(&port);
    }

    pub fn in_use(&self) -> usize {
        self.used.lock().len()
    }
}

/// Manager owning every RTP session keyed by call id.
pub struct RtpManager {
    pool: RtpPortPool,
    sessions: DashMap<String, Arc<RtpSession>>,
}

impl RtpManager {
    pub fn new(port_range: (u16, u16)) -> Self {
        Self {
            pool: RtpPortPool::new(port_range.0, port_range.1),
            sessions: DashMap::new(),
        }
    }

    /// Create (or replace) the RTP session for a call.
    pub async fn create_session(
        &self,
        call_id: &str,
        remote_addr: SocketAddr,
        codec: &str,
        audio_sink: PayloadSink,
        event_sink: Option<PayloadSink>,
    ) -> Result<Arc<RtpSession>> {
        if let Some((_, existing)) = self.sessions.remove(call_id) {
            existing.stop().await;
            self.pool.release(existing.local_port());
        }

        let local_port = self.pool.allocate()?;
        let config = RtpSessionConfig::new(local_port, remote_addr, codec);

        let session = match RtpSession::start(config, audio_sink, event_sink).await {
            Ok(session) => session,
            Err(e) => {
                self.pool.release(local_port);
                return Err(e);
            }
        };

        self.sessions.insert(call_id.to_string(), session.clone());
        tracing::info!(call_id, port = local_port, "created RTP session");
        Ok(session)
    }

    /// Stop and forget the session for a call.
    pub async fn destroy_session(&self, call_id: &str) {
        if let Some((_, session)) = self.sessions.remove(call_id) {
            session.stop().await;
            self.pool.release(session.local_port());
            tracing::info!(call_id, "destroyed RTP session");
        }
    }

    pub fn get_session(&self, call_id: &str) -> Option<Arc<RtpSession>> {
        self.sessions.get(call_id).map(|s| s.clone())
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Tear down every session.
    pub async fn cleanup_all(&self) {
        let call_ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        for call_id in call_ids {
            self.destroy_session(&call_id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_allocates_even_ports_in_order() {
        let pool = RtpPortPool::new(10001, 10010);
        assert_eq!(pool.allocate().unwrap(), 10002);
        assert_eq!(pool.allocate().unwrap(), 10004);
        pool.release(10002);
        assert_eq!(pool.allocate().unwrap(), 10002);
    }

    #[test]
    fn pool_exhaustion_is_an_error() {
        let pool = RtpPortPool::new(10000, 10004);
        assert_eq!(pool.allocate().unwrap(), 10000);
        assert_eq!(pool.allocate().unwrap(), 10002);
        assert!(matches!(
            pool.allocate(),
            Err(RtpError::PortsExhausted(_, _))
        ));
    }

    #[tokio::test]
    async fn manager_creates_and_destroys_sessions() {
        let manager = RtpManager::new((40000, 40100));
        let sink: PayloadSink = Arc::new(|_| {});

        let session = manager
            .create_session(
                "c1",
                "127.0.0.1:5004".parse().unwrap(),
                "PCMU",
                sink.clone(),
                None,
            )
            .await
            .unwrap();
        assert_eq!(session.local_port() % 2, 0);
        assert_eq!(manager.session_count(), 1);
        assert_eq!(manager.pool.in_use(), 1);

        manager.destroy_session("c1").await;
        assert_eq!(manager.session_count(), 0);
        assert_eq!(manager.pool.in_use(), 0);
    }

    #[tokio::test]
    async fn replacing_a_session_releases_the_old_port() {
        let manager = RtpManager::new((41000, 41100));
        let sink: PayloadSink = Arc::new(|_| {});
        let remote: SocketAddr = "127.0.0.1:5004".parse().unwrap();

        manager
            .create_session("c1", remote, "PCMU", sink.clone(), None)
            .await
            .unwrap();
        manager
            .create_session("c1", remote, "PCMA", sink.clone(), None)
            .await
            .unwrap();

        assert_eq!(manager.session_count(), 1);
        assert_eq!(manager.pool.in_use(), 1);
        manager.cleanup_all().await;
    }
}
