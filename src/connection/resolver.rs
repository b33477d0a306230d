use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::probe::{HttpProbe, Probe};
use crate::config::Settings;
use crate::error::ClientError;
use crate::Result;

/// Cached outcome of the last resolution pass.
///
/// `resolved_at` set with no `resolved_base_url` means the pass ran and every
/// candidate failed; that negative result is honoured for the same ttl.
#[derive(Debug, Clone, Default)]
pub struct ConnectionState {
    pub resolved_base_url: Option<String>,
    pub resolved_at: Option<Instant>,
    pub ttl: Duration,
}

impl ConnectionState {
    fn is_fresh(&self) -> bool {
        self.resolved_at.is_some_and(|at| at.elapsed() < self.ttl)
    }
}

/// Discovers a reachable backend from an ordered candidate list.
pub struct ConnectionResolver {
    candidates: Vec<String>,
    probe: Arc<dyn Probe>,
    state: Mutex<ConnectionState>,
    cancel: CancellationToken,
}

impl ConnectionResolver {
    pub fn new(
        candidates: Vec<String>,
        probe: Arc<dyn Probe>,
        ttl: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            candidates,
            probe,
            state: Mutex::new(ConnectionState {
                ttl,
                ..ConnectionState::default()
            }),
            cancel,
        }
    }

    pub fn from_settings(settings: &Settings, cancel: CancellationToken) -> Result<Self> {
        let probe = HttpProbe::new(
            settings.backend.health_path.clone(),
            settings.backend.probe_timeout(),
        )?;

        Ok(Self::new(
            settings.candidate_urls(),
            Arc::new(probe),
            settings.backend.resolution_ttl(),
            cancel,
        ))
    }

    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    /// Returns the first reachable candidate in list order, probing only when
    /// the cached result is older than the ttl or has been invalidated.
    pub async fn resolve(&self) -> Result<String> {
        // Holding the lock across the pass coalesces concurrent resolutions
        let mut state = self.state.lock().await;

        if state.is_fresh() {
            return match &state.resolved_base_url {
                Some(url) => Ok(url.clone()),
                None => Err(ClientError::NoReachableEndpoint {
                    attempted: self.candidates.len(),
                }),
            };
        }

        let previous = state.resolved_base_url.take();

        for candidate in &self.candidates {
            if self.cancel.is_cancelled() {
                state.resolved_base_url = previous;
                return Err(ClientError::Cancelled);
            }

            let reachable = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!("Resolution cancelled");
                    state.resolved_base_url = previous;
                    return Err(ClientError::Cancelled);
                }
                reachable = self.probe.probe(candidate) => reachable,
            };

            if reachable {
                if previous.as_deref() != Some(candidate.as_str()) {
                    info!(base_url = %candidate, "Resolved backend endpoint");
                }
                state.resolved_base_url = Some(candidate.clone());
                state.resolved_at = Some(Instant::now());
                return Ok(candidate.clone());
            }

            debug!(candidate = %candidate, "Candidate unreachable, trying next");
        }

        warn!(
            attempted = self.candidates.len(),
            "No reachable backend endpoint"
        );
        state.resolved_base_url = None;
        state.resolved_at = Some(Instant::now());

        Err(ClientError::NoReachableEndpoint {
            attempted: self.candidates.len(),
        })
    }

    /// Forces the next `resolve` to re-probe from the top of the list.
    pub async fn invalidate(&self) {
        let mut state = self.state.lock().await;
        if state.resolved_at.take().is_some() {
            debug!("Connection cache invalidated");
        }
    }

    pub async fn snapshot(&self) -> ConnectionState {
        self.state.lock().await.clone()
    }
}
