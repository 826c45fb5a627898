use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{FuturesUnordered, StreamExt};
use reqwest::StatusCode;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::logs::{FileContent, HostResult, LogQuery};

/// Why a peer is missing from a cluster response
#[derive(Debug, Error)]
pub enum PeerError {
    #[error("request failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("timed out")]
    TimedOut,

    #[error("unexpected status {0}")]
    Status(StatusCode),

    #[error("malformed response: {0}")]
    Decode(#[source] reqwest::Error),
}

impl From<reqwest::Error> for PeerError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            PeerError::TimedOut
        } else {
            PeerError::Request(e)
        }
    }
}

/// A node whose local `/logs` endpoint takes part in cluster requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    /// Address exactly as configured; used as the host id in responses
    pub host: String,
    base_url: String,
}

impl Peer {
    /// Accepts `host:port` or a full `http(s)://` base URL
    pub fn parse(addr: &str) -> Self {
        let host = addr.trim().to_string();
        let trimmed = host.trim_end_matches('/');
        let base_url = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            trimmed.to_string()
        } else {
            format!("http://{}", trimmed)
        };
        Self { host, base_url }
    }

    pub fn logs_url(&self) -> String {
        format!("{}/logs", self.base_url)
    }
}

/// Fans a request out to every peer and merges whatever comes back.
pub struct ClusterAggregator {
    peers: Vec<Peer>,
    client: reqwest::Client,
    peer_timeout: Duration,
    permits: Arc<Semaphore>,
    deadline: Option<Duration>,
}

impl ClusterAggregator {
    pub fn new(
        peers: &[String],
        peer_timeout: Duration,
        max_concurrency: usize,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("loggerator/", env!("CARGO_PKG_VERSION")))
            .build()?;

        // Each host answers at most once per request
        let mut seen = HashSet::new();
        let peers = peers
            .iter()
            .filter(|p| !p.trim().is_empty())
            .map(|p| Peer::parse(p))
            .filter(|p| seen.insert(p.host.clone()))
            .collect();

        Ok(Self {
            peers,
            client,
            peer_timeout,
            permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
            deadline: None,
        })
    }

    /// Give up on peers still pending once `deadline` has elapsed
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn peers(&self) -> &[Peer] {
        &self.peers
    }

    /// Ask every peer for its local logs. Never fails: peers that error out,
    /// time out or answer with garbage are logged and left out.
    pub async fn aggregate(&self, query: &LogQuery) -> Vec<HostResult> {
        let cancel = CancellationToken::new();
        let Some(deadline) = self.deadline else {
            return self.aggregate_until(query, &cancel).await;
        };

        let timer = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(deadline).await;
                cancel.cancel();
            })
        };
        let results = self.aggregate_until(query, &cancel).await;
        timer.abort();
        results
    }

    /// Same as `aggregate`, but peers still pending when `cancel` fires are
    /// dropped from the result.
    pub async fn aggregate_until(
        &self,
        query: &LogQuery,
        cancel: &CancellationToken,
    ) -> Vec<HostResult> {
        let params = query.to_params();
        let mut pending: FuturesUnordered<_> = self
            .peers
            .iter()
            .map(|peer| {
                let params = &params;
                async move {
                    let _permit = self.permits.acquire().await.ok();
                    (peer, self.fetch(peer, params).await)
                }
            })
            .collect();

        let mut results = Vec::with_capacity(self.peers.len());
        let mut cancelled = false;
        loop {
            tokio::select! {
                next = pending.next() => match next {
                    Some((peer, Ok(files))) => {
                        tracing::debug!(peer = %peer.host, files = files.len(), "Peer responded");
                        results.push(HostResult {
                            host: peer.host.clone(),
                            files,
                        });
                    }
                    Some((peer, Err(e))) => {
                        tracing::warn!(peer = %peer.host, error = %e, "Dropping peer from cluster response");
                    }
                    None => break,
                },
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
            }
        }

        if cancelled {
            tracing::warn!(pending = pending.len(), "Cluster deadline reached, dropping pending peers");
        }

        tracing::info!(
            peers = self.peers.len(),
            responded = results.len(),
            "Cluster request complete"
        );
        results
    }

    async fn fetch(
        &self,
        peer: &Peer,
        params: &[(&'static str, String)],
    ) -> Result<Vec<FileContent>, PeerError> {
        let response = self
            .client
            .get(peer.logs_url())
            .query(params)
            .timeout(self.peer_timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(PeerError::Status(status));
        }

        response.json::<Vec<FileContent>>().await.map_err(|e| {
            if e.is_timeout() {
                PeerError::TimedOut
            } else {
                PeerError::Decode(e)
            }
        })
    }
}
