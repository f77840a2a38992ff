use crate::{DiscoveryError, DiscoveryRequest, DiscoveryResponse, Resource, TYPE_URL};
use eds_controller_core::{DiscoverEndpoints, Snapshot};
use futures::prelude::*;
use std::{
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tracing::{debug, trace};


pub type ResponseStream = Pin<Box<dyn Stream<Item = DiscoveryResponse> + Send>>;

/// Answers discovery requests from the snapshots exposed by `T`.
#[derive(Clone, Debug)]
pub struct EndpointDiscoveryServer<T> {
    discover: T,
    nonce: Arc<AtomicU64>,
    pub(crate) drain: drain::Watch,
}

// === impl EndpointDiscoveryServer ===

impl<T> EndpointDiscoveryServer<T>
where
    T: DiscoverEndpoints + Send + Sync + 'static,
{
    pub fn new(discover: T, drain: drain::Watch) -> Self {
        Self {
            discover,
            nonce: Arc::new(AtomicU64::new(0)),
            drain,
        }
    }

    /// Responds with the current state of the requested clusters.
    pub async fn fetch(&self, req: DiscoveryRequest) -> Result<DiscoveryResponse, DiscoveryError> {
        check_type(&req)?;
        let snapshot = self
            .discover
            .get_snapshot()
            .await
            .map_err(DiscoveryError::Discover)?;
        Ok(respond(&self.nonce, &req, snapshot))
    }

    /// Responds once the cache differs from the request's version.
    ///
    /// Requests without a version are answered immediately. A pending request is answered with
    /// the current state when the server begins shutting down.
    pub async fn long_poll(
        &self,
        req: DiscoveryRequest,
    ) -> Result<DiscoveryResponse, DiscoveryError> {
        if req.version_info.is_empty() {
            return self.fetch(req).await;
        }

        let mut rsps = self.watch(req.clone()).await?;
        match rsps.next().await {
            Some(rsp) => Ok(rsp),
            None => self.fetch(req).await,
        }
    }

    /// Streams a response each time the cache changes.
    ///
    /// If the request's version matches the current snapshot, the first response is deferred
    /// until the cache changes. The stream ends when the server begins shutting down.
    pub async fn watch(&self, req: DiscoveryRequest) -> Result<ResponseStream, DiscoveryError> {
        check_type(&req)?;
        let mut snapshots = self
            .discover
            .watch_snapshots()
            .await
            .map_err(DiscoveryError::Discover)?;
        let nonce = self.nonce.clone();
        let drain = self.drain.clone();

        Ok(Box::pin(async_stream::stream! {
            tokio::pin! {
                let shutdown = drain.signaled();
            }

            let mut known = req.version_info.clone();
            loop {
                tokio::select! {
                    res = snapshots.next() => match res {
                        Some(snapshot) => {
                            let version = snapshot.version.to_string();
                            if version == known {
                                trace!(%version, "Already observed");
                                continue;
                            }
                            known = version;
                            yield respond(&nonce, &req, snapshot);
                        }
                        None => return,
                    },

                    // Close the stream so that it doesn't hold the server open.
                    _ = &mut shutdown => {
                        return;
                    }
                }
            }
        }))
    }
}

fn check_type(req: &DiscoveryRequest) -> Result<(), DiscoveryError> {
    if req.type_url() != TYPE_URL {
        return Err(DiscoveryError::UnsupportedType(req.type_url().to_string()));
    }
    Ok(())
}

fn respond(nonce: &AtomicU64, req: &DiscoveryRequest, snapshot: Snapshot) -> DiscoveryResponse {
    let Snapshot { version, resources } = snapshot;
    let resources = resources
        .into_iter()
        .filter(|cla| req.matches(cla))
        .map(Resource::from)
        .collect::<Vec<_>>();
    let nonce = nonce.fetch_add(1, Ordering::Relaxed) + 1;
    debug!(version, nonce, resources = resources.len(), "Responding");
    DiscoveryResponse {
        version_info: version.to_string(),
        resources,
        type_url: TYPE_URL.to_string(),
        nonce: nonce.to_string(),
    }
}
