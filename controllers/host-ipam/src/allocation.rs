//! Allocation controller
//!
//! The single consumer of the request queue. It is the only writer of the
//! pool and binding tables, which is what keeps an address from ever being
//! handed to two hosts.
//!
//! Every request produces exactly one [`IpamResponse`]:
//!
//! - Create: reuse an existing binding in the same range, else claim the
//!   replayed address or allocate a fresh one, then bind it. Under the
//!   single-binding policy a host already bound in another range is refused.
//! - Delete: drop the binding for `(host, range)` and return its address
//!   to the pool. A host with no binding is a successful no-op.

use crate::config::{BindingPolicy, ResponseOverflow};
use crate::error::{AllocationError, ControllerError};
use crate::pool::PoolAllocator;
use crate::request::{IpamRequest, IpamResponse, Operation};
use ipam_store::{Binding, ClaimOutcome, RangeId, StoreError};
use std::net::Ipv4Addr;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Owns the pool and turns each [`IpamRequest`] into an [`IpamResponse`].
pub struct AllocationController {
    pool: PoolAllocator,
    policy: BindingPolicy,
}

impl AllocationController {
    /// Controller over `pool` enforcing `policy`
    pub fn new(pool: PoolAllocator, policy: BindingPolicy) -> Self {
        Self { pool, policy }
    }

    /// The pool this controller allocates from
    pub fn pool(&self) -> &PoolAllocator {
        &self.pool
    }

    /// Process one request to completion
    pub async fn handle(&self, request: IpamRequest) -> IpamResponse {
        debug!("Handling {}", request);

        let outcome = match self.validate(&request) {
            Ok((range, known)) => match request.operation {
                Operation::Create => self.create(&request, range, known).await.map(Some),
                Operation::Delete => self.delete(&request, range).await,
            },
            Err(e) => Err(e),
        };

        match &outcome {
            Ok(Some(address)) => info!("{} succeeded: {}", request, address),
            Ok(None) => info!("{} succeeded: nothing bound", request),
            Err(e) => warn!("{} failed: {}", request, e),
        }

        IpamResponse { request, outcome }
    }

    /// Drain `requests` until the queue closes or `shutdown` flips to true.
    ///
    /// A request already taken off the queue is always finished and its
    /// response emitted before the loop checks for shutdown again.
    pub async fn run(
        self,
        mut requests: mpsc::Receiver<IpamRequest>,
        responses: mpsc::Sender<IpamResponse>,
        overflow: ResponseOverflow,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), ControllerError> {
        info!("Allocation controller running (binding policy: {}, overflow: {})", self.policy, overflow);

        loop {
            let request = tokio::select! {
                biased;
                _ = shutdown.wait_for(|stop| *stop) => {
                    info!("Allocation controller stopping on shutdown signal");
                    break;
                }
                next = requests.recv() => match next {
                    Some(request) => request,
                    None => {
                        info!("Request queue closed; allocation controller stopping");
                        break;
                    }
                },
            };

            let response = self.handle(request).await;
            emit(&responses, overflow, response).await?;
        }

        Ok(())
    }

    fn validate(&self, request: &IpamRequest) -> Result<(RangeId, Option<Ipv4Addr>), AllocationError> {
        let range = request
            .cidr
            .parse::<RangeId>()
            .map_err(|e| AllocationError::InvalidRange(e.to_string()))?;

        if !self.pool.contains_range(&range) {
            return Err(AllocationError::UnknownRange(request.cidr.clone()));
        }

        let known = match request.ip_addr.as_deref() {
            Some(ip) => {
                let address: Ipv4Addr = ip
                    .trim()
                    .parse()
                    .map_err(|_| AllocationError::InvalidAddress(ip.to_string()))?;
                if !range.contains(address) {
                    return Err(AllocationError::InvalidAddress(format!("{} is outside {}", address, range)));
                }
                Some(address)
            }
            None => None,
        };

        Ok((range, known))
    }

    async fn create(
        &self,
        request: &IpamRequest,
        range: RangeId,
        known: Option<Ipv4Addr>,
    ) -> Result<Ipv4Addr, AllocationError> {
        if let Some(existing) = self.existing_binding(&request.hostname, &range).await? {
            // An address from another range must never be reported under this one
            if existing.range != range {
                return Err(AllocationError::HostAlreadyBound {
                    host: request.hostname.clone(),
                    address: existing.address,
                    range: existing.range.to_string(),
                });
            }
            debug!("{} already holds {}", request.hostname, existing.address);
            return Ok(existing.address);
        }

        // `claimed` is true when this call moved the address to Allocated
        let (address, claimed) = match known {
            Some(address) => self.claim_known(&request.hostname, address, &range).await?,
            None => {
                let address = self
                    .pool
                    .allocate(&range)
                    .await
                    .map_err(persistence)?
                    .ok_or_else(|| AllocationError::PoolExhausted(range.to_string()))?;
                (address, true)
            }
        };

        let binding = Binding::new(&request.hostname, address, range);
        if let Err(e) = self.pool.bind(&binding).await {
            if claimed {
                self.release_quietly(address).await;
            }
            return Err(match e {
                StoreError::Conflict(msg) => AllocationError::AddressConflict(msg),
                other => persistence(other),
            });
        }

        Ok(address)
    }

    // Recovery replay: take back exactly the recorded address
    async fn claim_known(
        &self,
        hostname: &str,
        address: Ipv4Addr,
        range: &RangeId,
    ) -> Result<(Ipv4Addr, bool), AllocationError> {
        match self.pool.claim(address, range).await.map_err(persistence)? {
            ClaimOutcome::Claimed => Ok((address, true)),
            ClaimOutcome::AlreadyAllocated => match self.pool.holder_of(address).await.map_err(persistence)? {
                Some(holder) if holder.hostname != hostname => Err(AllocationError::AddressConflict(format!(
                    "{} is bound to {}",
                    address, holder.hostname
                ))),
                _ => Ok((address, false)),
            },
            ClaimOutcome::NotInPool => Err(AllocationError::InvalidAddress(format!(
                "{} is not in the pool for {}",
                address, range
            ))),
        }
    }

    // Delete is always scoped to the request's range, whatever the policy
    async fn delete(&self, request: &IpamRequest, range: RangeId) -> Result<Option<Ipv4Addr>, AllocationError> {
        let bindings = self
            .pool
            .bindings_for(&request.hostname)
            .await
            .map_err(persistence)?;

        let Some(binding) = bindings.into_iter().find(|b| b.range == range) else {
            return Ok(None);
        };

        // Unbind before releasing so a failure never leaves a bound address Available
        self.pool.unbind(&binding).await.map_err(persistence)?;
        self.pool.release(binding.address).await.map_err(persistence)?;

        Ok(Some(binding.address))
    }

    async fn existing_binding(&self, hostname: &str, range: &RangeId) -> Result<Option<Binding>, AllocationError> {
        let bindings = self.pool.bindings_for(hostname).await.map_err(persistence)?;
        Ok(match self.policy {
            BindingPolicy::SinglePerHost => bindings.into_iter().next(),
            BindingPolicy::PerRange => bindings.into_iter().find(|b| b.range == *range),
        })
    }

    async fn release_quietly(&self, address: Ipv4Addr) {
        if let Err(e) = self.pool.release(address).await {
            error!("Failed to return {} to the pool after a failed bind: {}", address, e);
        }
    }
}

fn persistence(e: StoreError) -> AllocationError {
    AllocationError::Persistence(e.to_string())
}

async fn emit(
    responses: &mpsc::Sender<IpamResponse>,
    overflow: ResponseOverflow,
    response: IpamResponse,
) -> Result<(), ControllerError> {
    match overflow {
        ResponseOverflow::Backpressure => responses
            .send(response)
            .await
            .map_err(|_| ControllerError::ChannelClosed("response queue".to_string())),
        ResponseOverflow::DropNewest => match responses.try_send(response) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                warn!("Response queue full; dropping response for {}", dropped.request);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(ControllerError::ChannelClosed("response queue".to_string()))
            }
        },
    }
}

#[cfg(test)]
#[path = "allocation_test.rs"]
mod tests;
