// ── reservation-get-page cursor ──
//
// Walks every subnet of a daemon, global reservations first, one page at
// a time. Each non-empty page is hashed and appended to the trace.

use std::time::Duration;

use kestrel_agent::{AccessPoint, ConnectedAgents, KeaCommand, KeaService, ResultCode};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::{check_response, send_command};
use crate::error::{CoreError, Result};
use crate::model::SubnetId;

pub const RESERVATION_GET_PAGE: &str = "reservation-get-page";

/// Kea subnet id used for global reservations.
pub const GLOBAL_SUBNET_ID: i64 = 0;

/// One subnet to page through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageTarget {
    /// Inventory subnet; `None` for global reservations.
    pub subnet_id: Option<SubnetId>,
    /// Kea `subnet-id`.
    pub local_id: i64,
}

impl PageTarget {
    pub fn global() -> Self {
        Self {
            subnet_id: None,
            local_id: GLOBAL_SUBNET_ID,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub hash: [u8; 32],
    pub subnet_index: usize,
    pub hosts: Vec<Value>,
}

/// What is kept of a page between cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceEntry {
    pub hash: [u8; 32],
    pub subnet_index: usize,
}

impl From<&Page> for TraceEntry {
    fn from(page: &Page) -> Self {
        Self {
            hash: page.hash,
            subnet_index: page.subnet_index,
        }
    }
}

pub fn hash_hosts(hosts: &[Value]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for host in hosts {
        hasher.update(host.to_string().as_bytes());
        hasher.update(b"\n");
    }
    hasher.finalize().into()
}

pub struct ReservationPager<'a> {
    agents: &'a dyn ConnectedAgents,
    access_point: &'a AccessPoint,
    service: KeaService,
    daemon: String,
    targets: Vec<PageTarget>,
    limit: u32,
    timeout: Duration,
    cancel: &'a CancellationToken,
    index: usize,
    from: u64,
    source_index: u64,
    trace: Vec<Page>,
}

impl<'a> ReservationPager<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        agents: &'a dyn ConnectedAgents,
        access_point: &'a AccessPoint,
        service: KeaService,
        daemon: String,
        targets: Vec<PageTarget>,
        limit: u32,
        timeout: Duration,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            agents,
            access_point,
            service,
            daemon,
            targets,
            limit,
            timeout,
            cancel,
            index: 0,
            from: 0,
            source_index: 1,
            trace: Vec::new(),
        }
    }

    pub fn targets(&self) -> &[PageTarget] {
        &self.targets
    }

    /// Pages fetched so far.
    pub fn trace(&self) -> &[Page] {
        &self.trace
    }

    pub fn into_trace(self) -> Vec<Page> {
        self.trace
    }

    fn advance_subnet(&mut self) {
        self.index += 1;
        self.from = 0;
        self.source_index = 1;
    }

    /// Fetch the next non-empty page. `Ok(None)` once every subnet is done.
    pub async fn next_page(&mut self) -> Result<Option<&Page>> {
        while let Some(target) = self.targets.get(self.index).copied() {
            let command = KeaCommand::new(RESERVATION_GET_PAGE)
                .for_service(self.service)
                .with_arguments(json!({
                    "subnet-id": target.local_id,
                    "source-index": self.source_index,
                    "from": self.from,
                    "limit": self.limit,
                }));
            let response =
                send_command(self.agents, self.access_point, &command, self.timeout, self.cancel)
                    .await?;
            let response = check_response(response, RESERVATION_GET_PAGE, &self.daemon)?;
            if response.code() == ResultCode::Empty {
                self.advance_subnet();
                continue;
            }

            let args = response.arguments.unwrap_or(Value::Null);
            let hosts = match args.get("hosts") {
                Some(Value::Array(hosts)) => hosts.clone(),
                None | Some(Value::Null) => Vec::new(),
                Some(_) => {
                    return Err(CoreError::malformed(format!(
                        "{RESERVATION_GET_PAGE} hosts is not a list"
                    )));
                }
            };
            if hosts.is_empty() {
                self.advance_subnet();
                continue;
            }

            let next = args.get("next").and_then(|next| {
                Some((
                    next.get("from")?.as_u64()?,
                    next.get("source-index")?.as_u64()?,
                ))
            });
            let subnet_index = self.index;
            match next {
                Some((from, source_index)) => {
                    self.from = from;
                    self.source_index = source_index;
                }
                None => self.advance_subnet(),
            }

            trace!(
                daemon = %self.daemon,
                subnet = target.local_id,
                hosts = hosts.len(),
                "fetched reservation page"
            );
            self.trace.push(Page {
                hash: hash_hosts(&hosts),
                subnet_index,
                hosts,
            });
            return Ok(self.trace.last());
        }
        Ok(None)
    }
}
