//! BTM response policy
//!
//! When a station answers an 802.11v BSS Transition Management request it
//! names the neighbors it is willing to move to. For a short period after
//! the response, every candidate the station did not name is out of scope —
//! steering it anywhere else would be ignored or rejected anyway.

use std::rc::Rc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::candidate::{CandidateList, Preference};
use crate::policy::{Mediator, Policy};
use crate::MacAddr;

/// How long a response keeps constraining the candidate set.
const RESPONSE_RELEVANCE: Duration = Duration::from_secs(10);

/// One neighbor named in a BTM response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BtmNeighbor {
    pub bssid: MacAddr,
    pub preference: i32,
}

pub struct BtmResponsePolicy {
    name: String,
    sta_addr: MacAddr,
    mediator: Rc<dyn Mediator>,
    neighbors: Vec<BtmNeighbor>,
    response_at: Option<Instant>,
    relevance: Duration,
}

impl BtmResponsePolicy {
    pub fn new(name: &str, sta_addr: MacAddr, mediator: Rc<dyn Mediator>) -> BtmResponsePolicy {
        BtmResponsePolicy {
            name: format!("btm_response_{name}"),
            sta_addr,
            mediator,
            neighbors: Vec::new(),
            response_at: None,
            relevance: RESPONSE_RELEVANCE,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_relevance(mut self, relevance: Duration) -> BtmResponsePolicy {
        self.relevance = relevance;
        self
    }

    fn names_bssid(&self, bssid: MacAddr) -> bool {
        self.neighbors.iter().any(|n| n.bssid == bssid)
    }
}

impl Policy for BtmResponsePolicy {
    fn name(&self) -> &str {
        &self.name
    }

    fn sta_addr(&self) -> MacAddr {
        self.sta_addr
    }

    fn btm_response(&mut self, neighbors: &[BtmNeighbor], now: Instant) {
        debug!(
            policy = %self.name,
            count = neighbors.len(),
            "btm response received"
        );
        // each response replaces the previous cache wholesale
        self.neighbors = neighbors.to_vec();
        self.response_at = Some(now);
        self.mediator.schedule_stack_recalc(&self.name);
    }

    fn recalc(&mut self, candidates: &mut CandidateList, now: Instant) {
        let response_at = match self.response_at {
            Some(t) => t,
            None => return,
        };
        if now.saturating_duration_since(response_at) > self.relevance {
            trace!(policy = %self.name, "btm response too old, skipping");
            return;
        }

        // mask every candidate the station did not offer to move to
        let bssids: Vec<MacAddr> = candidates.iter().map(|c| c.bssid()).collect();
        for bssid in bssids {
            if self.names_bssid(bssid) {
                continue;
            }
            if let Some(candidate) = candidates.lookup(bssid) {
                candidate.set_preference(&self.name, Preference::OutOfScope);
            }
        }
    }

    fn dump(&self) {
        tracing::info!(
            policy = %self.name,
            neighbors = ?self.neighbors,
            fresh = self.response_at.is_some(),
            "btm response state"
        );
    }
}
