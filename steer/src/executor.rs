//! Steering executor arbitration
//!
//! The executor is the component that actually moves a station (BTM request
//! or forced disassociation). Only one policy may drive it at a time; a
//! policy that loses the claim keeps running its own state machine as if the
//! attempt had gone out.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::MacAddr;

/// Executor engagements surfaced to the command transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutorAction {
    Engage { sta: MacAddr, policy: String },
    Dismiss { sta: MacAddr, policy: String },
}

pub type ActionSink = Box<dyn FnMut(ExecutorAction)>;

/// Single-owner executor handle.
pub struct Executor {
    sta: MacAddr,
    owner: Option<String>,
    sink: Option<ActionSink>,
}

impl Executor {
    pub fn new(sta: MacAddr) -> Executor {
        Executor {
            sta,
            owner: None,
            sink: None,
        }
    }

    pub fn set_sink(&mut self, sink: ActionSink) {
        self.sink = Some(sink);
    }

    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    fn emit(&mut self, action: ExecutorAction) {
        if let Some(sink) = self.sink.as_mut() {
            sink(action);
        }
    }

    /// Claim the executor for a policy. Succeeds when it is free or already
    /// owned by the same policy.
    pub fn trigger(&mut self, policy: &str) -> bool {
        match self.owner.as_deref() {
            Some(owner) if owner != policy => {
                debug!(policy, owner, "executor busy");
                return false;
            }
            _ => {}
        }
        if self.owner.is_none() {
            info!(policy, sta = %self.sta, "executor engaged");
            self.owner = Some(policy.to_string());
            self.emit(ExecutorAction::Engage {
                sta: self.sta,
                policy: policy.to_string(),
            });
        }
        true
    }

    /// Release the executor. Only the owning policy can release it.
    pub fn dismiss(&mut self, policy: &str) {
        if self.owner.as_deref() != Some(policy) {
            return;
        }
        info!(policy, sta = %self.sta, "executor dismissed");
        self.owner = None;
        self.emit(ExecutorAction::Dismiss {
            sta: self.sta,
            policy: policy.to_string(),
        });
    }
}
