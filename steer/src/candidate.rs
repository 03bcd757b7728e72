//! Steering candidate list
//!
//! Candidates are the BSSes a station could be steered to or blocked from.
//! Every policy pass rewrites their preferences; writes are monotone in
//! preference strength so a later, weaker policy cannot undo a stronger
//! decision made earlier in the stack.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::MacAddr;

/// Candidate preference, ordered by strength.
///
/// `set_preference` ignores writes weaker than the stored value; among
/// writes of equal or greater strength the last writer wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preference {
    #[default]
    None,
    Available,
    SoftBlocked,
    HardBlocked,
    OutOfScope,
}

impl fmt::Display for Preference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Preference::None => "none",
            Preference::Available => "available",
            Preference::SoftBlocked => "soft_blocked",
            Preference::HardBlocked => "hard_blocked",
            Preference::OutOfScope => "out_of_scope",
        };
        f.write_str(s)
    }
}

/// Operating channel of a candidate BSS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub control_freq_mhz: u32,
    #[serde(default = "default_width")]
    pub width_mhz: u32,
}

fn default_width() -> u32 {
    20
}

/// One candidate BSS with its current preference and the policy that wrote
/// it, kept for diagnostics.
#[derive(Debug, Clone)]
pub struct Candidate {
    bssid: MacAddr,
    channel: Channel,
    preference: Preference,
    reason: Option<String>,
}

impl Candidate {
    pub fn bssid(&self) -> MacAddr {
        self.bssid
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn preference(&self) -> Preference {
        self.preference
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    /// Write a preference, subject to the strength ordering. Weaker writes
    /// are logged and dropped.
    pub fn set_preference(&mut self, reason: &str, preference: Preference) {
        if preference < self.preference {
            debug!(
                bssid = %self.bssid,
                current = %self.preference,
                attempted = %preference,
                by = reason,
                "weaker preference write ignored"
            );
            return;
        }
        self.preference = preference;
        self.reason = Some(reason.to_string());
    }
}

/// Flat, insertion-ordered list of candidates.
#[derive(Debug, Clone, Default)]
pub struct CandidateList {
    items: Vec<Candidate>,
}

impl CandidateList {
    pub fn new() -> CandidateList {
        CandidateList::default()
    }

    /// Add a candidate or update its channel in place.
    pub fn bss_set(&mut self, bssid: MacAddr, channel: Channel) {
        match self.items.iter_mut().find(|c| c.bssid == bssid) {
            Some(candidate) => candidate.channel = channel,
            None => self.items.push(Candidate {
                bssid,
                channel,
                preference: Preference::None,
                reason: None,
            }),
        }
    }

    pub fn remove(&mut self, bssid: MacAddr) {
        self.items.retain(|c| c.bssid != bssid);
    }

    pub fn lookup(&mut self, bssid: MacAddr) -> Option<&mut Candidate> {
        self.items.iter_mut().find(|c| c.bssid == bssid)
    }

    pub fn get(&self, bssid: MacAddr) -> Option<&Candidate> {
        self.items.iter().find(|c| c.bssid == bssid)
    }

    /// Reset every preference to `None`, keeping identity and channels.
    pub fn clear(&mut self) {
        for candidate in &mut self.items {
            candidate.preference = Preference::None;
            candidate.reason = None;
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Insertion-ordered iteration.
    pub fn iter(&self) -> impl Iterator<Item = &Candidate> {
        self.items.iter()
    }
}
