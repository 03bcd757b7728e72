//! Channel capability policy
//!
//! A station that never probed or reported support for a channel cannot be
//! steered to it. The policy consults a capability oracle per candidate and
//! puts unreachable BSSes out of scope — but only when no other policy has
//! expressed a preference yet, so it never weakens an explicit decision.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::Instant;

use tracing::{info, trace};

use crate::candidate::{CandidateList, Preference};
use crate::policy::{Mediator, Policy};
use crate::MacAddr;

/// What the station is known to support on a given frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChanCapStatus {
    Supported,
    /// No evidence either way; treated as steerable.
    Maybe,
    NotSupported,
}

/// Station channel-capability oracle.
pub trait ChanCapOracle {
    fn supports(&self, sta: MacAddr, freq_mhz: u32) -> ChanCapStatus;
}

/// Capability table fed from probe/assoc observations.
#[derive(Debug, Default)]
pub struct ChanCapTable {
    entries: BTreeMap<(MacAddr, u32), ChanCapStatus>,
}

impl ChanCapTable {
    pub fn new() -> ChanCapTable {
        ChanCapTable::default()
    }

    pub fn set(&mut self, sta: MacAddr, freq_mhz: u32, status: ChanCapStatus) {
        self.entries.insert((sta, freq_mhz), status);
    }

    pub fn remove(&mut self, sta: MacAddr, freq_mhz: u32) {
        self.entries.remove(&(sta, freq_mhz));
    }

    pub fn status(&self, sta: MacAddr, freq_mhz: u32) -> ChanCapStatus {
        self.entries
            .get(&(sta, freq_mhz))
            .copied()
            .unwrap_or(ChanCapStatus::Maybe)
    }
}

impl ChanCapOracle for RefCell<ChanCapTable> {
    fn supports(&self, sta: MacAddr, freq_mhz: u32) -> ChanCapStatus {
        self.borrow().status(sta, freq_mhz)
    }
}

pub struct ChanCapPolicy {
    name: String,
    sta_addr: MacAddr,
    mediator: Rc<dyn Mediator>,
    oracle: Rc<dyn ChanCapOracle>,
}

impl ChanCapPolicy {
    pub fn new(
        name: &str,
        sta_addr: MacAddr,
        mediator: Rc<dyn Mediator>,
        oracle: Rc<dyn ChanCapOracle>,
    ) -> ChanCapPolicy {
        ChanCapPolicy {
            name: name.to_string(),
            sta_addr,
            mediator,
            oracle,
        }
    }

    /// Capability observations changed; re-evaluate the stack.
    pub fn caps_changed(&self) {
        self.mediator.schedule_stack_recalc(&self.name);
    }

    pub fn oracle(&self) -> Rc<dyn ChanCapOracle> {
        self.oracle.clone()
    }
}

impl Policy for ChanCapPolicy {
    fn name(&self) -> &str {
        &self.name
    }

    fn sta_addr(&self) -> MacAddr {
        self.sta_addr
    }

    fn recalc(&mut self, candidates: &mut CandidateList, _now: Instant) {
        let bssids: Vec<MacAddr> = candidates.iter().map(|c| c.bssid()).collect();
        for bssid in bssids {
            let candidate = match candidates.lookup(bssid) {
                Some(c) => c,
                None => continue,
            };
            let freq = candidate.channel().control_freq_mhz;
            match self.oracle.supports(self.sta_addr, freq) {
                ChanCapStatus::Supported | ChanCapStatus::Maybe => {}
                ChanCapStatus::NotSupported => match candidate.preference() {
                    Preference::OutOfScope | Preference::HardBlocked => {
                        trace!(
                            policy = %self.name,
                            bssid = %bssid,
                            freq,
                            preference = %candidate.preference(),
                            "unreachable but already blocked"
                        );
                    }
                    Preference::SoftBlocked | Preference::Available => {
                        info!(
                            policy = %self.name,
                            bssid = %bssid,
                            freq,
                            preference = %candidate.preference(),
                            "unreachable but already marked, expect issues"
                        );
                    }
                    Preference::None => {
                        trace!(
                            policy = %self.name,
                            bssid = %bssid,
                            freq,
                            "unreachable, marking out of scope"
                        );
                        candidate.set_preference(&self.name, Preference::OutOfScope);
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::Channel;

    struct NullMediator;
    impl Mediator for NullMediator {
        fn schedule_stack_recalc(&self, _policy: &str) {}
        fn trigger_executor(&self, _policy: &str) -> bool {
            true
        }
        fn dismiss_executor(&self, _policy: &str) {}
    }

    fn mac(last: u8) -> MacAddr {
        MacAddr::new([0xaa, 0xaa, 0xaa, 0xaa, 0xaa, last])
    }

    fn setup() -> (ChanCapPolicy, Rc<RefCell<ChanCapTable>>, CandidateList, MacAddr) {
        let sta = MacAddr::new([0xdd; 6]);
        let table = Rc::new(RefCell::new(ChanCapTable::new()));
        let policy = ChanCapPolicy::new(
            "chan_cap",
            sta,
            Rc::new(NullMediator),
            table.clone() as Rc<dyn ChanCapOracle>,
        );
        let mut list = CandidateList::new();
        list.bss_set(
            mac(1),
            Channel {
                control_freq_mhz: 2412,
                width_mhz: 20,
            },
        );
        list.bss_set(
            mac(2),
            Channel {
                control_freq_mhz: 5745,
                width_mhz: 20,
            },
        );
        (policy, table, list, sta)
    }

    #[test]
    fn test_unsupported_freq_goes_out_of_scope() {
        let (mut policy, table, mut list, sta) = setup();
        table
            .borrow_mut()
            .set(sta, 5745, ChanCapStatus::NotSupported);

        policy.recalc(&mut list, Instant::now());
        assert_eq!(list.get(mac(1)).unwrap().preference(), Preference::None);
        assert_eq!(list.get(mac(2)).unwrap().preference(), Preference::OutOfScope);
    }

    #[test]
    fn test_unknown_freq_is_steerable() {
        let (mut policy, _table, mut list, _sta) = setup();
        policy.recalc(&mut list, Instant::now());
        assert_eq!(list.get(mac(1)).unwrap().preference(), Preference::None);
        assert_eq!(list.get(mac(2)).unwrap().preference(), Preference::None);
    }

    #[test]
    fn test_existing_preference_not_downgraded() {
        let (mut policy, table, mut list, sta) = setup();
        table
            .borrow_mut()
            .set(sta, 5745, ChanCapStatus::NotSupported);
        list.lookup(mac(2))
            .unwrap()
            .set_preference("earlier", Preference::Available);

        policy.recalc(&mut list, Instant::now());
        // warned, not rewritten
        assert_eq!(list.get(mac(2)).unwrap().preference(), Preference::Available);
        assert_eq!(list.get(mac(2)).unwrap().reason(), Some("earlier"));
    }
}
