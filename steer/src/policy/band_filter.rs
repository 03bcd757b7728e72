//! Band filter policy
//!
//! Splits candidates into an included and an excluded band set and writes a
//! configured preference onto each side. Typically the first policy in the
//! stack: it pre-marks the bands a deployment wants a station on (or away
//! from) before the dynamic policies run.

use std::collections::BTreeSet;
use std::rc::Rc;
use std::time::Instant;

use tracing::{debug, info};

use crate::candidate::{CandidateList, Preference};
use crate::policy::{freq_to_band, Band, Mediator, Policy};
use crate::MacAddr;

/// Preference applied to one side of the band split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PreferenceOverride {
    pub enabled: bool,
    pub value: Preference,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BandFilterConfig {
    pub included: PreferenceOverride,
    pub excluded: PreferenceOverride,
    pub bands: Vec<Band>,
}

pub struct BandFilterPolicy {
    name: String,
    sta_addr: MacAddr,
    mediator: Rc<dyn Mediator>,
    included: PreferenceOverride,
    excluded: PreferenceOverride,
    bands: BTreeSet<Band>,
}

impl BandFilterPolicy {
    pub fn new(name: &str, sta_addr: MacAddr, mediator: Rc<dyn Mediator>) -> BandFilterPolicy {
        BandFilterPolicy {
            name: name.to_string(),
            sta_addr,
            mediator,
            included: PreferenceOverride::default(),
            excluded: PreferenceOverride::default(),
            bands: BTreeSet::new(),
        }
    }

    fn is_cleared(&self) -> bool {
        !self.included.enabled
            && self.included.value == Preference::None
            && !self.excluded.enabled
            && self.excluded.value == Preference::None
            && self.bands.is_empty()
    }

    fn matches_config(&self, config: &BandFilterConfig) -> bool {
        self.included == config.included
            && self.excluded == config.excluded
            && self.bands.len() == config.bands.len()
            && config.bands.iter().all(|b| self.bands.contains(b))
    }

    /// Install or clear the filter configuration. Redundant sets are
    /// swallowed without a recalc.
    pub fn set_config(&mut self, config: Option<BandFilterConfig>) {
        match config {
            None => {
                if self.is_cleared() {
                    return;
                }
                self.included = PreferenceOverride::default();
                self.excluded = PreferenceOverride::default();
                self.bands.clear();
            }
            Some(config) => {
                if self.matches_config(&config) {
                    return;
                }
                self.included = config.included;
                self.excluded = config.excluded;
                self.bands = config.bands.into_iter().collect();
            }
        }

        info!(policy = %self.name, "config changed");
        self.mediator.schedule_stack_recalc(&self.name);
    }
}

impl Policy for BandFilterPolicy {
    fn name(&self) -> &str {
        &self.name
    }

    fn sta_addr(&self) -> MacAddr {
        self.sta_addr
    }

    fn recalc(&mut self, candidates: &mut CandidateList, _now: Instant) {
        if self.is_cleared() {
            return;
        }

        let bssids: Vec<MacAddr> = candidates.iter().map(|c| c.bssid()).collect();
        for bssid in bssids {
            let candidate = match candidates.lookup(bssid) {
                Some(c) => c,
                None => continue,
            };
            let band = freq_to_band(candidate.channel().control_freq_mhz);
            let included = band.map(|b| self.bands.contains(&b)).unwrap_or(false);
            let preference = if included { &self.included } else { &self.excluded };

            if !preference.enabled {
                continue;
            }
            candidate.set_preference(&self.name, preference.value);
            debug!(
                policy = %self.name,
                bssid = %bssid,
                preference = %candidate.preference(),
                "band filter applied"
            );
        }
    }

    fn dump(&self) {
        info!(
            policy = %self.name,
            included = ?self.included,
            excluded = ?self.excluded,
            bands = ?self.bands,
            "band filter state"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::Channel;
    use std::cell::Cell;

    #[derive(Default)]
    struct TestMediator {
        recalcs: Cell<u32>,
    }

    impl Mediator for TestMediator {
        fn schedule_stack_recalc(&self, _policy: &str) {
            self.recalcs.set(self.recalcs.get() + 1);
        }
        fn trigger_executor(&self, _policy: &str) -> bool {
            true
        }
        fn dismiss_executor(&self, _policy: &str) {}
    }

    fn mac(last: u8) -> MacAddr {
        MacAddr::new([0xaa, 0xaa, 0xaa, 0xaa, 0xaa, last])
    }

    fn chan(freq: u32) -> Channel {
        Channel {
            control_freq_mhz: freq,
            width_mhz: 20,
        }
    }

    fn candidates() -> CandidateList {
        let mut list = CandidateList::new();
        list.bss_set(mac(0x24), chan(2412));
        list.bss_set(mac(0x5f), chan(5745));
        list.bss_set(mac(0x6f), chan(5995));
        list
    }

    fn override_(value: Preference) -> PreferenceOverride {
        PreferenceOverride {
            enabled: true,
            value,
        }
    }

    #[test]
    fn test_band_filter_typical_case() {
        let sta = MacAddr::new([0xdd; 6]);
        let mediator = Rc::new(TestMediator::default());
        let mut policy = BandFilterPolicy::new("band_filter", sta, mediator.clone());
        let mut list = candidates();
        let now = Instant::now();

        // everything excluded: all bands out of scope
        policy.set_config(Some(BandFilterConfig {
            included: PreferenceOverride::default(),
            excluded: override_(Preference::OutOfScope),
            bands: Vec::new(),
        }));
        assert_eq!(mediator.recalcs.get(), 1);
        list.clear();
        policy.recalc(&mut list, now);
        assert_eq!(list.get(mac(0x24)).unwrap().preference(), Preference::OutOfScope);
        assert_eq!(list.get(mac(0x5f)).unwrap().preference(), Preference::OutOfScope);
        assert_eq!(list.get(mac(0x6f)).unwrap().preference(), Preference::OutOfScope);

        // only 5 GHz passes through
        policy.set_config(Some(BandFilterConfig {
            included: PreferenceOverride::default(),
            excluded: override_(Preference::OutOfScope),
            bands: vec![Band::Band5G],
        }));
        assert_eq!(mediator.recalcs.get(), 2);
        list.clear();
        policy.recalc(&mut list, now);
        assert_eq!(list.get(mac(0x24)).unwrap().preference(), Preference::OutOfScope);
        assert_eq!(list.get(mac(0x5f)).unwrap().preference(), Preference::None);
        assert_eq!(list.get(mac(0x6f)).unwrap().preference(), Preference::OutOfScope);

        // 5 GHz marked available
        policy.set_config(Some(BandFilterConfig {
            included: override_(Preference::Available),
            excluded: override_(Preference::OutOfScope),
            bands: vec![Band::Band5G],
        }));
        assert_eq!(mediator.recalcs.get(), 3);
        list.clear();
        policy.recalc(&mut list, now);
        assert_eq!(list.get(mac(0x5f)).unwrap().preference(), Preference::Available);

        // same config again: no extra recalc
        policy.set_config(Some(BandFilterConfig {
            included: override_(Preference::Available),
            excluded: override_(Preference::OutOfScope),
            bands: vec![Band::Band5G],
        }));
        assert_eq!(mediator.recalcs.get(), 3);

        // cleared: nothing touched
        policy.set_config(None);
        assert_eq!(mediator.recalcs.get(), 4);
        list.clear();
        policy.recalc(&mut list, now);
        assert_eq!(list.get(mac(0x24)).unwrap().preference(), Preference::None);
        assert_eq!(list.get(mac(0x5f)).unwrap().preference(), Preference::None);
        assert_eq!(list.get(mac(0x6f)).unwrap().preference(), Preference::None);
    }
}
