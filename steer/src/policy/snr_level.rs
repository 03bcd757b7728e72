//! SNR level policy
//!
//! Moves a station off a set of "from" BSSes toward a set of co-located
//! "to" BSSes once its link SNR crosses a threshold (in either direction,
//! depending on mode) and the link is idle enough. Enforcement is bounded by
//! a timer, followed by a settling phase that judges the outcome; failures
//! back off exponentially, and an ageout clock forgives old failures.

use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::candidate::{CandidateList, Preference};
use crate::policy::{Mediator, Policy, Timer};
use crate::MacAddr;

const ENFORCE_DURATION_SEC: u64 = 5;
const BACKOFF_DURATION_SEC: u64 = 60;
const AGEOUT_DURATION_SEC: u64 = 30;
const BACKOFF_EXP_BASE: u64 = 2;

/// Which side of the threshold makes the "from" BSSes undesirable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnrLevelMode {
    /// Steer away when the signal is strong (upsteer to a faster band).
    BlockFromWhenAbove,
    /// Steer away when the signal is weak (downsteer to a sturdier band).
    BlockFromWhenBelow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SnrState {
    /// Awaiting input changes; can only lead to Enforce.
    Idle,
    /// Candidate masking in effect until the timer runs out.
    Enforce,
    /// Waiting for the link set to settle so the outcome can be judged.
    Settling,
    /// Doing nothing for a failure-scaled period.
    Backoff,
}

impl SnrState {
    fn as_str(self) -> &'static str {
        match self {
            SnrState::Idle => "idle",
            SnrState::Enforce => "enforce",
            SnrState::Settling => "settling",
            SnrState::Backoff => "backoff",
        }
    }
}

/// Last known per-link inputs, keyed by the VIF bssid the station sits on.
#[derive(Debug, Default)]
struct LinkInfo {
    snr: Option<u32>,
    bytes: Option<u64>,
    /// This link was the one being actively enforced against.
    enforced: bool,
}

pub struct SnrLevelPolicy {
    name: String,
    sta_addr: MacAddr,
    mediator: Rc<dyn Mediator>,

    links: BTreeMap<MacAddr, LinkInfo>,

    state: SnrState,
    enforce: Timer,
    backoff: Timer,
    ageout: Timer,
    backoff_pow: u64,
    no_alternatives: bool,

    mode: SnrLevelMode,
    from_bssids: Vec<MacAddr>,
    to_bssids: Vec<MacAddr>,
    threshold_snr: Option<u32>,
    threshold_bytes: Option<u64>,
    backoff_exp_base: u64,
    enforce_duration: Duration,
    backoff_duration_secs: u64,
    ageout_duration: Duration,
}

impl SnrLevelPolicy {
    pub fn new(
        name: &str,
        sta_addr: MacAddr,
        mode: SnrLevelMode,
        mediator: Rc<dyn Mediator>,
    ) -> SnrLevelPolicy {
        SnrLevelPolicy {
            name: name.to_string(),
            sta_addr,
            mediator,
            links: BTreeMap::new(),
            state: SnrState::Idle,
            enforce: Timer::default(),
            backoff: Timer::default(),
            ageout: Timer::default(),
            backoff_pow: 1,
            no_alternatives: false,
            mode,
            from_bssids: Vec::new(),
            to_bssids: Vec::new(),
            threshold_snr: None,
            threshold_bytes: None,
            backoff_exp_base: BACKOFF_EXP_BASE,
            enforce_duration: Duration::from_secs(ENFORCE_DURATION_SEC),
            backoff_duration_secs: BACKOFF_DURATION_SEC,
            ageout_duration: Duration::from_secs(AGEOUT_DURATION_SEC),
        }
    }

    // --- configuration -------------------------------------------------

    pub fn set_threshold_snr(&mut self, snr: Option<u32>, now: Instant) {
        if self.threshold_snr == snr {
            return;
        }
        self.threshold_snr = snr;
        trace!(policy = %self.name, ?snr, "threshold snr");
        self.fsm_recalc(now);
    }

    pub fn set_threshold_bytes(&mut self, bytes: Option<u64>, now: Instant) {
        if self.threshold_bytes == bytes {
            return;
        }
        self.threshold_bytes = bytes;
        trace!(policy = %self.name, ?bytes, "threshold bytes");
        self.fsm_recalc(now);
    }

    pub fn set_from_bssids(&mut self, bssids: Vec<MacAddr>, now: Instant) {
        if self.from_bssids == bssids {
            return;
        }
        trace!(policy = %self.name, count = bssids.len(), "from_bssids");
        self.from_bssids = bssids;
        self.fsm_recalc(now);
    }

    pub fn set_to_bssids(&mut self, bssids: Vec<MacAddr>, now: Instant) {
        if self.to_bssids == bssids {
            return;
        }
        trace!(policy = %self.name, count = bssids.len(), "to_bssids");
        self.to_bssids = bssids;
        self.fsm_recalc(now);
    }

    #[cfg(test)]
    pub(crate) fn set_durations(
        &mut self,
        enforce: Duration,
        backoff_secs: u64,
        ageout: Duration,
    ) {
        self.enforce_duration = enforce;
        self.backoff_duration_secs = backoff_secs;
        self.ageout_duration = ageout;
    }

    pub fn backoff_pow(&self) -> u64 {
        self.backoff_pow
    }

    pub fn state_name(&self) -> &'static str {
        self.state.as_str()
    }

    // --- predicates ----------------------------------------------------

    fn connected_on_from_bssid(&self) -> bool {
        // zero links means disconnected, more than one is ambiguous
        if self.links.len() != 1 {
            return false;
        }
        match self.links.keys().next() {
            Some(bssid) => self.from_bssids.contains(bssid),
            None => false,
        }
    }

    fn should_consider_moving(&self) -> bool {
        let info = match self.links.values().next() {
            Some(info) => info,
            None => return false,
        };
        let snr = match info.snr {
            Some(snr) => snr,
            None => return false,
        };
        let threshold = match self.threshold_snr {
            Some(t) => t,
            None => return false,
        };
        match self.mode {
            SnrLevelMode::BlockFromWhenAbove => {
                if snr <= threshold {
                    return false;
                }
            }
            SnrLevelMode::BlockFromWhenBelow => {
                if snr >= threshold {
                    return false;
                }
            }
        }
        // a byte threshold additionally requires the link to be idle
        if let Some(max_bytes) = self.threshold_bytes {
            match info.bytes {
                None => return false,
                Some(bytes) if bytes >= max_bytes => return false,
                Some(_) => {}
            }
        }
        true
    }

    fn better_bssids_exist(&self) -> bool {
        !self.to_bssids.is_empty()
    }

    // --- state machine -------------------------------------------------

    fn enter_backoff(&mut self, now: Instant) {
        trace!(policy = %self.name, "starting backoff");
        self.state = SnrState::Backoff;

        // an expired ageout clock forgives the previous failures
        if !self.ageout.is_armed() {
            self.backoff_pow = 1;
        }
        if self.no_alternatives {
            self.backoff_pow = 1;
        }

        let secs = self.backoff_pow * self.backoff_duration_secs;
        self.backoff.arm_in(now, Duration::from_secs(secs));
        info!(policy = %self.name, secs, "arming backoff");
        self.mediator.notify_backoff(&self.name, true, secs);
        self.ageout.disarm();

        self.backoff_pow = self.backoff_pow.saturating_mul(self.backoff_exp_base);
        if self.backoff_pow > u64::from(u32::MAX) {
            debug!(policy = %self.name, "clamping backoff time");
            self.backoff_pow = u64::from(u32::MAX);
        }
    }

    fn fsm_recalc(&mut self, now: Instant) {
        trace!(policy = %self.name, state = self.state.as_str(), "recalc");
        loop {
            match self.state {
                SnrState::Idle => {
                    if !self.connected_on_from_bssid() {
                        return;
                    }
                    if !self.should_consider_moving() {
                        trace!(policy = %self.name, "move criteria not met");
                        return;
                    }
                    if !self.better_bssids_exist() {
                        trace!(policy = %self.name, "no co-located targets");
                        return;
                    }

                    debug_assert!(!self.enforce.is_armed());
                    trace!(policy = %self.name, "starting enforce");
                    self.enforce.arm_in(now, self.enforce_duration);
                    if !self.mediator.trigger_executor(&self.name) {
                        // behave as if the attempt went out anyway; timers
                        // keep the state machine uniform
                        debug!(policy = %self.name, "executor unavailable");
                    }
                    self.mediator.notify_steering_attempt(&self.name);
                    self.mediator.schedule_stack_recalc(&self.name);
                    if let Some(info) = self.links.values_mut().next() {
                        info.enforced = true;
                    }
                    self.state = SnrState::Enforce;
                }
                SnrState::Enforce => {
                    if self.enforce.is_armed() {
                        return;
                    }
                    trace!(policy = %self.name, "stopping enforce, starting settling");
                    self.mediator.dismiss_executor(&self.name);
                    self.mediator.schedule_stack_recalc(&self.name);
                    self.no_alternatives = false;
                    self.state = SnrState::Settling;
                }
                SnrState::Settling => {
                    if self.links.len() > 1 {
                        return;
                    }

                    let link = self.links.iter_mut().next();
                    let bssid = link.as_ref().map(|(bssid, _)| **bssid);
                    let on_from = bssid
                        .map(|b| self.from_bssids.contains(&b))
                        .unwrap_or(false);
                    let on_to = bssid
                        .map(|b| self.to_bssids.contains(&b))
                        .unwrap_or(false);

                    if on_to {
                        if let Some(b) = bssid {
                            info!(policy = %self.name, bssid = %b, "steered to co-located target");
                        }
                        self.state = SnrState::Idle;
                        continue;
                    }

                    match (link, on_from) {
                        (Some((b, info)), true) => {
                            // a surviving enforced flag means the station
                            // never actually left; a fresh link means it
                            // bounced and came back
                            if info.enforced {
                                info!(policy = %self.name, bssid = %b, "remained on poor bssid");
                                info.enforced = false;
                            } else {
                                info!(policy = %self.name, bssid = %b, "reconnected back to poor bssid");
                            }
                        }
                        (Some((b, _)), false) => {
                            info!(policy = %self.name, bssid = %b, "steered to out-of-group bssid");
                        }
                        (None, _) => {
                            info!(policy = %self.name, "steered away, station gone");
                        }
                    }

                    self.enter_backoff(now);
                }
                SnrState::Backoff => {
                    if self.backoff.is_armed() {
                        return;
                    }
                    trace!(policy = %self.name, "stopping backoff, starting idle");
                    self.mediator.notify_backoff(&self.name, false, 0);
                    self.ageout.arm_in(now, self.ageout_duration);
                    self.state = SnrState::Idle;
                }
            }
        }
    }
}

impl Policy for SnrLevelPolicy {
    fn name(&self) -> &str {
        &self.name
    }

    fn sta_addr(&self) -> MacAddr {
        self.sta_addr
    }

    fn sta_link_change(&mut self, bssid: MacAddr, connected: bool, now: Instant) {
        match (self.links.contains_key(&bssid), connected) {
            (false, true) => {
                trace!(policy = %self.name, bssid = %bssid, "station connected");
                self.links.insert(bssid, LinkInfo::default());
            }
            (false, false) => {
                warn!(
                    policy = %self.name,
                    bssid = %bssid,
                    "disconnect on a link never seen connecting"
                );
            }
            (true, true) => {
                warn!(
                    policy = %self.name,
                    bssid = %bssid,
                    "re-connect on a link never seen disconnecting"
                );
            }
            (true, false) => {
                trace!(policy = %self.name, bssid = %bssid, "station disconnected");
                self.links.remove(&bssid);
            }
        }
        self.fsm_recalc(now);
    }

    fn sta_snr_change(&mut self, bssid: MacAddr, snr_db: u32, now: Instant) {
        let info = match self.links.get_mut(&bssid) {
            Some(info) => info,
            None => return,
        };
        if info.snr == Some(snr_db) {
            return;
        }
        info.snr = Some(snr_db);
        self.fsm_recalc(now);
    }

    fn sta_data_vol_change(&mut self, bssid: MacAddr, bytes: u64, now: Instant) {
        let info = match self.links.get_mut(&bssid) {
            Some(info) => info,
            None => return,
        };
        if info.bytes == Some(bytes) {
            return;
        }
        info.bytes = Some(bytes);
        self.fsm_recalc(now);
    }

    fn tick(&mut self, now: Instant) {
        let mut fired = false;
        if self.enforce.take_expired(now) {
            trace!(policy = %self.name, "enforce expired");
            fired = true;
        }
        if self.backoff.take_expired(now) {
            info!(policy = %self.name, "backoff expired");
            fired = true;
        }
        if self.ageout.take_expired(now) {
            trace!(policy = %self.name, "ageout expired");
            fired = true;
        }
        if fired {
            self.fsm_recalc(now);
        }
    }

    /// Candidate masking, active only while enforcing: upgrade idle targets
    /// to available, then hard-block the sources — unless every target was
    /// already unavailable, in which case blocking would strand the station.
    fn recalc(&mut self, candidates: &mut CandidateList, _now: Instant) {
        match self.state {
            SnrState::Idle | SnrState::Backoff | SnrState::Settling => return,
            SnrState::Enforce => {}
        }

        let mut available_targets = 0usize;
        for bssid in &self.to_bssids {
            let candidate = match candidates.lookup(*bssid) {
                Some(c) => c,
                None => continue,
            };
            match candidate.preference() {
                Preference::OutOfScope
                | Preference::HardBlocked
                | Preference::SoftBlocked => {}
                Preference::None => {
                    // mark the target available so later policies cannot
                    // block it; otherwise the upsteer could flap between
                    // physical APs
                    candidate.set_preference(&self.name, Preference::Available);
                    available_targets += 1;
                }
                Preference::Available => {
                    available_targets += 1;
                }
            }
        }

        self.no_alternatives = available_targets == 0;
        if self.no_alternatives {
            info!(
                policy = %self.name,
                "no target candidate available, won't block sources"
            );
            return;
        }

        for bssid in &self.from_bssids {
            let candidate = match candidates.lookup(*bssid) {
                Some(c) => c,
                None => continue,
            };
            match candidate.preference() {
                Preference::None => {
                    candidate.set_preference(&self.name, Preference::HardBlocked);
                }
                preference => {
                    info!(
                        policy = %self.name,
                        bssid = %bssid,
                        preference = %preference,
                        "already marked, can't hard block"
                    );
                }
            }
        }
    }

    fn dump(&self) {
        info!(
            policy = %self.name,
            state = self.state.as_str(),
            enforce = self.enforce.is_armed(),
            backoff = self.backoff.is_armed(),
            ageout = self.ageout.is_armed(),
            backoff_pow = self.backoff_pow,
            no_alternatives = self.no_alternatives,
            links = self.links.len(),
            from = ?self.from_bssids,
            to = ?self.to_bssids,
            "snr level state"
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
        triggers: Cell<u32>,
        dismissals: Cell<u32>,
        attempts: Cell<u32>,
        grant: Cell<bool>,
        backoff_periods: std::cell::RefCell<Vec<u64>>,
    }

    impl TestMediator {
        fn granting() -> TestMediator {
            let m = TestMediator::default();
            m.grant.set(true);
            m
        }
    }

    impl Mediator for TestMediator {
        fn schedule_stack_recalc(&self, _policy: &str) {
            self.recalcs.set(self.recalcs.get() + 1);
        }
        fn trigger_executor(&self, _policy: &str) -> bool {
            self.triggers.set(self.triggers.get() + 1);
            self.grant.get()
        }
        fn dismiss_executor(&self, _policy: &str) {
            self.dismissals.set(self.dismissals.get() + 1);
        }
        fn notify_backoff(&self, _policy: &str, enabled: bool, period_secs: u64) {
            if enabled {
                self.backoff_periods.borrow_mut().push(period_secs);
            }
        }
        fn notify_steering_attempt(&self, _policy: &str) {
            self.attempts.set(self.attempts.get() + 1);
        }
    }

    fn mac(last: u8) -> MacAddr {
        MacAddr::new([0xaa, 0xaa, 0xaa, 0xaa, 0xaa, last])
    }

    fn bssid_2g() -> MacAddr {
        mac(0x24)
    }

    fn bssid_5g() -> MacAddr {
        mac(0x5f)
    }

    /// Policy set up for an upsteer: strong 2.4 GHz signal, idle link,
    /// 5 GHz peer available.
    fn upsteer_policy(mediator: Rc<TestMediator>) -> SnrLevelPolicy {
        let sta = MacAddr::new([0xdd; 6]);
        let mut policy = SnrLevelPolicy::new(
            "snr_level",
            sta,
            SnrLevelMode::BlockFromWhenAbove,
            mediator,
        );
        let t0 = Instant::now();
        policy.set_from_bssids(vec![bssid_2g()], t0);
        policy.set_to_bssids(vec![bssid_5g()], t0);
        policy.set_threshold_snr(Some(30), t0);
        policy.set_threshold_bytes(Some(2_000), t0);
        policy
    }

    fn candidates() -> CandidateList {
        let mut list = CandidateList::new();
        list.bss_set(
            bssid_2g(),
            Channel {
                control_freq_mhz: 2412,
                width_mhz: 20,
            },
        );
        list.bss_set(
            bssid_5g(),
            Channel {
                control_freq_mhz: 5745,
                width_mhz: 20,
            },
        );
        list
    }

    fn drive_to_enforce(policy: &mut SnrLevelPolicy, t0: Instant) {
        policy.sta_link_change(bssid_2g(), true, t0);
        policy.sta_data_vol_change(bssid_2g(), 0, t0);
        policy.sta_snr_change(bssid_2g(), 45, t0);
    }

    #[test]
    fn test_enforce_entered_on_inputs() {
        let mediator = Rc::new(TestMediator::granting());
        let mut policy = upsteer_policy(mediator.clone());
        let t0 = Instant::now();

        drive_to_enforce(&mut policy, t0);
        assert_eq!(policy.state_name(), "enforce");
        assert_eq!(mediator.triggers.get(), 1);
        assert_eq!(mediator.attempts.get(), 1);

        // while enforcing, the candidate rewrite blocks the source and
        // upgrades the target
        let mut list = candidates();
        policy.recalc(&mut list, t0);
        assert_eq!(
            list.get(bssid_2g()).unwrap().preference(),
            Preference::HardBlocked
        );
        assert_eq!(
            list.get(bssid_5g()).unwrap().preference(),
            Preference::Available
        );
    }

    #[test]
    fn test_below_threshold_stays_idle() {
        let mediator = Rc::new(TestMediator::granting());
        let mut policy = upsteer_policy(mediator.clone());
        let t0 = Instant::now();

        policy.sta_link_change(bssid_2g(), true, t0);
        policy.sta_data_vol_change(bssid_2g(), 0, t0);
        policy.sta_snr_change(bssid_2g(), 20, t0);
        assert_eq!(policy.state_name(), "idle");
        assert_eq!(mediator.triggers.get(), 0);
    }

    #[test]
    fn test_busy_link_not_steered() {
        let mediator = Rc::new(TestMediator::granting());
        let mut policy = upsteer_policy(mediator.clone());
        let t0 = Instant::now();

        policy.sta_link_change(bssid_2g(), true, t0);
        policy.sta_data_vol_change(bssid_2g(), 50_000, t0);
        policy.sta_snr_change(bssid_2g(), 45, t0);
        assert_eq!(policy.state_name(), "idle");
    }

    #[test]
    fn test_enforce_then_remained_enters_backoff() {
        let mediator = Rc::new(TestMediator::granting());
        let mut policy = upsteer_policy(mediator.clone());
        let t0 = Instant::now();

        drive_to_enforce(&mut policy, t0);

        // timer expires; the station never moved
        policy.tick(t0 + Duration::from_secs(6));
        assert_eq!(policy.state_name(), "backoff");
        assert_eq!(mediator.dismissals.get(), 1);
        assert_eq!(mediator.backoff_periods.borrow().as_slice(), [60]);
        assert_eq!(policy.backoff_pow(), 2);

        // while backing off the candidate rewrite is inert
        let mut list = candidates();
        policy.recalc(&mut list, t0 + Duration::from_secs(7));
        assert_eq!(list.get(bssid_2g()).unwrap().preference(), Preference::None);
    }

    #[test]
    fn test_backoff_doubles_within_ageout() {
        let mediator = Rc::new(TestMediator::granting());
        let mut policy = upsteer_policy(mediator.clone());
        let t0 = Instant::now();

        drive_to_enforce(&mut policy, t0);
        policy.tick(t0 + Duration::from_secs(6));
        assert_eq!(mediator.backoff_periods.borrow().as_slice(), [60]);

        // backoff expires, ageout armed; the move criteria still hold, so
        // the recalc loop re-enters enforce straight away
        let t1 = t0 + Duration::from_secs(70);
        policy.tick(t1);
        assert_eq!(policy.state_name(), "enforce");
        assert_eq!(mediator.triggers.get(), 2);

        // second failed enforce inside the ageout window doubles the pause
        policy.tick(t1 + Duration::from_secs(6));
        assert_eq!(mediator.backoff_periods.borrow().as_slice(), [60, 120]);
        assert_eq!(policy.backoff_pow(), 4);
    }

    #[test]
    fn test_backoff_resets_after_quiet_ageout() {
        let mediator = Rc::new(TestMediator::granting());
        let mut policy = upsteer_policy(mediator.clone());
        let t0 = Instant::now();

        drive_to_enforce(&mut policy, t0);
        policy.tick(t0 + Duration::from_secs(6));

        // backoff expiry arms the ageout clock and immediately re-enforces
        let t1 = t0 + Duration::from_secs(70);
        policy.tick(t1);
        assert_eq!(policy.state_name(), "enforce");

        // by the time this enforce is judged, the ageout clock has expired:
        // the failure streak is forgiven and backoff starts over at the
        // base period instead of doubling
        let t2 = t1 + Duration::from_secs(31);
        policy.tick(t2);
        assert_eq!(policy.state_name(), "backoff");
        assert_eq!(mediator.backoff_periods.borrow().as_slice(), [60, 60]);
    }

    #[test]
    fn test_backoff_pow_clamped() {
        let mediator = Rc::new(TestMediator::granting());
        let mut policy = upsteer_policy(mediator.clone());
        let t0 = Instant::now();
        policy.set_durations(Duration::from_secs(5), 1, Duration::from_secs(3_600));

        let mut now = t0;
        for _ in 0..40 {
            policy.sta_link_change(bssid_2g(), true, now);
            policy.sta_data_vol_change(bssid_2g(), 0, now);
            policy.sta_snr_change(bssid_2g(), 45, now);
            if policy.state_name() != "enforce" {
                // still backing off; skip ahead past the pause
                now += Duration::from_secs(u32::MAX as u64 + 10);
                policy.tick(now);
                continue;
            }
            now += Duration::from_secs(6);
            policy.tick(now);
            now += Duration::from_secs(u32::MAX as u64 + 10);
            policy.tick(now);
            policy.sta_link_change(bssid_2g(), false, now);
            policy.sta_link_change(bssid_2g(), true, now);
        }
        assert!(policy.backoff_pow() <= u64::from(u32::MAX));
    }

    #[test]
    fn test_steered_to_target_returns_to_idle() {
        let mediator = Rc::new(TestMediator::granting());
        let mut policy = upsteer_policy(mediator.clone());
        let t0 = Instant::now();

        drive_to_enforce(&mut policy, t0);

        // the station moves to the 5 GHz peer during enforcement
        policy.sta_link_change(bssid_2g(), false, t0 + Duration::from_secs(2));
        policy.sta_link_change(bssid_5g(), true, t0 + Duration::from_secs(3));

        policy.tick(t0 + Duration::from_secs(6));
        assert_eq!(policy.state_name(), "idle");
        // success does not arm a backoff
        assert!(mediator.backoff_periods.borrow().is_empty());
    }

    #[test]
    fn test_no_alternatives_skips_hard_block_and_resets_pow() {
        let mediator = Rc::new(TestMediator::granting());
        let mut policy = upsteer_policy(mediator.clone());
        let t0 = Instant::now();

        drive_to_enforce(&mut policy, t0);

        // another policy already blocked the target
        let mut list = candidates();
        list.lookup(bssid_5g())
            .unwrap()
            .set_preference("chan_cap", Preference::OutOfScope);
        policy.recalc(&mut list, t0);

        // single-band client: the source must not be stranded
        assert_eq!(list.get(bssid_2g()).unwrap().preference(), Preference::None);

        // the sticky flag forces the next backoff to the base period
        policy.tick(t0 + Duration::from_secs(6));
        assert_eq!(policy.state_name(), "backoff");
    }

    #[test]
    fn test_executor_refusal_keeps_timers_running() {
        let mediator = Rc::new(TestMediator::default());
        let mut policy = upsteer_policy(mediator.clone());
        let t0 = Instant::now();

        drive_to_enforce(&mut policy, t0);
        assert_eq!(policy.state_name(), "enforce");
        assert_eq!(mediator.triggers.get(), 1);

        // behaves exactly as if the steer had been attempted
        policy.tick(t0 + Duration::from_secs(6));
        assert_eq!(policy.state_name(), "backoff");
    }

    #[test]
    fn test_multi_link_station_not_considered() {
        let mediator = Rc::new(TestMediator::granting());
        let mut policy = upsteer_policy(mediator.clone());
        let t0 = Instant::now();

        policy.sta_link_change(bssid_2g(), true, t0);
        policy.sta_link_change(bssid_5g(), true, t0);
        policy.sta_data_vol_change(bssid_2g(), 0, t0);
        policy.sta_snr_change(bssid_2g(), 45, t0);
        assert_eq!(policy.state_name(), "idle");
    }
}
