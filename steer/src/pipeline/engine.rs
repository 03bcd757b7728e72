//! Steering engine thread
//!
//! One thread owns every station's policy stack, mediator and executor. The
//! receive timeout on the event channel drives timer delivery, so all policy
//! state machines run single-threaded with run-to-completion semantics.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, trace};

use crate::candidate::{Channel, Preference};
use crate::config::StationConfig;
use crate::executor::{Executor, ExecutorAction};
use crate::policy::band_filter::{BandFilterConfig, BandFilterPolicy, PreferenceOverride};
use crate::policy::btm_response::{BtmNeighbor, BtmResponsePolicy};
use crate::policy::chan_cap::{ChanCapOracle, ChanCapPolicy, ChanCapStatus, ChanCapTable};
use crate::policy::snr_level::SnrLevelPolicy;
use crate::policy::{Mediator, PolicyStack};
use crate::MacAddr;

/// Driver and stats events consumed from the event stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SteerEvent {
    Connected {
        sta: MacAddr,
        bssid: MacAddr,
    },
    Disconnected {
        sta: MacAddr,
        bssid: MacAddr,
    },
    Snr {
        sta: MacAddr,
        bssid: MacAddr,
        snr_db: u32,
    },
    DataVolume {
        sta: MacAddr,
        bssid: MacAddr,
        bytes: u64,
    },
    BtmResponse {
        sta: MacAddr,
        neighbors: Vec<BtmNeighbor>,
    },
    ChanCap {
        sta: MacAddr,
        freq_mhz: u32,
        status: ChanCapStatus,
    },
}

/// Directives published to the command stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SteerCommand {
    Engage {
        sta: MacAddr,
        policy: String,
    },
    Dismiss {
        sta: MacAddr,
        policy: String,
    },
    Preferences {
        sta: MacAddr,
        candidates: Vec<CandidateSnapshot>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateSnapshot {
    pub bssid: MacAddr,
    pub freq_mhz: u32,
    pub preference: Preference,
    pub reason: Option<String>,
}

/// Per-station mediator: collects recalc requests and arbitrates the
/// executor.
struct StationMediator {
    executor: RefCell<Executor>,
    recalc_pending: Cell<bool>,
}

impl Mediator for StationMediator {
    fn schedule_stack_recalc(&self, policy: &str) {
        trace!(policy, "stack recalc scheduled");
        self.recalc_pending.set(true);
    }

    fn trigger_executor(&self, policy: &str) -> bool {
        self.executor.borrow_mut().trigger(policy)
    }

    fn dismiss_executor(&self, policy: &str) {
        self.executor.borrow_mut().dismiss(policy);
    }

    fn notify_backoff(&self, policy: &str, enabled: bool, period_secs: u64) {
        debug!(policy, enabled, period_secs, "backoff notification");
    }

    fn notify_steering_attempt(&self, policy: &str) {
        info!(policy, "steering attempt");
    }
}

struct Station {
    mac: MacAddr,
    stack: PolicyStack,
    mediator: Rc<StationMediator>,
    chan_caps: Rc<RefCell<ChanCapTable>>,
}

impl Station {
    /// Build one station's policy stack in documented order: band filter,
    /// channel capability, BTM response, SNR level.
    fn from_config(config: &StationConfig, out: UnboundedSender<SteerCommand>) -> Station {
        let sta = config.mac;
        let mut executor = Executor::new(sta);
        let action_out = out.clone();
        executor.set_sink(Box::new(move |action| {
            let command = match action {
                ExecutorAction::Engage { sta, policy } => SteerCommand::Engage { sta, policy },
                ExecutorAction::Dismiss { sta, policy } => SteerCommand::Dismiss { sta, policy },
            };
            let _ = action_out.send(command);
        }));

        let mediator = Rc::new(StationMediator {
            executor: RefCell::new(executor),
            recalc_pending: Cell::new(true),
        });

        let mut stack = PolicyStack::new();
        for candidate in &config.candidates {
            stack.candidates_mut().bss_set(
                candidate.bssid,
                Channel {
                    control_freq_mhz: candidate.freq_mhz,
                    width_mhz: candidate.width_mhz,
                },
            );
        }

        if let Some(section) = &config.band_filter {
            let mut policy =
                BandFilterPolicy::new("band_filter", sta, mediator.clone() as Rc<dyn Mediator>);
            policy.set_config(Some(BandFilterConfig {
                included: PreferenceOverride {
                    enabled: section.included_preference.is_some(),
                    value: section.included_preference.unwrap_or(Preference::None),
                },
                excluded: PreferenceOverride {
                    enabled: section.excluded_preference.is_some(),
                    value: section.excluded_preference.unwrap_or(Preference::None),
                },
                bands: section.bands.clone(),
            }));
            stack.add_policy(Box::new(policy));
        }

        let chan_caps = Rc::new(RefCell::new(ChanCapTable::new()));
        if config.chan_cap {
            stack.add_policy(Box::new(ChanCapPolicy::new(
                "chan_cap",
                sta,
                mediator.clone() as Rc<dyn Mediator>,
                chan_caps.clone() as Rc<dyn ChanCapOracle>,
            )));
        }

        if config.btm_response {
            stack.add_policy(Box::new(BtmResponsePolicy::new(
                &sta.to_string(),
                sta,
                mediator.clone() as Rc<dyn Mediator>,
            )));
        }

        if let Some(section) = &config.snr_level {
            let now = Instant::now();
            let mut policy = SnrLevelPolicy::new(
                "snr_level",
                sta,
                section.mode,
                mediator.clone() as Rc<dyn Mediator>,
            );
            policy.set_threshold_snr(section.threshold_snr, now);
            policy.set_threshold_bytes(section.threshold_bytes, now);
            policy.set_from_bssids(section.from_bssids.clone(), now);
            policy.set_to_bssids(section.to_bssids.clone(), now);
            stack.add_policy(Box::new(policy));
        }

        Station {
            mac: sta,
            stack,
            mediator,
            chan_caps,
        }
    }

    /// Run a stack recalc if any policy asked for one, publishing the
    /// resulting preference list.
    fn maybe_recalc(&mut self, now: Instant, out: &UnboundedSender<SteerCommand>) {
        if !self.mediator.recalc_pending.replace(false) {
            return;
        }
        let list = self.stack.recalc(now);
        let candidates: Vec<CandidateSnapshot> = list
            .iter()
            .map(|c| CandidateSnapshot {
                bssid: c.bssid(),
                freq_mhz: c.channel().control_freq_mhz,
                preference: c.preference(),
                reason: c.reason().map(str::to_string),
            })
            .collect();
        debug!(sta = %self.mac, count = candidates.len(), "stack recalc complete");
        let _ = out.send(SteerCommand::Preferences {
            sta: self.mac,
            candidates,
        });
    }
}

pub struct Engine {
    stations: Vec<Station>,
    tick: Duration,
    out: UnboundedSender<SteerCommand>,
}

impl Engine {
    pub fn new(
        stations: &[StationConfig],
        tick: Duration,
        out: UnboundedSender<SteerCommand>,
    ) -> Engine {
        let stations = stations
            .iter()
            .map(|config| Station::from_config(config, out.clone()))
            .collect();
        Engine {
            stations,
            tick,
            out,
        }
    }

    fn handle_event(&mut self, event: SteerEvent, now: Instant) {
        let sta = match &event {
            SteerEvent::Connected { sta, .. }
            | SteerEvent::Disconnected { sta, .. }
            | SteerEvent::Snr { sta, .. }
            | SteerEvent::DataVolume { sta, .. }
            | SteerEvent::BtmResponse { sta, .. }
            | SteerEvent::ChanCap { sta, .. } => *sta,
        };
        let station = match self.stations.iter_mut().find(|s| s.mac == sta) {
            Some(station) => station,
            None => {
                trace!(sta = %sta, "event for unmanaged station");
                return;
            }
        };

        match event {
            SteerEvent::Connected { bssid, .. } => {
                station.stack.sta_link_change(bssid, true, now);
            }
            SteerEvent::Disconnected { bssid, .. } => {
                station.stack.sta_link_change(bssid, false, now);
            }
            SteerEvent::Snr { bssid, snr_db, .. } => {
                station.stack.sta_snr_change(bssid, snr_db, now);
            }
            SteerEvent::DataVolume { bssid, bytes, .. } => {
                station.stack.sta_data_vol_change(bssid, bytes, now);
            }
            SteerEvent::BtmResponse { neighbors, .. } => {
                station.stack.btm_response(&neighbors, now);
            }
            SteerEvent::ChanCap {
                freq_mhz, status, ..
            } => {
                station.chan_caps.borrow_mut().set(sta, freq_mhz, status);
                station.mediator.schedule_stack_recalc("chan_cap");
            }
        }

        station.maybe_recalc(now, &self.out);
    }

    /// Run until every event sender is gone.
    pub fn run(mut self, rx: Receiver<SteerEvent>) {
        info!(
            stations = self.stations.len(),
            tick_ms = self.tick.as_millis() as u64,
            "steering engine started"
        );

        loop {
            match rx.recv_timeout(self.tick) {
                Ok(event) => {
                    self.handle_event(event, Instant::now());
                }
                Err(RecvTimeoutError::Timeout) => {
                    let now = Instant::now();
                    for station in &mut self.stations {
                        station.stack.tick(now);
                        station.maybe_recalc(now, &self.out);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        for station in &self.stations {
            station.stack.dump();
        }
        info!("steering engine stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CandidateConfig, SnrLevelSection, StationConfig};
    use crate::policy::snr_level::SnrLevelMode;
    use tokio::sync::mpsc;

    fn mac(last: u8) -> MacAddr {
        MacAddr::new([0xaa, 0xaa, 0xaa, 0xaa, 0xaa, last])
    }

    fn sta() -> MacAddr {
        MacAddr::new([0xdd; 6])
    }

    fn station_config() -> StationConfig {
        StationConfig {
            mac: sta(),
            candidates: vec![
                CandidateConfig {
                    bssid: mac(0x24),
                    freq_mhz: 2412,
                    width_mhz: 20,
                },
                CandidateConfig {
                    bssid: mac(0x5f),
                    freq_mhz: 5745,
                    width_mhz: 20,
                },
            ],
            band_filter: None,
            chan_cap: true,
            btm_response: true,
            snr_level: Some(SnrLevelSection {
                mode: SnrLevelMode::BlockFromWhenAbove,
                threshold_snr: Some(30),
                threshold_bytes: Some(2_000),
                from_bssids: vec![mac(0x24)],
                to_bssids: vec![mac(0x5f)],
            }),
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<SteerCommand>) -> Vec<SteerCommand> {
        let mut out = Vec::new();
        while let Ok(cmd) = rx.try_recv() {
            out.push(cmd);
        }
        out
    }

    #[test]
    fn test_engine_enforce_emits_engage_and_preferences() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut engine = Engine::new(&[station_config()], Duration::from_secs(1), tx);
        let t0 = Instant::now();

        engine.handle_event(
            SteerEvent::Connected {
                sta: sta(),
                bssid: mac(0x24),
            },
            t0,
        );
        engine.handle_event(
            SteerEvent::DataVolume {
                sta: sta(),
                bssid: mac(0x24),
                bytes: 0,
            },
            t0,
        );
        engine.handle_event(
            SteerEvent::Snr {
                sta: sta(),
                bssid: mac(0x24),
                snr_db: 45,
            },
            t0,
        );

        let commands = drain(&mut rx);
        assert!(commands
            .iter()
            .any(|c| matches!(c, SteerCommand::Engage { policy, .. } if policy == "snr_level")));

        let prefs = commands.iter().rev().find_map(|c| match c {
            SteerCommand::Preferences { candidates, .. } => Some(candidates),
            _ => None,
        });
        let prefs = prefs.expect("preferences were published");
        let p24 = prefs.iter().find(|c| c.bssid == mac(0x24)).unwrap();
        let p5f = prefs.iter().find(|c| c.bssid == mac(0x5f)).unwrap();
        assert_eq!(p24.preference, Preference::HardBlocked);
        assert_eq!(p5f.preference, Preference::Available);
    }

    #[test]
    fn test_engine_ignores_unmanaged_station() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut engine = Engine::new(&[station_config()], Duration::from_secs(1), tx);
        engine.handle_event(
            SteerEvent::Snr {
                sta: mac(0x99),
                bssid: mac(0x24),
                snr_db: 45,
            },
            Instant::now(),
        );
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_chan_cap_event_masks_candidate() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut config = station_config();
        config.snr_level = None;
        let mut engine = Engine::new(&[config], Duration::from_secs(1), tx);

        engine.handle_event(
            SteerEvent::ChanCap {
                sta: sta(),
                freq_mhz: 5745,
                status: ChanCapStatus::NotSupported,
            },
            Instant::now(),
        );

        let commands = drain(&mut rx);
        let prefs = commands.iter().rev().find_map(|c| match c {
            SteerCommand::Preferences { candidates, .. } => Some(candidates),
            _ => None,
        });
        let prefs = prefs.expect("preferences were published");
        let p5f = prefs.iter().find(|c| c.bssid == mac(0x5f)).unwrap();
        assert_eq!(p5f.preference, Preference::OutOfScope);
        assert_eq!(p5f.reason.as_deref(), Some("chan_cap"));
    }

    #[test]
    fn test_btm_response_event_flows_through() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut config = station_config();
        config.snr_level = None;
        let mut engine = Engine::new(&[config], Duration::from_secs(1), tx);
        let t0 = Instant::now();

        engine.handle_event(
            SteerEvent::BtmResponse {
                sta: sta(),
                neighbors: vec![BtmNeighbor {
                    bssid: mac(0x5f),
                    preference: 1,
                }],
            },
            t0,
        );

        let commands = drain(&mut rx);
        let prefs = commands.iter().rev().find_map(|c| match c {
            SteerCommand::Preferences { candidates, .. } => Some(candidates),
            _ => None,
        });
        let prefs = prefs.expect("preferences were published");
        let p24 = prefs.iter().find(|c| c.bssid == mac(0x24)).unwrap();
        assert_eq!(p24.preference, Preference::OutOfScope);
    }
}
