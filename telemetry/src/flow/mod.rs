//! Flow identity and counters
//!
//! The canonical flow key carries every attribute the datapath can report.
//! Lookup inside the aggregator happens on two derived keys: the ethernet
//! pair (macs + vlan) and, below it, either the ethertype (L2-only flows) or
//! the transport tuple. A datapath-supplied `ufid` overrides tuple identity.

pub mod acc;

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// MAC address (6 bytes)
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MacAddr([u8; 6]);

impl MacAddr {
    /// Create a new MAC address from bytes
    pub fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// Create from a slice (must be exactly 6 bytes)
    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        if slice.len() == 6 {
            let mut bytes = [0u8; 6];
            bytes.copy_from_slice(slice);
            Some(Self(bytes))
        } else {
            None
        }
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    /// Check if this is a broadcast address
    pub fn is_broadcast(&self) -> bool {
        self.0 == [0xff, 0xff, 0xff, 0xff, 0xff, 0xff]
    }

    /// Check if this is a multicast address (bit 0 of first byte is 1)
    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 == 0x01
    }
}

impl FromStr for MacAddr {
    type Err = ();

    /// Parse the colon-separated hex form, e.g. `"00:11:22:33:44:55"`.
    fn from_str(s: &str) -> Result<Self, ()> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 6 {
            return Err(());
        }
        let mut bytes = [0u8; 6];
        for (i, part) in parts.iter().enumerate() {
            if part.len() != 2 {
                return Err(());
            }
            bytes[i] = u8::from_str_radix(part, 16).map_err(|_| ())?;
        }
        Ok(Self(bytes))
    }
}

impl fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MacAddr({})", self)
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl Serialize for MacAddr {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for MacAddr {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse()
            .map_err(|_| serde::de::Error::custom("invalid MAC address"))
    }
}

/// Flow direction as seen from the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Unset,
    Outbound,
    Inbound,
    Lan2Lan,
}

/// Which endpoint originated the flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Originator {
    #[default]
    Unknown,
    Src,
    Dst,
}

/// Packet/byte counters for one flow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowCounters {
    pub packets: u64,
    pub bytes: u64,
}

impl FlowCounters {
    pub fn new(packets: u64, bytes: u64) -> Self {
        Self { packets, bytes }
    }
}

/// Transport-level half of a flow key. Absent for ethernet-only flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IpTuple {
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub proto: u8,
    pub sport: u16,
    pub dport: u16,
}

impl IpTuple {
    pub fn ip_version(&self) -> u8 {
        match self.src_ip {
            IpAddr::V4(_) => 4,
            IpAddr::V6(_) => 6,
        }
    }
}

/// Canonical flow identity as sampled from the datapath.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowKey {
    /// Datapath-unique flow id; overrides tuple identity when present.
    #[serde(default)]
    pub ufid: Option<Uuid>,
    #[serde(default)]
    pub smac: Option<MacAddr>,
    #[serde(default)]
    pub dmac: Option<MacAddr>,
    #[serde(default)]
    pub vlan_id: u16,
    #[serde(default)]
    pub ethertype: u16,
    /// None models ip_version 0 (ethernet-only).
    #[serde(default)]
    pub ip: Option<IpTuple>,
    #[serde(default)]
    pub ip_id: u16,
    #[serde(default)]
    pub tcp_flags: u16,
    #[serde(default)]
    pub fstart: bool,
    #[serde(default)]
    pub fend: bool,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default)]
    pub originator: Originator,
    /// Conntrack mark.
    #[serde(default)]
    pub flow_marker: u32,
    /// Conntrack zone the sample was observed in.
    #[serde(default)]
    pub ct_zone: u16,
    #[serde(default)]
    pub rx_idx: u16,
    #[serde(default)]
    pub tx_idx: u16,
}

impl FlowKey {
    pub fn has_eth_info(&self) -> bool {
        self.smac.is_some() || self.dmac.is_some()
    }

    pub fn is_eth_only(&self) -> bool {
        self.ip.is_none()
    }

    pub fn ip_version(&self) -> u8 {
        self.ip.map(|t| t.ip_version()).unwrap_or(0)
    }

    /// Derived key for the ethernet pair tree.
    pub fn eth_pair_key(&self) -> EthPairKey {
        EthPairKey {
            smac: self.smac,
            dmac: self.dmac,
            vlan_id: self.vlan_id,
        }
    }

    /// Derived key for the tuple trees. The ufid wins over the 5-tuple.
    pub fn tuple_key(&self) -> TupleKey {
        match self.ufid {
            Some(ufid) => TupleKey::Ufid(ufid),
            None => TupleKey::Tuple(self.ip),
        }
    }
}

/// Lookup key of the ethernet pair tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct EthPairKey {
    pub smac: Option<MacAddr>,
    pub dmac: Option<MacAddr>,
    pub vlan_id: u16,
}

/// Lookup key of a tuple tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TupleKey {
    Ufid(Uuid),
    Tuple(Option<IpTuple>),
}

/// One sampled data point from the datapath: identity plus counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowSample {
    pub key: FlowKey,
    pub counters: FlowCounters,
}
