//! HSR/PRP data types and protocol constants.
//!
//! Based on IEC 62439-3: Parallel Redundancy Protocol (PRP) and
//! High-availability Seamless Redundancy (HSR).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitAnd, BitAndAssign, BitOr, BitOrAssign, Not};
use std::str::FromStr;
use std::time::Duration;

/// Length of a MAC address in octets.
pub const ETH_ALEN: usize = 6;

/// Length of an Ethernet header (dst, src, ethertype).
pub const ETH_HLEN: usize = 14;

/// Minimum Ethernet frame length without FCS.
pub const ETH_ZLEN: usize = 60;

/// Default Ethernet payload size.
pub const ETH_DATA_LEN: u32 = 1500;

/// Length of an 802.1Q header.
pub const VLAN_HLEN: usize = 4;

/// Size of the HSR tag and of the PRP redundancy control trailer.
pub const HSR_HLEN: usize = 6;

/// PRP ethertype, also used by HSRv0 and for supervision frames.
pub const ETH_P_PRP: u16 = 0x88FB;

/// HSR ethertype (HSRv1 tagged frames).
pub const ETH_P_HSR: u16 = 0x892F;

/// 802.1Q VLAN ethertype.
pub const ETH_P_8021Q: u16 = 0x8100;

/// Supervision TLV: announce (HSRv0 only).
pub const HSR_TLV_ANNOUNCE: u8 = 22;

/// Supervision TLV: HSR life check.
pub const HSR_TLV_LIFE_CHECK: u8 = 23;

/// Supervision TLV: PRP life check in duplicate discard mode.
pub const PRP_TLV_LIFE_CHECK_DD: u8 = 20;

/// LSDU size carried in the HSR tag of an HSRv1 supervision frame.
pub const HSR_V1_SUP_LSDUSIZE: u16 = 52;

/// Number of announce frames sent after the device comes up.
pub const MAX_ANNOUNCE_COUNT: u8 = 3;

/// Initial frame sequence number. Starts close to the wrap so overflow
/// handling is exercised early.
pub const HSR_SEQNR_START: u16 = u16::MAX - 1024;

/// Initial supervision sequence number.
pub const HSR_SUP_SEQNR_START: u16 = HSR_SEQNR_START / 2;

/// PRP network id, stored in the upper three bits of the lane id.
pub const PRP_LAN_ID: u8 = 0x5;

/// Transmit priority used for untagged supervision frames.
pub const TC_PRIO_CONTROL: u8 = 7;

/// Interval between announce frames.
pub const DEFAULT_ANNOUNCE_INTERVAL: Duration = Duration::from_millis(100);

/// Interval between life check frames.
pub const DEFAULT_LIFE_CHECK_INTERVAL: Duration = Duration::from_millis(2000);

/// Node table pruning period.
pub const DEFAULT_PRUNE_PERIOD: Duration = Duration::from_millis(3000);

/// Base multicast address for supervision frames; the last octet is
/// replaced by the per-device suffix.
pub const SUPERVISION_MULTICAST_BASE: MacAddress = MacAddress([0x01, 0x15, 0x4e, 0x00, 0x01, 0x00]);

/// Redundancy protocol selected at device creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolVersion {
    /// HSR, IEC 62439-3:2010
    #[serde(rename = "hsr-v0")]
    HsrV0,
    /// HSR, IEC 62439-3:2012
    #[serde(rename = "hsr-v1")]
    HsrV1,
    /// PRP-1
    #[serde(rename = "prp-v1")]
    PrpV1,
}

impl ProtocolVersion {
    /// Numeric protocol version as carried on the wire and by the admin
    /// surface.
    pub fn as_u8(self) -> u8 {
        match self {
            ProtocolVersion::HsrV0 => 0,
            ProtocolVersion::HsrV1 => 1,
            ProtocolVersion::PrpV1 => 2,
        }
    }

    pub fn is_prp(self) -> bool {
        matches!(self, ProtocolVersion::PrpV1)
    }
}

impl TryFrom<u8> for ProtocolVersion {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ProtocolVersion::HsrV0),
            1 => Ok(ProtocolVersion::HsrV1),
            2 => Ok(ProtocolVersion::PrpV1),
            other => Err(other),
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolVersion::HsrV0 => write!(f, "HSRv0"),
            ProtocolVersion::HsrV1 => write!(f, "HSRv1"),
            ProtocolVersion::PrpV1 => write!(f, "PRPv1"),
        }
    }
}

/// Role of a port within a redundancy device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PortType {
    Master,
    SlaveA,
    SlaveB,
}

impl PortType {
    pub fn is_slave(self) -> bool {
        !matches!(self, PortType::Master)
    }

    /// Letter used in operator-facing messages.
    pub fn designation(self) -> char {
        match self {
            PortType::Master => 'M',
            PortType::SlaveA => 'A',
            PortType::SlaveB => 'B',
        }
    }
}

impl fmt::Display for PortType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortType::Master => write!(f, "master"),
            PortType::SlaveA => write!(f, "slave-A"),
            PortType::SlaveB => write!(f, "slave-B"),
        }
    }
}

/// Operational state of the redundancy device (RFC 2863 subset).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OperState {
    /// Device administratively down.
    #[default]
    Down,
    /// Administratively up but no slave has a working link.
    LowerLayerDown,
    /// At least one slave carries traffic.
    Up,
}

impl fmt::Display for OperState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperState::Down => write!(f, "DOWN"),
            OperState::LowerLayerDown => write!(f, "LOWERLAYERDOWN"),
            OperState::Up => write!(f, "UP"),
        }
    }
}

/// HSR operating mode (IEC 62439-3 5.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HsrMode {
    /// Forward all frames not addressed exclusively to this node.
    H,
    /// No forwarding.
    N,
    /// Transparent reception.
    T,
    /// Unicast forwarding.
    U,
    /// Mixed mode.
    M,
}

/// PRP duplicate handling mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DuplicateMode {
    /// Duplicate discard.
    Discard,
    /// Duplicate accept.
    Accept,
}

/// Node classification reported in the node table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeType {
    /// Doubly attached node implementing PRP.
    DanP,
    /// Doubly attached node implementing HSR.
    DanH,
    /// Singly attached node.
    San,
}

/// A 48-bit Ethernet MAC address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddress([u8; ETH_ALEN]);

impl MacAddress {
    /// The zero/null MAC address.
    pub const ZERO: MacAddress = MacAddress([0; ETH_ALEN]);

    pub const fn new(bytes: [u8; ETH_ALEN]) -> Self {
        MacAddress(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; ETH_ALEN] {
        &self.0
    }

    /// True when the group bit of the first octet is set.
    pub const fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; ETH_ALEN]
    }

    /// Returns a copy with the last octet replaced.
    pub const fn with_last_octet(mut self, octet: u8) -> Self {
        self.0[ETH_ALEN - 1] = octet;
        self
    }

    /// Reads a MAC address from the first six bytes of `data`.
    pub fn from_slice(data: &[u8]) -> Option<Self> {
        let bytes: [u8; ETH_ALEN] = data.get(..ETH_ALEN)?.try_into().ok()?;
        Some(MacAddress(bytes))
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl FromStr for MacAddress {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split([':', '-']).collect();
        if parts.len() != ETH_ALEN {
            return Err(format!("invalid MAC address: {s}"));
        }

        let mut bytes = [0u8; ETH_ALEN];
        for (byte, part) in bytes.iter_mut().zip(parts) {
            *byte = u8::from_str_radix(part, 16).map_err(|_| format!("invalid MAC address: {s}"))?;
        }

        Ok(MacAddress(bytes))
    }
}

impl Serialize for MacAddress {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddress {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// 802.1Q parameters applied to supervision frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisionVlan {
    /// VLAN id (1-4094)
    pub vid: u16,
    /// Priority code point (0-7)
    pub pcp: u8,
    /// Drop eligible indicator
    pub dei: bool,
}

impl SupervisionVlan {
    /// Tag control information: PCP(3) | DEI(1) | VID(12).
    pub fn tci(&self) -> u16 {
        let mut tci = (self.vid & 0x0FFF) | (u16::from(self.pcp & 0x07) << 13);
        if self.dei {
            tci |= 0x1000;
        }
        tci
    }
}

/// Offload and stack capabilities advertised by a link.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Features(u64);

impl Features {
    pub const EMPTY: Features = Features(0);
    /// Scatter/gather I/O.
    pub const SG: Features = Features(1 << 0);
    /// Fragment list handling.
    pub const FRAGLIST: Features = Features(1 << 1);
    /// DMA to high memory.
    pub const HIGHDMA: Features = Features(1 << 2);
    /// Generic segmentation offload.
    pub const GSO: Features = Features(1 << 3);
    /// Hardware checksumming.
    pub const HW_CSUM: Features = Features(1 << 4);
    /// Hardware VLAN tag insertion.
    pub const HW_VLAN_CTAG_TX: Features = Features(1 << 5);
    /// Hardware VLAN receive filtering.
    pub const HW_VLAN_CTAG_FILTER: Features = Features(1 << 6);
    /// Lockless transmit.
    pub const LLTX: Features = Features(1 << 7);
    /// Link may not change network namespace.
    pub const NETNS_LOCAL: Features = Features(1 << 8);
    /// Hardware HSR tag / PRP trailer insertion.
    pub const HW_HSR_TAG_INS: Features = Features(1 << 9);
    /// Hardware HSR tag / PRP trailer removal (receive offload).
    pub const HW_HSR_TAG_RM: Features = Features(1 << 10);
    /// Hardware HSR ring forwarding.
    pub const HW_HSR_FWD: Features = Features(1 << 11);

    /// Capabilities the redundancy device may only expose when every port
    /// supports them.
    pub const ONE_FOR_ALL: Features = Features(
        Self::SG.0 | Self::FRAGLIST.0 | Self::HIGHDMA.0 | Self::GSO.0 | Self::HW_CSUM.0,
    );

    /// Hardware capabilities of a freshly created redundancy device.
    pub const DEVICE_HW: Features = Features(
        Self::SG.0
            | Self::FRAGLIST.0
            | Self::HIGHDMA.0
            | Self::GSO.0
            | Self::HW_CSUM.0
            | Self::HW_VLAN_CTAG_TX.0,
    );

    pub const fn from_bits(bits: u64) -> Self {
        Features(bits)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    pub const fn contains(self, other: Features) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for Features {
    type Output = Features;

    fn bitor(self, rhs: Features) -> Features {
        Features(self.0 | rhs.0)
    }
}

impl BitOrAssign for Features {
    fn bitor_assign(&mut self, rhs: Features) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Features {
    type Output = Features;

    fn bitand(self, rhs: Features) -> Features {
        Features(self.0 & rhs.0)
    }
}

impl BitAndAssign for Features {
    fn bitand_assign(&mut self, rhs: Features) {
        self.0 &= rhs.0;
    }
}

impl Not for Features {
    type Output = Features;

    fn not(self) -> Features {
        Features(!self.0)
    }
}

impl fmt::Debug for Features {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(Features, &str); 12] = [
            (Features::SG, "sg"),
            (Features::FRAGLIST, "fraglist"),
            (Features::HIGHDMA, "highdma"),
            (Features::GSO, "gso"),
            (Features::HW_CSUM, "hw-csum"),
            (Features::HW_VLAN_CTAG_TX, "vlan-ctag-tx"),
            (Features::HW_VLAN_CTAG_FILTER, "vlan-ctag-filter"),
            (Features::LLTX, "lltx"),
            (Features::NETNS_LOCAL, "netns-local"),
            (Features::HW_HSR_TAG_INS, "hsr-tag-ins"),
            (Features::HW_HSR_TAG_RM, "hsr-tag-rm"),
            (Features::HW_HSR_FWD, "hsr-fwd"),
        ];

        let mut set = f.debug_set();
        for (flag, name) in NAMES {
            if self.contains(flag) {
                set.entry(&name);
            }
        }
        set.finish()
    }
}

/// Redundancy device statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct HsrStats {
    /// Supervision frames handed to the forwarding engine
    pub tx_supervision: u64,

    /// Supervision cycles skipped because no frame could be built
    pub tx_supervision_skipped: u64,

    /// Frames received from the Master endpoint for transmission
    pub rx_from_master: u64,

    /// Frames dropped because the device had no Master port
    pub tx_dropped: u64,

    /// Slave ingress frames rejected by the protocol variant
    pub rx_invalid_ingress: u64,

    /// Operational state transitions
    pub oper_state_changes: u64,

    /// Times the supervision timer was armed
    pub supervision_arms: u64,

    /// Times the supervision timer was disarmed
    pub supervision_disarms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_start_values() {
        assert_eq!(HSR_SEQNR_START, 64511);
        assert_eq!(HSR_SUP_SEQNR_START, 32255);
    }

    #[test]
    fn test_protocol_version_conversion() {
        assert_eq!(ProtocolVersion::try_from(1), Ok(ProtocolVersion::HsrV1));
        assert_eq!(ProtocolVersion::PrpV1.as_u8(), 2);
        assert!(ProtocolVersion::try_from(7).is_err());
        assert!(ProtocolVersion::PrpV1.is_prp());
    }

    #[test]
    fn test_mac_parse_and_display() {
        let mac: MacAddress = "00:11:22:aa:bb:cc".parse().unwrap();
        assert_eq!(mac.to_string(), "00:11:22:aa:bb:cc");
        assert_eq!(mac, "00-11-22-AA-BB-CC".parse().unwrap());
        assert!("00:11:22".parse::<MacAddress>().is_err());

        let mcast = SUPERVISION_MULTICAST_BASE.with_last_octet(0x2a);
        assert_eq!(mcast.to_string(), "01:15:4e:00:01:2a");
        assert!(mcast.is_multicast());
    }

    #[test]
    fn test_vlan_tci() {
        let vlan = SupervisionVlan { vid: 100, pcp: 7, dei: false };
        assert_eq!(vlan.tci(), 0xE064);

        let vlan = SupervisionVlan { vid: 4094, pcp: 0, dei: true };
        assert_eq!(vlan.tci(), 0x1FFE);
    }

    #[test]
    fn test_features_ops() {
        let f = Features::SG | Features::HW_CSUM;
        assert!(f.contains(Features::SG));
        assert!(!f.contains(Features::SG | Features::GSO));
        assert_eq!(f & !Features::SG, Features::HW_CSUM);
        assert_eq!(format!("{:?}", f), r#"{"sg", "hw-csum"}"#);
    }

    #[test]
    fn test_oper_state_display() {
        assert_eq!(OperState::LowerLayerDown.to_string(), "LOWERLAYERDOWN");
        assert_eq!(OperState::default(), OperState::Down);
    }
}
