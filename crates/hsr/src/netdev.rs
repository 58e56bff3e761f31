//! Interface to the links a redundancy device is stacked on.
//!
//! Slave ports are owned by the host network stack; the device only holds
//! shared handles to them. Ports that implement a hardware redundancy entity
//! (LRE) expose it through [`NetDevice::lre`].

use crate::error::Result;
use crate::types::{DuplicateMode, Features, HsrMode, MacAddress, NodeType};
use serde::Serialize;
use std::time::Duration;

/// Link layer classification used when validating slave candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Ethernet,
    Loopback,
    Vlan,
    /// Another redundancy device's master link.
    RedundancyMaster,
    Other,
}

/// Unicast and multicast address lists synced from the master to slaves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressLists {
    pub unicast: Vec<MacAddress>,
    pub multicast: Vec<MacAddress>,
}

/// Hardware timestamping capability reported by a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimestampInfo {
    pub so_timestamping: u32,
    pub phc_index: Option<i32>,
}

/// A link that can back a slave port.
pub trait NetDevice: Send + Sync {
    fn name(&self) -> &str;

    fn mac(&self) -> MacAddress;

    fn mtu(&self) -> u32;

    /// Administratively enabled.
    fn is_admin_up(&self) -> bool;

    /// Link detected and operational.
    fn is_oper_up(&self) -> bool;

    fn features(&self) -> Features;

    fn kind(&self) -> LinkKind {
        LinkKind::Ethernet
    }

    fn set_promiscuous(&self, on: bool) -> Result<()>;

    /// Claims the receive hook of this link. Fails when another device has
    /// already claimed it.
    fn claim_rx_handler(&self) -> Result<()>;

    fn release_rx_handler(&self);

    fn vlan_vid_add(&self, _vid: u16) -> Result<()> {
        Ok(())
    }

    fn vlan_vid_del(&self, _vid: u16) {}

    fn set_allmulti(&self, _on: bool) -> Result<()> {
        Ok(())
    }

    fn sync_addresses(&self, _addrs: &AddressLists) {}

    fn unsync_addresses(&self, _addrs: &AddressLists) {}

    fn timestamp_info(&self) -> Option<TimestampInfo> {
        None
    }

    /// Hardware redundancy entity, when the link offloads HSR/PRP.
    fn lre(&self) -> Option<&dyn LreOps> {
        None
    }
}

/// Identifier of a redundancy entity attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LreAttrId {
    HsrMode,
    DuplicateMode,
    LanId,
}

/// Redundancy entity attribute value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LreAttr {
    HsrMode(HsrMode),
    DuplicateMode(DuplicateMode),
    LanId(u8),
}

impl LreAttr {
    pub fn id(&self) -> LreAttrId {
        match self {
            LreAttr::HsrMode(_) => LreAttrId::HsrMode,
            LreAttr::DuplicateMode(_) => LreAttrId::DuplicateMode,
            LreAttr::LanId(_) => LreAttrId::LanId,
        }
    }
}

/// One entry of the node table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeTableEntry {
    pub mac: MacAddress,
    /// Time since a frame from this node was last seen on LAN/ring A.
    pub last_seen_a: Option<Duration>,
    /// Time since a frame from this node was last seen on LAN/ring B.
    pub last_seen_b: Option<Duration>,
    pub node_type: NodeType,
}

/// Redundancy entity counters (IEC 62439-3 LRE MIB subset).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LreStats {
    pub tx_a: u64,
    pub tx_b: u64,
    pub tx_c: u64,
    pub rx_a: u64,
    pub rx_b: u64,
    pub rx_c: u64,
    pub errors_a: u64,
    pub errors_b: u64,
    pub wrong_lan_a: u64,
    pub wrong_lan_b: u64,
    pub duplicates_a: u64,
    pub duplicates_b: u64,
    pub own_rx_a: u64,
    pub own_rx_b: u64,
    pub nodes: u64,
}

/// Hardware redundancy entity capability of a port.
pub trait LreOps: Send + Sync {
    fn attr_get(&self, id: LreAttrId) -> Result<LreAttr>;

    fn attr_set(&self, attr: &LreAttr) -> Result<()>;

    fn node_table(&self, max_entries: usize) -> Result<Vec<NodeTableEntry>>;

    fn stats(&self) -> Result<LreStats>;

    /// VLAN id for supervision frames generated by the hardware.
    fn set_supervision_vlan(&self, vid: u16) -> Result<()>;
}
