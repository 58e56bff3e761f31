//! The redundancy device.
//!
//! One logical link (the master) stacked over two slave links. Frames sent
//! by the host on the master are numbered and handed to the forwarding
//! engine, which duplicates them onto both slaves; frames received on the
//! slaves are classified and handed to the same engine for duplicate
//! discard.
//!
//! Administrative operations that change membership or link state (open,
//! close, MTU changes, port events, teardown) run under the registry's
//! configuration lock and are reached through [`crate::HsrRegistry`]. The
//! data path and the read-only accessors never take it.

use crate::config::DeviceConfig;
use crate::error::{HsrError, Result};
use crate::external::{HsrEnvironment, SelfNodeHandle};
use crate::frame::{EthernetHeader, Tagging};
use crate::master::MasterLink;
use crate::netdev::{AddressLists, LreAttr, LreAttrId, LreOps, LreStats, NetDevice, NodeTableEntry, TimestampInfo};
use crate::port::{HsrPort, PortSet};
use crate::proto::{ProtocolOps, protocol_ops};
use crate::registry::ConfigGuard;
use crate::supervision::{SequenceState, SupervisionPhase, SupervisionTiming, TaskTimer};
use crate::types::{
    DuplicateMode, Features, HsrMode, HsrStats, MacAddress, NodeType, OperState, PRP_LAN_ID, PortType,
    ProtocolVersion, SUPERVISION_MULTICAST_BASE, SupervisionVlan,
};
use bytes::Bytes;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, watch};
use tracing::{debug, error, info, warn};

/// Redundancy mode bookkeeping reported to management.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RedundancyMode {
    Hsr { mode: HsrMode },
    Prp { net_id: u8, duplicate_mode: DuplicateMode },
}

impl RedundancyMode {
    fn for_protocol(version: ProtocolVersion) -> Self {
        if version.is_prp() {
            RedundancyMode::Prp {
                net_id: PRP_LAN_ID << 1,
                duplicate_mode: DuplicateMode::Discard,
            }
        } else {
            RedundancyMode::Hsr { mode: HsrMode::H }
        }
    }
}

/// Supervision parameters fixed at creation.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SupervisionParams {
    pub(crate) multicast: MacAddress,
    pub(crate) vlan: Option<SupervisionVlan>,
    pub(crate) enabled: bool,
    pub(crate) timing: SupervisionTiming,
}

/// What became of a frame received on a slave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingress {
    /// Handed to the forwarding engine.
    Forwarded,
    /// Not a redundancy frame; left to the slave's own stack.
    PassThrough,
}

/// A port as reported in [`DeviceStatus`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortStatus {
    pub port_type: PortType,
    pub name: String,
    pub up: bool,
    pub mtu: u32,
}

/// Read-only snapshot of a device.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceStatus {
    pub name: String,
    pub protocol: ProtocolVersion,
    pub protocol_version: u8,
    pub mac: MacAddress,
    pub multicast_address: MacAddress,
    pub admin_up: bool,
    pub carrier: bool,
    pub oper_state: OperState,
    pub mtu: u32,
    pub max_mtu: u32,
    pub rx_offloaded: bool,
    pub mode: RedundancyMode,
    pub supervision_vlan: Option<SupervisionVlan>,
    pub supervision: SupervisionPhase,
    pub sequence_nr: u16,
    pub sup_sequence_nr: u16,
    pub ports: Vec<PortStatus>,
    pub stats: HsrStats,
}

/// A redundancy device.
pub struct HsrDevice {
    pub(crate) name: String,
    pub(crate) version: ProtocolVersion,
    pub(crate) mode: RedundancyMode,
    pub(crate) master: Arc<MasterLink>,
    pub(crate) ports: PortSet,
    pub(crate) ops: Box<dyn ProtocolOps>,
    /// Frame and supervision sequence counters, announce count.
    pub(crate) seq: Mutex<SequenceState>,
    pub(crate) supervision: SupervisionParams,
    pub(crate) prune_period: Duration,
    /// Set once during finalize, before any slave is attached.
    pub(crate) rx_offloaded: AtomicBool,
    pub(crate) env: HsrEnvironment,
    pub(crate) self_node: parking_lot::Mutex<Option<SelfNodeHandle>>,
    pub(crate) announce_timer: TaskTimer,
    pub(crate) prune_timer: TaskTimer,
    pub(crate) stats: RwLock<HsrStats>,
    pub(crate) sup_failure_reported: AtomicBool,
    pub(crate) weak_self: Weak<HsrDevice>,
}

impl HsrDevice {
    /// A device with no ports, carrier off and counters at their start
    /// values. `mac` is taken from slave A.
    pub(crate) fn new(config: &DeviceConfig, mac: MacAddress, env: HsrEnvironment) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            name: config.name.clone(),
            version: config.protocol,
            mode: RedundancyMode::for_protocol(config.protocol),
            master: Arc::new(MasterLink::new(&config.name, mac)),
            ports: PortSet::default(),
            ops: protocol_ops(config.protocol),
            seq: Mutex::new(SequenceState::default()),
            supervision: SupervisionParams {
                multicast: SUPERVISION_MULTICAST_BASE.with_last_octet(config.multicast_suffix),
                vlan: config.supervision.vlan,
                enabled: config.supervision.enabled,
                timing: config.supervision.timing,
            },
            prune_period: config.prune_period,
            rx_offloaded: AtomicBool::new(false),
            env,
            self_node: parking_lot::Mutex::new(None),
            announce_timer: TaskTimer::default(),
            prune_timer: TaskTimer::default(),
            stats: RwLock::new(HsrStats::default()),
            sup_failure_reported: AtomicBool::new(false),
            weak_self: weak_self.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn protocol(&self) -> ProtocolVersion {
        self.version
    }

    pub fn mode(&self) -> RedundancyMode {
        self.mode
    }

    /// Address of the device, shared with slave A.
    pub fn mac(&self) -> MacAddress {
        self.master.mac()
    }

    pub fn multicast_address(&self) -> MacAddress {
        self.supervision.multicast
    }

    pub fn supervision_vlan(&self) -> Option<SupervisionVlan> {
        self.supervision.vlan
    }

    pub fn is_admin_up(&self) -> bool {
        self.master.is_admin_up()
    }

    pub fn carrier(&self) -> bool {
        self.master.carrier()
    }

    pub fn oper_state(&self) -> OperState {
        self.master.oper_state()
    }

    /// Receiver woken whenever the operational state changes.
    pub fn subscribe_oper_state(&self) -> watch::Receiver<OperState> {
        self.master.subscribe()
    }

    pub fn mtu(&self) -> u32 {
        self.master.mtu()
    }

    pub fn features(&self) -> Features {
        self.master.features()
    }

    /// Slaves strip redundancy information in hardware.
    pub fn rx_offloaded(&self) -> bool {
        self.rx_offloaded.load(Ordering::SeqCst)
    }

    /// The master link, as seen by the host stack.
    pub fn master(&self) -> &Arc<MasterLink> {
        &self.master
    }

    pub async fn port(&self, port_type: PortType) -> Option<Arc<HsrPort>> {
        self.ports.get(port_type).await
    }

    pub async fn port_count(&self) -> usize {
        self.ports.len().await
    }

    pub async fn stats(&self) -> HsrStats {
        self.stats.read().await.clone()
    }

    pub async fn status(&self) -> DeviceStatus {
        let ports = self
            .ports
            .snapshot()
            .await
            .iter()
            .map(|p| PortStatus {
                port_type: p.port_type(),
                name: p.name().to_string(),
                up: p.is_up(),
                mtu: p.mtu(),
            })
            .collect();
        let seq = self.sequence_state().await;

        DeviceStatus {
            name: self.name.clone(),
            protocol: self.version,
            protocol_version: self.version.as_u8(),
            mac: self.mac(),
            multicast_address: self.supervision.multicast,
            admin_up: self.is_admin_up(),
            carrier: self.carrier(),
            oper_state: self.oper_state(),
            mtu: self.mtu(),
            max_mtu: self.max_mtu().await,
            rx_offloaded: self.rx_offloaded(),
            mode: self.mode,
            supervision_vlan: self.supervision.vlan,
            supervision: self.supervision_phase().await,
            sequence_nr: seq.sequence_nr,
            sup_sequence_nr: seq.sup_sequence_nr,
            ports,
            stats: self.stats().await,
        }
    }

    pub(crate) async fn open(&self, cfg: &ConfigGuard<'_>) {
        self.master.set_admin_up(true);

        let slaves = self.ports.slaves().await;
        if slaves.is_empty() {
            warn!(device = %self.name, "Device has no slave ports");
        }
        for port in &slaves {
            if !port.is_up() {
                warn!(
                    device = %self.name,
                    slave = %port.port_type().designation(),
                    port = %port.name(),
                    "Slave is not up; please bring it up to get a fully working redundancy network"
                );
            }
        }

        info!(device = %self.name, "Device opened");
        self.check_carrier_and_operstate(cfg).await;
    }

    pub(crate) async fn close(&self, cfg: &ConfigGuard<'_>) {
        self.master.set_admin_up(false);

        let addrs = self.master.addresses();
        for port in self.ports.slaves().await {
            port.dev().unsync_addresses(&addrs);
        }

        info!(device = %self.name, "Device closed");
        self.check_carrier_and_operstate(cfg).await;
    }

    /// Transmits a frame from the master endpoint.
    pub async fn xmit(&self, data: Bytes) -> Result<()> {
        if self.ports.get(PortType::Master).await.is_none() {
            self.stats.write().await.tx_dropped += 1;
            debug!(device = %self.name, "No master port, frame dropped");
            return Ok(());
        }

        let mut frame = match self.ops.fill_frame_info(data, PortType::Master) {
            Ok(frame) => frame,
            Err(e) => {
                self.stats.write().await.tx_dropped += 1;
                return Err(e);
            }
        };

        {
            let mut seq = self.seq.lock().await;
            if frame.tagging == Tagging::Standard {
                frame.sequence_nr = seq.next_frame_seq();
            }
            self.env.forwarder.forward(frame);
        }

        self.stats.write().await.rx_from_master += 1;
        Ok(())
    }

    /// Handles a frame received on slave `port_type`.
    pub async fn receive(&self, port_type: PortType, data: Bytes) -> Result<Ingress> {
        if !port_type.is_slave() {
            return Err(HsrError::InvalidFrame("ingress is only accepted on slave ports"));
        }

        let header = EthernetHeader::parse(&data).ok_or(HsrError::InvalidFrame("truncated Ethernet header"))?;
        if self.ops.invalid_dan_ingress_frame(header.ethertype) {
            self.stats.write().await.rx_invalid_ingress += 1;
            return Ok(Ingress::PassThrough);
        }

        let frame = self.ops.fill_frame_info(data, port_type)?;
        self.env.forwarder.forward(frame);
        Ok(Ingress::Forwarded)
    }

    /// Replaces the master's address lists and syncs them to every slave.
    pub async fn set_rx_mode(&self, addrs: AddressLists) {
        for port in self.ports.slaves().await {
            port.dev().sync_addresses(&addrs);
        }
        self.master.set_addresses(addrs);
    }

    /// Propagates the master's all-multicast flag to the slaves.
    pub async fn change_rx_flags(&self, allmulti: bool) {
        if self.master.allmulti() == allmulti {
            return;
        }
        self.master.set_allmulti_flag(allmulti);

        for port in self.ports.slaves().await {
            if let Err(e) = port.dev().set_allmulti(allmulti) {
                warn!(device = %self.name, port = %port.name(), error = %e, "Failed to update all-multicast");
            }
        }
    }

    /// Adds a VLAN filter on both slaves. A failure on slave B removes the
    /// filter again from slave A.
    pub async fn vlan_rx_add_vid(&self, vid: u16) -> Result<()> {
        let mut added: Vec<Arc<HsrPort>> = Vec::new();

        for port in self.ports.slaves().await {
            if let Err(e) = port.dev().vlan_vid_add(vid) {
                error!(device = %self.name, port = %port.name(), vid, error = %e, "Failed to add VLAN filter");
                for done in &added {
                    done.dev().vlan_vid_del(vid);
                }
                return Err(e);
            }
            added.push(port);
        }

        Ok(())
    }

    /// Removes a VLAN filter from both slaves, best effort.
    pub async fn vlan_rx_kill_vid(&self, vid: u16) {
        for port in self.ports.slaves().await {
            port.dev().vlan_vid_del(vid);
        }
    }

    /// Timestamping capability of the first slave that reports one.
    pub async fn timestamp_info(&self) -> Result<TimestampInfo> {
        let slaves = self.ports.slaves().await;
        slaves
            .iter()
            .find_map(|p| p.dev().timestamp_info())
            .ok_or_else(|| HsrError::unsupported(&self.name, "timestamping"))
    }

    pub async fn lre_attr_get(&self, id: LreAttrId) -> Result<LreAttr> {
        self.with_slave_a_lre("attribute get", |lre| lre.attr_get(id)).await
    }

    pub async fn lre_attr_set(&self, attr: LreAttr) -> Result<()> {
        self.with_slave_a_lre("attribute set", |lre| lre.attr_set(&attr)).await
    }

    pub async fn lre_stats(&self) -> Result<LreStats> {
        self.with_slave_a_lre("statistics", |lre| lre.stats()).await
    }

    /// Up to `max_entries` doubly attached nodes. Read from the node
    /// registry unless receive processing is offloaded.
    pub async fn node_table(&self, max_entries: usize) -> Result<Vec<NodeTableEntry>> {
        if self.rx_offloaded() {
            return self
                .with_slave_a_lre("node table", |lre| lre.node_table(max_entries))
                .await;
        }

        if self.ports.get(PortType::SlaveA).await.is_none() {
            return Err(HsrError::config("slave A is not attached"));
        }

        let node_type = if self.version.is_prp() {
            NodeType::DanP
        } else {
            NodeType::DanH
        };

        Ok(self
            .env
            .nodes
            .nodes()
            .into_iter()
            .filter(|n| !self.env.nodes.is_self(&n.mac_a))
            .filter(|n| !n.san.is_san())
            .take(max_entries)
            .map(|n| NodeTableEntry {
                mac: n.mac_a,
                last_seen_a: n.last_seen_a,
                last_seen_b: n.last_seen_b,
                node_type,
            })
            .collect())
    }

    /// Tells slave A's redundancy entity which VLAN supervision frames use.
    /// Slaves without one are left alone.
    pub(crate) async fn set_sv_frame_vid(&self, vid: u16) -> Result<()> {
        let port = self
            .ports
            .get(PortType::SlaveA)
            .await
            .ok_or_else(|| HsrError::config("slave A is not attached"))?;

        match port.dev().lre() {
            Some(lre) => lre.set_supervision_vlan(vid),
            None => {
                debug!(device = %self.name, port = %port.name(), vid, "No redundancy entity for supervision VLAN");
                Ok(())
            }
        }
    }

    async fn with_slave_a_lre<T>(
        &self,
        capability: &'static str,
        op: impl FnOnce(&dyn LreOps) -> Result<T>,
    ) -> Result<T> {
        let port = self
            .ports
            .get(PortType::SlaveA)
            .await
            .ok_or_else(|| HsrError::config("slave A is not attached"))?;

        match port.dev().lre() {
            Some(lre) => op(lre),
            None => Err(HsrError::unsupported(port.name(), capability)),
        }
    }
}

impl fmt::Debug for HsrDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HsrDevice")
            .field("name", &self.name)
            .field("protocol", &self.version)
            .field("oper_state", &self.oper_state())
            .finish_non_exhaustive()
    }
}
