//! In-memory fakes of the links and collaborators a redundancy device uses.

#![allow(dead_code)]

use hsr::netdev::AddressLists;
use hsr::{
    DeviceConfig, DeviceId, Features, ForwardingEngine, FrameInfo, HsrEnvironment, HsrError, HsrRegistry,
    Introspection, LinkKind, LreAttr, LreAttrId, LreOps, LreStats, MacAddress, NetDevice, NodeInfo,
    NodeRegistry, NodeTableEntry, SelfNodeHandle, TimestampInfo,
};
use mockall::mock;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};

pub const MAC_A: MacAddress = MacAddress::new([0x02, 0x00, 0x00, 0x00, 0x00, 0x0a]);
pub const MAC_B: MacAddress = MacAddress::new([0x02, 0x00, 0x00, 0x00, 0x00, 0x0b]);

mock! {
    pub Lre {}

    impl LreOps for Lre {
        fn attr_get(&self, id: LreAttrId) -> hsr::Result<LreAttr>;
        fn attr_set(&self, attr: &LreAttr) -> hsr::Result<()>;
        fn node_table(&self, max_entries: usize) -> hsr::Result<Vec<NodeTableEntry>>;
        fn stats(&self) -> hsr::Result<LreStats>;
        fn set_supervision_vlan(&self, vid: u16) -> hsr::Result<()>;
    }
}

/// A physical link whose state the test controls.
pub struct FakeNetDevice {
    name: String,
    mac: MacAddress,
    kind: LinkKind,
    mtu: AtomicU32,
    admin_up: AtomicBool,
    oper_up: AtomicBool,
    features: Mutex<Features>,
    promiscuous: AtomicBool,
    claimed: AtomicBool,
    fail_claim: AtomicBool,
    fail_vlan_add: AtomicBool,
    vlans: Mutex<Vec<u16>>,
    allmulti: AtomicBool,
    synced: Mutex<AddressLists>,
    timestamp: Option<TimestampInfo>,
    lre: Option<MockLre>,
}

impl FakeNetDevice {
    pub fn new(name: &str, mac: MacAddress) -> Self {
        Self {
            name: name.to_string(),
            mac,
            kind: LinkKind::Ethernet,
            mtu: AtomicU32::new(1500),
            admin_up: AtomicBool::new(true),
            oper_up: AtomicBool::new(true),
            features: Mutex::new(Features::ONE_FOR_ALL),
            promiscuous: AtomicBool::new(false),
            claimed: AtomicBool::new(false),
            fail_claim: AtomicBool::new(false),
            fail_vlan_add: AtomicBool::new(false),
            vlans: Mutex::new(Vec::new()),
            allmulti: AtomicBool::new(false),
            synced: Mutex::new(AddressLists::default()),
            timestamp: None,
            lre: None,
        }
    }

    pub fn with_kind(mut self, kind: LinkKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_features(self, features: Features) -> Self {
        *self.features.lock() = features;
        self
    }

    pub fn with_mtu(self, mtu: u32) -> Self {
        self.mtu.store(mtu, Ordering::SeqCst);
        self
    }

    pub fn with_lre(mut self, lre: MockLre) -> Self {
        self.lre = Some(lre);
        self
    }

    pub fn with_timestamping(mut self, info: TimestampInfo) -> Self {
        self.timestamp = Some(info);
        self
    }

    pub fn failing_claim(self) -> Self {
        self.fail_claim.store(true, Ordering::SeqCst);
        self
    }

    pub fn failing_vlan_add(self) -> Self {
        self.fail_vlan_add.store(true, Ordering::SeqCst);
        self
    }

    pub fn link_down(self) -> Self {
        self.oper_up.store(false, Ordering::SeqCst);
        self
    }

    pub fn set_link(&self, up: bool) {
        self.oper_up.store(up, Ordering::SeqCst);
    }

    pub fn set_features(&self, features: Features) {
        *self.features.lock() = features;
    }

    pub fn clear_failing_claim(&self) {
        self.fail_claim.store(false, Ordering::SeqCst);
    }

    pub fn set_mtu(&self, mtu: u32) {
        self.mtu.store(mtu, Ordering::SeqCst);
    }

    pub fn is_promiscuous(&self) -> bool {
        self.promiscuous.load(Ordering::SeqCst)
    }

    pub fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::SeqCst)
    }

    pub fn vlans(&self) -> Vec<u16> {
        self.vlans.lock().clone()
    }

    pub fn allmulti(&self) -> bool {
        self.allmulti.load(Ordering::SeqCst)
    }

    pub fn synced(&self) -> AddressLists {
        self.synced.lock().clone()
    }
}

impl NetDevice for FakeNetDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn mac(&self) -> MacAddress {
        self.mac
    }

    fn mtu(&self) -> u32 {
        self.mtu.load(Ordering::SeqCst)
    }

    fn is_admin_up(&self) -> bool {
        self.admin_up.load(Ordering::SeqCst)
    }

    fn is_oper_up(&self) -> bool {
        self.oper_up.load(Ordering::SeqCst)
    }

    fn features(&self) -> Features {
        *self.features.lock()
    }

    fn kind(&self) -> LinkKind {
        self.kind
    }

    fn set_promiscuous(&self, on: bool) -> hsr::Result<()> {
        self.promiscuous.store(on, Ordering::SeqCst);
        Ok(())
    }

    fn claim_rx_handler(&self) -> hsr::Result<()> {
        if self.fail_claim.load(Ordering::SeqCst) {
            return Err(HsrError::device("receive hook unavailable"));
        }
        if self.claimed.swap(true, Ordering::SeqCst) {
            return Err(HsrError::PortRejected {
                port: self.name.clone(),
                reason: "already a slave of another device",
            });
        }
        Ok(())
    }

    fn release_rx_handler(&self) {
        self.claimed.store(false, Ordering::SeqCst);
    }

    fn vlan_vid_add(&self, vid: u16) -> hsr::Result<()> {
        if self.fail_vlan_add.load(Ordering::SeqCst) {
            return Err(HsrError::device("VLAN filter table full"));
        }
        self.vlans.lock().push(vid);
        Ok(())
    }

    fn vlan_vid_del(&self, vid: u16) {
        self.vlans.lock().retain(|v| *v != vid);
    }

    fn set_allmulti(&self, on: bool) -> hsr::Result<()> {
        self.allmulti.store(on, Ordering::SeqCst);
        Ok(())
    }

    fn sync_addresses(&self, addrs: &AddressLists) {
        *self.synced.lock() = addrs.clone();
    }

    fn unsync_addresses(&self, _addrs: &AddressLists) {
        *self.synced.lock() = AddressLists::default();
    }

    fn timestamp_info(&self) -> Option<TimestampInfo> {
        self.timestamp
    }

    fn lre(&self) -> Option<&dyn LreOps> {
        self.lre.as_ref().map(|lre| lre as &dyn LreOps)
    }
}

/// Forwarding engine that records every frame handed to it.
#[derive(Default)]
pub struct RecordingForwarder {
    frames: Mutex<Vec<FrameInfo>>,
}

impl RecordingForwarder {
    pub fn frames(&self) -> Vec<FrameInfo> {
        self.frames.lock().clone()
    }

    pub fn supervision_frames(&self) -> Vec<FrameInfo> {
        self.frames
            .lock()
            .iter()
            .filter(|f| f.is_supervision)
            .cloned()
            .collect()
    }

    pub fn data_frames(&self) -> Vec<FrameInfo> {
        self.frames
            .lock()
            .iter()
            .filter(|f| !f.is_supervision)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.frames.lock().clear();
    }
}

impl ForwardingEngine for RecordingForwarder {
    fn forward(&self, frame: FrameInfo) {
        self.frames.lock().push(frame);
    }
}

/// Node registry holding whatever nodes the test puts in.
#[derive(Default)]
pub struct FakeNodeRegistry {
    self_nodes: Mutex<Vec<(SelfNodeHandle, MacAddress, MacAddress)>>,
    nodes: Mutex<Vec<NodeInfo>>,
    next_handle: AtomicU64,
    prunes: AtomicUsize,
    fail_create: AtomicBool,
}

impl FakeNodeRegistry {
    pub fn failing() -> Self {
        let registry = Self::default();
        registry.fail_create.store(true, Ordering::SeqCst);
        registry
    }

    pub fn self_node_count(&self) -> usize {
        self.self_nodes.lock().len()
    }

    pub fn self_node_macs(&self) -> Option<(MacAddress, MacAddress)> {
        self.self_nodes.lock().first().map(|(_, a, b)| (*a, *b))
    }

    pub fn prunes(&self) -> usize {
        self.prunes.load(Ordering::SeqCst)
    }

    pub fn add_node(&self, node: NodeInfo) {
        self.nodes.lock().push(node);
    }
}

impl NodeRegistry for FakeNodeRegistry {
    fn create_self_node(&self, mac_a: MacAddress, mac_b: MacAddress) -> hsr::Result<SelfNodeHandle> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(HsrError::Resource("node table full".to_string()));
        }
        let handle = SelfNodeHandle(self.next_handle.fetch_add(1, Ordering::SeqCst));
        self.self_nodes.lock().push((handle, mac_a, mac_b));
        Ok(handle)
    }

    fn remove_self_node(&self, handle: SelfNodeHandle) {
        self.self_nodes.lock().retain(|(h, _, _)| *h != handle);
    }

    fn is_self(&self, mac: &MacAddress) -> bool {
        self.self_nodes
            .lock()
            .iter()
            .any(|(_, a, b)| a == mac || b == mac)
    }

    fn prune(&self) {
        self.prunes.fetch_add(1, Ordering::SeqCst);
    }

    fn nodes(&self) -> Vec<NodeInfo> {
        self.nodes.lock().clone()
    }
}

/// Introspection surface that records which devices it describes.
#[derive(Default)]
pub struct FakeIntrospection {
    devices: Mutex<Vec<String>>,
    fail: AtomicBool,
}

impl FakeIntrospection {
    pub fn failing() -> Self {
        let introspection = Self::default();
        introspection.fail.store(true, Ordering::SeqCst);
        introspection
    }

    pub fn devices(&self) -> Vec<String> {
        self.devices.lock().clone()
    }
}

impl Introspection for FakeIntrospection {
    fn create(&self, device: &str) -> hsr::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(HsrError::Resource("cannot create introspection entries".to_string()));
        }
        self.devices.lock().push(device.to_string());
        Ok(())
    }

    fn remove(&self, device: &str) {
        self.devices.lock().retain(|d| d != device);
    }
}

/// A registry, its collaborators and two slave links.
pub struct Harness {
    pub registry: HsrRegistry,
    pub forwarder: Arc<RecordingForwarder>,
    pub nodes: Arc<FakeNodeRegistry>,
    pub introspection: Arc<FakeIntrospection>,
    pub slave_a: Arc<FakeNetDevice>,
    pub slave_b: Arc<FakeNetDevice>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_slaves(FakeNetDevice::new("eth1", MAC_A), FakeNetDevice::new("eth2", MAC_B))
    }

    pub fn with_slaves(slave_a: FakeNetDevice, slave_b: FakeNetDevice) -> Self {
        Self {
            registry: HsrRegistry::new(),
            forwarder: Arc::new(RecordingForwarder::default()),
            nodes: Arc::new(FakeNodeRegistry::default()),
            introspection: Arc::new(FakeIntrospection::default()),
            slave_a: Arc::new(slave_a),
            slave_b: Arc::new(slave_b),
        }
    }

    pub fn env(&self) -> HsrEnvironment {
        HsrEnvironment::new(self.forwarder.clone(), self.nodes.clone()).with_introspection(self.introspection.clone())
    }

    pub async fn create(&self, config: &DeviceConfig) -> hsr::Result<DeviceId> {
        self.registry
            .create_device(config, self.slave_a.clone(), self.slave_b.clone(), self.env())
            .await
    }

    /// Creates and opens a device.
    pub async fn up(&self, config: &DeviceConfig) -> DeviceId {
        let id = self.create(config).await.unwrap();
        self.registry.open(id).await.unwrap();
        id
    }
}

/// Untagged IPv4 frame of `len` octets from `src`.
pub fn ipv4_frame(src: MacAddress, len: usize) -> bytes::Bytes {
    let mut data = vec![0u8; len.max(14)];
    data[..6].copy_from_slice(&[0x02, 0x00, 0x00, 0x00, 0x00, 0xff]);
    data[6..12].copy_from_slice(src.as_bytes());
    data[12..14].copy_from_slice(&0x0800u16.to_be_bytes());
    bytes::Bytes::from(data)
}
