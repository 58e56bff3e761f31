//! Collaborators the redundancy device drives but does not implement:
//! the duplicate-aware forwarding engine, the node registry and the
//! administrative introspection surfaces.

use crate::error::Result;
use crate::frame::FrameInfo;
use crate::types::MacAddress;
use std::sync::Arc;
use std::time::Duration;

/// Duplicate-aware frame transmission and reception.
pub trait ForwardingEngine: Send + Sync {
    /// Hands a frame over for forwarding. Called with the device's sequence
    /// lock held; must not block.
    fn forward(&self, frame: FrameInfo);
}

/// Handle of the record identifying frames this device originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SelfNodeHandle(pub u64);

/// Singly-attached-node markers of a node table entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SanState {
    /// Seen without redundancy information on LAN A.
    pub san_a: bool,
    /// Seen without redundancy information on LAN B.
    pub san_b: bool,
}

impl SanState {
    pub fn is_san(&self) -> bool {
        self.san_a || self.san_b
    }
}

/// A node known to the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub mac_a: MacAddress,
    pub mac_b: MacAddress,
    pub last_seen_a: Option<Duration>,
    pub last_seen_b: Option<Duration>,
    pub san: SanState,
}

/// Node table owned outside the device.
pub trait NodeRegistry: Send + Sync {
    fn create_self_node(&self, mac_a: MacAddress, mac_b: MacAddress) -> Result<SelfNodeHandle>;

    fn remove_self_node(&self, handle: SelfNodeHandle);

    fn is_self(&self, mac: &MacAddress) -> bool;

    /// Ages out stale entries; driven by the device's prune timer.
    fn prune(&self);

    fn nodes(&self) -> Vec<NodeInfo>;
}

/// procfs/debugfs style surfaces describing a device.
pub trait Introspection: Send + Sync {
    fn create(&self, device: &str) -> Result<()>;

    fn remove(&self, device: &str);
}

/// Introspection for hosts that expose none.
#[derive(Debug, Default)]
pub struct NoIntrospection;

impl Introspection for NoIntrospection {
    fn create(&self, _device: &str) -> Result<()> {
        Ok(())
    }

    fn remove(&self, _device: &str) {}
}

/// Collaborators handed to a device at creation.
#[derive(Clone)]
pub struct HsrEnvironment {
    pub forwarder: Arc<dyn ForwardingEngine>,
    pub nodes: Arc<dyn NodeRegistry>,
    pub introspection: Arc<dyn Introspection>,
}

impl HsrEnvironment {
    pub fn new(forwarder: Arc<dyn ForwardingEngine>, nodes: Arc<dyn NodeRegistry>) -> Self {
        Self {
            forwarder,
            nodes,
            introspection: Arc::new(NoIntrospection),
        }
    }

    pub fn with_introspection(mut self, introspection: Arc<dyn Introspection>) -> Self {
        self.introspection = introspection;
        self
    }
}
