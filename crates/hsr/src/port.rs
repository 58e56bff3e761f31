//! Ports of a redundancy device and their attachment rules.

use crate::device::HsrDevice;
use crate::error::{HsrError, Result};
use crate::netdev::{LinkKind, NetDevice};
use crate::types::{Features, PortType};
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// A port of a redundancy device: the master endpoint or one of the two
/// slave links.
pub struct HsrPort {
    port_type: PortType,
    dev: Arc<dyn NetDevice>,
}

impl HsrPort {
    pub(crate) fn new(port_type: PortType, dev: Arc<dyn NetDevice>) -> Self {
        Self { port_type, dev }
    }

    pub fn port_type(&self) -> PortType {
        self.port_type
    }

    pub fn name(&self) -> &str {
        self.dev.name()
    }

    pub fn dev(&self) -> &Arc<dyn NetDevice> {
        &self.dev
    }

    /// Administratively up with a working link.
    pub fn is_up(&self) -> bool {
        self.dev.is_admin_up() && self.dev.is_oper_up()
    }

    pub fn features(&self) -> Features {
        self.dev.features()
    }

    pub fn mtu(&self) -> u32 {
        self.dev.mtu()
    }
}

impl fmt::Debug for HsrPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HsrPort")
            .field("port_type", &self.port_type)
            .field("dev", &self.dev.name())
            .finish()
    }
}

/// The set of attached ports, at most one per role.
///
/// Readers take cheap snapshots; attach and detach take the write lock, so
/// a detach completes only after in-flight readers have let go.
#[derive(Debug, Default)]
pub(crate) struct PortSet {
    ports: RwLock<Vec<Arc<HsrPort>>>,
}

impl PortSet {
    pub(crate) async fn get(&self, port_type: PortType) -> Option<Arc<HsrPort>> {
        self.ports
            .read()
            .await
            .iter()
            .find(|p| p.port_type == port_type)
            .cloned()
    }

    pub(crate) async fn snapshot(&self) -> Vec<Arc<HsrPort>> {
        self.ports.read().await.clone()
    }

    /// Attached slave ports, A before B.
    pub(crate) async fn slaves(&self) -> Vec<Arc<HsrPort>> {
        let mut slaves: Vec<_> = self
            .ports
            .read()
            .await
            .iter()
            .filter(|p| p.port_type.is_slave())
            .cloned()
            .collect();
        slaves.sort_by_key(|p| p.port_type);
        slaves
    }

    pub(crate) async fn insert(&self, port: Arc<HsrPort>) -> Result<()> {
        let mut ports = self.ports.write().await;
        if ports.iter().any(|p| p.port_type == port.port_type) {
            return Err(HsrError::PortExists(port.port_type));
        }
        ports.push(port);
        Ok(())
    }

    pub(crate) async fn remove(&self, port_type: PortType) -> Option<Arc<HsrPort>> {
        let mut ports = self.ports.write().await;
        let idx = ports.iter().position(|p| p.port_type == port_type)?;
        Some(ports.remove(idx))
    }

    pub(crate) async fn len(&self) -> usize {
        self.ports.read().await.len()
    }
}

/// Checks that `dev` may become a slave port.
pub fn check_dev_ok(dev: &dyn NetDevice) -> Result<()> {
    let reason = match dev.kind() {
        LinkKind::Ethernet => return Ok(()),
        LinkKind::Loopback => "cannot enslave a loopback device",
        LinkKind::RedundancyMaster => "cannot create trees of redundancy devices",
        LinkKind::Vlan => "redundancy on top of a VLAN device is not supported",
        LinkKind::Other => "not an Ethernet device",
    };

    Err(HsrError::PortRejected {
        port: dev.name().to_string(),
        reason,
    })
}

impl HsrDevice {
    /// Attaches `dev` in role `port_type`, then renegotiates features and
    /// the master MTU.
    pub(crate) async fn add_port(&self, dev: Arc<dyn NetDevice>, port_type: PortType) -> Result<()> {
        if port_type.is_slave() {
            check_dev_ok(dev.as_ref())?;
        }

        if self.ports.get(port_type).await.is_some() {
            return Err(HsrError::PortExists(port_type));
        }

        if port_type.is_slave() {
            dev.claim_rx_handler()?;
            if let Err(e) = dev.set_promiscuous(true) {
                dev.release_rx_handler();
                return Err(e);
            }
        }

        let port = Arc::new(HsrPort::new(port_type, dev));
        if let Err(e) = self.ports.insert(port.clone()).await {
            if port_type.is_slave() {
                port.dev.release_rx_handler();
                release_promiscuous(port.dev.as_ref());
            }
            return Err(e);
        }

        self.update_features().await;
        self.master.set_mtu(self.max_mtu().await);

        debug!(
            device = %self.name,
            port = %port_type,
            dev = %port.name(),
            mtu = self.master.mtu(),
            "Port attached"
        );

        Ok(())
    }

    /// Detaches the port in role `port_type`, if attached.
    pub(crate) async fn del_port(&self, port_type: PortType) -> Option<Arc<HsrPort>> {
        let port = self.ports.remove(port_type).await?;

        if port_type.is_slave() {
            self.update_features().await;
            self.master.set_mtu(self.max_mtu().await);
            port.dev.release_rx_handler();
            release_promiscuous(port.dev.as_ref());
        }

        debug!(device = %self.name, port = %port_type, dev = %port.name(), "Port detached");
        Some(port)
    }
}

fn release_promiscuous(dev: &dyn NetDevice) {
    if let Err(e) = dev.set_promiscuous(false) {
        warn!(dev = %dev.name(), error = %e, "Failed to leave promiscuous mode");
    }
}

#[cfg(test)]
pub(crate) mod stub {
    use super::*;
    use crate::types::MacAddress;

    /// Minimal always-up link for unit tests.
    pub(crate) struct StubDev {
        pub name: String,
        pub kind: LinkKind,
        pub features: Features,
    }

    impl NetDevice for StubDev {
        fn name(&self) -> &str {
            &self.name
        }

        fn mac(&self) -> MacAddress {
            MacAddress::new([0x02, 0, 0, 0, 0, 1])
        }

        fn mtu(&self) -> u32 {
            1500
        }

        fn is_admin_up(&self) -> bool {
            true
        }

        fn is_oper_up(&self) -> bool {
            true
        }

        fn features(&self) -> Features {
            self.features
        }

        fn kind(&self) -> LinkKind {
            self.kind
        }

        fn set_promiscuous(&self, _on: bool) -> Result<()> {
            Ok(())
        }

        fn claim_rx_handler(&self) -> Result<()> {
            Ok(())
        }

        fn release_rx_handler(&self) {}
    }

    pub(crate) fn port(port_type: PortType, features: Features) -> HsrPort {
        HsrPort::new(
            port_type,
            Arc::new(StubDev {
                name: format!("eth-{}", port_type.designation()),
                kind: LinkKind::Ethernet,
                features,
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::stub::{StubDev, port};
    use super::*;

    #[test]
    fn test_check_dev_ok() {
        for (kind, ok) in [
            (LinkKind::Ethernet, true),
            (LinkKind::Loopback, false),
            (LinkKind::Vlan, false),
            (LinkKind::RedundancyMaster, false),
            (LinkKind::Other, false),
        ] {
            let dev = StubDev {
                name: "eth9".to_string(),
                kind,
                features: Features::EMPTY,
            };
            assert_eq!(check_dev_ok(&dev).is_ok(), ok, "{kind:?}");
        }
    }

    #[tokio::test]
    async fn test_port_set_one_per_role() {
        let set = PortSet::default();
        set.insert(Arc::new(port(PortType::SlaveB, Features::EMPTY)))
            .await
            .unwrap();
        set.insert(Arc::new(port(PortType::SlaveA, Features::EMPTY)))
            .await
            .unwrap();

        let err = set
            .insert(Arc::new(port(PortType::SlaveA, Features::EMPTY)))
            .await
            .unwrap_err();
        assert!(matches!(err, HsrError::PortExists(PortType::SlaveA)));

        let slaves = set.slaves().await;
        assert_eq!(slaves[0].port_type(), PortType::SlaveA);
        assert_eq!(slaves[1].port_type(), PortType::SlaveB);

        assert!(set.remove(PortType::SlaveA).await.is_some());
        assert!(set.remove(PortType::SlaveA).await.is_none());
        assert_eq!(set.len().await, 1);
    }
}
