//! Device finalization, rollback and teardown.
//!
//! Finalize acquires resources in a fixed order. Each completed step is
//! recorded; when a later step fails the record is unwound newest first,
//! so a failed creation leaves no ports, no self node, no registration and
//! no timers behind.

use crate::config::DeviceConfig;
use crate::device::HsrDevice;
use crate::error::{FinalizeStep, HsrError, Result};
use crate::external::{HsrEnvironment, SelfNodeHandle};
use crate::netdev::NetDevice;
use crate::registry::{ConfigGuard, DeviceId, HsrRegistry};
use crate::types::{Features, PortType};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// A resource held by a device under construction.
#[derive(Debug)]
enum Acquired {
    SelfNode(SelfNodeHandle),
    Port(PortType),
    Registered(DeviceId),
    PruneTimer,
    Introspection,
}

/// Timer body: age out the node table every `period`.
async fn prune_task(device: Weak<HsrDevice>, period: Duration) {
    loop {
        tokio::time::sleep(period).await;

        let Some(device) = device.upgrade() else {
            return;
        };
        device.env.nodes.prune();
    }
}

impl HsrDevice {
    /// Creates, wires and registers a device over `slave_a` and `slave_b`.
    pub(crate) async fn finalize(
        registry: &HsrRegistry,
        _cfg: &ConfigGuard<'_>,
        config: &DeviceConfig,
        slave_a: Arc<dyn NetDevice>,
        slave_b: Arc<dyn NetDevice>,
        env: HsrEnvironment,
    ) -> Result<(DeviceId, Arc<HsrDevice>)> {
        let device = HsrDevice::new(config, slave_a.mac(), env);

        let mut acquired = Vec::new();
        match device
            .finalize_steps(registry, slave_a, slave_b, &mut acquired)
            .await
        {
            Ok(id) => {
                info!(
                    device = %device.name,
                    id = %id,
                    protocol = %device.version,
                    mac = %device.mac(),
                    rx_offloaded = device.rx_offloaded(),
                    "Device created"
                );
                Ok((id, device))
            }
            Err(e) => {
                warn!(device = %device.name, error = %e, "Device creation failed, rolling back");
                device.unwind(registry, acquired).await;
                Err(e)
            }
        }
    }

    async fn finalize_steps(
        &self,
        registry: &HsrRegistry,
        slave_a: Arc<dyn NetDevice>,
        slave_b: Arc<dyn NetDevice>,
        acquired: &mut Vec<Acquired>,
    ) -> Result<DeviceId> {
        let handle = self
            .env
            .nodes
            .create_self_node(self.mac(), slave_b.mac())
            .map_err(|e| HsrError::at(FinalizeStep::SelfNode, e))?;
        *self.self_node.lock() = Some(handle);
        acquired.push(Acquired::SelfNode(handle));

        self.add_port(self.master.clone(), PortType::Master)
            .await
            .map_err(|e| HsrError::at(FinalizeStep::MasterPort, e))?;
        acquired.push(Acquired::Port(PortType::Master));

        let (features_a, features_b) = (slave_a.features(), slave_b.features());
        if features_a.contains(Features::HW_HSR_TAG_RM) && features_b.contains(Features::HW_HSR_TAG_RM) {
            self.rx_offloaded.store(true, Ordering::SeqCst);
        }
        if features_a.contains(Features::HW_VLAN_CTAG_FILTER) && features_b.contains(Features::HW_VLAN_CTAG_FILTER) {
            self.master.add_wanted_features(Features::HW_VLAN_CTAG_FILTER);
            self.update_features().await;
        }

        let id = registry
            .register(self.weak_self.upgrade().ok_or_else(|| HsrError::device("device dropped during finalize"))?)
            .await
            .map_err(|e| HsrError::at(FinalizeStep::Register, e))?;
        acquired.push(Acquired::Registered(id));

        let mac_a = slave_a.mac();
        let mac_b = slave_b.mac();

        self.add_port(slave_a, PortType::SlaveA)
            .await
            .map_err(|e| HsrError::at(FinalizeStep::SlaveA, e))?;
        acquired.push(Acquired::Port(PortType::SlaveA));

        self.add_port(slave_b, PortType::SlaveB)
            .await
            .map_err(|e| HsrError::at(FinalizeStep::SlaveB, e))?;
        acquired.push(Acquired::Port(PortType::SlaveB));

        // Offloading hardware prunes its own table
        if !self.rx_offloaded() {
            self.prune_timer
                .arm(prune_task(self.weak_self.clone(), self.prune_period));
            acquired.push(Acquired::PruneTimer);
        }

        if self.rx_offloaded() && mac_a != mac_b {
            error!(device = %self.name, %mac_a, %mac_b, "Slave MAC addresses must match for offload");
            return Err(HsrError::at(
                FinalizeStep::OffloadAddress,
                HsrError::config("slave MAC addresses differ"),
            ));
        }

        self.env
            .introspection
            .create(&self.name)
            .map_err(|e| HsrError::at(FinalizeStep::Introspection, e))?;
        acquired.push(Acquired::Introspection);

        if let Some(vlan) = self.supervision.vlan {
            self.set_sv_frame_vid(vlan.vid)
                .await
                .map_err(|e| HsrError::at(FinalizeStep::SupervisionVlan, e))?;
        }

        Ok(id)
    }

    /// Releases `acquired`, newest first.
    async fn unwind(&self, registry: &HsrRegistry, acquired: Vec<Acquired>) {
        for step in acquired.into_iter().rev() {
            debug!(device = %self.name, ?step, "Rolling back");
            match step {
                Acquired::SelfNode(handle) => {
                    self.self_node.lock().take();
                    self.env.nodes.remove_self_node(handle);
                }
                Acquired::Port(port_type) => {
                    self.del_port(port_type).await;
                }
                Acquired::Registered(id) => registry.unregister(id).await,
                Acquired::PruneTimer => {
                    self.prune_timer.disarm();
                }
                Acquired::Introspection => self.env.introspection.remove(&self.name),
            }
        }
    }

    /// Stops timers, releases introspection and detaches Slave A, Slave B
    /// and finally the master. Ends with the device unregistered.
    pub(crate) async fn teardown(&self, registry: &HsrRegistry, cfg: &ConfigGuard<'_>, id: DeviceId) {
        self.master.set_admin_up(false);
        self.check_carrier_and_operstate(cfg).await;

        self.announce_timer.disarm();
        self.prune_timer.disarm();

        self.env.introspection.remove(&self.name);

        for port_type in [PortType::SlaveA, PortType::SlaveB, PortType::Master] {
            self.del_port(port_type).await;
        }

        if let Some(handle) = self.self_node.lock().take() {
            self.env.nodes.remove_self_node(handle);
        }

        registry.unregister(id).await;
        info!(device = %self.name, id = %id, "Device destroyed");
    }
}
