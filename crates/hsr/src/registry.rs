//! Registry of redundancy devices.
//!
//! The registry owns the configuration lock that serializes every
//! membership and link-state change across all devices, and routes events
//! about underlying ports to the device that owns them.

use crate::config::DeviceConfig;
use crate::device::HsrDevice;
use crate::error::{HsrError, Result};
use crate::external::HsrEnvironment;
use crate::netdev::NetDevice;
use crate::types::PortType;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tracing::{debug, info};

/// Proof that the configuration lock is held.
pub(crate) type ConfigGuard<'a> = MutexGuard<'a, ()>;

/// Identifier of a registered device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DeviceId(u32);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Event about an underlying port, as reported by the host stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortEvent {
    Up,
    Down,
    /// Link state or flags changed.
    Change,
    MtuChanged,
    /// The port's own capability set changed.
    FeaturesChanged,
    /// The port is going away.
    Unregister,
}

/// All redundancy devices of a host.
#[derive(Default)]
pub struct HsrRegistry {
    config_lock: Mutex<()>,
    devices: RwLock<BTreeMap<DeviceId, Arc<HsrDevice>>>,
    next_id: AtomicU32,
}

impl HsrRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a device over two slave links.
    pub async fn create_device(
        &self,
        config: &DeviceConfig,
        slave_a: Arc<dyn NetDevice>,
        slave_b: Arc<dyn NetDevice>,
        env: HsrEnvironment,
    ) -> Result<DeviceId> {
        if slave_a.name() == slave_b.name() {
            return Err(HsrError::config("slave A and slave B are the same port"));
        }

        let cfg = self.config_lock.lock().await;
        let (id, _) = HsrDevice::finalize(self, &cfg, config, slave_a, slave_b, env).await?;
        Ok(id)
    }

    /// Tears a device down and forgets it.
    pub async fn destroy_device(&self, id: DeviceId) -> Result<()> {
        let cfg = self.config_lock.lock().await;
        let device = self.device(id).await?;
        device.teardown(self, &cfg, id).await;
        Ok(())
    }

    /// Tears down every device.
    pub async fn shutdown(&self) {
        let cfg = self.config_lock.lock().await;
        let devices: Vec<_> = self
            .devices
            .read()
            .await
            .iter()
            .map(|(id, d)| (*id, d.clone()))
            .collect();

        for (id, device) in devices {
            device.teardown(self, &cfg, id).await;
        }
    }

    pub async fn device(&self, id: DeviceId) -> Result<Arc<HsrDevice>> {
        self.devices
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(HsrError::UnknownDevice(id))
    }

    pub async fn find(&self, name: &str) -> Option<DeviceId> {
        self.devices
            .read()
            .await
            .iter()
            .find(|(_, d)| d.name() == name)
            .map(|(id, _)| *id)
    }

    pub async fn device_ids(&self) -> Vec<DeviceId> {
        self.devices.read().await.keys().copied().collect()
    }

    /// Brings the device administratively up.
    pub async fn open(&self, id: DeviceId) -> Result<()> {
        let cfg = self.config_lock.lock().await;
        self.device(id).await?.open(&cfg).await;
        Ok(())
    }

    /// Brings the device administratively down.
    pub async fn close(&self, id: DeviceId) -> Result<()> {
        let cfg = self.config_lock.lock().await;
        self.device(id).await?.close(&cfg).await;
        Ok(())
    }

    pub async fn change_mtu(&self, id: DeviceId, mtu: u32) -> Result<()> {
        let cfg = self.config_lock.lock().await;
        self.device(id).await?.change_mtu(&cfg, mtu).await
    }

    /// Routes an event about underlying port `port_name` to the device that
    /// owns it. Returns that device, if any.
    pub async fn port_event(&self, port_name: &str, event: PortEvent) -> Option<DeviceId> {
        let cfg = self.config_lock.lock().await;
        let (id, device, port_type) = self.port_owner(port_name).await?;

        debug!(device = %device.name(), port = %port_name, ?event, "Port event");

        match event {
            PortEvent::Up | PortEvent::Down => {
                device.check_carrier_and_operstate(&cfg).await;
            }
            PortEvent::Change => {
                device.check_carrier_and_operstate(&cfg).await;
                device.update_features().await;
            }
            PortEvent::FeaturesChanged => {
                device.update_features().await;
            }
            PortEvent::MtuChanged => {
                device.master.set_mtu(device.max_mtu().await);
            }
            PortEvent::Unregister => {
                device.del_port(port_type).await;
                device.check_carrier_and_operstate(&cfg).await;
            }
        }

        Some(id)
    }

    async fn port_owner(&self, port_name: &str) -> Option<(DeviceId, Arc<HsrDevice>, PortType)> {
        let devices: Vec<_> = self
            .devices
            .read()
            .await
            .iter()
            .map(|(id, d)| (*id, d.clone()))
            .collect();

        for (id, device) in devices {
            if let Some(port) = device
                .ports
                .slaves()
                .await
                .into_iter()
                .find(|p| p.name() == port_name)
            {
                return Some((id, device, port.port_type()));
            }
        }

        None
    }

    pub(crate) async fn register(&self, device: Arc<HsrDevice>) -> Result<DeviceId> {
        let mut devices = self.devices.write().await;
        if devices.values().any(|d| d.name() == device.name()) {
            return Err(HsrError::DeviceExists(device.name().to_string()));
        }

        let id = DeviceId(self.next_id.fetch_add(1, Ordering::SeqCst));
        devices.insert(id, device);
        Ok(id)
    }

    pub(crate) async fn unregister(&self, id: DeviceId) {
        if let Some(device) = self.devices.write().await.remove(&id) {
            info!(device = %device.name(), id = %id, "Device unregistered");
        }
    }
}

impl fmt::Debug for HsrRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HsrRegistry").finish_non_exhaustive()
    }
}
