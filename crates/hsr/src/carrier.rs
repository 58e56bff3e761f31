//! Carrier and operational state of the redundancy device.

use crate::device::HsrDevice;
use crate::netdev::NetDevice;
use crate::port::HsrPort;
use crate::registry::ConfigGuard;
use crate::types::OperState;
use std::sync::Arc;
use tracing::info;

/// The device has carrier while any slave is up.
pub fn has_carrier(ports: &[Arc<HsrPort>]) -> bool {
    ports.iter().any(|p| p.port_type().is_slave() && p.is_up())
}

/// Operational state from administrative state and carrier.
pub fn derive_oper_state(admin_up: bool, carrier: bool) -> OperState {
    match (admin_up, carrier) {
        (false, _) => OperState::Down,
        (true, true) => OperState::Up,
        (true, false) => OperState::LowerLayerDown,
    }
}

impl HsrDevice {
    /// Recomputes carrier and operational state, notifying subscribers and
    /// the supervision engine on a change.
    pub(crate) async fn check_carrier_and_operstate(&self, _cfg: &ConfigGuard<'_>) {
        let old = self.master.oper_state();

        let ports = self.ports.snapshot().await;
        let carrier = has_carrier(&ports);
        self.master.set_carrier(carrier);

        let new = derive_oper_state(self.master.is_admin_up(), carrier);
        if self.master.set_oper_state(new) {
            self.stats.write().await.oper_state_changes += 1;
            info!(device = %self.name, from = %old, to = %new, carrier, "Operational state changed");
        }

        self.check_announce(old, new).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::stub::port;
    use crate::types::{Features, PortType};

    #[test]
    fn test_derive_oper_state() {
        assert_eq!(derive_oper_state(false, true), OperState::Down);
        assert_eq!(derive_oper_state(false, false), OperState::Down);
        assert_eq!(derive_oper_state(true, true), OperState::Up);
        assert_eq!(derive_oper_state(true, false), OperState::LowerLayerDown);
    }

    #[test]
    fn test_master_alone_has_no_carrier() {
        let master = Arc::new(port(PortType::Master, Features::EMPTY));
        assert!(!has_carrier(&[master.clone()]));

        let slave = Arc::new(port(PortType::SlaveB, Features::EMPTY));
        assert!(has_carrier(&[master, slave]));
        assert!(!has_carrier(&[]));
    }
}
