//! MTU and feature negotiation between the device and its slaves.

use crate::device::HsrDevice;
use crate::error::{HsrError, Result};
use crate::registry::ConfigGuard;
use crate::types::{ETH_DATA_LEN, Features, HSR_HLEN};
use tracing::{debug, warn};

/// Largest MTU the device can offer over slaves with `slave_mtus`.
///
/// Returns 0 when the smallest slave MTU cannot even hold the tag.
pub fn compute_max_mtu<I>(slave_mtus: I, tag_overhead: u32, rx_offloaded: bool) -> u32
where
    I: IntoIterator<Item = u32>,
{
    let mtu_max = slave_mtus.into_iter().fold(ETH_DATA_LEN, u32::min);

    if mtu_max < tag_overhead {
        return 0;
    }

    if rx_offloaded {
        mtu_max
    } else {
        mtu_max - tag_overhead
    }
}

/// Features the device may expose. Capabilities in
/// [`Features::ONE_FOR_ALL`] survive only if every slave has them; the
/// rest pass through as requested.
pub fn recompute_features<I>(requested: Features, slave_features: I) -> Features
where
    I: IntoIterator<Item = Features>,
{
    let uniform = slave_features
        .into_iter()
        .fold(requested & Features::ONE_FOR_ALL, |acc, f| acc & f);

    (requested & !Features::ONE_FOR_ALL) | uniform
}

impl HsrDevice {
    /// Maximum MTU over the currently attached slaves.
    pub async fn max_mtu(&self) -> u32 {
        let mtus = self.ports.slaves().await.iter().map(|p| p.mtu()).collect::<Vec<_>>();
        compute_max_mtu(mtus, HSR_HLEN as u32, self.rx_offloaded())
    }

    /// Renegotiates the master's features against the attached slaves.
    pub(crate) async fn update_features(&self) {
        let slaves = self.ports.slaves().await;
        let features = recompute_features(self.master.wanted_features(), slaves.iter().map(|p| p.features()));
        self.master.set_features(features);
        debug!(device = %self.name, ?features, "Features recomputed");
    }

    pub(crate) async fn change_mtu(&self, _cfg: &ConfigGuard<'_>, new_mtu: u32) -> Result<()> {
        let max = self.max_mtu().await;
        if new_mtu > max {
            warn!(device = %self.name, requested = new_mtu, max, "MTU exceeds the maximum for this device");
            return Err(HsrError::MtuOutOfRange { requested: new_mtu, max });
        }

        self.master.set_mtu(new_mtu);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_mtu_takes_smallest_slave() {
        assert_eq!(compute_max_mtu([1500, 1400], 6, false), 1394);
        assert_eq!(compute_max_mtu([1500, 1400], 6, true), 1400);
    }

    #[test]
    fn test_max_mtu_capped_at_ethernet_default() {
        assert_eq!(compute_max_mtu([9000, 9000], 6, false), 1494);
        assert_eq!(compute_max_mtu(Vec::new(), 6, false), 1494);
    }

    #[test]
    fn test_max_mtu_too_small_for_tag() {
        assert_eq!(compute_max_mtu([4], 6, false), 0);
        assert_eq!(compute_max_mtu([6], 6, false), 0);
        assert_eq!(compute_max_mtu([1500, 5], 6, true), 0);
    }

    #[test]
    fn test_one_for_all_features_need_every_slave() {
        let requested = Features::DEVICE_HW | Features::LLTX;

        let result = recompute_features(
            requested,
            [Features::SG | Features::HW_CSUM | Features::GSO, Features::SG | Features::GSO],
        );

        assert!(result.contains(Features::SG | Features::GSO));
        assert!(!result.contains(Features::HW_CSUM));
        assert!(!result.contains(Features::HIGHDMA));
        // Not one-for-all: passes through untouched
        assert!(result.contains(Features::HW_VLAN_CTAG_TX | Features::LLTX));
    }

    #[test]
    fn test_features_without_slaves() {
        let requested = Features::DEVICE_HW;
        assert_eq!(recompute_features(requested, []), requested);
    }
}
