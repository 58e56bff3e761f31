//! The master link: the endpoint the host stack sees as the redundancy
//! device itself.

use crate::error::Result;
use crate::netdev::{AddressLists, LinkKind, NetDevice};
use crate::types::{ETH_DATA_LEN, Features, MacAddress, OperState};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tokio::sync::watch;

/// State of the master link.
#[derive(Debug)]
pub struct MasterLink {
    name: String,
    mac: MacAddress,
    admin_up: AtomicBool,
    carrier: AtomicBool,
    mtu: AtomicU32,
    allmulti: AtomicBool,
    /// Features requested for the device.
    wanted_features: Mutex<Features>,
    /// Features after negotiation with the slaves.
    features: Mutex<Features>,
    addresses: Mutex<AddressLists>,
    oper_state: watch::Sender<OperState>,
}

impl MasterLink {
    pub(crate) fn new(name: &str, mac: MacAddress) -> Self {
        let wanted = Features::DEVICE_HW | Features::LLTX | Features::NETNS_LOCAL;
        let (oper_state, _) = watch::channel(OperState::Down);

        Self {
            name: name.to_string(),
            mac,
            admin_up: AtomicBool::new(false),
            carrier: AtomicBool::new(false),
            mtu: AtomicU32::new(ETH_DATA_LEN),
            allmulti: AtomicBool::new(false),
            wanted_features: Mutex::new(wanted),
            features: Mutex::new(wanted),
            addresses: Mutex::new(AddressLists::default()),
            oper_state,
        }
    }

    pub(crate) fn set_admin_up(&self, up: bool) {
        self.admin_up.store(up, Ordering::SeqCst);
    }

    pub fn carrier(&self) -> bool {
        self.carrier.load(Ordering::SeqCst)
    }

    pub(crate) fn set_carrier(&self, carrier: bool) {
        self.carrier.store(carrier, Ordering::SeqCst);
    }

    pub(crate) fn set_mtu(&self, mtu: u32) {
        self.mtu.store(mtu, Ordering::SeqCst);
    }

    pub fn allmulti(&self) -> bool {
        self.allmulti.load(Ordering::SeqCst)
    }

    pub(crate) fn set_allmulti_flag(&self, on: bool) {
        self.allmulti.store(on, Ordering::SeqCst);
    }

    pub fn wanted_features(&self) -> Features {
        *self.wanted_features.lock()
    }

    pub(crate) fn add_wanted_features(&self, features: Features) {
        *self.wanted_features.lock() |= features;
    }

    pub(crate) fn set_features(&self, features: Features) {
        *self.features.lock() = features;
    }

    pub fn addresses(&self) -> AddressLists {
        self.addresses.lock().clone()
    }

    pub(crate) fn set_addresses(&self, addrs: AddressLists) {
        *self.addresses.lock() = addrs;
    }

    pub fn oper_state(&self) -> OperState {
        *self.oper_state.borrow()
    }

    /// Publishes `state`. Returns whether it differed from the previous one;
    /// subscribers are only woken on a change.
    pub(crate) fn set_oper_state(&self, state: OperState) -> bool {
        self.oper_state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<OperState> {
        self.oper_state.subscribe()
    }
}

impl NetDevice for MasterLink {
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
        self.carrier()
    }

    fn features(&self) -> Features {
        *self.features.lock()
    }

    fn kind(&self) -> LinkKind {
        LinkKind::RedundancyMaster
    }

    fn set_promiscuous(&self, _on: bool) -> Result<()> {
        Ok(())
    }

    fn claim_rx_handler(&self) -> Result<()> {
        Ok(())
    }

    fn release_rx_handler(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_master_is_down() {
        let master = MasterLink::new("hsr0", MacAddress::new([2, 0, 0, 0, 0, 1]));
        assert!(!master.is_admin_up());
        assert!(!master.carrier());
        assert_eq!(master.oper_state(), OperState::Down);
        assert_eq!(master.mtu(), ETH_DATA_LEN);
        assert_eq!(master.kind(), LinkKind::RedundancyMaster);
        assert!(master.features().contains(Features::LLTX | Features::NETNS_LOCAL));
    }

    #[tokio::test]
    async fn test_oper_state_notifies_on_change_only() {
        let master = MasterLink::new("hsr0", MacAddress::ZERO);
        let mut rx = master.subscribe();

        assert!(!master.set_oper_state(OperState::Down));
        assert!(!rx.has_changed().unwrap());

        assert!(master.set_oper_state(OperState::Up));
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), OperState::Up);

        assert!(!master.set_oper_state(OperState::Up));
        assert!(!rx.has_changed().unwrap());
    }
}
