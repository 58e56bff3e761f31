//! Simple HSR example
//!
//! This example creates a redundancy device over two in-memory links and
//! prints the supervision traffic it produces.
//!
//! Usage:
//!   target/release/examples/simple_hsr [config.yaml]
//!
//! Without a configuration file an HSRv1 device `hsr0` over `eth1` and
//! `eth2` is created, sending a life check every two seconds. Set
//! `protocol: hsr-v0` to see the three announces sent first.

use hsr::netdev::AddressLists;
use hsr::{
    Config, Features, ForwardingEngine, FrameInfo, HsrEnvironment, HsrRegistry, MacAddress, NetDevice, NodeInfo,
    NodeRegistry, SelfNodeHandle, SupervisionFrame,
};
use parking_lot::Mutex;
use std::env;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::signal;
use tokio::time::interval;

/// An always-up Ethernet link.
struct MemoryLink {
    name: String,
    mac: MacAddress,
    claimed: AtomicBool,
    synced: Mutex<AddressLists>,
}

impl MemoryLink {
    fn new(name: &str, last_octet: u8) -> Self {
        Self {
            name: name.to_string(),
            mac: MacAddress::new([0x02, 0x00, 0x00, 0x00, 0x00, last_octet]),
            claimed: AtomicBool::new(false),
            synced: Mutex::new(AddressLists::default()),
        }
    }
}

impl NetDevice for MemoryLink {
    fn name(&self) -> &str {
        &self.name
    }

    fn mac(&self) -> MacAddress {
        self.mac
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
        Features::ONE_FOR_ALL
    }

    fn set_promiscuous(&self, _on: bool) -> hsr::Result<()> {
        Ok(())
    }

    fn claim_rx_handler(&self) -> hsr::Result<()> {
        if self.claimed.swap(true, Ordering::SeqCst) {
            return Err(hsr::HsrError::device("link already claimed"));
        }
        Ok(())
    }

    fn release_rx_handler(&self) {
        self.claimed.store(false, Ordering::SeqCst);
    }

    fn sync_addresses(&self, addrs: &AddressLists) {
        *self.synced.lock() = addrs.clone();
    }
}

/// Prints supervision frames and counts the rest.
#[derive(Default)]
struct PrintingForwarder {
    data_frames: AtomicU64,
}

impl ForwardingEngine for PrintingForwarder {
    fn forward(&self, frame: FrameInfo) {
        if !frame.is_supervision {
            self.data_frames.fetch_add(1, Ordering::Relaxed);
            return;
        }

        match SupervisionFrame::parse(&frame.data) {
            Ok(sup) => println!(
                "  → {:?} seq={} dst={} len={}",
                sup.tlv,
                sup.sequence_nr,
                sup.dst,
                frame.data.len()
            ),
            Err(e) => eprintln!("  ✗ unparseable supervision frame: {}", e),
        }
    }
}

#[derive(Default)]
struct MemoryNodes {
    self_macs: Mutex<Option<(MacAddress, MacAddress)>>,
}

impl NodeRegistry for MemoryNodes {
    fn create_self_node(&self, mac_a: MacAddress, mac_b: MacAddress) -> hsr::Result<SelfNodeHandle> {
        *self.self_macs.lock() = Some((mac_a, mac_b));
        Ok(SelfNodeHandle(0))
    }

    fn remove_self_node(&self, _handle: SelfNodeHandle) {
        *self.self_macs.lock() = None;
    }

    fn is_self(&self, mac: &MacAddress) -> bool {
        matches!(*self.self_macs.lock(), Some((a, b)) if a == *mac || b == *mac)
    }

    fn prune(&self) {}

    fn nodes(&self) -> Vec<NodeInfo> {
        Vec::new()
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = match env::args().nth(1) {
        Some(path) => Config::load_from_file(path)?,
        None => Config::default(),
    };
    config.init_logging();

    let device_config = config.device_config();

    println!("╔═══════════════════════════════════════╗");
    println!("║   HSR/PRP Example Device              ║");
    println!("╚═══════════════════════════════════════╝");
    println!();
    println!("Configuration:");
    println!("  Device:          {}", device_config.name);
    println!("  Protocol:        {}", device_config.protocol);
    println!("  Slave A:         {}", config.device.slave_a);
    println!("  Slave B:         {}", config.device.slave_b);
    println!(
        "  Life check:      {:?}",
        device_config.supervision.timing.life_check_interval
    );
    println!();

    let forwarder = Arc::new(PrintingForwarder::default());
    let env = HsrEnvironment::new(forwarder.clone(), Arc::new(MemoryNodes::default()));

    let registry = Arc::new(HsrRegistry::new());
    let id = registry
        .create_device(
            &device_config,
            Arc::new(MemoryLink::new(&config.device.slave_a, 0x0a)),
            Arc::new(MemoryLink::new(&config.device.slave_b, 0x0b)),
            env,
        )
        .await?;
    registry.open(id).await?;
    let device = registry.device(id).await?;

    println!("✓ Device {} created and opened", device.name());
    println!();

    // Host traffic on the master gets numbered alongside supervision
    let traffic_device = device.clone();
    let traffic_handle = tokio::spawn(async move {
        let mut tick = interval(Duration::from_millis(500));
        let mut frame = vec![0u8; 64];
        frame[..6].copy_from_slice(&[0xff; 6]);
        frame[6..12].copy_from_slice(traffic_device.mac().as_bytes());
        frame[12..14].copy_from_slice(&0x0800u16.to_be_bytes());
        let frame = bytes::Bytes::from(frame);

        loop {
            tick.tick().await;
            if let Err(e) = traffic_device.xmit(frame.clone()).await {
                eprintln!("xmit error: {}", e);
            }
        }
    });

    let monitor_device = device.clone();
    let monitor_handle = tokio::spawn(async move {
        let mut tick = interval(Duration::from_secs(5));
        tick.tick().await;

        loop {
            tick.tick().await;

            let status = monitor_device.status().await;
            println!("╔═══════════════════════════════════════╗");
            println!("║  Device Status                        ║");
            println!("╠═══════════════════════════════════════╣");
            println!("║  Oper state:         {:16} ║", status.oper_state.to_string());
            println!("║  Supervision:        {:16} ║", format!("{:?}", status.supervision));
            println!("║  MTU:                {:16} ║", status.mtu);
            println!("║  Supervision sent:   {:16} ║", status.stats.tx_supervision);
            println!("║  Host frames:        {:16} ║", status.stats.rx_from_master);
            println!("╚═══════════════════════════════════════╝");
            println!();
        }
    });

    println!("Press Ctrl+C to shutdown gracefully...");
    println!();

    signal::ctrl_c().await?;
    println!();
    println!("Received shutdown signal, stopping gracefully...");

    traffic_handle.abort();
    monitor_handle.abort();

    let final_stats = device.stats().await;
    registry.shutdown().await;
    println!("✓ Device destroyed");

    println!();
    println!("Final statistics:");
    println!("  Supervision frames sent: {}", final_stats.tx_supervision);
    println!("  Supervision cycles skipped: {}", final_stats.tx_supervision_skipped);
    println!("  Host frames forwarded: {}", forwarder.data_frames.load(Ordering::Relaxed));

    Ok(())
}
