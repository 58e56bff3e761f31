//! Integration tests for supervision frame timing and content

mod support;

use hsr::types::{HSR_SEQNR_START, HSR_SUP_SEQNR_START};
use hsr::{
    DeviceConfig, PortEvent, ProtocolVersion, SupervisionFrame, SupervisionPhase, SupervisionTlv, SupervisionVlan,
    Tagging,
};
use std::time::Duration;
use support::{Harness, MAC_A};

fn sent_tlvs(h: &Harness) -> Vec<SupervisionTlv> {
    h.forwarder
        .supervision_frames()
        .iter()
        .map(|f| SupervisionFrame::parse(&f.data).unwrap().tlv)
        .collect()
}

async fn sleep_ms(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

#[tokio::test(start_paused = true)]
async fn test_hsr_v0_announces_then_life_checks() {
    let h = Harness::new();
    let id = h.up(&DeviceConfig::new("hsr0", ProtocolVersion::HsrV0)).await;
    let device = h.registry.device(id).await.unwrap();

    assert_eq!(device.supervision_phase().await, SupervisionPhase::Announcing);
    assert!(h.forwarder.frames().is_empty());

    // Announces at 100, 200 and 300 ms
    sleep_ms(350).await;
    assert_eq!(sent_tlvs(&h), vec![SupervisionTlv::Announce; 3]);
    assert_eq!(device.supervision_phase().await, SupervisionPhase::LifeChecking);

    // First life check one announce interval after the last announce, then
    // every two seconds
    sleep_ms(100).await;
    assert_eq!(sent_tlvs(&h).len(), 4);
    sleep_ms(1_900).await;
    assert_eq!(sent_tlvs(&h).len(), 4);
    sleep_ms(200).await;

    let tlvs = sent_tlvs(&h);
    assert_eq!(tlvs.len(), 5);
    assert_eq!(tlvs[3], SupervisionTlv::LifeCheck);
    assert_eq!(tlvs[4], SupervisionTlv::LifeCheck);
}

#[tokio::test(start_paused = true)]
async fn test_hsr_v0_uses_frame_counter() {
    let h = Harness::new();
    let id = h.up(&DeviceConfig::new("hsr0", ProtocolVersion::HsrV0)).await;
    let device = h.registry.device(id).await.unwrap();

    sleep_ms(250).await;

    let frames = h.forwarder.supervision_frames();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].sequence_nr, HSR_SEQNR_START);
    assert_eq!(frames[1].sequence_nr, HSR_SEQNR_START.wrapping_add(1));

    let parsed = SupervisionFrame::parse(&frames[0].data).unwrap();
    assert_eq!(parsed.path, 0xF);
    assert_eq!(parsed.version, 0);
    assert_eq!(parsed.tlv_length, 12);
    assert_eq!(parsed.src, MAC_A);
    assert_eq!(parsed.mac_a, MAC_A);
    assert_eq!(parsed.dst.to_string(), "01:15:4e:00:01:00");

    let seq = device.sequence_state().await;
    assert_eq!(seq.sequence_nr, HSR_SEQNR_START.wrapping_add(2));
    assert_eq!(seq.sup_sequence_nr, HSR_SUP_SEQNR_START);
}

#[tokio::test(start_paused = true)]
async fn test_hsr_v1_life_checks_only() {
    let h = Harness::new();
    let config = DeviceConfig::new("hsr0", ProtocolVersion::HsrV1).with_multicast_suffix(0x2a);
    let id = h.up(&config).await;
    let device = h.registry.device(id).await.unwrap();

    sleep_ms(150).await;
    let frames = h.forwarder.supervision_frames();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].tagging, Tagging::HsrTag);
    assert_eq!(frames[0].sequence_nr, HSR_SUP_SEQNR_START);

    let parsed = SupervisionFrame::parse(&frames[0].data).unwrap();
    assert_eq!(parsed.tlv, SupervisionTlv::LifeCheck);
    assert_eq!(parsed.tlv_length, 6);
    assert_eq!(parsed.version, 1);
    assert_eq!(parsed.hsr_tag.unwrap().lsdu_size, 52);
    assert_eq!(parsed.dst.to_string(), "01:15:4e:00:01:2a");

    sleep_ms(2_000).await;
    assert_eq!(h.forwarder.supervision_frames().len(), 2);
    assert_eq!(device.sequence_state().await.sequence_nr, HSR_SEQNR_START);
}

#[tokio::test(start_paused = true)]
async fn test_prp_life_check() {
    let h = Harness::new();
    let vlan = SupervisionVlan { vid: 100, pcp: 6, dei: false };
    let config = DeviceConfig::new("prp0", ProtocolVersion::PrpV1).with_supervision_vlan(vlan);
    h.up(&config).await;

    sleep_ms(150).await;
    let frames = h.forwarder.supervision_frames();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].priority, 6);
    assert_eq!(frames[0].data.len(), 64);

    let parsed = SupervisionFrame::parse(&frames[0].data).unwrap();
    assert_eq!(parsed.tlv, SupervisionTlv::PrpLifeCheck);
    assert_eq!(parsed.vlan, Some(vlan));
    assert_eq!(parsed.sequence_nr, HSR_SUP_SEQNR_START);
}

#[tokio::test(start_paused = true)]
async fn test_close_stops_supervision() {
    let h = Harness::new();
    let id = h.up(&DeviceConfig::new("hsr0", ProtocolVersion::HsrV1)).await;

    sleep_ms(150).await;
    assert_eq!(h.forwarder.supervision_frames().len(), 1);

    h.registry.close(id).await.unwrap();
    sleep_ms(10_000).await;
    assert_eq!(h.forwarder.supervision_frames().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_lost_carrier_stops_supervision() {
    let h = Harness::new();
    let id = h.up(&DeviceConfig::new("hsr0", ProtocolVersion::HsrV1)).await;
    let device = h.registry.device(id).await.unwrap();

    h.slave_a.set_link(false);
    h.slave_b.set_link(false);
    h.registry.port_event("eth1", PortEvent::Change).await;

    sleep_ms(10_000).await;
    assert!(h.forwarder.supervision_frames().is_empty());
    assert_eq!(device.supervision_phase().await, SupervisionPhase::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_reopen_restarts_announces() {
    let h = Harness::new();
    let id = h.up(&DeviceConfig::new("hsr0", ProtocolVersion::HsrV0)).await;

    sleep_ms(2_500).await;
    assert_eq!(sent_tlvs(&h).len(), 5);

    h.registry.close(id).await.unwrap();
    h.forwarder.clear();
    h.registry.open(id).await.unwrap();

    sleep_ms(350).await;
    assert_eq!(sent_tlvs(&h), vec![SupervisionTlv::Announce; 3]);
}

#[tokio::test(start_paused = true)]
async fn test_disabled_supervision_skips_but_keeps_cycling() {
    let h = Harness::new();
    let config = DeviceConfig::new("hsr0", ProtocolVersion::HsrV0).with_supervision_enabled(false);
    let id = h.up(&config).await;
    let device = h.registry.device(id).await.unwrap();

    sleep_ms(2_500).await;

    assert!(h.forwarder.supervision_frames().is_empty());
    let stats = device.stats().await;
    assert_eq!(stats.tx_supervision, 0);
    assert_eq!(stats.tx_supervision_skipped, 5);
    assert_ne!(device.supervision_phase().await, SupervisionPhase::Idle);
    assert_eq!(device.sequence_state().await.sequence_nr, HSR_SEQNR_START);
}
