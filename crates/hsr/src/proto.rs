//! Protocol variants.
//!
//! HSR and PRP differ in how redundancy information is carried (a tag after
//! the source address versus a trailer at the end of the frame), in their
//! supervision frames and in which frames a port must drop. The device
//! selects one [`ProtocolOps`] implementation at creation and dispatches
//! through it.

use crate::error::{HsrError, Result};
use crate::external::SanState;
use crate::frame::{EthernetHeader, FrameInfo, HsrTag, SupervisionFrame, SupervisionTlv, Tagging, alloc_frame};
use crate::port::HsrPort;
use crate::supervision::{SequenceSource, SupervisionContext, SupervisionResult};
use crate::types::{
    ETH_HLEN, ETH_P_HSR, ETH_P_PRP, ETH_ZLEN, Features, HSR_HLEN, HSR_V1_SUP_LSDUSIZE, MAX_ANNOUNCE_COUNT,
    MacAddress, PRP_LAN_ID, PortType, ProtocolVersion, SUPERVISION_MULTICAST_BASE, VLAN_HLEN,
};
use bytes::{BufMut, Bytes};
use std::fmt;

/// Behaviour that differs between HSR and PRP.
pub trait ProtocolOps: Send + Sync + fmt::Debug {
    /// Builds and forwards one supervision frame; returns the interval to
    /// the next one.
    fn send_supervision_frame(&self, ctx: &mut SupervisionContext<'_>) -> SupervisionResult;

    /// Frame as sent on `port`, with redundancy information added.
    fn create_tagged_frame(&self, frame: &FrameInfo, port: &HsrPort) -> Result<Bytes>;

    /// Frame with redundancy information removed, for delivery to the master.
    fn get_untagged_frame(&self, frame: &FrameInfo) -> Result<Bytes>;

    /// Whether `frame` must not be sent on `port`.
    fn drop_frame(&self, frame: &FrameInfo, port: &HsrPort) -> bool;

    /// Classifies a frame received on `port_rcv`. Untagged frames from the
    /// master are returned with sequence number 0; the caller numbers them
    /// under the sequence lock.
    fn fill_frame_info(&self, data: Bytes, port_rcv: PortType) -> Result<FrameInfo>;

    /// Records on which LAN a singly attached node was seen.
    fn handle_san_frame(&self, _is_san: bool, _port: PortType, _node: &mut SanState) {}

    /// Updates singly attached node markers when a frame from the node arrives.
    fn update_san_info(&self, _node: &mut SanState, _is_supervision: bool) {}

    /// Whether a frame received on a slave is invalid for this variant.
    fn invalid_dan_ingress_frame(&self, _ethertype: u16) -> bool {
        false
    }
}

/// Selects the implementation for `version`.
pub fn protocol_ops(version: ProtocolVersion) -> Box<dyn ProtocolOps> {
    match version {
        ProtocolVersion::HsrV0 | ProtocolVersion::HsrV1 => Box::new(HsrOps { version }),
        ProtocolVersion::PrpV1 => Box::new(PrpOps),
    }
}

/// High-availability Seamless Redundancy.
#[derive(Debug, Clone, Copy)]
pub struct HsrOps {
    version: ProtocolVersion,
}

impl HsrOps {
    pub fn new(version: ProtocolVersion) -> Self {
        Self { version }
    }

    /// Ethertype of tagged frames.
    fn tag_proto(&self) -> u16 {
        match self.version {
            ProtocolVersion::HsrV0 => ETH_P_PRP,
            _ => ETH_P_HSR,
        }
    }
}

impl ProtocolOps for HsrOps {
    fn send_supervision_frame(&self, ctx: &mut SupervisionContext<'_>) -> SupervisionResult {
        let mut tlv = SupervisionTlv::LifeCheck;
        let mut interval = ctx.timing.life_check_interval;

        if ctx.seq.announce_count < MAX_ANNOUNCE_COUNT && self.version == ProtocolVersion::HsrV0 {
            tlv = SupervisionTlv::Announce;
            interval = ctx.timing.announce_interval;
            ctx.seq.announce_count += 1;
        }

        let v1 = self.version != ProtocolVersion::HsrV0;
        let frame = SupervisionFrame {
            dst: ctx.dst,
            src: ctx.src,
            vlan: ctx.vlan,
            hsr_tag: v1.then_some(HsrTag {
                path: 0,
                lsdu_size: HSR_V1_SUP_LSDUSIZE,
                sequence_nr: 0,
                encap_proto: ETH_P_PRP,
            }),
            path: if v1 { 0 } else { 0xF },
            version: u16::from(self.version.as_u8()),
            sequence_nr: 0,
            tlv,
            tlv_length: if v1 { 6 } else { 12 },
            mac_a: ctx.src,
        };

        let source = if v1 {
            SequenceSource::Supervision
        } else {
            SequenceSource::Frame
        };

        SupervisionResult {
            interval,
            sent: ctx.emit(frame, source),
        }
    }

    fn create_tagged_frame(&self, frame: &FrameInfo, port: &HsrPort) -> Result<Bytes> {
        let path = lane(port.port_type())?;
        let header = header_of(&frame.data)?;

        if frame.tagging == Tagging::HsrTag {
            let mut data = frame.data.to_vec();
            let at = header.payload_offset;
            if at >= data.len() {
                return Err(HsrError::InvalidFrame("truncated HSR tag"));
            }
            data[at] = (data[at] & 0x0F) | (path << 4);
            return Ok(Bytes::from(data));
        }

        if port.features().contains(Features::HW_HSR_TAG_INS) {
            return Ok(frame.data.clone());
        }

        let at = header.payload_offset;
        let padded = frame.data.len().max(min_frame_len(header.is_vlan));
        let mut buf = alloc_frame(padded + HSR_HLEN)?;

        buf.put_slice(&frame.data[..header.ethertype_offset()]);
        buf.put_u16(self.tag_proto());
        buf.put_u16((u16::from(path) << 12) | lsdu_size(padded + HSR_HLEN, header.is_vlan));
        buf.put_u16(frame.sequence_nr);
        buf.put_u16(header.ethertype);
        buf.put_slice(&frame.data[at..]);
        buf.resize(padded + HSR_HLEN, 0);

        Ok(Bytes::from(buf))
    }

    fn get_untagged_frame(&self, frame: &FrameInfo) -> Result<Bytes> {
        if frame.tagging != Tagging::HsrTag {
            return Ok(frame.data.clone());
        }

        let header = header_of(&frame.data)?;
        let at = header.payload_offset;
        let tag = frame
            .data
            .get(at..at + HSR_HLEN)
            .ok_or(HsrError::InvalidFrame("truncated HSR tag"))?;

        let mut buf = alloc_frame(frame.data.len() - HSR_HLEN)?;
        buf.put_slice(&frame.data[..header.ethertype_offset()]);
        buf.put_slice(&tag[4..6]);
        buf.put_slice(&frame.data[at + HSR_HLEN..]);

        Ok(Bytes::from(buf))
    }

    fn drop_frame(&self, frame: &FrameInfo, port: &HsrPort) -> bool {
        // Ring forwarding in hardware leaves only the LAN rules to software
        port.features().contains(Features::HW_HSR_FWD) && prp_drop(frame, port)
    }

    fn fill_frame_info(&self, data: Bytes, port_rcv: PortType) -> Result<FrameInfo> {
        let header = header_of(&data)?;

        if header.ethertype == ETH_P_HSR || header.ethertype == ETH_P_PRP {
            let at = header.payload_offset;
            let seq = data
                .get(at + 2..at + 4)
                .map(|b| u16::from_be_bytes([b[0], b[1]]))
                .ok_or(HsrError::InvalidFrame("truncated HSR tag"))?;
            return Ok(frame_info(data, port_rcv, &header, Tagging::HsrTag, seq, false));
        }

        if port_rcv.is_slave() {
            return Err(HsrError::InvalidFrame("untagged frame on HSR ring port"));
        }

        Ok(frame_info(data, port_rcv, &header, Tagging::Standard, 0, false))
    }

    fn invalid_dan_ingress_frame(&self, ethertype: u16) -> bool {
        ethertype != ETH_P_PRP && ethertype != ETH_P_HSR
    }
}

/// Parallel Redundancy Protocol.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrpOps;

impl PrpOps {
    /// Offset of a valid redundancy control trailer, if `data` carries one.
    fn trailer_offset(data: &[u8], is_vlan: bool) -> Option<usize> {
        if data.len() < ETH_ZLEN {
            return None;
        }

        let at = data.len() - HSR_HLEN;
        let rct = &data[at..];
        let suffix = u16::from_be_bytes([rct[4], rct[5]]);
        let lsdu = u16::from_be_bytes([rct[2], rct[3]]) & 0x0FFF;

        (suffix == ETH_P_PRP && lsdu == lsdu_size(data.len(), is_vlan)).then_some(at)
    }
}

impl ProtocolOps for PrpOps {
    fn send_supervision_frame(&self, ctx: &mut SupervisionContext<'_>) -> SupervisionResult {
        let frame = SupervisionFrame {
            dst: ctx.dst,
            src: ctx.src,
            vlan: ctx.vlan,
            hsr_tag: None,
            path: 0,
            version: 1,
            sequence_nr: 0,
            tlv: SupervisionTlv::PrpLifeCheck,
            tlv_length: 6,
            mac_a: ctx.src,
        };

        SupervisionResult {
            interval: ctx.timing.life_check_interval,
            sent: ctx.emit(frame, SequenceSource::Supervision),
        }
    }

    fn create_tagged_frame(&self, frame: &FrameInfo, port: &HsrPort) -> Result<Bytes> {
        let lan_id = (PRP_LAN_ID << 1) | lane(port.port_type())?;

        if frame.tagging == Tagging::PrpTrailer {
            let mut data = frame.data.to_vec();
            let at = data
                .len()
                .checked_sub(HSR_HLEN - 2)
                .ok_or(HsrError::InvalidFrame("truncated PRP trailer"))?;
            data[at] = (data[at] & 0x0F) | (lan_id << 4);
            return Ok(Bytes::from(data));
        }

        if port.features().contains(Features::HW_HSR_TAG_INS) {
            return Ok(frame.data.clone());
        }

        let header = header_of(&frame.data)?;
        let padded = frame.data.len().max(min_frame_len(header.is_vlan));
        let mut buf = alloc_frame(padded + HSR_HLEN)?;

        buf.put_slice(&frame.data);
        buf.resize(padded, 0);
        buf.put_u16(frame.sequence_nr);
        buf.put_u16((u16::from(lan_id) << 12) | lsdu_size(padded + HSR_HLEN, header.is_vlan));
        buf.put_u16(ETH_P_PRP);

        Ok(Bytes::from(buf))
    }

    fn get_untagged_frame(&self, frame: &FrameInfo) -> Result<Bytes> {
        if frame.tagging != Tagging::PrpTrailer {
            return Ok(frame.data.clone());
        }

        let len = frame
            .data
            .len()
            .checked_sub(HSR_HLEN)
            .ok_or(HsrError::InvalidFrame("truncated PRP trailer"))?;
        Ok(frame.data.slice(..len))
    }

    fn drop_frame(&self, frame: &FrameInfo, port: &HsrPort) -> bool {
        prp_drop(frame, port)
    }

    fn fill_frame_info(&self, data: Bytes, port_rcv: PortType) -> Result<FrameInfo> {
        let header = header_of(&data)?;

        if let Some(at) = Self::trailer_offset(&data, header.is_vlan) {
            let seq = u16::from_be_bytes([data[at], data[at + 1]]);
            return Ok(frame_info(data, port_rcv, &header, Tagging::PrpTrailer, seq, false));
        }

        let from_san = port_rcv.is_slave();
        Ok(frame_info(data, port_rcv, &header, Tagging::Standard, 0, from_san))
    }

    fn handle_san_frame(&self, is_san: bool, port: PortType, node: &mut SanState) {
        if !is_san {
            return;
        }

        match port {
            PortType::SlaveA => node.san_a = true,
            PortType::SlaveB => node.san_b = true,
            PortType::Master => {}
        }
    }

    fn update_san_info(&self, node: &mut SanState, is_supervision: bool) {
        // A node sending supervision frames is doubly attached
        if is_supervision {
            node.san_a = false;
            node.san_b = false;
        }
    }
}

/// PRP forwarding rules: a frame never crosses between the two LANs, and a
/// frame for a singly attached node only goes out on that node's LAN.
fn prp_drop(frame: &FrameInfo, port: &HsrPort) -> bool {
    let out = port.port_type();
    if !out.is_slave() {
        return false;
    }

    if frame.port_rcv.is_slave() && frame.port_rcv != out {
        return true;
    }

    matches!(frame.dest_san_port, Some(san) if san != out)
}

/// True when `mac` is a supervision multicast address.
pub fn is_supervision_address(mac: &MacAddress) -> bool {
    mac.as_bytes()[..5] == SUPERVISION_MULTICAST_BASE.as_bytes()[..5]
}

fn lane(port: PortType) -> Result<u8> {
    match port {
        PortType::SlaveA => Ok(0),
        PortType::SlaveB => Ok(1),
        PortType::Master => Err(HsrError::InvalidFrame("redundancy information is only added towards slaves")),
    }
}

fn header_of(data: &[u8]) -> Result<EthernetHeader> {
    EthernetHeader::parse(data).ok_or(HsrError::InvalidFrame("truncated Ethernet header"))
}

fn min_frame_len(is_vlan: bool) -> usize {
    if is_vlan { ETH_ZLEN + VLAN_HLEN } else { ETH_ZLEN }
}

/// LSDU size of a frame of `len` octets, redundancy information included.
fn lsdu_size(len: usize, is_vlan: bool) -> u16 {
    let mut lsdu = len.saturating_sub(ETH_HLEN);
    if is_vlan {
        lsdu = lsdu.saturating_sub(VLAN_HLEN);
    }
    (lsdu as u16) & 0x0FFF
}

fn frame_info(
    data: Bytes,
    port_rcv: PortType,
    header: &EthernetHeader,
    tagging: Tagging,
    sequence_nr: u16,
    is_from_san: bool,
) -> FrameInfo {
    FrameInfo {
        port_rcv,
        ethertype: header.ethertype,
        is_vlan: header.is_vlan,
        tagging,
        sequence_nr,
        is_supervision: is_supervision_address(&header.dst),
        is_from_san,
        dest_san_port: None,
        priority: 0,
        data,
    }
}
