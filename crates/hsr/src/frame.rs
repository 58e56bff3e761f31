//! Frame layouts used by the redundancy device.
//!
//! Supervision frame (IEC 62439-3 5.x / 4.x):
//!
//! ```text
//! +-----------+-----------+-------+ - - - - - - - + - - - - - - - - - +
//! | DA (6)    | SA (6)    | Type  | VLAN TCI/type | HSR tag (v1 only) |
//! +-----------+-----------+-------+ - - - - - - - + - - - - - - - - - +
//! | Path|Ver (2) | SeqNr (2) | TLV type | TLV len | MacAddressA (6) | pad
//! +--------------+-----------+----------+---------+-----------------+
//! ```
//!
//! HSR tag (after the source address):
//!
//! ```text
//! | Path(4)|LSDU size(12) | SeqNr (2) | Encapsulated type (2) |
//! ```
//!
//! PRP redundancy control trailer (at the end of the frame):
//!
//! ```text
//! | SeqNr (2) | LanId(4)|LSDU size(12) | Suffix 0x88FB (2) |
//! ```

use crate::error::{HsrError, Result};
use crate::types::{
    ETH_ALEN, ETH_HLEN, ETH_P_8021Q, ETH_P_HSR, ETH_P_PRP, ETH_ZLEN, HSR_HLEN, HSR_TLV_ANNOUNCE,
    HSR_TLV_LIFE_CHECK, MacAddress, PRP_TLV_LIFE_CHECK_DD, PortType, SupervisionVlan, VLAN_HLEN,
};
use bytes::{BufMut, Bytes};

/// Size of the supervision sub-header.
pub const SUP_TAG_LEN: usize = 6;

/// Size of the supervision payload (MacAddressA).
pub const SUP_PAYLOAD_LEN: usize = ETH_ALEN;

/// Supervision TLV carried in a supervision frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisionTlv {
    /// HSR announce (HSRv0 announce phase).
    Announce,
    /// HSR life check.
    LifeCheck,
    /// PRP life check, duplicate discard mode.
    PrpLifeCheck,
}

impl SupervisionTlv {
    pub fn code(self) -> u8 {
        match self {
            SupervisionTlv::Announce => HSR_TLV_ANNOUNCE,
            SupervisionTlv::LifeCheck => HSR_TLV_LIFE_CHECK,
            SupervisionTlv::PrpLifeCheck => PRP_TLV_LIFE_CHECK_DD,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            HSR_TLV_ANNOUNCE => Some(SupervisionTlv::Announce),
            HSR_TLV_LIFE_CHECK => Some(SupervisionTlv::LifeCheck),
            PRP_TLV_LIFE_CHECK_DD => Some(SupervisionTlv::PrpLifeCheck),
            _ => None,
        }
    }
}

/// HSR tag fields of an HSRv1 supervision frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HsrTag {
    pub path: u8,
    pub lsdu_size: u16,
    pub sequence_nr: u16,
    pub encap_proto: u16,
}

/// A supervision frame, built per send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisionFrame {
    pub dst: MacAddress,
    pub src: MacAddress,
    pub vlan: Option<SupervisionVlan>,
    pub hsr_tag: Option<HsrTag>,
    /// Path identifier (4 bits)
    pub path: u8,
    /// Protocol version (12 bits)
    pub version: u16,
    pub sequence_nr: u16,
    pub tlv: SupervisionTlv,
    pub tlv_length: u8,
    /// MacAddressA of the sending node
    pub mac_a: MacAddress,
}

impl SupervisionFrame {
    /// Length before padding.
    pub fn unpadded_len(&self) -> usize {
        let mut len = ETH_HLEN + SUP_TAG_LEN + SUP_PAYLOAD_LEN;
        if self.vlan.is_some() {
            len += VLAN_HLEN;
        }
        if self.hsr_tag.is_some() {
            len += HSR_HLEN;
        }
        len
    }

    /// Minimum length on the wire; the VLAN header does not count towards
    /// the Ethernet minimum.
    pub fn min_len(&self) -> usize {
        if self.vlan.is_some() {
            ETH_ZLEN + VLAN_HLEN
        } else {
            ETH_ZLEN
        }
    }

    /// Serialize, padding with zeros to the minimum frame size.
    pub fn encode(&self) -> Result<Bytes> {
        let mut buf = alloc_frame(self.unpadded_len().max(self.min_len()))?;
        self.encode_into(&mut buf);
        Ok(Bytes::from(buf))
    }

    /// Serialize into a buffer obtained from [`alloc_frame`].
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        let start = buf.len();

        buf.put_slice(self.dst.as_bytes());
        buf.put_slice(self.src.as_bytes());

        let inner_proto = if self.hsr_tag.is_some() { ETH_P_HSR } else { ETH_P_PRP };
        match self.vlan {
            Some(vlan) => {
                buf.put_u16(ETH_P_8021Q);
                buf.put_u16(vlan.tci());
                buf.put_u16(inner_proto);
            }
            None => buf.put_u16(inner_proto),
        }

        if let Some(tag) = self.hsr_tag {
            buf.put_u16((u16::from(tag.path & 0x0F) << 12) | (tag.lsdu_size & 0x0FFF));
            buf.put_u16(tag.sequence_nr);
            buf.put_u16(tag.encap_proto);
        }

        buf.put_u16((u16::from(self.path & 0x0F) << 12) | (self.version & 0x0FFF));
        buf.put_u16(self.sequence_nr);
        buf.put_u8(self.tlv.code());
        buf.put_u8(self.tlv_length);
        buf.put_slice(self.mac_a.as_bytes());

        buf.resize(start + self.unpadded_len().max(self.min_len()), 0);
    }

    /// Parse a supervision frame from raw bytes.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);

        let dst = cursor.mac()?;
        let src = cursor.mac()?;
        let mut proto = cursor.u16()?;

        let vlan = if proto == ETH_P_8021Q {
            let tci = cursor.u16()?;
            proto = cursor.u16()?;
            Some(SupervisionVlan {
                vid: tci & 0x0FFF,
                pcp: (tci >> 13) as u8,
                dei: tci & 0x1000 != 0,
            })
        } else {
            None
        };

        let hsr_tag = match proto {
            ETH_P_HSR => {
                let path_lsdu = cursor.u16()?;
                let sequence_nr = cursor.u16()?;
                let encap_proto = cursor.u16()?;
                if encap_proto != ETH_P_PRP {
                    return Err(HsrError::InvalidFrame("unexpected encapsulated protocol"));
                }
                Some(HsrTag {
                    path: (path_lsdu >> 12) as u8,
                    lsdu_size: path_lsdu & 0x0FFF,
                    sequence_nr,
                    encap_proto,
                })
            }
            ETH_P_PRP => None,
            _ => return Err(HsrError::InvalidFrame("not a supervision frame")),
        };

        let path_ver = cursor.u16()?;
        let sequence_nr = cursor.u16()?;
        let tlv = SupervisionTlv::from_code(cursor.u8()?)
            .ok_or(HsrError::InvalidFrame("unknown supervision TLV"))?;
        let tlv_length = cursor.u8()?;
        let mac_a = cursor.mac()?;

        Ok(Self {
            dst,
            src,
            vlan,
            hsr_tag,
            path: (path_ver >> 12) as u8,
            version: path_ver & 0x0FFF,
            sequence_nr,
            tlv,
            tlv_length,
            mac_a,
        })
    }
}

/// How redundancy information is carried by a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tagging {
    /// No redundancy information.
    Standard,
    /// HSR tag after the source address.
    HsrTag,
    /// PRP redundancy control trailer.
    PrpTrailer,
}

/// Metadata extracted from a frame before forwarding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameInfo {
    pub data: Bytes,
    pub port_rcv: PortType,
    /// Ethertype after any VLAN header.
    pub ethertype: u16,
    pub is_vlan: bool,
    pub tagging: Tagging,
    pub sequence_nr: u16,
    pub is_supervision: bool,
    /// Untagged frame received on a slave of a PRP device.
    pub is_from_san: bool,
    /// Set by the forwarding engine when the destination is a singly
    /// attached node reachable only through this slave.
    pub dest_san_port: Option<PortType>,
    pub priority: u8,
}

impl FrameInfo {
    /// Metadata for a supervision frame produced by this device.
    pub fn supervision(data: Bytes, sequence_nr: u16, tagging: Tagging, priority: u8) -> Self {
        let header = EthernetHeader::parse(&data);
        Self {
            port_rcv: PortType::Master,
            ethertype: header.map(|h| h.ethertype).unwrap_or(ETH_P_PRP),
            is_vlan: header.map(|h| h.is_vlan).unwrap_or(false),
            tagging,
            sequence_nr,
            is_supervision: true,
            is_from_san: false,
            dest_san_port: None,
            priority,
            data,
        }
    }
}

/// Ethernet header summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthernetHeader {
    pub dst: MacAddress,
    pub src: MacAddress,
    /// Ethertype after any VLAN header.
    pub ethertype: u16,
    pub is_vlan: bool,
    /// Offset of the first octet after the (VLAN) ethertype.
    pub payload_offset: usize,
}

impl EthernetHeader {
    pub fn parse(data: &[u8]) -> Option<Self> {
        let mut cursor = Cursor::new(data);
        let dst = cursor.mac().ok()?;
        let src = cursor.mac().ok()?;
        let mut ethertype = cursor.u16().ok()?;
        let is_vlan = ethertype == ETH_P_8021Q;
        if is_vlan {
            cursor.u16().ok()?;
            ethertype = cursor.u16().ok()?;
        }
        Some(Self {
            dst,
            src,
            ethertype,
            is_vlan,
            payload_offset: cursor.pos,
        })
    }

    /// Offset of the ethertype field that precedes the payload.
    pub fn ethertype_offset(&self) -> usize {
        self.payload_offset - 2
    }
}

/// Allocate an outgoing frame buffer, reporting allocation failure instead
/// of aborting.
pub fn alloc_frame(len: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|e| HsrError::Resource(format!("frame buffer of {len} octets: {e}")))?;
    Ok(buf)
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos + n;
        let slice = self
            .data
            .get(self.pos..end)
            .ok_or(HsrError::InvalidFrame("truncated frame"))?;
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn mac(&mut self) -> Result<MacAddress> {
        MacAddress::from_slice(self.take(ETH_ALEN)?).ok_or(HsrError::InvalidFrame("truncated frame"))
    }
}
