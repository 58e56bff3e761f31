//! HSR/PRP redundancy devices (IEC 62439-3)
//!
//! Control plane of a virtual link stacked over two physical ports. Every
//! frame sent on the virtual link goes out on both ports, and duplicates
//! received on both are discarded, so a single link failure loses nothing.
//!
//! # Features
//!
//! - HSRv0, HSRv1 and PRP-1, selected per device
//! - Supervision frames (announce and life check), optionally VLAN tagged
//! - Carrier and operational state derived from the slave links
//! - MTU and offload feature negotiation across slaves
//! - Delegation to hardware redundancy entities (LRE) when slaves offload
//! - All-or-nothing device creation
//!
//! The duplicate-discard forwarding engine, the node registry and the
//! host's link layer are supplied by the embedder through the traits in
//! [`external`] and [`netdev`].
//!
//! # Example
//!
//! ```no_run
//! use hsr::{DeviceConfig, HsrEnvironment, HsrRegistry, ProtocolVersion};
//! # use std::sync::Arc;
//!
//! # async fn example(
//! #     eth1: Arc<dyn hsr::NetDevice>,
//! #     eth2: Arc<dyn hsr::NetDevice>,
//! #     env: HsrEnvironment,
//! # ) -> hsr::Result<()> {
//! let registry = HsrRegistry::new();
//! let config = DeviceConfig::new("hsr0", ProtocolVersion::HsrV1);
//!
//! let id = registry.create_device(&config, eth1, eth2, env).await?;
//! registry.open(id).await?;
//! # Ok(())
//! # }
//! ```

pub mod carrier;
pub mod config;
pub mod device;
pub mod error;
pub mod external;
pub mod frame;
mod lifecycle;
pub mod master;
pub mod negotiation;
pub mod netdev;
pub mod port;
pub mod proto;
pub mod registry;
pub mod supervision;
pub mod types;

pub use config::{Config, ConfigError, DeviceConfig};
pub use device::{DeviceStatus, HsrDevice, Ingress, RedundancyMode};
pub use error::{FinalizeStep, HsrError, Result};
pub use external::{ForwardingEngine, HsrEnvironment, Introspection, NodeInfo, NodeRegistry, SanState, SelfNodeHandle};
pub use frame::{FrameInfo, SupervisionFrame, SupervisionTlv, Tagging};
pub use netdev::{LinkKind, LreAttr, LreAttrId, LreOps, LreStats, NetDevice, NodeTableEntry, TimestampInfo};
pub use registry::{DeviceId, HsrRegistry, PortEvent};
pub use supervision::{SequenceState, SupervisionPhase, SupervisionTiming};
pub use types::{Features, HsrStats, MacAddress, OperState, PortType, ProtocolVersion, SupervisionVlan};
