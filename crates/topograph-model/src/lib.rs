//! # Topograph data model
//!
//! Pure types and conversions shared by every other crate: the inventory
//! record shapes (TMO/TPRM/MO/PRM), the graph documents persisted to the
//! store (schema and instance layers), the parameter value codec, and the
//! collection/graph naming scheme.
//!
//! Nothing here performs I/O. Parsed-value resolution works over lookup maps
//! the caller prefetches, so the whole module is testable in memory.
//!
//! Serialized field names are load-bearing: the store meta fields keep their
//! `_id`/`_key`/`_rev`/`_from`/`_to` aliases, and the `"two-way link"`
//! connection string is preserved byte-for-byte because stored documents and
//! queries both contain it.

pub mod codec;
pub mod config_doc;
pub mod doc;
pub mod enums;
pub mod names;
pub mod record;
pub mod value;

pub use codec::CodecError;
pub use doc::{
    Doc, MainRecord, MoDto, MoEdge, MoNode, ParsedValue, ParsedValueTriggers, PathKey, PrmDto,
    TmoEdge, TmoNode,
};
pub use enums::{ChangeOp, ConnectionKind, EntityClass, LinkKind, SquashLevel, Status};
pub use names::GraphNames;
pub use record::{Mo, Prm, Tprm};
pub use value::PrmValue;
