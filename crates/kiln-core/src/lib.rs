//! # Kiln Core
//!
//! Shared identifiers and small value types used across every Kiln crate:
//! the string-based handles that stand in for the unit graph ([`Id`]), the
//! [`Kind`] tag distinguishing task/resource/event/etc, and [`Tag`] handles
//! used to attach cross-cutting middleware and policy.
//!
//! Everything here is intentionally tiny: the runtime models cross-references
//! between units as stable string ids rather than pointers, which sidesteps
//! ownership cycles entirely (see the design notes in the workspace root
//! `DESIGN.md`).

pub mod id;
pub mod kind;
pub mod tag;

pub use id::Id;
pub use kind::Kind;
pub use tag::{tunnel_tag_id, Tag, TagAttachment, TUNNEL_TAG_ID};

/// Common prelude for Kiln crates.
pub mod prelude {
    pub use crate::{tunnel_tag_id, Id, Kind, Tag, TagAttachment, TUNNEL_TAG_ID};
}
