//! # Kiln Graph
//!
//! Whole-store validation run once registration (`Store::build` +
//! `Store::finalize`) completes: dependency-cycle detection, event-emission-
//! cycle detection, and export-visibility / access-policy checking.

pub mod cycles;
pub mod visibility;

use kiln_error::KilnError;
use kiln_store::Store;

/// Runs every static graph check against `store`, in the order a failure is
/// cheapest to diagnose: structural cycles first (they make visibility
/// checking meaningless), then event-emission cycles, then visibility.
///
/// # Errors
/// Returns the first [`KilnError`] any check raises.
pub fn validate_all(store: &Store) -> Result<(), KilnError> {
    cycles::validate_dependency_graph(store)?;
    cycles::detect_event_emission_cycles(store)?;
    visibility::validate_all(store)?;
    Ok(())
}

/// Common prelude.
pub mod prelude {
    pub use crate::cycles::{detect_event_emission_cycles, validate_dependency_graph};
    pub use crate::visibility::{get_access_violation, validate_all as validate_visibility};
    pub use crate::validate_all;
}
