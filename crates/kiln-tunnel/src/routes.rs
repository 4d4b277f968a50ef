//! The allow-list contract a tunnel resource's initialized value publishes
//!. Shared between `kiln-exposure` (which discovers
//! every server-mode tunnel to build its allow-list) and whatever resource
//! implementation a tunnel client/server eventually registers — kept here
//! rather than in `kiln-exposure` so a tunnel resource implementation never
//! needs to depend on the HTTP server crate just to describe itself.

use kiln_core::Id;

/// Which side of a tunnel a resource's runner plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelMode {
    /// This tunnel dispatches phantom tasks/events to a remote peer.
    Client,
    /// This tunnel is a routing target the exposure server's allow-list
    /// should admit requests for.
    Server,
}

/// Implemented by the value a tunnel resource's `init` stores (alongside
/// [`kiln_task::TunnelRouter`] when it also routes phantom tasks), so the
/// exposure server can discover it by tag and ask what it covers.
pub trait TunnelRoutes: Send + Sync {
    /// Which side of the tunnel this resource plays.
    fn mode(&self) -> TunnelMode;
    /// Task ids this tunnel covers.
    fn tasks(&self) -> Vec<Id>;
    /// Event ids this tunnel covers.
    fn events(&self) -> Vec<Id>;
}
