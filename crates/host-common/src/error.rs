/// Error taxonomy shared across every crate. This survives wrapping: each
/// layer adds context with `#[error(transparent)]`/`#[from]` but the leaf's
/// kind is what negotiation handlers and the scheduler act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostErrorKind {
    /// Protocol violation by the peer; reported over the wire, connection closed.
    Communication,
    /// Socket I/O failure; connection closed silently.
    Connection,
    /// Conflict with the confirmed chain (double-spend). Terminal for the obligation.
    Consensus,
    /// Host-side programming or disk-invariant violation; logged as critical.
    Internal,
}

impl HostErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HostErrorKind::Communication => "communication",
            HostErrorKind::Connection => "connection",
            HostErrorKind::Consensus => "consensus",
            HostErrorKind::Internal => "internal",
        }
    }
}

/// Implemented by every leaf error type so that a wrapping `thiserror` enum
/// can forward `.kind()` without losing the original classification.
pub trait Kinded {
    fn kind(&self) -> HostErrorKind;
}
