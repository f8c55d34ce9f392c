use amfork_router_core::Operation;

/// Things operators should know about that are not returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterEvent {
    /// The one-shot configuration push to the remote Alertmanager succeeded
    RemoteConfigSeeded,
    /// The one-shot configuration push failed; it will not be retried by this router
    RemoteConfigSeedFailed { error: String },
    /// One backend accepted a write the other did not
    Diverged { operation: Operation, error: String },
}
