//! Metrics for the sync core.

/// Container for metrics.
#[derive(Debug, Clone)]
pub struct Metrics;

impl Metrics {
    /// Identifier for the gauge that tracks block labels.
    pub const BLOCK_LABELS: &str = "kona_node_block_labels";
    /// Unsafe block label.
    pub const UNSAFE_BLOCK_LABEL: &str = "unsafe";
    /// Cross-unsafe block label.
    pub const CROSS_UNSAFE_BLOCK_LABEL: &str = "cross-unsafe";
    /// Pending-safe block label.
    pub const PENDING_SAFE_BLOCK_LABEL: &str = "pending-safe";
    /// Local-safe block label.
    pub const LOCAL_SAFE_BLOCK_LABEL: &str = "local-safe";
    /// Safe block label.
    pub const SAFE_BLOCK_LABEL: &str = "safe";
    /// Finalized block label.
    pub const FINALIZED_BLOCK_LABEL: &str = "finalized";
    /// Backup unsafe block label.
    pub const BACKUP_UNSAFE_BLOCK_LABEL: &str = "backup-unsafe";

    /// Identifier for the counter of events handled by the event system, keyed by event kind.
    pub const SYNC_EVENTS: &str = "kona_node_sync_events";

    /// Identifier for the counter of error signals, keyed by error kind.
    pub const SYNC_ERRORS: &str = "kona_node_sync_error";

    /// Identifier for the histogram of engine method call durations.
    pub const ENGINE_METHOD_REQUEST_DURATION: &str = "kona_node_engine_method_request_duration";
    /// `engine_forkchoiceUpdatedV<N>` label.
    pub const FORKCHOICE_UPDATE_METHOD: &str = "engine_forkchoiceUpdated";
    /// `engine_newPayloadV<N>` label.
    pub const NEW_PAYLOAD_METHOD: &str = "engine_newPayload";
    /// `engine_getPayloadV<N>` label.
    pub const GET_PAYLOAD_METHOD: &str = "engine_getPayload";

    /// Initializes metrics for the sync core.
    ///
    /// This does two things:
    /// * Describes various metrics.
    /// * Initializes metrics to 0 so they can be queried immediately.
    #[cfg(feature = "metrics")]
    pub fn init() {
        Self::describe();
        Self::zero();
    }

    /// Describes metrics used in [`kona_node_sync`][crate].
    #[cfg(feature = "metrics")]
    pub fn describe() {
        metrics::describe_gauge!(Self::BLOCK_LABELS, "Blockchain head labels");
        metrics::describe_counter!(Self::SYNC_EVENTS, "Events handled by the sync event system");
        metrics::describe_counter!(Self::SYNC_ERRORS, "Error signals raised, by kind");
        metrics::describe_histogram!(
            Self::ENGINE_METHOD_REQUEST_DURATION,
            metrics::Unit::Seconds,
            "Engine API method request duration"
        );
    }

    /// Initializes metrics to `0` so they can be queried immediately by consumers of prometheus
    /// metrics.
    #[cfg(feature = "metrics")]
    pub fn zero() {
        for label in [
            Self::UNSAFE_BLOCK_LABEL,
            Self::CROSS_UNSAFE_BLOCK_LABEL,
            Self::PENDING_SAFE_BLOCK_LABEL,
            Self::LOCAL_SAFE_BLOCK_LABEL,
            Self::SAFE_BLOCK_LABEL,
            Self::FINALIZED_BLOCK_LABEL,
            Self::BACKUP_UNSAFE_BLOCK_LABEL,
        ] {
            set!(gauge, Self::BLOCK_LABELS, "label", label, 0.0);
        }
    }
}
