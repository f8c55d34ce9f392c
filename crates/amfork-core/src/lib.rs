// Error types module
pub mod error;

// Cancellation / deadline propagation
pub mod context;

// Alertmanager API payloads
pub mod models;

// Backend contract
pub mod alertmanager;

// Re-export commonly used types
pub use alertmanager::Alertmanager;
pub use context::CallContext;
pub use error::{AlertmanagerError, ErrorSeverity, Result};
pub use models::{
    config_hash, AlertConfiguration, AlertGroup, AlertQuery, AlertState, AlertStatus,
    ClusterStatus, GettableAlert, GettableSilence, GettableStatus, Integration, LabelSet, Matcher,
    PeerStatus, PostableAlert, PostableSilence, PostableUserConfig, Receiver, ReceiverConfig,
    ReceiverRef, SilenceState, SilenceStatus, TestAlert, TestIntegrationResult,
    TestReceiverResult, TestReceiversConfig, TestReceiversResult, TestStatus, TestTemplateError,
    TestTemplateResult, TestTemplatesConfig, TestTemplatesResults, UserAlertmanagerConfig,
};
