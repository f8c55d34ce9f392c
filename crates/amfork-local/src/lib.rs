// Label matcher parsing
pub mod matchers;

// Configuration views (receivers, route tree, default config)
pub mod routing;

// In-process backend
pub mod store;

pub use matchers::{LabelMatcher, MatchType};
pub use routing::DEFAULT_CONFIG;
pub use store::{fingerprint, MemoryAlertmanager};
