pub mod mode;
pub mod policy;

pub use mode::{MigrationMode, UnknownMode};
pub use policy::{Operation, Route, RoutingPolicy, Target};
