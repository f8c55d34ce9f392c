pub mod events;
pub mod forked;

pub use events::RouterEvent;
pub use forked::ForkedAlertmanager;
