// HTTP backend for a hosted Alertmanager
pub mod client;

pub use client::{RemoteAlertmanager, RemoteSettings};
