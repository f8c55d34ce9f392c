use async_trait::async_trait;

use crate::context::CallContext;
use crate::error::Result;
use crate::models::{
    AlertConfiguration, AlertGroup, AlertQuery, GettableAlert, GettableSilence, GettableStatus,
    PostableAlert, PostableSilence, PostableUserConfig, Receiver, TestReceiversConfig,
    TestReceiversResult, TestTemplatesConfig, TestTemplatesResults,
};

/// Capability surface shared by every Alertmanager implementation.
///
/// The in-process store, an HTTP client for a hosted instance and the forked
/// router all implement it, so they are interchangeable wherever a backend is
/// expected. Errors are backend-specific and are not normalized here.
#[async_trait]
pub trait Alertmanager: Send + Sync {
    // Configuration

    /// Apply a full stored configuration. Applying the same configuration twice is a no-op.
    async fn apply_config(&self, ctx: &CallContext, config: &AlertConfiguration) -> Result<()>;

    /// Validate, persist and activate a user-supplied configuration
    async fn save_and_apply_config(
        &self,
        ctx: &CallContext,
        config: &PostableUserConfig,
    ) -> Result<()>;

    /// Reset to the backend's built-in default configuration
    async fn save_and_apply_default_config(&self, ctx: &CallContext) -> Result<()>;

    async fn get_status(&self, ctx: &CallContext) -> Result<GettableStatus>;

    // Silences

    /// Create (or update, when `silence.id` is set) a silence and return its id
    async fn create_silence(&self, ctx: &CallContext, silence: &PostableSilence)
        -> Result<String>;

    async fn delete_silence(&self, ctx: &CallContext, id: &str) -> Result<()>;

    async fn get_silence(&self, ctx: &CallContext, id: &str) -> Result<GettableSilence>;

    async fn list_silences(
        &self,
        ctx: &CallContext,
        filter: &[String],
    ) -> Result<Vec<GettableSilence>>;

    // Alerts

    async fn get_alerts(&self, ctx: &CallContext, query: &AlertQuery)
        -> Result<Vec<GettableAlert>>;

    async fn get_alert_groups(
        &self,
        ctx: &CallContext,
        query: &AlertQuery,
    ) -> Result<Vec<AlertGroup>>;

    async fn put_alerts(&self, ctx: &CallContext, alerts: &[PostableAlert]) -> Result<()>;

    // Receivers

    async fn get_receivers(&self, ctx: &CallContext) -> Result<Vec<Receiver>>;

    async fn test_receivers(
        &self,
        ctx: &CallContext,
        config: &TestReceiversConfig,
    ) -> Result<TestReceiversResult>;

    async fn test_template(
        &self,
        ctx: &CallContext,
        config: &TestTemplatesConfig,
    ) -> Result<TestTemplatesResults>;

    // State

    /// Release local resources (expired state, working files)
    fn clean_up(&self);

    /// Stop the backend and block until it has quiesced
    async fn stop_and_wait(&self);

    async fn ready(&self) -> bool;
}
