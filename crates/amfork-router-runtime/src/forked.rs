use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use amfork_core::{
    AlertConfiguration, AlertGroup, AlertQuery, Alertmanager, AlertmanagerError, CallContext,
    GettableAlert, GettableSilence, GettableStatus, PostableAlert, PostableSilence,
    PostableUserConfig, Receiver, Result, TestReceiversConfig, TestReceiversResult,
    TestTemplatesConfig, TestTemplatesResults,
};
use amfork_router_core::{MigrationMode, Operation, Route, RoutingPolicy, Target};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::events::RouterEvent;

const EVENT_BUFFER: usize = 64;

/// Alertmanager that fans calls out to a local and a remote backend.
///
/// Which backend sees a call, and whose answer is returned, is decided by the
/// [`RoutingPolicy`] resolved from the migration mode at construction time.
/// Calls to the two backends are always sequential.
pub struct ForkedAlertmanager {
    local: Box<dyn Alertmanager>,
    remote: Arc<dyn Alertmanager>,
    policy: RoutingPolicy,
    /// Flips to true on the first configuration push attempt, never back.
    config_sent: AtomicBool,
    events: broadcast::Sender<RouterEvent>,
}

impl ForkedAlertmanager {
    pub fn new(
        local: Box<dyn Alertmanager>,
        remote: Arc<dyn Alertmanager>,
        mode: MigrationMode,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        info!(mode = %mode, "Creating forked alertmanager");
        Self {
            local,
            remote,
            policy: RoutingPolicy::for_mode(mode),
            config_sent: AtomicBool::new(false),
            events,
        }
    }

    pub fn mode(&self) -> MigrationMode {
        self.policy.mode()
    }

    pub fn policy(&self) -> &RoutingPolicy {
        &self.policy
    }

    /// Whether the one-shot configuration push has been attempted
    pub fn config_sent(&self) -> bool {
        self.config_sent.load(Ordering::Acquire)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RouterEvent> {
        self.events.subscribe()
    }

    fn backend(&self, target: Target) -> &dyn Alertmanager {
        match target {
            Target::Local => self.local.as_ref(),
            Target::Remote => self.remote.as_ref(),
        }
    }

    fn publish(&self, event: RouterEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    /// Run `call` against the backends picked by the route for `op`.
    async fn dispatch<'a, T, F>(&'a self, op: Operation, ctx: &'a CallContext, call: F) -> Result<T>
    where
        F: Fn(&'a dyn Alertmanager) -> BoxFuture<'a, Result<T>>,
    {
        match self.policy.route(op) {
            Route::Only(target) => self.invoke(op, target, &call).await,
            Route::Sequence { first, then } => {
                self.invoke(op, first, &call).await?;
                let second = match ctx.check() {
                    Ok(()) => self.invoke(op, then, &call).await,
                    Err(err) => Err(err),
                };
                second.map_err(|err| self.diverged(op, first, then, err))
            }
            Route::SeedOnce { seed, then } => {
                self.seed_once(op, seed, &call).await;
                ctx.check()?;
                self.invoke(op, then, &call).await
            }
            Route::Broadcast { first, then } => {
                // no short-circuit, every backend gets the call
                let first_result = self.invoke(op, first, &call).await;
                let then_result = self.invoke(op, then, &call).await;
                first_result.and(then_result)
            }
        }
    }

    async fn invoke<'a, T, F>(&'a self, op: Operation, target: Target, call: &F) -> Result<T>
    where
        F: Fn(&'a dyn Alertmanager) -> BoxFuture<'a, Result<T>>,
    {
        debug!(operation = %op, backend = %target, "Routing call");
        let started = Instant::now();
        let result = call(self.backend(target)).await;
        amfork_metrics::observe_backend_call(
            target.as_str(),
            op.as_str(),
            result.is_ok(),
            started.elapsed().as_secs_f64(),
        );
        if let Err(err) = &result {
            debug!(operation = %op, backend = %target, error = %err, "Backend call failed");
        }
        result
    }

    async fn seed_once<'a, T, F>(&'a self, op: Operation, seed: Target, call: &F)
    where
        F: Fn(&'a dyn Alertmanager) -> BoxFuture<'a, Result<T>>,
    {
        if self.config_sent.swap(true, Ordering::AcqRel) {
            debug!(operation = %op, backend = %seed, "Configuration already sent, skipping");
            return;
        }
        match self.invoke(op, seed, call).await {
            Ok(_) => {
                info!(operation = %op, backend = %seed, "Sent configuration");
                self.publish(RouterEvent::RemoteConfigSeeded);
            }
            Err(err) => {
                warn!(
                    operation = %op,
                    backend = %seed,
                    error = %err,
                    "Failed to send configuration, it will not be retried"
                );
                amfork_metrics::record_seed_failure();
                self.publish(RouterEvent::RemoteConfigSeedFailed {
                    error: err.to_string(),
                });
            }
        }
    }

    fn diverged(
        &self,
        op: Operation,
        applied: Target,
        failed: Target,
        err: AlertmanagerError,
    ) -> AlertmanagerError {
        error!(
            operation = %op,
            applied = %applied,
            failed = %failed,
            error = %err,
            "Backends diverged"
        );
        amfork_metrics::record_divergence(op.as_str());
        self.publish(RouterEvent::Diverged {
            operation: op,
            error: err.to_string(),
        });
        AlertmanagerError::Diverged {
            operation: op.as_str(),
            source: Box::new(err),
        }
    }
}

#[async_trait]
impl Alertmanager for ForkedAlertmanager {
    async fn apply_config(&self, ctx: &CallContext, config: &AlertConfiguration) -> Result<()> {
        self.dispatch(Operation::ApplyConfig, ctx, |am| am.apply_config(ctx, config))
            .await
    }

    async fn save_and_apply_config(
        &self,
        ctx: &CallContext,
        config: &PostableUserConfig,
    ) -> Result<()> {
        self.dispatch(Operation::SaveAndApplyConfig, ctx, |am| {
            am.save_and_apply_config(ctx, config)
        })
        .await
    }

    async fn save_and_apply_default_config(&self, ctx: &CallContext) -> Result<()> {
        self.dispatch(Operation::SaveAndApplyDefaultConfig, ctx, |am| {
            am.save_and_apply_default_config(ctx)
        })
        .await
    }

    async fn get_status(&self, ctx: &CallContext) -> Result<GettableStatus> {
        self.dispatch(Operation::GetStatus, ctx, |am| am.get_status(ctx))
            .await
    }

    async fn create_silence(
        &self,
        ctx: &CallContext,
        silence: &PostableSilence,
    ) -> Result<String> {
        self.dispatch(Operation::CreateSilence, ctx, |am| {
            am.create_silence(ctx, silence)
        })
        .await
    }

    async fn delete_silence(&self, ctx: &CallContext, id: &str) -> Result<()> {
        self.dispatch(Operation::DeleteSilence, ctx, |am| am.delete_silence(ctx, id))
            .await
    }

    async fn get_silence(&self, ctx: &CallContext, id: &str) -> Result<GettableSilence> {
        self.dispatch(Operation::GetSilence, ctx, |am| am.get_silence(ctx, id))
            .await
    }

    async fn list_silences(
        &self,
        ctx: &CallContext,
        filter: &[String],
    ) -> Result<Vec<GettableSilence>> {
        self.dispatch(Operation::ListSilences, ctx, |am| am.list_silences(ctx, filter))
            .await
    }

    async fn get_alerts(
        &self,
        ctx: &CallContext,
        query: &AlertQuery,
    ) -> Result<Vec<GettableAlert>> {
        self.dispatch(Operation::GetAlerts, ctx, |am| am.get_alerts(ctx, query))
            .await
    }

    async fn get_alert_groups(
        &self,
        ctx: &CallContext,
        query: &AlertQuery,
    ) -> Result<Vec<AlertGroup>> {
        self.dispatch(Operation::GetAlertGroups, ctx, |am| {
            am.get_alert_groups(ctx, query)
        })
        .await
    }

    async fn put_alerts(&self, ctx: &CallContext, alerts: &[PostableAlert]) -> Result<()> {
        self.dispatch(Operation::PutAlerts, ctx, |am| am.put_alerts(ctx, alerts))
            .await
    }

    async fn get_receivers(&self, ctx: &CallContext) -> Result<Vec<Receiver>> {
        self.dispatch(Operation::GetReceivers, ctx, |am| am.get_receivers(ctx))
            .await
    }

    async fn test_receivers(
        &self,
        ctx: &CallContext,
        config: &TestReceiversConfig,
    ) -> Result<TestReceiversResult> {
        self.dispatch(Operation::TestReceivers, ctx, |am| {
            am.test_receivers(ctx, config)
        })
        .await
    }

    async fn test_template(
        &self,
        ctx: &CallContext,
        config: &TestTemplatesConfig,
    ) -> Result<TestTemplatesResults> {
        self.dispatch(Operation::TestTemplate, ctx, |am| am.test_template(ctx, config))
            .await
    }

    fn clean_up(&self) {
        for target in self.policy.route(Operation::CleanUp).targets() {
            debug!(backend = %target, "Cleaning up");
            self.backend(target).clean_up();
        }
    }

    async fn stop_and_wait(&self) {
        // local shutdown hooks finish before the remote senders stop
        let ctx = CallContext::background();
        let stopped: Result<()> = self
            .dispatch(Operation::StopAndWait, &ctx, |am| {
                async move {
                    am.stop_and_wait().await;
                    Ok(())
                }
                .boxed()
            })
            .await;
        if let Err(err) = stopped {
            warn!(error = %err, "Alertmanager did not stop cleanly");
        }
        info!("Forked alertmanager stopped");
    }

    async fn ready(&self) -> bool {
        for target in self.policy.route(Operation::Ready).targets() {
            if !self.backend(target).ready().await {
                debug!(backend = %target, "Alertmanager not ready");
                return false;
            }
        }
        true
    }
}
