use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use amfork_core::{AlertConfiguration, Alertmanager, AlertmanagerError, CallContext};
use amfork_local::DEFAULT_CONFIG;
use anyhow::Context;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub org_id: i64,
    pub interval: Duration,
    /// Grafana-style user configuration; the built-in default is used when unset or missing
    pub config_path: Option<PathBuf>,
}

/// Where the applied configuration came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    File,
    Default,
}

/// Configuration writer state carried across sync rounds
#[derive(Debug)]
pub struct ConfigSync {
    settings: SyncSettings,
    /// The built-in default has been saved through `save_and_apply_default_config`
    default_saved: bool,
}

impl ConfigSync {
    pub fn new(settings: SyncSettings) -> Self {
        Self {
            settings,
            default_saved: false,
        }
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Apply the current configuration once.
    ///
    /// Without a user file the default is saved on the first successful round
    /// and then applied like any other configuration, so a router that only
    /// mirrors `apply_config` still forwards it.
    pub async fn sync_once(
        &mut self,
        am: &dyn Alertmanager,
        ctx: &CallContext,
    ) -> anyhow::Result<ConfigSource> {
        let raw = match &self.settings.config_path {
            Some(path) => match tokio::fs::read_to_string(path).await {
                Ok(raw) => Some(raw),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!(path = %path.display(), "Configuration file not found, using default");
                    None
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("reading {}", path.display()));
                }
            },
            None => None,
        };

        match raw {
            Some(raw) => {
                let config = AlertConfiguration::new(self.settings.org_id, raw, false);
                am.apply_config(ctx, &config).await?;
                Ok(ConfigSource::File)
            }
            None => {
                if !self.default_saved {
                    am.save_and_apply_default_config(ctx).await?;
                    self.default_saved = true;
                }
                let config = AlertConfiguration::new(self.settings.org_id, DEFAULT_CONFIG, true);
                am.apply_config(ctx, &config).await?;
                Ok(ConfigSource::Default)
            }
        }
    }
}

/// Sync driver: the router's only writer of configuration.
///
/// Syncs immediately, then every `settings.interval` until `shutdown` fires.
/// Expired local state is purged after each round.
pub async fn run(am: Arc<dyn Alertmanager>, settings: SyncSettings, shutdown: CancellationToken) {
    let mut ticker = time::interval(settings.interval);
    let mut sync = ConfigSync::new(settings);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let ctx = CallContext::from_token(shutdown.child_token())
            .with_timeout(sync.settings().interval);
        let result = sync.sync_once(am.as_ref(), &ctx).await;
        amfork_metrics::record_config_sync(result.is_ok());
        match result {
            Ok(source) => debug!(source = ?source, "Configuration synced"),
            Err(e) if shutdown.is_cancelled() => {
                debug!(error = %e, "Configuration sync interrupted by shutdown");
                break;
            }
            Err(e) => {
                let retryable = e
                    .downcast_ref::<AlertmanagerError>()
                    .map(AlertmanagerError::is_retryable)
                    .unwrap_or(false);
                warn!(error = %e, retryable, "Configuration sync failed");
            }
        }
        am.clean_up();
    }
    info!("Configuration sync stopped");
}
