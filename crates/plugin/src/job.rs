//! Periodic background work shared by every node running the plugin.
//!
//! Each run is guarded by a host KV mutex, so when several nodes share a host only one of
//! them posts for a given interval.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use wabridge_core::ids::new_id;
use wabridge_core::plugin_config::ConfigurationStore;

use crate::host::{HostApi, HostError, Post};

pub const BACKGROUND_JOB_NAME: &str = "BackgroundJob";
pub const BACKGROUND_JOB_INTERVAL: Duration = Duration::from_secs(15 * 60);
pub const BACKGROUND_JOB_MESSAGE: &str = "Background job executed";
const JOB_LOCK_PREFIX: &str = "cron_";

/// Time left until the next wall-clock multiple of `interval`.
pub fn wait_for_rounded_interval(now: DateTime<Utc>, interval: Duration) -> Duration {
    let interval_ms = interval.as_millis().max(1) as i64;
    let elapsed = now.timestamp_millis().rem_euclid(interval_ms);
    Duration::from_millis((interval_ms - elapsed) as u64)
}

#[derive(Clone)]
pub struct BackgroundJob {
    host: Arc<dyn HostApi>,
    configuration: Arc<ConfigurationStore>,
}

impl BackgroundJob {
    pub fn new(host: Arc<dyn HostApi>, configuration: Arc<ConfigurationStore>) -> Self {
        Self { host, configuration }
    }

    /// Posts the job notice into every demo channel and returns how many posts landed.
    pub async fn run_once(&self) -> usize {
        let configuration = self.configuration.get();
        if configuration.disabled {
            return 0;
        }

        let mut posted = 0;
        for channel_id in configuration.demo_channel_ids.values() {
            let post = Post::new(
                configuration.bot_user_id.clone(),
                channel_id.clone(),
                BACKGROUND_JOB_MESSAGE,
            );
            match self.host.create_post(post).await {
                Ok(_) => posted += 1,
                Err(post_error) => error!(
                    event_name = "plugin.job.post_failed",
                    channel_id = %channel_id,
                    error = %post_error,
                    "failed to post background job message"
                ),
            }
        }
        posted
    }

    /// Runs once if this caller wins the cluster mutex. Returns `None` when another holder
    /// owns the interval.
    pub async fn run_guarded(&self) -> Result<Option<usize>, HostError> {
        let key = format!("{JOB_LOCK_PREFIX}{BACKGROUND_JOB_NAME}");
        let holder = new_id();

        if !self.host.kv_compare_and_set(&key, None, holder.as_bytes()).await? {
            debug!(event_name = "plugin.job.skipped", key = %key, "background job lock is held");
            return Ok(None);
        }

        let posted = self.run_once().await;

        if !self.host.kv_compare_and_delete(&key, holder.as_bytes()).await? {
            warn!(
                event_name = "plugin.job.unlock_lost",
                key = %key,
                "background job lock changed hands"
            );
        }
        Ok(Some(posted))
    }

    /// Runs the job at every rounded `interval` boundary until the handle is closed.
    pub fn schedule(self, interval: Duration) -> JobHandle {
        let (shutdown, mut stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            loop {
                let wait = wait_for_rounded_interval(Utc::now(), interval);
                tokio::select! {
                    _ = &mut stopped => break,
                    _ = tokio::time::sleep(wait) => {}
                }

                match self.run_guarded().await {
                    Ok(Some(posted)) => {
                        info!(event_name = "plugin.job.executed", posted, "background job executed")
                    }
                    Ok(None) => {}
                    Err(lock_error) => error!(
                        event_name = "plugin.job.lock_failed",
                        error = %lock_error,
                        "failed to coordinate background job"
                    ),
                }
            }
        });
        JobHandle { shutdown: Some(shutdown), task }
    }
}

pub struct JobHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl JobHandle {
    /// Stops the schedule and waits for an in-flight run to finish.
    pub async fn close(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Err(join_error) = self.task.await {
            error!(
                event_name = "plugin.job.join_failed",
                error = %join_error,
                "background job task failed"
            );
        }
    }
}
