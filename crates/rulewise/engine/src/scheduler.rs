//! Continuous learning loops.
//!
//! Four periodic tasks share the engine core: the optimization sweep, model
//! retraining, knowledge refresh and post-apply monitoring. A failed
//! iteration is logged and the loop keeps its schedule.

use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};

use rulewise_types::{IntelError, IntelResult};

use crate::service::EngineCore;

type Tick = fn(Arc<EngineCore>) -> BoxFuture<'static, IntelResult<()>>;

/// Handles of the running loops; dropping this stops them.
pub(crate) struct LearningLoops {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl LearningLoops {
    /// Spawn every loop on the current runtime.
    pub(crate) fn spawn(core: Arc<EngineCore>) -> IntelResult<Self> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| IntelError::SchedulerUnavailable(e.to_string()))?;
        let (shutdown, _) = watch::channel(false);
        let scheduler = &core.config.scheduler;

        let loops: [(&'static str, u64, Tick); 4] = [
            ("optimization", scheduler.optimization_interval_secs, optimization_tick),
            ("retraining", scheduler.retrain_interval_secs, retraining_tick),
            ("knowledge", scheduler.learning_interval_secs, knowledge_tick),
            ("monitoring", scheduler.monitoring_interval_secs, monitoring_tick),
        ];

        let handles = loops
            .into_iter()
            .map(|(name, secs, tick)| {
                runtime.spawn(run_loop(
                    name,
                    Duration::from_secs(secs.max(1)),
                    core.clone(),
                    shutdown.subscribe(),
                    tick,
                ))
            })
            .collect();

        tracing::info!("Learning loops started");
        Ok(Self { shutdown, handles })
    }

    pub(crate) fn stop(&mut self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles.drain(..) {
            handle.abort();
        }
    }
}

impl Drop for LearningLoops {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_loop(
    name: &'static str,
    period: Duration,
    core: Arc<EngineCore>,
    mut shutdown: watch::Receiver<bool>,
    tick: Tick,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; loops start one period in.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = tick(core.clone()).await {
                    tracing::error!(loop_name = name, error = %e, "Learning loop iteration failed");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    tracing::debug!(loop_name = name, "Learning loop stopped");
}

fn optimization_tick(core: Arc<EngineCore>) -> BoxFuture<'static, IntelResult<()>> {
    Box::pin(async move {
        let outcomes = core.run_optimization_sweep().await;
        if !outcomes.is_empty() {
            let completed = outcomes.iter().filter(|o| o.is_completed()).count();
            tracing::info!(rules = outcomes.len(), completed, "Optimization sweep finished");
        }
        Ok(())
    })
}

fn retraining_tick(core: Arc<EngineCore>) -> BoxFuture<'static, IntelResult<()>> {
    Box::pin(async move {
        if core.predictor.ensemble()?.is_none() {
            core.restore_models().await?;
        }
        match core.retrain_models().await {
            Ok(_) => Ok(()),
            Err(IntelError::DataInsufficient { samples, minimum }) => {
                tracing::debug!(samples, minimum, "Skipping retraining");
                Ok(())
            }
            Err(e) => Err(e),
        }
    })
}

fn knowledge_tick(core: Arc<EngineCore>) -> BoxFuture<'static, IntelResult<()>> {
    Box::pin(async move { core.refresh_knowledge().map(|_| ()) })
}

fn monitoring_tick(core: Arc<EngineCore>) -> BoxFuture<'static, IntelResult<()>> {
    Box::pin(async move {
        let summary = core.monitor_performance().await?;
        if !summary.regressions.is_empty() {
            tracing::warn!(rules = ?summary.regressions, "Regressions flagged for re-optimization");
        }
        Ok(())
    })
}
