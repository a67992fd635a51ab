//! Background scheduling
//!
//! Fixed-period loops for budget sweeps, the global sweep, the collected
//! value sweeper, expiry maintenance and the monitor. The work itself is
//! synchronous, so each tick runs it on the blocking pool; cancellation is
//! only observed between ticks, letting an in-flight sweep finish.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use crate::error::{Error, Result};

/// Handle to the running background loops
pub struct BackgroundTasks {
    token: CancellationToken,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl BackgroundTasks {
    /// Must be called from inside a tokio runtime
    pub fn new() -> Result<Self> {
        tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Internal(format!("background tasks need a tokio runtime: {}", e)))?;
        Ok(Self {
            token: CancellationToken::new(),
            handles: Vec::new(),
        })
    }

    /// Run `work` every `period`, first after `initial_delay`
    pub fn spawn_periodic<F>(
        &mut self,
        name: &'static str,
        initial_delay: Duration,
        period: Duration,
        work: F,
    ) where
        F: Fn() + Send + Sync + 'static,
    {
        let token = self.token.child_token();
        let handle = tokio::spawn(run_periodic(name, initial_delay, period, token, Arc::new(work)));
        self.handles.push((name, handle));
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.handles.iter().map(|(name, _)| *name).collect()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Stop every loop and wait for in-flight work to finish
    pub async fn shutdown(self) {
        self.token.cancel();
        for (name, handle) in self.handles {
            if let Err(e) = handle.await {
                error!(task = name, error = %e, "Background task ended abnormally");
            }
        }
        info!("Background tasks stopped");
    }
}

#[instrument(skip(token, work))]
async fn run_periodic<F>(
    name: &'static str,
    initial_delay: Duration,
    period: Duration,
    token: CancellationToken,
    work: Arc<F>,
) where
    F: Fn() + Send + Sync + 'static,
{
    tokio::select! {
        _ = token.cancelled() => return,
        _ = sleep(initial_delay) => {}
    }

    debug!(task = name, ?period, "Background task started");
    let mut tick = interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tick.tick() => {
                let work = Arc::clone(&work);
                if let Err(e) = tokio::task::spawn_blocking(move || work()).await {
                    error!(task = name, error = %e, "Background run panicked");
                }
            }
        }
    }
    debug!(task = name, "Background task stopped");
}
