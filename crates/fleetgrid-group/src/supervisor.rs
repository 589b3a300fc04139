//! Supervisors: background convergence loops.
//!
//! A group is driven by exactly one supervisor: a `Scaler` when the
//! allocation is a size, a `Quorum` when it is a set of logical IDs. Both
//! converge once immediately and then on every poll tick until stopped.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::GroupResult;
use crate::plan::UpdatePlan;
use crate::quorum::Quorum;
use crate::rolling::poll_period;
use crate::scaled::ScaledGroup;
use crate::scaler::Scaler;
use crate::settings::GroupSettings;

#[derive(Clone)]
pub enum Supervisor {
    Scaler(Arc<Scaler>),
    Quorum(Arc<Quorum>),
}

impl Supervisor {
    /// Pick the supervisor matching the allocation in `settings`.
    ///
    /// # Panics
    ///
    /// If the allocation names neither a size nor logical IDs. Validated
    /// configs never do.
    pub fn new(scaled: Arc<ScaledGroup>, settings: &GroupSettings) -> Self {
        let allocation = &settings.config.allocation;
        if allocation.uses_logical_ids() {
            Self::Quorum(Arc::new(Quorum::new(scaled, allocation.logical_ids.clone())))
        } else if allocation.size > 0 {
            Self::Scaler(Arc::new(Scaler::new(scaled)))
        } else {
            panic!("group '{}' has no allocation method", scaled.id());
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Scaler(s) => s.id(),
            Self::Quorum(q) => q.id(),
        }
    }

    pub fn size(&self) -> u32 {
        match self {
            Self::Scaler(s) => s.size(),
            Self::Quorum(q) => q.size(),
        }
    }

    /// Converge until `stop` is called.
    pub async fn run(&self) {
        match self {
            Self::Scaler(s) => s.run().await,
            Self::Quorum(q) => q.run().await,
        }
    }

    pub fn stop(&self) {
        match self {
            Self::Scaler(s) => s.stop(),
            Self::Quorum(q) => q.stop(),
        }
    }

    /// Work out how to move the group from `old` to `new`.
    pub async fn plan_update(
        &self,
        old: &GroupSettings,
        new: &GroupSettings,
    ) -> GroupResult<UpdatePlan> {
        match self {
            Self::Scaler(s) => s.plan_update(old, new).await,
            Self::Quorum(q) => q.plan_update(old, new).await,
        }
    }
}

/// Call `converge` now and on every tick of `poll` until `stop` fires.
pub(crate) async fn poll_loop<F, Fut>(
    group: &str,
    poll: Duration,
    mut stop: watch::Receiver<bool>,
    mut converge: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    info!(group, poll = ?poll, "supervisor started");
    let mut ticker = tokio::time::interval(poll_period(poll));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if *stop.borrow_and_update() {
            break;
        }
        tokio::select! {
            _ = ticker.tick() => converge().await,
            _ = stop.changed() => break,
        }
    }
    info!(group, "supervisor stopped");
}

/// Run `op` on every item as its own task and wait for all of them.
///
/// With a non-zero `max_parallel`, no more than that many tasks are
/// outstanding at once.
pub(crate) async fn fan_out<I, F, Fut>(max_parallel: usize, items: I, op: F)
where
    I: IntoIterator,
    F: Fn(I::Item) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let limit = (max_parallel > 0).then(|| Arc::new(Semaphore::new(max_parallel)));
    let mut tasks = JoinSet::new();

    for item in items {
        let permit = match &limit {
            Some(limit) => limit.clone().acquire_owned().await.ok(),
            None => None,
        };
        let work = op(item);
        tasks.spawn(async move {
            let _permit = permit;
            work.await;
        });
    }

    let mut done = 0usize;
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            warn!(error = %e, "convergence task failed");
        }
        done += 1;
    }
    debug!(tasks = done, "convergence fan-out finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn fan_out_respects_limit() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let total = Arc::new(AtomicUsize::new(0));

        fan_out(2, 0..6, |_| {
            let (running, peak, total) = (running.clone(), peak.clone(), total.clone());
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                total.fetch_add(1, Ordering::SeqCst);
            }
        })
        .await;

        assert_eq!(total.load(Ordering::SeqCst), 6);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn poll_loop_converges_immediately_and_stops() {
        let (tx, rx) = watch::channel(false);
        let calls = Arc::new(AtomicUsize::new(0));

        let task = {
            let calls = calls.clone();
            tokio::spawn(async move {
                poll_loop("g", Duration::from_secs(3600), rx, || {
                    let calls = calls.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                    }
                })
                .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tx.send_replace(true);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("loop should stop")
            .unwrap();
    }
}
