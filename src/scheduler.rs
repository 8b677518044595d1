//! Pass exclusion and periodic scheduling.
//!
//! Ingestion and dispatch each run as exclusive passes. A pass requested while
//! another of the same kind is running is skipped, not queued, whether it was
//! requested by the timer or by the admin API.

use crate::dispatch::Dispatcher;
use crate::ingest::Ingestor;
use crate::models::{DispatchSummary, IngestSummary};
use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Binary "pass in progress" flag.
#[derive(Debug, Default)]
pub struct PassGuard {
    running: AtomicBool,
}

/// Held for the duration of a pass; releases the guard on drop.
#[derive(Debug)]
pub struct PassPermit<'a> {
    guard: &'a PassGuard,
}

impl PassGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self) -> Option<PassPermit<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| PassPermit { guard: self })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl Drop for PassPermit<'_> {
    fn drop(&mut self) {
        self.guard.running.store(false, Ordering::Release);
    }
}

/// Ingestor and dispatcher behind their pass guards.
pub struct ReportService {
    ingestor: Ingestor,
    dispatcher: Dispatcher,
    ingest_guard: PassGuard,
    dispatch_guard: PassGuard,
}

impl ReportService {
    pub fn new(ingestor: Ingestor, dispatcher: Dispatcher) -> Self {
        Self {
            ingestor,
            dispatcher,
            ingest_guard: PassGuard::new(),
            dispatch_guard: PassGuard::new(),
        }
    }

    /// Run an ingestion pass unless one is already running.
    pub async fn try_ingest(&self) -> Option<IngestSummary> {
        let Some(_permit) = self.ingest_guard.try_acquire() else {
            log::warn!("ingestion pass already running, skipping");
            return None;
        };
        Some(self.ingestor.run_pass().await)
    }

    /// Run a dispatch pass unless one is already running.
    pub async fn try_dispatch(&self, cancel: &CancellationToken) -> Option<DispatchSummary> {
        let Some(_permit) = self.dispatch_guard.try_acquire() else {
            log::warn!("dispatch pass already running, skipping");
            return None;
        };
        Some(self.dispatcher.run_pass(Utc::now(), cancel).await)
    }
}

/// Timer loops for both passes.
pub struct Scheduler {
    service: Arc<ReportService>,
    interval: Duration,
    cancel: CancellationToken,
}

/// Handles of the running loops.
pub struct SchedulerHandle {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(service: Arc<ReportService>, interval: Duration, cancel: CancellationToken) -> Self {
        Self {
            service,
            interval,
            cancel,
        }
    }

    pub fn spawn(self) -> SchedulerHandle {
        log::info!(
            "starting report scheduler, checking every {}s",
            self.interval.as_secs()
        );

        let ingest = {
            let service = self.service.clone();
            let cancel = self.cancel.clone();
            let interval = self.interval;
            tokio::spawn(async move {
                run_every(interval, &cancel, || {
                    let service = service.clone();
                    async move {
                        service.try_ingest().await;
                    }
                })
                .await;
                log::info!("ingestion loop stopped");
            })
        };

        let dispatch = {
            let service = self.service.clone();
            let cancel = self.cancel.clone();
            let interval = self.interval;
            tokio::spawn(async move {
                run_every(interval, &cancel, || {
                    let service = service.clone();
                    let cancel = cancel.clone();
                    async move {
                        service.try_dispatch(&cancel).await;
                    }
                })
                .await;
                log::info!("dispatch loop stopped");
            })
        };

        SchedulerHandle {
            cancel: self.cancel,
            tasks: vec![ingest, dispatch],
        }
    }
}

async fn run_every<F, Fut>(period: Duration, cancel: &CancellationToken, mut pass: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        // a pass in flight finishes before cancellation is observed here
        pass().await;
        if cancel.is_cancelled() {
            break;
        }
    }
}

impl SchedulerHandle {
    /// Cancel both loops and wait for the passes in flight to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(err) = task.await {
                log::error!("scheduler task failed: {}", err);
            }
        }
        log::info!("report scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pass_guard_excludes_second_pass() {
        let guard = PassGuard::new();

        let permit = guard.try_acquire();
        assert!(permit.is_some());
        assert!(guard.is_running());
        assert!(guard.try_acquire().is_none());

        drop(permit);
        assert!(!guard.is_running());
        assert!(guard.try_acquire().is_some());
    }

    #[tokio::test]
    async fn test_run_every_stops_on_cancel() {
        let cancel = CancellationToken::new();
        let counter = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let task = {
            let cancel = cancel.clone();
            let counter = counter.clone();
            tokio::spawn(async move {
                run_every(Duration::from_millis(5), &cancel, || {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }
                })
                .await;
            })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();
        task.await.unwrap();

        assert!(counter.load(Ordering::SeqCst) >= 1);
    }
}
