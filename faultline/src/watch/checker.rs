//! Completeness checker entry point.

use std::sync::Arc;
use std::time::Instant;

use faultline_core::{MemberEndpoint, Revision, WatchClient};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::config::CheckerConfig;
use crate::error::CheckError;
use crate::watch::distributor::distribute;
use crate::watch::report::{CompletenessReport, MemberReport, Verdict, WorkerPhase};
use crate::watch::worker::WatchWorker;

/// Checks that every member's watch delivers every revision the test
/// driver asks about.
///
/// One worker per member runs in parallel with the driver. Each target
/// revision sent on the `targets` channel is forwarded to every worker. A
/// worker that has observed every target so far keeps waiting for more and
/// finishes when the `targets` channel closes. Cancelling `shutdown` asks
/// the remaining workers to judge what they observed and stop.
#[derive(Debug, Clone)]
pub struct CompletenessChecker<C: ?Sized> {
    client: Arc<C>,
    config: CheckerConfig,
}

impl<C> CompletenessChecker<C>
where
    C: WatchClient + ?Sized + 'static,
{
    /// Checker with default configuration.
    pub fn new(client: Arc<C>) -> Self {
        Self::with_config(client, CheckerConfig::default())
    }

    /// Checker with explicit configuration.
    pub fn with_config(client: Arc<C>, config: CheckerConfig) -> Self {
        Self { client, config }
    }

    /// Run until every worker has stopped and return their reports in
    /// member order.
    #[instrument(skip_all, fields(members = members.len()))]
    pub async fn run(
        &self,
        members: &[MemberEndpoint],
        targets: mpsc::Receiver<Revision>,
        shutdown: CancellationToken,
    ) -> CompletenessReport {
        tracing::info!(prefix = %self.config.key_prefix, "starting watch completeness check");
        let base_time = Instant::now();
        let capacity = self.config.queue_capacity.max(1);

        let slots: Arc<Mutex<Vec<Option<MemberReport>>>> =
            Arc::new(Mutex::new(vec![None; members.len()]));
        let mut queues = Vec::with_capacity(members.len());
        let mut handles = Vec::with_capacity(members.len());

        for (index, member) in members.iter().enumerate() {
            let (queue_tx, queue_rx) = mpsc::channel(capacity);
            queues.push(queue_tx);

            let worker = WatchWorker::new(
                self.client.clone(),
                member.clone(),
                self.config.clone(),
                queue_rx,
                shutdown.clone(),
                base_time,
            );
            let slots = slots.clone();
            handles.push(tokio::spawn(async move {
                let report = worker.run().await;
                slots.lock()[index] = Some(report);
            }));
        }

        let workers_done = shutdown.child_token();
        let distributor = tokio::spawn(distribute(targets, queues, workers_done.clone()));

        for handle in handles {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "watch worker task failed");
            }
        }
        workers_done.cancel();
        let forwarded = distributor.await.unwrap_or_default();

        let reports: Vec<MemberReport> = {
            let mut slots = slots.lock();
            members
                .iter()
                .zip(slots.iter_mut())
                .map(|(member, slot)| slot.take().unwrap_or_else(|| lost_worker(member)))
                .collect()
        };
        let report = CompletenessReport { members: reports };

        let violations = report.violations().len();
        if violations == 0 {
            tracing::info!(forwarded, "watch completeness check passed");
        } else {
            tracing::warn!(forwarded, violations, "watch completeness check failed");
        }
        report
    }
}

fn lost_worker(member: &MemberEndpoint) -> MemberReport {
    MemberReport {
        member: member.name.clone(),
        endpoint: member.address.clone(),
        last_observed_revision: 0,
        max_required_revision: None,
        phase: WorkerPhase::Violated,
        verdict: Verdict::Violated(CheckError::WatchFailed {
            member: member.name.clone(),
            reason: "worker task aborted".to_string(),
        }),
        resumptions: 0,
        compaction_recoveries: 0,
        watch: Vec::new(),
    }
}

/// Run a completeness check against `members`.
///
/// See [`CompletenessChecker::run`].
pub async fn run_completeness_checker<C>(
    client: Arc<C>,
    members: &[MemberEndpoint],
    targets: mpsc::Receiver<Revision>,
    shutdown: CancellationToken,
    config: CheckerConfig,
) -> CompletenessReport
where
    C: WatchClient + ?Sized + 'static,
{
    CompletenessChecker::with_config(client, config)
        .run(members, targets, shutdown)
        .await
}
