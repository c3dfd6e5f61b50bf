//! Per-member watch worker.
//!
//! A worker owns one subscription at a time against its member and tracks
//! how far the member's event history has been observed. Once every target
//! so far is observed it drops the subscription and waits on its queue,
//! reopening from `last_observed + 1` when a higher target arrives. It stops
//! when the queue closes or when told to stop from outside, judging what it
//! has in both cases.

use std::sync::Arc;
use std::time::Instant;

use faultline_core::{MemberEndpoint, RawWatchResponse, Revision, WatchClient, WatchOperation, WatchRequest};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::config::CheckerConfig;
use crate::error::CheckError;
use crate::watch::report::{MemberReport, Verdict, WorkerPhase};

/// Mutable progress of one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct WorkerState {
    pub(crate) last_observed: Revision,
    pub(crate) max_required: Option<Revision>,
    pub(crate) phase: WorkerPhase,
}

impl WorkerState {
    fn new() -> Self {
        Self {
            last_observed: 0,
            max_required: None,
            phase: WorkerPhase::Watching,
        }
    }

    fn absorb_target(&mut self, target: Revision) {
        self.max_required = Some(self.max_required.map_or(target, |max| max.max(target)));
    }

    /// Whether a target was set and has been observed.
    fn reached(&self) -> bool {
        self.max_required
            .is_some_and(|required| self.last_observed >= required)
    }
}

/// Why a subscription ended.
enum SubscriptionEnd {
    /// Open a new subscription from `last_observed + 1`.
    Resume,
    /// Every target so far is observed, wait for the next one.
    Milestone,
    /// The worker is finished.
    Stop(Verdict),
}

pub(crate) struct WatchWorker<C: ?Sized> {
    client: Arc<C>,
    member: MemberEndpoint,
    config: CheckerConfig,
    targets: mpsc::Receiver<Revision>,
    targets_closed: bool,
    shutdown: CancellationToken,
    base_time: Instant,
    state: WorkerState,
    resumptions: u32,
    compaction_recoveries: u32,
    watch: Vec<WatchOperation>,
}

impl<C> WatchWorker<C>
where
    C: WatchClient + ?Sized,
{
    pub(crate) fn new(
        client: Arc<C>,
        member: MemberEndpoint,
        config: CheckerConfig,
        targets: mpsc::Receiver<Revision>,
        shutdown: CancellationToken,
        base_time: Instant,
    ) -> Self {
        Self {
            client,
            member,
            config,
            targets,
            targets_closed: false,
            shutdown,
            base_time,
            state: WorkerState::new(),
            resumptions: 0,
            compaction_recoveries: 0,
            watch: Vec::new(),
        }
    }

    #[instrument(skip_all, fields(member = %self.member))]
    pub(crate) async fn run(mut self) -> MemberReport {
        let mut end = self.subscribe().await;
        let verdict = loop {
            end = match end {
                SubscriptionEnd::Resume => {
                    self.state.phase = WorkerPhase::Resuming;
                    tracing::debug!(
                        from = self.state.last_observed + 1,
                        "resuming watch"
                    );
                    self.subscribe().await
                }
                SubscriptionEnd::Milestone => self.await_target().await,
                SubscriptionEnd::Stop(verdict) => break verdict,
            };
        };

        self.state.phase = match verdict {
            Verdict::Violated(_) => WorkerPhase::Violated,
            _ => WorkerPhase::Done,
        };
        if let Verdict::Violated(err) = &verdict {
            tracing::warn!(error = %err, "watch completeness violation");
        } else {
            tracing::debug!(
                observed = self.state.last_observed,
                required = ?self.state.max_required,
                ?verdict,
                "worker finished"
            );
        }

        MemberReport {
            member: self.member.name.clone(),
            endpoint: self.member.address.clone(),
            last_observed_revision: self.state.last_observed,
            max_required_revision: self.state.max_required,
            phase: self.state.phase,
            verdict,
            resumptions: self.resumptions,
            compaction_recoveries: self.compaction_recoveries,
            watch: self.watch,
        }
    }

    /// Open one subscription and consume it until it ends.
    async fn subscribe(&mut self) -> SubscriptionEnd {
        let request = WatchRequest::prefix(self.config.key_prefix.clone(), self.state.last_observed + 1)
            .with_prev_kv(self.config.with_prev_kv)
            .with_progress_notify(self.config.with_progress_notify);

        let client = self.client.clone();
        let opened = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return self.final_check(),
            opened = client.watch(&self.member, request.clone()) => opened,
        };
        let mut stream = match opened {
            Ok(stream) => stream,
            Err(err) => {
                return SubscriptionEnd::Stop(Verdict::Violated(self.watch_failed(format!(
                    "opening watch at revision {}: {err}",
                    request.revision
                ))));
            }
        };
        self.state.phase = WorkerPhase::Watching;
        self.watch.push(WatchOperation::new(request));

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return self.final_check(),
                target = self.targets.recv(), if !self.targets_closed => {
                    if let Some(end) = self.on_target(target) {
                        return end;
                    }
                }
                response = stream.next() => {
                    let Some(response) = response else {
                        // Closed without an error: the server reset the stream.
                        self.resumptions += 1;
                        return SubscriptionEnd::Resume;
                    };
                    if let Some(end) = self.on_response(response) {
                        return end;
                    }
                }
            }
        }
    }

    fn on_target(&mut self, target: Option<Revision>) -> Option<SubscriptionEnd> {
        match target {
            Some(target) => {
                self.state.absorb_target(target);
                self.absorb_queued_targets();
                tracing::trace!(
                    target,
                    required = ?self.state.max_required,
                    observed = self.state.last_observed,
                    "target revision"
                );
                self.milestone()
            }
            None => {
                self.targets_closed = true;
                match self.state.max_required {
                    None => {
                        tracing::debug!("target stream closed before any target");
                        Some(SubscriptionEnd::Stop(Verdict::Inconclusive))
                    }
                    Some(_) if self.state.reached() => {
                        Some(SubscriptionEnd::Stop(Verdict::Complete))
                    }
                    Some(_) => None,
                }
            }
        }
    }

    fn on_response(&mut self, response: RawWatchResponse) -> Option<SubscriptionEnd> {
        if let Some(op) = self.watch.last_mut() {
            op.record(&response, self.base_time);
        }

        if response.is_compaction_cancel() {
            let compacted = response.compact_revision;
            if compacted > self.state.last_observed {
                self.state.last_observed = compacted;
            }
            self.compaction_recoveries += 1;
            tracing::debug!(
                compact_revision = compacted,
                observed = self.state.last_observed,
                "watch canceled by compaction"
            );
            return Some(SubscriptionEnd::Resume);
        }
        if let Some(error) = response.error {
            return Some(SubscriptionEnd::Stop(Verdict::Violated(
                self.watch_failed(error),
            )));
        }
        if response.canceled {
            return Some(SubscriptionEnd::Stop(Verdict::Violated(
                self.watch_failed("watch canceled by server".to_string()),
            )));
        }

        if let Some(revision) = response.last_revision() {
            self.state.last_observed = self.state.last_observed.max(revision);
        }
        self.milestone()
    }

    /// What reaching every target so far means: done once no more targets
    /// can arrive, otherwise a pause until the next one.
    fn milestone(&self) -> Option<SubscriptionEnd> {
        if !self.state.reached() {
            return None;
        }
        Some(if self.targets_closed {
            SubscriptionEnd::Stop(Verdict::Complete)
        } else {
            SubscriptionEnd::Milestone
        })
    }

    /// Wait without a subscription until a target above `last_observed`
    /// arrives, the queue closes or the worker is stopped.
    async fn await_target(&mut self) -> SubscriptionEnd {
        tracing::debug!(
            observed = self.state.last_observed,
            required = ?self.state.max_required,
            "targets reached, waiting for more"
        );
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return self.final_check(),
                target = self.targets.recv() => match target {
                    Some(target) => {
                        self.state.absorb_target(target);
                        self.absorb_queued_targets();
                        if !self.state.reached() {
                            tracing::trace!(target, "target ahead of observed history");
                            return SubscriptionEnd::Resume;
                        }
                    }
                    None => {
                        self.targets_closed = true;
                        return SubscriptionEnd::Stop(Verdict::Complete);
                    }
                },
            }
        }
    }

    fn absorb_queued_targets(&mut self) {
        while let Ok(target) = self.targets.try_recv() {
            self.state.absorb_target(target);
        }
    }

    /// Judge progress after an external stop.
    fn final_check(&mut self) -> SubscriptionEnd {
        if !self.targets_closed {
            self.absorb_queued_targets();
        }
        let verdict = match self.state.max_required {
            None => Verdict::Inconclusive,
            Some(required) if self.state.last_observed < required => {
                Verdict::Violated(CheckError::Completeness {
                    member: self.member.name.clone(),
                    required,
                    observed: self.state.last_observed,
                })
            }
            Some(_) => Verdict::Complete,
        };
        SubscriptionEnd::Stop(verdict)
    }

    fn watch_failed(&self, reason: String) -> CheckError {
        CheckError::WatchFailed {
            member: self.member.name.clone(),
            reason,
        }
    }
}
