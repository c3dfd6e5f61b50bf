//! Watch subscriptions served by [`SimCluster`](super::SimCluster).

use std::sync::Arc;

use faultline_core::{RawEvent, RawWatchResponse, Revision, WatchRequest, WatchStream};
use futures::StreamExt;
use futures::stream;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::sim::cluster::{ClusterState, PendingCancel};

const COMPACTED_ERROR: &str = "mvcc: required revision has been compacted";

struct Subscription {
    cluster: Arc<Mutex<ClusterState>>,
    request: WatchRequest,
    /// Next revision to deliver.
    next: Revision,
    head: watch::Receiver<Revision>,
    error: Option<String>,
    cancel: Option<PendingCancel>,
    reset_every: Option<usize>,
    sent: usize,
    started: bool,
    finished: bool,
}

pub(crate) fn watch_stream(
    cluster: Arc<Mutex<ClusterState>>,
    request: WatchRequest,
    head: watch::Receiver<Revision>,
    error: Option<String>,
    cancel: Option<PendingCancel>,
    reset_every: Option<usize>,
) -> WatchStream {
    let next = if request.revision > 0 {
        request.revision
    } else {
        *head.borrow() + 1
    };
    let subscription = Subscription {
        cluster,
        request,
        next,
        head,
        error,
        cancel,
        reset_every,
        sent: 0,
        started: false,
        finished: false,
    };

    stream::unfold(subscription, |mut sub| async move {
        let response = sub.next_response().await?;
        Some((response, sub))
    })
    .boxed()
}

impl Subscription {
    async fn next_response(&mut self) -> Option<RawWatchResponse> {
        if self.finished {
            return None;
        }
        if !self.started {
            self.started = true;
            if let Some(response) = self.opening_failure() {
                self.finished = true;
                return Some(response);
            }
        }

        loop {
            if self.reset_every.is_some_and(|every| self.sent >= every) {
                tracing::trace!(next = self.next, "sim watch reset");
                self.finished = true;
                return None;
            }
            if let Some(cancel) = self.cancel.filter(|c| self.next > c.after_revision) {
                self.finished = true;
                return Some(RawWatchResponse {
                    header_revision: *self.head.borrow(),
                    canceled: true,
                    compact_revision: cancel.compact_revision,
                    error: Some(COMPACTED_ERROR.to_string()),
                    ..RawWatchResponse::default()
                });
            }

            let applied = loop {
                let applied = *self.head.borrow_and_update();
                if applied >= self.next {
                    break applied;
                }
                if self.head.changed().await.is_err() {
                    self.finished = true;
                    return None;
                }
            };

            let events = self.take_batch(applied);
            if events.is_empty() {
                continue;
            }
            self.sent += 1;
            return Some(RawWatchResponse {
                header_revision: applied,
                events,
                ..RawWatchResponse::default()
            });
        }
    }

    /// Errors reported as the first response of a subscription.
    fn opening_failure(&mut self) -> Option<RawWatchResponse> {
        let header_revision = *self.head.borrow();
        if let Some(error) = self.error.take() {
            return Some(RawWatchResponse {
                header_revision,
                canceled: true,
                error: Some(error),
                ..RawWatchResponse::default()
            });
        }

        let compact_revision = self.cluster.lock().compact_revision;
        (compact_revision > 0 && self.next <= compact_revision).then(|| RawWatchResponse {
            header_revision,
            canceled: true,
            compact_revision,
            error: Some(COMPACTED_ERROR.to_string()),
            ..RawWatchResponse::default()
        })
    }

    /// Events from `next` up to at most `applied`, matching the request.
    fn take_batch(&mut self, applied: Revision) -> Vec<RawEvent> {
        let mut upto = applied;
        if let Some(cancel) = self.cancel {
            if cancel.after_revision >= self.next {
                upto = upto.min(cancel.after_revision);
            }
        }

        let mut cluster = self.cluster.lock();
        let available = (upto - self.next + 1) as usize;
        let end = self.next + cluster.batch_size(available) as Revision;
        let prefix = self.request.key.as_bytes();
        let events = cluster.history[(self.next - 1) as usize..(end - 1) as usize]
            .iter()
            .filter(|event| event.kv.key.starts_with(prefix))
            .map(|event| {
                let mut event = event.clone();
                if !self.request.with_prev_kv {
                    event.prev_kv = None;
                }
                event
            })
            .collect();
        self.next = end;
        events
    }
}
