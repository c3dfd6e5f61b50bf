//! Fan-out of target revisions to every worker.

use faultline_core::Revision;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Forward every target revision to every worker queue, in arrival order.
///
/// Returns when the source closes (dropping the worker senders closes every
/// queue) or when `stop` fires. A full queue blocks forwarding to the
/// workers behind it. Sends to a worker that already exited are dropped.
pub(crate) async fn distribute(
    mut targets: mpsc::Receiver<Revision>,
    mut workers: Vec<mpsc::Sender<Revision>>,
    stop: CancellationToken,
) -> u64 {
    let mut forwarded = 0u64;
    loop {
        let target = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            target = targets.recv() => target,
        };
        let Some(target) = target else {
            tracing::debug!(forwarded, "target stream closed");
            break;
        };

        tracing::trace!(target, "distributing target revision");
        for queue in &workers {
            tokio::select! {
                biased;
                _ = stop.cancelled() => return forwarded,
                result = queue.send(target) => {
                    // Closed means the worker is done, nothing left to tell it.
                    let _ = result;
                }
            }
        }
        workers.retain(|queue| !queue.is_closed());
        forwarded += 1;
    }
    forwarded
}
