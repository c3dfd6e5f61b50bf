//! Per-operation failpoint decision shared by the wrappers.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use tokio::time::Sleep;

use crate::action::FailpointAction;
use crate::registry::FailpointRegistry;

/// Outcome of consulting a failpoint for one I/O operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Decision {
    Pass,
    Drop,
}

impl Decision {
    fn from_action(action: Option<FailpointAction>) -> Self {
        match action {
            Some(action) if action.drops() => Decision::Drop,
            _ => Decision::Pass,
        }
    }
}

/// Consults a failpoint from a `poll_*` method.
///
/// The decision is taken once per operation and cached across `Pending`
/// returns so a slow underlying stream is not re-evaluated (and a sleep is
/// not restarted) on every wake-up. Call [`Gate::reset`] once the operation
/// completes.
pub(crate) struct Gate {
    registry: Arc<FailpointRegistry>,
    name: String,
    decided: Option<Decision>,
    delay: Option<Pin<Box<Sleep>>>,
}

impl Gate {
    pub(crate) fn new(registry: Arc<FailpointRegistry>, name: String) -> Self {
        Self {
            registry,
            name,
            decided: None,
            delay: None,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn poll_decide(&mut self, cx: &mut Context<'_>) -> Poll<Decision> {
        if let Some(decision) = self.decided {
            return Poll::Ready(decision);
        }

        if self.delay.is_none() {
            match self.registry.evaluate(&self.name) {
                Some(FailpointAction::Sleep(delay)) => {
                    self.delay = Some(Box::pin(tokio::time::sleep(delay)));
                }
                action => {
                    let decision = Decision::from_action(action);
                    self.decided = Some(decision);
                    return Poll::Ready(decision);
                }
            }
        }

        if let Some(delay) = self.delay.as_mut() {
            ready!(delay.as_mut().poll(cx));
            self.delay = None;
        }
        self.decided = Some(Decision::Drop);
        Poll::Ready(Decision::Drop)
    }

    pub(crate) fn reset(&mut self) {
        self.decided = None;
    }
}

impl std::fmt::Debug for Gate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gate")
            .field("name", &self.name)
            .field("decided", &self.decided)
            .field("sleeping", &self.delay.is_some())
            .finish()
    }
}

/// Consult a failpoint from async code, sleeping first when asked to.
pub(crate) async fn decide(registry: &FailpointRegistry, name: &str) -> Decision {
    let action = registry.evaluate(name);
    if let Some(delay) = action.and_then(|action| action.delay()) {
        tokio::time::sleep(delay).await;
    }
    Decision::from_action(action)
}
