//! Per-question round timers
//!
//! A [`RoundTimer`] runs a callback once a round's duration has elapsed,
//! unless it is cancelled first. Cancellation only wins before the delay is
//! over: once the callback has started it runs to completion, so callers
//! must make the callback itself safe to run late (the session's advance
//! guard does exactly that).

use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tokio::sync::oneshot;
use tracing::{Instrument, trace, trace_span};

/// A cancellable delayed action tagged with the question index it was
/// armed for
#[derive(Debug)]
pub struct RoundTimer {
    index: usize,
    cancel: Option<oneshot::Sender<()>>,
    fired: Arc<AtomicBool>,
}

impl RoundTimer {
    /// Schedules `on_expire` to run after `duration`
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Arguments
    ///
    /// * `index` - The question index this timer closes
    /// * `duration` - How long the round stays open
    /// * `on_expire` - Invoked once when the duration elapses uncancelled
    pub fn arm<F, Fut>(index: usize, duration: Duration, on_expire: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (cancel, cancelled) = oneshot::channel::<()>();
        let fired = Arc::new(AtomicBool::new(false));
        let fired_flag = Arc::clone(&fired);

        let span = trace_span!("round_timer", index);
        let task = async move {
            tokio::select! {
                biased;
                _ = cancelled => {
                    trace!(index, "round timer cancelled");
                    return;
                }
                () = tokio::time::sleep(duration) => {}
            }
            fired_flag.store(true, Ordering::SeqCst);
            trace!(index, "round timer fired");
            on_expire().await;
        };
        tokio::spawn(task.instrument(span));

        Self {
            index,
            cancel: Some(cancel),
            fired,
        }
    }

    /// The question index this timer was armed for
    pub fn index(&self) -> usize {
        self.index
    }

    /// Whether the delay elapsed and the callback was (or is being) run
    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Prevents the callback from running if it has not started yet
    ///
    /// Cancelling twice, or cancelling a timer that already fired, does
    /// nothing.
    pub fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            // The receiver is gone once the timer fired; nothing to stop then.
            let _ = cancel.send(());
        }
    }
}

impl Drop for RoundTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
