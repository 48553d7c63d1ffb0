//! Cooperative yield point.
//!
//! A task that loops without awaiting anything else never gives the
//! scheduler a chance to poll its siblings. Awaiting [`yield_now`] puts the
//! task at the back of the ready queue and lets every task ahead of it run
//! once, which makes interleavings in a scenario explicit.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Future returned by [`yield_now`].
///
/// Pending on the first poll after rescheduling itself, ready on the next.
#[derive(Debug)]
#[must_use = "futures do nothing unless awaited"]
pub struct YieldNow {
    rescheduled: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.rescheduled {
            return Poll::Ready(());
        }
        self.rescheduled = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

/// Gives up the current poll so queued tasks run before this one resumes.
///
/// ```ignore
/// cx.spawn_detached(|_| async { /* runs during the yield */ });
/// yield_now().await;
/// ```
pub fn yield_now() -> YieldNow {
    YieldNow { rescheduled: false }
}
