//! This module contains the [Notifier] struct.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::Mutex;
use std::task::Context;
use std::task::Poll;

#[derive(Default)]
struct NotifierState {
    /// Indicates whether state has woken.
    woken: bool,

    /// The wakers associated with the state.
    wakers: Vec<std::task::Waker>,
}

/// A notifier that can be woken by calling `wake` or `set_timeout`.
/// Used to signal data channel readiness to waiters in
/// `webrtc_wait_for_data_channel_open` of
/// [crate::transport::ConnectionInterface].
#[derive(Clone, Default)]
pub struct Notifier(Arc<Mutex<NotifierState>>);

impl Notifier {
    /// Immediately wake the notifier.
    pub fn wake(&self) {
        let Ok(mut state) = self.0.lock() else {
            return;
        };
        state.woken = true;
        for waker in state.wakers.drain(..) {
            waker.wake();
        }
    }

    /// Wake the notifier after the specified time.
    pub fn set_timeout(&self, seconds: u8) {
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(tokio::time::Duration::from_secs(seconds.into())).await;
            this.wake();
        });
    }
}

impl Future for Notifier {
    type Output = ();
    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let Ok(mut state) = self.0.lock() else {
            return Poll::Ready(());
        };

        if state.woken {
            return Poll::Ready(());
        }

        state.wakers.push(cx.waker().clone());
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_notifier() {
        let notifier = Notifier::default();
        notifier.set_timeout(1);

        let mut jobs = vec![];

        // Await three times before the wake.
        for _ in 0..3 {
            let notifier_clone = notifier.clone();
            jobs.push(tokio::spawn(async move {
                notifier_clone.await;
            }));
        }

        // Await three times after the wake.
        for _ in 0..3 {
            let notifier_clone = notifier.clone();
            jobs.push(tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_secs(2)).await;
                notifier_clone.await;
            }));
        }

        futures::future::join_all(jobs).await;
        notifier.await;
    }
}
