//! Rate capping for update streams.
//!
//! The simulator can push dataref values far faster than a display wants to
//! repaint. The combinator here caps a stream to one item per interval with
//! latest-wins semantics: intermediate values arriving within an interval
//! are overwritten, never queued.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::{Stream, ready};
use pin_project_lite::pin_project;
use tokio::time::{Interval, MissedTickBehavior, interval};

/// Extension trait adding rate capping to any stream.
pub trait RateLimitExt: Stream {
    /// Emit at most one item per `period`, keeping only the newest item
    /// seen since the last emission.
    fn rate_limit(self, period: Duration) -> RateLimit<Self>
    where
        Self: Sized,
    {
        RateLimit::new(self, period)
    }
}

impl<T: Stream> RateLimitExt for T {}

pin_project! {
    /// Stream adapter produced by [`RateLimitExt::rate_limit`].
    pub struct RateLimit<S: Stream> {
        #[pin]
        stream: S,
        ticker: Interval,
        newest: Option<S::Item>,
    }
}

impl<S: Stream> RateLimit<S> {
    pub fn new(stream: S, period: Duration) -> Self {
        let mut ticker = interval(period);
        // no catch-up bursts after a stall
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { stream, ticker, newest: None }
    }
}

impl<S: Stream> Stream for RateLimit<S> {
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        // drain everything ready, keeping only the newest item
        loop {
            match this.stream.as_mut().poll_next(cx) {
                Poll::Ready(Some(item)) => *this.newest = Some(item),
                Poll::Ready(None) => {
                    // flush the held item before ending
                    return Poll::Ready(this.newest.take());
                }
                Poll::Pending => break,
            }
        }

        if this.newest.is_none() {
            return Poll::Pending;
        }
        ready!(this.ticker.poll_tick(cx));
        Poll::Ready(this.newest.take())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tokio_stream::wrappers::ReceiverStream;

    #[tokio::test(start_paused = true)]
    async fn keeps_only_newest_within_interval() {
        let (tx, rx) = tokio::sync::mpsc::channel(16);
        for v in 1..=5 {
            tx.send(v).await.unwrap();
        }
        drop(tx);

        let capped: Vec<i32> =
            ReceiverStream::new(rx).rate_limit(Duration::from_millis(100)).collect().await;
        assert_eq!(capped, vec![5]);
    }

    #[tokio::test(start_paused = true)]
    async fn items_in_different_intervals_all_pass() {
        let (tx, rx) = tokio::sync::mpsc::channel(16);
        let mut capped = ReceiverStream::new(rx).rate_limit(Duration::from_millis(100));

        tx.send(1).await.unwrap();
        assert_eq!(capped.next().await, Some(1));

        tokio::time::advance(Duration::from_millis(150)).await;
        tx.send(2).await.unwrap();
        assert_eq!(capped.next().await, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn final_item_flushes_on_stream_end() {
        let (tx, rx) = tokio::sync::mpsc::channel(16);
        let mut capped = ReceiverStream::new(rx).rate_limit(Duration::from_millis(100));

        tx.send(7).await.unwrap();
        drop(tx);
        assert_eq!(capped.next().await, Some(7));
        assert_eq!(capped.next().await, None);
    }
}
