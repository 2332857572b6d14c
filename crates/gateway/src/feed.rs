use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::TransportError;
use crate::events::FeedEvent;
use crate::queue::EventQueue;

/// Dispatch-queue depth between a feed worker and its consumer.
pub const QUEUE_CAPACITY: usize = 1024;

/// Consumer-side poll timeout for `poll_event`/broker dispatch.
pub const QUEUE_TIMEOUT: Duration = Duration::from_millis(10);

/// Fixed backoff between reconnection attempts.
pub const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

/// If no frame arrives for this long the connection is considered dead.
pub const READ_IDLE_DEADLINE: Duration = Duration::from_secs(30);

/// One full connect-initialize-stream session against a venue's live source.
///
/// `run` owns the transport for its duration and pushes typed events to
/// `events`. It returns `Ok(())` only for a deliberate stop (the watch flag
/// flipped); any other exit is an error and subject to the reconnect policy.
#[async_trait]
pub trait FeedSession: Send + 'static {
    async fn run(
        &mut self,
        events: Arc<EventQueue<FeedEvent>>,
        stop: &mut watch::Receiver<bool>,
    ) -> Result<(), TransportError>;
}

/// A background worker driving one venue's live feed: spawns the session
/// loop, applies the reconnect policy, and hands the consumer a totally
/// ordered event stream.
pub struct LiveFeed {
    events: Arc<EventQueue<FeedEvent>>,
    stop: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl LiveFeed {
    /// Start the worker. With `reconnect` enabled, failed sessions are
    /// retried after a fixed backoff until `stop()` is called.
    pub fn spawn<S: FeedSession>(mut session: S, reconnect: bool) -> LiveFeed {
        let events = Arc::new(EventQueue::new(QUEUE_CAPACITY, FeedEvent::is_book_update));
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let queue = Arc::clone(&events);

        let handle = tokio::spawn(async move {
            loop {
                match session.run(Arc::clone(&queue), &mut stop_rx).await {
                    Ok(()) => break,
                    Err(e) => {
                        queue.push(FeedEvent::Disconnected {
                            reason: e.to_string(),
                        });
                        if *stop_rx.borrow() {
                            break;
                        }
                        if !reconnect {
                            tracing::error!(error = %e, "feed session failed, worker stopped");
                            break;
                        }
                        tracing::warn!(error = %e, "feed session failed, reconnecting");
                        tokio::select! {
                            _ = tokio::time::sleep(RECONNECT_BACKOFF) => {}
                            _ = stop_rx.changed() => {
                                if *stop_rx.borrow() {
                                    break;
                                }
                            }
                        }
                    }
                }
            }
        });

        LiveFeed {
            events,
            stop: stop_tx,
            handle: Some(handle),
        }
    }

    /// The worker's dispatch queue.
    pub fn events(&self) -> Arc<EventQueue<FeedEvent>> {
        Arc::clone(&self.events)
    }

    /// Consumer-side poll; returns within roughly `QUEUE_TIMEOUT`.
    pub async fn poll_event(&self) -> Option<FeedEvent> {
        self.events.recv_timeout(QUEUE_TIMEOUT).await
    }

    /// Request shutdown. Idempotent and never fails; the session observes
    /// the flag at its next suspension point and closes the transport.
    pub fn stop(&self) {
        let _ = self.stop.send(true);
    }

    /// Wait for the worker to exit.
    pub async fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }

    pub fn is_alive(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Session that fails `failures` times, then idles until stopped.
    struct ScriptedSession {
        failures: usize,
        runs: Arc<std::sync::atomic::AtomicUsize>,
    }

    #[async_trait]
    impl FeedSession for ScriptedSession {
        async fn run(
            &mut self,
            events: Arc<EventQueue<FeedEvent>>,
            stop: &mut watch::Receiver<bool>,
        ) -> Result<(), TransportError> {
            self.runs.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            events.push(FeedEvent::Connected { initialized: false });
            if self.failures > 0 {
                self.failures -= 1;
                return Err(TransportError::ProtocolViolation("scripted".into()));
            }
            events.push(FeedEvent::Connected { initialized: true });
            loop {
                stop.changed().await.map_err(|_| TransportError::ChannelClosed)?;
                if *stop.borrow() {
                    return Ok(());
                }
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_after_failure() {
        let runs = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let mut feed = LiveFeed::spawn(
            ScriptedSession {
                failures: 1,
                runs: Arc::clone(&runs),
            },
            true,
        );

        // First session fails; after the backoff the worker reinitializes.
        loop {
            if let Some(FeedEvent::Connected { initialized: true }) = feed.poll_event().await {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(runs.load(std::sync::atomic::Ordering::SeqCst), 2);

        feed.stop();
        feed.stop(); // idempotent
        feed.join().await;
        assert!(!feed.is_alive());
    }

    #[tokio::test]
    async fn test_no_reconnect_when_disabled() {
        let runs = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let mut feed = LiveFeed::spawn(
            ScriptedSession {
                failures: 5,
                runs: Arc::clone(&runs),
            },
            false,
        );
        feed.join().await;
        assert_eq!(runs.load(std::sync::atomic::Ordering::SeqCst), 1);
        // The failure was surfaced as a Disconnected event.
        let mut saw_disconnect = false;
        while let Some(event) = feed.events().try_recv() {
            if matches!(event, FeedEvent::Disconnected { .. }) {
                saw_disconnect = true;
            }
        }
        assert!(saw_disconnect);
    }
}
