use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Notify;

/// Bounded dispatch queue between a feed worker (producer) and the single
/// consumer thread.
///
/// Overflow policy: when full, the oldest droppable entry (book updates) is
/// discarded to make room. Entries the predicate marks non-droppable
/// (lifecycle, trades) are never lost; if nothing is droppable the queue
/// temporarily exceeds its bound instead.
pub struct EventQueue<T> {
    capacity: usize,
    droppable: fn(&T) -> bool,
    items: Mutex<VecDeque<T>>,
    notify: Notify,
}

impl<T> EventQueue<T> {
    pub fn new(capacity: usize, droppable: fn(&T) -> bool) -> Self {
        assert!(capacity >= 1);
        EventQueue {
            capacity,
            droppable,
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
        }
    }

    pub fn push(&self, item: T) {
        {
            let mut items = self.items.lock();
            if items.len() >= self.capacity
                && let Some(pos) = items.iter().position(self.droppable)
            {
                items.remove(pos);
                tracing::debug!("dispatch queue full, dropped oldest book update");
            }
            items.push_back(item);
        }
        self.notify.notify_one();
    }

    pub fn try_recv(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    /// Wait up to `timeout` for an entry; the consumer's ~10 ms poll.
    pub async fn recv_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(item) = self.try_recv() {
                return Some(item);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.try_recv();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn droppable(v: &i32) -> bool {
        *v >= 0
    }

    #[test]
    fn test_fifo_order() {
        let queue = EventQueue::new(8, droppable);
        queue.push(1);
        queue.push(2);
        assert_eq!(queue.try_recv(), Some(1));
        assert_eq!(queue.try_recv(), Some(2));
        assert_eq!(queue.try_recv(), None);
    }

    #[test]
    fn test_overflow_drops_oldest_droppable() {
        let queue = EventQueue::new(2, droppable);
        queue.push(1);
        queue.push(2);
        queue.push(3);
        assert_eq!(queue.try_recv(), Some(2));
        assert_eq!(queue.try_recv(), Some(3));
    }

    #[test]
    fn test_overflow_never_drops_protected_entries() {
        let queue = EventQueue::new(2, droppable);
        queue.push(-1);
        queue.push(-2);
        queue.push(-3);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.try_recv(), Some(-1));
        assert_eq!(queue.try_recv(), Some(-2));
        assert_eq!(queue.try_recv(), Some(-3));
    }

    #[test]
    fn test_overflow_skips_protected_to_drop_droppable() {
        let queue = EventQueue::new(2, droppable);
        queue.push(-1);
        queue.push(5);
        queue.push(-2);
        assert_eq!(queue.try_recv(), Some(-1));
        assert_eq!(queue.try_recv(), Some(-2));
    }

    #[tokio::test]
    async fn test_recv_timeout_returns_none_when_empty() {
        let queue: EventQueue<i32> = EventQueue::new(4, droppable);
        let got = queue.recv_timeout(Duration::from_millis(10)).await;
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn test_recv_timeout_wakes_on_push() {
        let queue = Arc::new(EventQueue::new(4, droppable));
        let pusher = Arc::clone(&queue);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            pusher.push(42);
        });
        let got = queue.recv_timeout(Duration::from_secs(1)).await;
        assert_eq!(got, Some(42));
        handle.await.unwrap();
    }
}
