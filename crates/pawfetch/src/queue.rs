//! Concurrency-limited FIFO request queue

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::RequestError;

struct QueueState {
    pending: VecDeque<BoxFuture<'static, ()>>,
    running: usize,
}

struct QueueInner {
    limit: usize,
    state: Mutex<QueueState>,
}

/// Admits queued tasks in FIFO order, at most `limit` at a time
///
/// Tasks run on the tokio runtime; completion order is whatever the tasks
/// make it. Queued tasks cannot be cancelled.
#[derive(Clone)]
pub struct RequestQueue {
    inner: Arc<QueueInner>,
}

/// Result of a queued task
///
/// Resolves to [`RequestError::Cancelled`] if the task panicked.
pub struct Queued<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> Future for Queued<T> {
    type Output = Result<T, RequestError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.map_err(|_| RequestError::Cancelled))
    }
}

/// Releases a running slot even if the task panics
struct Slot(Arc<QueueInner>);

impl Drop for Slot {
    fn drop(&mut self) {
        self.0.state.lock().running -= 1;
        QueueInner::admit(&self.0);
    }
}

impl QueueInner {
    fn admit(inner: &Arc<QueueInner>) {
        let mut state = inner.state.lock();
        while state.running < inner.limit {
            let Some(job) = state.pending.pop_front() else {
                break;
            };
            state.running += 1;

            let slot = Slot(inner.clone());
            tokio::spawn(async move {
                job.await;
                drop(slot);
            });
        }
    }
}

impl RequestQueue {
    /// Create a queue; a zero limit is raised to one
    pub fn new(limit: usize) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                limit: limit.max(1),
                state: Mutex::new(QueueState {
                    pending: VecDeque::new(),
                    running: 0,
                }),
            }),
        }
    }

    /// Enqueue `task` and start it as soon as a slot frees up
    ///
    /// Enqueueing happens immediately, not when the returned future is
    /// first polled.
    pub fn add<F, T>(&self, task: F) -> Queued<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job = async move {
            let _ = tx.send(task.await);
        }
        .boxed();

        self.inner.state.lock().pending.push_back(job);
        QueueInner::admit(&self.inner);
        Queued { rx }
    }

    /// Tasks currently running
    pub fn running(&self) -> usize {
        self.inner.state.lock().running
    }

    /// Tasks waiting for a slot
    pub fn pending(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    /// Maximum concurrent tasks
    pub fn limit(&self) -> usize {
        self.inner.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::sleep;

    #[tokio::test(start_paused = true)]
    async fn test_limit_is_respected() {
        let queue = RequestQueue::new(2);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..6)
            .map(|i| {
                let active = active.clone();
                let peak = peak.clone();
                queue.add(async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    sleep(Duration::from_millis(100)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    i
                })
            })
            .collect();

        assert_eq!(queue.pending(), 4);

        let results = futures::future::join_all(tasks).await;
        let results: Vec<usize> = results.into_iter().map(|r| r.unwrap()).collect();

        assert_eq!(results, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(queue.running(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fifo_admission() {
        let queue = RequestQueue::new(1);
        let order = Arc::new(Mutex::new(Vec::new()));

        let tasks: Vec<_> = (0..4)
            .map(|i| {
                let order = order.clone();
                queue.add(async move {
                    order.lock().push(i);
                    sleep(Duration::from_millis(10 * (4 - i as u64))).await;
                })
            })
            .collect();

        futures::future::join_all(tasks).await;
        assert_eq!(*order.lock(), vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_panicking_task_frees_slot() {
        let queue = RequestQueue::new(1);

        let failed = queue.add(async {
            panic!("boom");
        });
        let next = queue.add(async { 7 });

        assert_eq!(failed.await, Err::<(), _>(RequestError::Cancelled));
        assert_eq!(next.await, Ok(7));
    }

    #[test]
    fn test_zero_limit_raised() {
        assert_eq!(RequestQueue::new(0).limit(), 1);
    }
}
