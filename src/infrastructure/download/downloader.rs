//! Download scheduler: bounded parallelism, priority queuing, coalescing.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::task::{self, JoinHandle};
use tracing::{debug, trace, warn};

use crate::domain::entities::{DecodedImage, Priority, ResourceKey};
use crate::domain::errors::{FetchError, FetchResult};
use crate::domain::ports::{ImageDecoder, NetworkTransport, ProgressFn, RequestTemplate, Sleeper};
use crate::infrastructure::download::retry::RetryPolicy;

/// Terminal outcome of a download job, fanned out to every waiter.
pub type DownloadOutcome = FetchResult<DecodedImage>;

/// Callback receiving a job's terminal outcome, invoked outside the
/// scheduler lock.
pub type CompletionFn = Box<dyn FnOnce(DownloadOutcome) + Send>;

struct JobWaiter {
    progress: Option<ProgressFn>,
    completion: CompletionFn,
}

/// An executing download. The generation id guards the terminal hook:
/// cancellation and completion race on the same key, and only the party
/// that observes a matching id may clean up and deliver.
struct Job {
    id: u64,
    waiters: Vec<JobWaiter>,
    handle: Option<JoinHandle<()>>,
    /// Highest progress value fanned out so far. Keeps each subscriber's
    /// sequence non-decreasing across retries, which restart at zero.
    high_water: f64,
}

struct QueuedRequest {
    key: ResourceKey,
    url: String,
    waiters: Vec<JobWaiter>,
}

struct SchedulerState {
    in_flight: HashMap<ResourceKey, Job>,
    queued_high: VecDeque<QueuedRequest>,
    queued_low: VecDeque<QueuedRequest>,
    slots_used: u32,
    max_concurrent: u32,
    next_job_id: u64,
}

impl SchedulerState {
    fn queued_mut(&mut self, key: &ResourceKey) -> Option<&mut QueuedRequest> {
        self.queued_high
            .iter_mut()
            .chain(self.queued_low.iter_mut())
            .find(|r| &r.key == key)
    }

    fn take_queued(&mut self, key: &ResourceKey) -> Option<QueuedRequest> {
        for queue in [&mut self.queued_high, &mut self.queued_low] {
            if let Some(pos) = queue.iter().position(|r| &r.key == key) {
                return queue.remove(pos);
            }
        }
        None
    }
}

/// What a lock-holding scope decided to start; the spawn happens after
/// the lock is released.
struct PendingStart {
    key: ResourceKey,
    url: String,
    job_id: u64,
}

/// Bounded-parallelism download scheduler.
///
/// At most `max_concurrent` transfers run at once; excess submissions
/// queue by priority (high before low, FIFO within a class). Submissions
/// for a key that is already in flight or queued join the existing job
/// instead of fetching again. All scheduler state sits behind one lock
/// that is never held across I/O.
pub struct Downloader {
    state: Mutex<SchedulerState>,
    transport: Arc<dyn NetworkTransport>,
    decoder: Arc<dyn ImageDecoder>,
    sleeper: Arc<dyn Sleeper>,
    retry: RetryPolicy,
    template: RequestTemplate,
    /// Self-reference handed to spawned job tasks and progress closures.
    weak: Weak<Downloader>,
}

impl Downloader {
    /// Creates a scheduler with the given concurrency ceiling and
    /// per-attempt request template.
    #[must_use]
    pub fn new(
        max_concurrent: u32,
        retry: RetryPolicy,
        template: RequestTemplate,
        transport: Arc<dyn NetworkTransport>,
        decoder: Arc<dyn ImageDecoder>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            state: Mutex::new(SchedulerState {
                in_flight: HashMap::new(),
                queued_high: VecDeque::new(),
                queued_low: VecDeque::new(),
                slots_used: 0,
                max_concurrent,
                next_job_id: 0,
            }),
            transport,
            decoder,
            sleeper,
            retry,
            template,
            weak: weak.clone(),
        })
    }

    /// Submits a download for `key`.
    ///
    /// Joins the existing in-flight or queued job if one exists; otherwise
    /// starts immediately when a slot is free, or queues at the tail of
    /// the request's priority class.
    pub fn submit(
        &self,
        key: ResourceKey,
        url: String,
        priority: Priority,
        progress: Option<ProgressFn>,
        completion: CompletionFn,
    ) {
        let waiter = JobWaiter {
            progress,
            completion,
        };
        let start = {
            let mut state = self.state.lock();
            if let Some(job) = state.in_flight.get_mut(&key) {
                trace!(key = %key, "joined in-flight download");
                job.waiters.push(waiter);
                return;
            }
            if let Some(queued) = state.queued_mut(&key) {
                trace!(key = %key, "joined queued download");
                queued.waiters.push(waiter);
                return;
            }
            if state.slots_used >= state.max_concurrent {
                let request = QueuedRequest {
                    key: key.clone(),
                    url,
                    waiters: vec![waiter],
                };
                match priority {
                    Priority::High => state.queued_high.push_back(request),
                    Priority::Low => state.queued_low.push_back(request),
                }
                debug!(key = %key, ?priority, "queued download behind concurrency ceiling");
                return;
            }
            Self::start_locked(&mut state, key, url, vec![waiter])
        };
        self.spawn(start);
    }

    /// Cancels the job for `key`, aborting its transport if it is running.
    /// Every waiter receives `Err(Cancelled)` exactly once.
    pub fn cancel(&self, key: &ResourceKey) {
        let (waiters, handle, starts) = {
            let mut state = self.state.lock();
            if let Some(job) = state.in_flight.remove(key) {
                state.slots_used -= 1;
                let starts = Self::promote_next_locked(&mut state);
                (job.waiters, job.handle, starts)
            } else if let Some(queued) = state.take_queued(key) {
                (queued.waiters, None, Vec::new())
            } else {
                return;
            }
        };
        if let Some(handle) = handle {
            handle.abort();
        }
        debug!(key = %key, waiters = waiters.len(), "cancelled download");
        for start in starts {
            self.spawn(start);
        }
        for waiter in waiters {
            (waiter.completion)(Err(FetchError::Cancelled));
        }
    }

    /// Raises or lowers the concurrency ceiling, draining the queue when
    /// new slots open up.
    pub fn set_max_concurrent(&self, max_concurrent: u32) {
        let starts = {
            let mut state = self.state.lock();
            state.max_concurrent = max_concurrent;
            Self::promote_next_locked(&mut state)
        };
        for start in starts {
            self.spawn(start);
        }
    }

    /// Returns true if `key` has an in-flight or queued job.
    #[must_use]
    pub fn has_job(&self, key: &ResourceKey) -> bool {
        let mut state = self.state.lock();
        state.in_flight.contains_key(key) || state.queued_mut(key).is_some()
    }

    /// Number of currently executing jobs.
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.state.lock().in_flight.len()
    }

    /// Number of jobs queued behind the concurrency ceiling.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        let state = self.state.lock();
        state.queued_high.len() + state.queued_low.len()
    }

    fn start_locked(
        state: &mut SchedulerState,
        key: ResourceKey,
        url: String,
        waiters: Vec<JobWaiter>,
    ) -> PendingStart {
        state.slots_used += 1;
        let job_id = state.next_job_id;
        state.next_job_id += 1;
        state.in_flight.insert(
            key.clone(),
            Job {
                id: job_id,
                waiters,
                handle: None,
                high_water: 0.0,
            },
        );
        PendingStart { key, url, job_id }
    }

    /// Pops queued requests into free slots, high priority first. Invoked
    /// after every job termination.
    fn promote_next_locked(state: &mut SchedulerState) -> Vec<PendingStart> {
        let mut starts = Vec::new();
        while state.slots_used < state.max_concurrent {
            let Some(request) = state
                .queued_high
                .pop_front()
                .or_else(|| state.queued_low.pop_front())
            else {
                break;
            };
            starts.push(Self::start_locked(
                state,
                request.key,
                request.url,
                request.waiters,
            ));
        }
        starts
    }

    fn spawn(&self, start: PendingStart) {
        let Some(downloader) = self.weak.upgrade() else {
            return;
        };
        let key = start.key.clone();
        let job_id = start.job_id;
        let handle = task::spawn(async move {
            let outcome = downloader
                .execute(&start.key, &start.url, start.job_id)
                .await;
            downloader.finish(&start.key, start.job_id, outcome);
        });
        let mut state = self.state.lock();
        if let Some(job) = state.in_flight.get_mut(&key)
            && job.id == job_id
        {
            job.handle = Some(handle);
        }
    }

    /// The per-job state machine: attempt, retry with backoff, decode.
    async fn execute(&self, key: &ResourceKey, url: &str, job_id: u64) -> DownloadOutcome {
        let mut attempt = 0u32;
        loop {
            // Cancellation checkpoint before each attempt.
            if !self.alive(key, job_id) {
                return Err(FetchError::Cancelled);
            }
            let request = self.template.build(url);
            let progress = self.progress_fn(key.clone(), job_id);
            trace!(key = %key, attempt, "starting download attempt");
            match self.transport.fetch(request, progress).await {
                Ok(bytes) => {
                    // Cancellation checkpoint before decode.
                    if !self.alive(key, job_id) {
                        return Err(FetchError::Cancelled);
                    }
                    let decoder = self.decoder.clone();
                    return match task::spawn_blocking(move || decoder.decode(&bytes)).await {
                        Ok(Ok(image)) => Ok(Arc::new(image)),
                        Ok(Err(error)) => Err(error),
                        Err(join_error) => Err(FetchError::DecodingFailed(format!(
                            "decode task panicked: {join_error}"
                        ))),
                    };
                }
                Err(error) => {
                    if self.retry.should_retry(attempt, &error) {
                        let delay = self.retry.delay_for(attempt);
                        debug!(
                            key = %key,
                            attempt,
                            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                            error = %error,
                            "retrying download"
                        );
                        self.sleeper.sleep(delay).await;
                        attempt += 1;
                    } else {
                        warn!(key = %key, attempt, error = %error, "download failed");
                        return Err(error);
                    }
                }
            }
        }
    }

    /// Terminal hook, exactly once per job: under the lock, remove the
    /// job, free its slot, and promote queued work; outside the lock, fan
    /// the outcome out to every waiter.
    fn finish(&self, key: &ResourceKey, job_id: u64, outcome: DownloadOutcome) {
        let (waiters, starts) = {
            let mut state = self.state.lock();
            match state.in_flight.get(key) {
                Some(job) if job.id == job_id => {}
                // Cancelled while finishing; cancel() already delivered.
                _ => return,
            }
            let Some(job) = state.in_flight.remove(key) else {
                return;
            };
            state.slots_used -= 1;
            let starts = Self::promote_next_locked(&mut state);
            (job.waiters, starts)
        };
        for start in starts {
            self.spawn(start);
        }
        trace!(key = %key, waiters = waiters.len(), ok = outcome.is_ok(), "download finished");
        for waiter in waiters {
            (waiter.completion)(outcome.clone());
        }
    }

    fn alive(&self, key: &ResourceKey, job_id: u64) -> bool {
        self.state
            .lock()
            .in_flight
            .get(key)
            .is_some_and(|job| job.id == job_id)
    }

    fn progress_fn(&self, key: ResourceKey, job_id: u64) -> ProgressFn {
        let downloader = self.weak.clone();
        Arc::new(move |value| {
            if let Some(downloader) = downloader.upgrade() {
                downloader.forward_progress(&key, job_id, value);
            }
        })
    }

    /// Fans a progress value out to the job's current subscribers. Values
    /// at or below the job's high-water mark are dropped so every
    /// subscriber observes a non-decreasing sequence; a subscriber that
    /// joined mid-download only sees future values.
    fn forward_progress(&self, key: &ResourceKey, job_id: u64, value: f64) {
        let value = value.clamp(0.0, 1.0);
        let sinks: Vec<ProgressFn> = {
            let mut state = self.state.lock();
            let Some(job) = state.in_flight.get_mut(key) else {
                return;
            };
            if job.id != job_id || value <= job.high_water {
                return;
            }
            job.high_water = value;
            job.waiters
                .iter()
                .filter_map(|w| w.progress.clone())
                .collect()
        };
        for sink in sinks {
            sink(value);
        }
    }
}

impl std::fmt::Debug for Downloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Downloader")
            .field("in_flight", &state.in_flight.len())
            .field("queued", &(state.queued_high.len() + state.queued_low.len()))
            .field("max_concurrent", &state.max_concurrent)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::clock::TokioSleeper;
    use crate::infrastructure::decoder::DefaultDecoder;
    use crate::test_support::{FakeTransport, RecordingSleeper};
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn downloader_with(
        max_concurrent: u32,
        retry: RetryPolicy,
        transport: Arc<FakeTransport>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Arc<Downloader> {
        Downloader::new(
            max_concurrent,
            retry,
            RequestTemplate::new(Vec::new(), Duration::from_secs(30), true, None),
            transport,
            Arc::new(DefaultDecoder),
            sleeper,
        )
    }

    fn completion() -> (CompletionFn, oneshot::Receiver<DownloadOutcome>) {
        let (tx, rx) = oneshot::channel();
        (
            Box::new(move |outcome| {
                let _ = tx.send(outcome);
            }),
            rx,
        )
    }

    fn key(name: &str) -> ResourceKey {
        ResourceKey::new(name)
    }

    #[tokio::test]
    async fn test_download_delivers_decoded_image() {
        let transport = FakeTransport::new();
        let downloader = downloader_with(4, RetryPolicy::none(), transport.clone(), Arc::new(TokioSleeper));
        let (done, rx) = completion();

        downloader.submit(key("k1"), "https://a/img".into(), Priority::High, None, done);

        let image = rx.await.unwrap().unwrap();
        assert_eq!(image.width(), 2);
        assert_eq!(downloader.in_flight_count(), 0);
        assert_eq!(transport.call_count("https://a/img"), 1);
    }

    #[tokio::test]
    async fn test_coalesces_submissions_for_same_key() {
        let transport = FakeTransport::new();
        let mut started = transport.notify_started();
        transport.gate("https://a/img");
        let downloader = downloader_with(4, RetryPolicy::none(), transport.clone(), Arc::new(TokioSleeper));

        let (done_a, rx_a) = completion();
        let (done_b, rx_b) = completion();
        downloader.submit(key("k1"), "https://a/img".into(), Priority::High, None, done_a);
        started.recv().await.unwrap();
        downloader.submit(key("k1"), "https://a/img".into(), Priority::High, None, done_b);
        transport.release("https://a/img");

        assert!(rx_a.await.unwrap().is_ok());
        assert!(rx_b.await.unwrap().is_ok());
        assert_eq!(transport.call_count("https://a/img"), 1);
    }

    #[tokio::test]
    async fn test_queued_submissions_coalesce_too() {
        let transport = FakeTransport::new();
        let mut started = transport.notify_started();
        transport.gate("https://a/1");
        let downloader = downloader_with(1, RetryPolicy::none(), transport.clone(), Arc::new(TokioSleeper));

        let (done_a, rx_a) = completion();
        downloader.submit(key("k1"), "https://a/1".into(), Priority::Low, None, done_a);
        started.recv().await.unwrap();

        let (done_b, rx_b) = completion();
        let (done_c, rx_c) = completion();
        downloader.submit(key("k2"), "https://a/2".into(), Priority::Low, None, done_b);
        downloader.submit(key("k2"), "https://a/2".into(), Priority::Low, None, done_c);
        assert_eq!(downloader.pending_count(), 1);

        transport.release("https://a/1");
        assert!(rx_a.await.unwrap().is_ok());
        assert!(rx_b.await.unwrap().is_ok());
        assert!(rx_c.await.unwrap().is_ok());
        assert_eq!(transport.call_count("https://a/2"), 1);
    }

    #[tokio::test]
    async fn test_high_priority_jumps_queue() {
        let transport = FakeTransport::new();
        let mut started = transport.notify_started();
        transport.gate("https://a/first");
        let downloader = downloader_with(1, RetryPolicy::none(), transport.clone(), Arc::new(TokioSleeper));

        let (done_a, rx_a) = completion();
        downloader.submit(key("a"), "https://a/first".into(), Priority::Low, None, done_a);
        started.recv().await.unwrap();

        let (done_b, rx_b) = completion();
        downloader.submit(key("b"), "https://a/low".into(), Priority::Low, None, done_b);
        let (done_c, rx_c) = completion();
        downloader.submit(key("c"), "https://a/high".into(), Priority::High, None, done_c);

        transport.release("https://a/first");
        assert!(rx_a.await.unwrap().is_ok());
        assert!(rx_b.await.unwrap().is_ok());
        assert!(rx_c.await.unwrap().is_ok());

        assert_eq!(
            transport.calls(),
            vec![
                "https://a/first".to_owned(),
                "https://a/high".to_owned(),
                "https://a/low".to_owned(),
            ]
        );
    }

    #[tokio::test]
    async fn test_zero_concurrency_queues_until_raised() {
        let transport = FakeTransport::new();
        let downloader = downloader_with(0, RetryPolicy::none(), transport.clone(), Arc::new(TokioSleeper));

        let (done, rx) = completion();
        downloader.submit(key("k1"), "https://a/img".into(), Priority::High, None, done);
        assert_eq!(downloader.pending_count(), 1);
        assert_eq!(transport.call_count("https://a/img"), 0);

        downloader.set_max_concurrent(1);
        assert!(rx.await.unwrap().is_ok());
        assert_eq!(transport.call_count("https://a/img"), 1);
    }

    #[tokio::test]
    async fn test_retries_with_backoff_then_succeeds() {
        let transport = FakeTransport::new();
        transport.push_response("https://a/img", Err(FetchError::Network("reset".into())));
        transport.push_response("https://a/img", Err(FetchError::HttpStatus(503)));
        let sleeper = RecordingSleeper::new();
        let downloader = downloader_with(4, RetryPolicy::standard(), transport.clone(), sleeper.clone());

        let (done, rx) = completion();
        downloader.submit(key("k1"), "https://a/img".into(), Priority::High, None, done);

        assert!(rx.await.unwrap().is_ok());
        assert_eq!(transport.call_count("https://a/img"), 3);
        assert_eq!(
            sleeper.slept(),
            vec![Duration::from_secs(1), Duration::from_secs(2)]
        );
    }

    #[tokio::test]
    async fn test_no_retries_makes_first_failure_terminal() {
        let transport = FakeTransport::new();
        transport.push_response("https://a/img", Err(FetchError::Timeout));
        let downloader = downloader_with(4, RetryPolicy::none(), transport.clone(), Arc::new(TokioSleeper));

        let (done, rx) = completion();
        downloader.submit(key("k1"), "https://a/img".into(), Priority::High, None, done);

        assert!(matches!(rx.await.unwrap(), Err(FetchError::Timeout)));
        assert_eq!(transport.call_count("https://a/img"), 1);
    }

    #[tokio::test]
    async fn test_non_retryable_status_is_terminal() {
        let transport = FakeTransport::new();
        transport.push_response("https://a/img", Err(FetchError::HttpStatus(404)));
        let downloader = downloader_with(4, RetryPolicy::standard(), transport.clone(), Arc::new(TokioSleeper));

        let (done, rx) = completion();
        downloader.submit(key("k1"), "https://a/img".into(), Priority::High, None, done);

        assert!(matches!(rx.await.unwrap(), Err(FetchError::HttpStatus(404))));
        assert_eq!(transport.call_count("https://a/img"), 1);
    }

    #[tokio::test]
    async fn test_cancel_delivers_cancelled_and_frees_slot() {
        let transport = FakeTransport::new();
        let mut started = transport.notify_started();
        transport.gate("https://a/img");
        let downloader = downloader_with(1, RetryPolicy::none(), transport.clone(), Arc::new(TokioSleeper));

        let (done, rx) = completion();
        downloader.submit(key("k1"), "https://a/img".into(), Priority::High, None, done);
        started.recv().await.unwrap();

        downloader.cancel(&key("k1"));

        assert!(matches!(rx.await.unwrap(), Err(FetchError::Cancelled)));
        assert_eq!(downloader.in_flight_count(), 0);
        assert!(!downloader.has_job(&key("k1")));
    }

    #[tokio::test]
    async fn test_cancel_queued_job() {
        let transport = FakeTransport::new();
        let downloader = downloader_with(0, RetryPolicy::none(), transport.clone(), Arc::new(TokioSleeper));

        let (done, rx) = completion();
        downloader.submit(key("k1"), "https://a/img".into(), Priority::Low, None, done);
        downloader.cancel(&key("k1"));

        assert!(matches!(rx.await.unwrap(), Err(FetchError::Cancelled)));
        assert_eq!(downloader.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_progress_is_monotonic_per_subscriber() {
        let transport = FakeTransport::new();
        transport.set_progress(vec![0.25, 0.5, 0.5, 0.4, 0.75]);
        let downloader = downloader_with(4, RetryPolicy::none(), transport.clone(), Arc::new(TokioSleeper));

        let (progress_tx, mut progress_rx) = tokio::sync::mpsc::unbounded_channel();
        let progress: ProgressFn = Arc::new(move |value| {
            let _ = progress_tx.send(value);
        });
        let (done, rx) = completion();
        downloader.submit(
            key("k1"),
            "https://a/img".into(),
            Priority::High,
            Some(progress),
            done,
        );
        assert!(rx.await.unwrap().is_ok());

        let mut values = Vec::new();
        while let Ok(value) = progress_rx.try_recv() {
            values.push(value);
        }
        assert_eq!(values, vec![0.25, 0.5, 0.75, 1.0]);
    }
}
