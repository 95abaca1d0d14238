//! Deterministic fakes shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use crate::domain::entities::DecodedImage;
use crate::domain::errors::{FetchError, FetchResult};
use crate::domain::ports::{NetworkTransport, ProgressFn, Sleeper, TransportRequest};

/// Returns a small decoded image for cache and delivery tests.
pub fn test_image(width: u32, height: u32) -> DecodedImage {
    Arc::new(image::DynamicImage::new_rgb8(width, height))
}

/// Returns valid PNG bytes for a small image, for decode paths.
pub fn png_bytes(width: u32, height: u32) -> Bytes {
    let image = image::DynamicImage::new_rgb8(width, height);
    let mut buffer = std::io::Cursor::new(Vec::new());
    image
        .write_to(&mut buffer, image::ImageFormat::Png)
        .expect("encoding a fresh image cannot fail");
    Bytes::from(buffer.into_inner())
}

/// Scripted transport: each URL has a queue of outcomes, consumed one per
/// attempt. URLs without a script resolve to a valid 2x2 PNG. Calls are
/// recorded in order; a gated URL blocks inside `fetch` until released, so
/// tests can interleave requests with an in-flight download.
pub struct FakeTransport {
    script: Mutex<HashMap<String, VecDeque<FetchResult<Bytes>>>>,
    gates: Mutex<HashMap<String, Arc<Semaphore>>>,
    calls: Mutex<Vec<String>>,
    started: Mutex<Option<tokio::sync::mpsc::UnboundedSender<String>>>,
    progress_script: Mutex<Vec<f64>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            started: Mutex::new(None),
            progress_script: Mutex::new(Vec::new()),
        })
    }

    /// Queues the next outcome for `url`.
    pub fn push_response(&self, url: &str, response: FetchResult<Bytes>) {
        self.script
            .lock()
            .entry(url.to_owned())
            .or_default()
            .push_back(response);
    }

    /// Makes `fetch` for `url` block until [`FakeTransport::release`].
    pub fn gate(&self, url: &str) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.gates.lock().insert(url.to_owned(), gate.clone());
        gate
    }

    /// Unblocks one gated attempt for `url`.
    pub fn release(&self, url: &str) {
        if let Some(gate) = self.gates.lock().get(url) {
            gate.add_permits(1);
        }
    }

    /// Registers a channel notified with the URL when an attempt starts.
    pub fn notify_started(&self) -> tokio::sync::mpsc::UnboundedReceiver<String> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        *self.started.lock() = Some(tx);
        rx
    }

    /// Emits these progress values (in order) during every attempt.
    pub fn set_progress(&self, values: Vec<f64>) {
        *self.progress_script.lock() = values;
    }

    /// URLs fetched so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Number of attempts made for `url`.
    pub fn call_count(&self, url: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.as_str() == url).count()
    }
}

#[async_trait]
impl NetworkTransport for FakeTransport {
    async fn fetch(&self, request: TransportRequest, progress: ProgressFn) -> FetchResult<Bytes> {
        self.calls.lock().push(request.url.clone());
        if let Some(tx) = self.started.lock().as_ref() {
            let _ = tx.send(request.url.clone());
        }
        let gate = self.gates.lock().get(&request.url).cloned();
        if let Some(gate) = gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|_| FetchError::Cancelled)?;
            permit.forget();
        }
        for value in self.progress_script.lock().iter() {
            progress(*value);
        }
        let scripted = self
            .script
            .lock()
            .get_mut(&request.url)
            .and_then(VecDeque::pop_front);
        match scripted {
            Some(outcome) => outcome,
            None => {
                progress(1.0);
                Ok(png_bytes(2, 2))
            }
        }
    }
}

/// Sleeper that records requested durations and returns immediately, so
/// backoff sequences are assertable without waiting.
#[derive(Default)]
pub struct RecordingSleeper {
    slept: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn slept(&self) -> Vec<Duration> {
        self.slept.lock().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.slept.lock().push(duration);
    }
}
