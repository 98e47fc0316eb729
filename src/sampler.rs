// Metric sampling primitives
//
// One shared ticking source drives every monitor instead of each running
// its own timer, and the render loop reports frame times through a
// lock-free SPSC queue so the hot path never takes a lock.
//
// Buffer flow for frame timing:
// 1. Render loop calls FrameTap::frame() each animation frame
// 2. Timestamps land in the SPSC queue (bounded, drops when full)
// 3. The governance tick drains the queue via FrameDrain
// 4. Deltas become FPS samples in a bounded SampleWindow

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use rtrb::{Consumer, Producer, RingBuffer};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Default SPSC capacity for the frame tap. At 60fps and a 100ms drain
/// period, 6-7 frames accumulate per tick; 256 leaves generous headroom
/// for drain stalls.
pub const DEFAULT_FRAME_TAP_CAPACITY: usize = 256;

/// A single observed metric value at a monotonic timestamp.
///
/// Immutable once recorded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub value: f64,
    pub timestamp_ms: u64,
}

impl MetricSample {
    pub fn new(value: f64, timestamp_ms: u64) -> Self {
        Self {
            value,
            timestamp_ms,
        }
    }
}

/// Bounded FIFO ring of metric samples.
///
/// Oldest sample is evicted on overflow; remaining elements always stay in
/// chronological order because samples are appended from a single
/// monitor's own periodic callback.
#[derive(Debug, Clone)]
pub struct SampleWindow {
    samples: std::collections::VecDeque<MetricSample>,
    capacity: usize,
}

impl SampleWindow {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be greater than 0");
        Self {
            samples: std::collections::VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, sample: MetricSample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn first(&self) -> Option<&MetricSample> {
        self.samples.front()
    }

    pub fn last(&self) -> Option<&MetricSample> {
        self.samples.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MetricSample> {
        self.samples.iter()
    }

    /// Most recent `n` samples, oldest first.
    pub fn tail(&self, n: usize) -> Vec<MetricSample> {
        let skip = self.samples.len().saturating_sub(n);
        self.samples.iter().skip(skip).copied().collect()
    }

    pub fn mean(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().map(|s| s.value).sum::<f64>() / self.samples.len() as f64
    }

    pub fn variance(&self) -> f64 {
        if self.samples.len() < 2 {
            return 0.0;
        }
        let mean = self.mean();
        self.samples
            .iter()
            .map(|s| (s.value - mean).powi(2))
            .sum::<f64>()
            / self.samples.len() as f64
    }
}

/// Producer half of the frame-time tap, handed to the render loop.
///
/// `frame()` is wait-free; when the queue is full the frame timestamp is
/// dropped, which is acceptable because drops only happen when the drain
/// side has already stalled and a stall is detected elsewhere.
pub struct FrameTap {
    producer: Producer<u64>,
}

impl FrameTap {
    /// Record one rendered frame at the given monotonic timestamp.
    pub fn frame(&mut self, timestamp_ms: u64) {
        let _ = self.producer.push(timestamp_ms);
    }
}

/// Consumer half of the frame-time tap, drained by the governance tick.
pub struct FrameDrain {
    consumer: Consumer<u64>,
}

impl FrameDrain {
    /// Pop all pending frame timestamps, oldest first.
    pub fn drain(&mut self) -> Vec<u64> {
        let mut out = Vec::new();
        while let Ok(ts) = self.consumer.pop() {
            out.push(ts);
        }
        out
    }
}

/// Create a connected frame tap with the given queue capacity.
pub fn frame_tap(capacity: usize) -> (FrameTap, FrameDrain) {
    assert!(capacity > 0, "capacity must be greater than 0");
    let (producer, consumer) = RingBuffer::new(capacity);
    (FrameTap { producer }, FrameDrain { consumer })
}

/// Converts drained frame timestamps into FPS samples over a bounded
/// window.
#[derive(Debug)]
pub struct FpsSampler {
    last_frame_ms: Option<u64>,
    window: SampleWindow,
}

impl FpsSampler {
    pub fn new(window_capacity: usize) -> Self {
        Self {
            last_frame_ms: None,
            window: SampleWindow::new(window_capacity),
        }
    }

    /// Ingest one frame timestamp; produces an FPS sample once two frames
    /// have been seen. Zero-duration gaps are ignored.
    pub fn record_frame(&mut self, timestamp_ms: u64) -> Option<MetricSample> {
        let sample = match self.last_frame_ms {
            Some(prev) if timestamp_ms > prev => {
                let delta_ms = (timestamp_ms - prev) as f64;
                Some(MetricSample::new(1000.0 / delta_ms, timestamp_ms))
            }
            _ => None,
        };
        self.last_frame_ms = Some(timestamp_ms);
        if let Some(s) = sample {
            self.window.push(s);
        }
        sample
    }

    /// Smoothed FPS over the current window; 0 before any frames.
    pub fn current_fps(&self) -> f64 {
        self.window.mean()
    }

    pub fn window(&self) -> &SampleWindow {
        &self.window
    }
}

type TickCallback = Box<dyn FnMut(u64) + Send>;

/// Handle returned by [`SharedTicker::register`]; dropping it does not
/// unregister, callers must call [`SharedTicker::unregister`] during their
/// own teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TickerSubscription(u64);

/// Single periodic ticking source shared by all monitors.
///
/// Subscribers register callbacks instead of creating their own
/// intervals; a runtime wrapper (or a test) drives `tick(now)` at the
/// configured period. Registration and removal are independently
/// revocable per subscriber.
pub struct SharedTicker {
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<u64, TickCallback>>,
    period_ms: u64,
}

impl SharedTicker {
    pub fn new(period_ms: u64) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            subscribers: Mutex::new(HashMap::new()),
            period_ms,
        }
    }

    pub fn period_ms(&self) -> u64 {
        self.period_ms
    }

    pub fn register<F>(&self, callback: F) -> TickerSubscription
    where
        F: FnMut(u64) + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.insert(id, Box::new(callback));
        }
        TickerSubscription(id)
    }

    /// Remove a subscriber. Unknown ids are a no-op.
    pub fn unregister(&self, subscription: TickerSubscription) {
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.remove(&subscription.0);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// Invoke every registered callback with the current time.
    pub fn tick(&self, now_ms: u64) {
        match self.subscribers.lock() {
            Ok(mut subs) => {
                for callback in subs.values_mut() {
                    callback(now_ms);
                }
            }
            Err(_) => warn!("shared ticker subscriber map poisoned; tick skipped"),
        }
    }
}

/// Convenience: a ticker shared behind an Arc for cross-task wiring.
pub type SharedTickerHandle = Arc<SharedTicker>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_window_bound_and_order() {
        let mut window = SampleWindow::new(3);
        for i in 0..10u64 {
            window.push(MetricSample::new(i as f64, i * 100));
        }
        assert_eq!(window.len(), 3, "window must never exceed capacity");
        let timestamps: Vec<u64> = window.iter().map(|s| s.timestamp_ms).collect();
        assert_eq!(
            timestamps,
            vec![700, 800, 900],
            "eviction must preserve chronological order"
        );
    }

    #[test]
    fn test_sample_window_stats() {
        let mut window = SampleWindow::new(10);
        for (i, v) in [10.0, 20.0, 30.0].iter().enumerate() {
            window.push(MetricSample::new(*v, i as u64 * 100));
        }
        assert!((window.mean() - 20.0).abs() < 1e-9);
        assert!((window.variance() - 66.666_666).abs() < 1e-3);
    }

    #[test]
    fn test_fps_sampler_derives_from_deltas() {
        let mut sampler = FpsSampler::new(30);
        assert!(sampler.record_frame(1_000).is_none(), "first frame has no delta");
        let sample = sampler.record_frame(1_016).expect("second frame yields fps");
        assert!((sample.value - 62.5).abs() < 1e-9);

        // Zero-duration gap must be ignored, not divide by zero.
        assert!(sampler.record_frame(1_016).is_none());
    }

    #[test]
    fn test_frame_tap_circulation() {
        let (mut tap, mut drain) = frame_tap(4);
        tap.frame(100);
        tap.frame(116);
        assert_eq!(drain.drain(), vec![100, 116]);
        assert!(drain.drain().is_empty(), "drain consumes everything");
    }

    #[test]
    fn test_frame_tap_drops_when_full() {
        let (mut tap, mut drain) = frame_tap(2);
        tap.frame(1);
        tap.frame(2);
        tap.frame(3); // dropped
        assert_eq!(drain.drain(), vec![1, 2]);
    }

    #[test]
    fn test_ticker_register_unregister() {
        let ticker = SharedTicker::new(100);
        let hits = Arc::new(AtomicU64::new(0));
        let hits_clone = Arc::clone(&hits);
        let sub = ticker.register(move |_now| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });

        ticker.tick(100);
        ticker.tick(200);
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        ticker.unregister(sub);
        ticker.tick(300);
        assert_eq!(hits.load(Ordering::SeqCst), 2, "unregistered callback must not fire");
        assert_eq!(ticker.subscriber_count(), 0);

        // Unregistering twice is a no-op.
        ticker.unregister(sub);
    }

    #[test]
    fn test_frame_tap_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<FrameTap>();
        assert_send::<FrameDrain>();
    }
}
