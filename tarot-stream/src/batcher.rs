//! Paint-aligned coalescing of text updates.
//!
//! A streaming reply can produce hundreds of deltas per second, far more than
//! a display can paint. [`RenderBatcher`] records only the latest full text
//! and renders it at most once per frame, with a guaranteed final flush on
//! [`RenderBatcher::complete`].
//!
//! Frames come from an injected [`FrameScheduler`]: [`TokioFrameScheduler`]
//! for real use, [`ManualScheduler`] when frames should be pumped by hand.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Default frame interval (one paint at 60 Hz).
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(16);

/// Callback run when a frame fires.
pub type FrameCallback = Box<dyn FnOnce() + Send + 'static>;

/// Identifies a requested frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameHandle(u64);

impl FrameHandle {
    /// Raw id.
    pub fn id(self) -> u64 {
        self.0
    }
}

/// Schedules callbacks on the next paint opportunity.
///
/// Implementations must never run the callback from inside `request_frame`.
pub trait FrameScheduler: Send + Sync {
    /// Run `callback` on the next frame.
    fn request_frame(&self, callback: FrameCallback) -> FrameHandle;

    /// Cancel a requested frame. Unknown or already fired handles are ignored.
    fn cancel_frame(&self, handle: FrameHandle);
}

/// Scheduler whose frames fire only when [`ManualScheduler::pump`] is called.
#[derive(Default)]
pub struct ManualScheduler {
    next_id: AtomicU64,
    queue: Mutex<Vec<(FrameHandle, FrameCallback)>>,
}

impl ManualScheduler {
    /// Create an empty scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of frames waiting to fire.
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Fire every frame queued so far. Returns how many fired.
    ///
    /// Frames requested by the callbacks themselves wait for the next pump.
    pub fn pump(&self) -> usize {
        let frames = std::mem::take(&mut *self.queue.lock());
        let fired = frames.len();
        for (_, callback) in frames {
            callback();
        }
        fired
    }
}

impl FrameScheduler for ManualScheduler {
    fn request_frame(&self, callback: FrameCallback) -> FrameHandle {
        let handle = FrameHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.queue.lock().push((handle, callback));
        handle
    }

    fn cancel_frame(&self, handle: FrameHandle) {
        self.queue.lock().retain(|(queued, _)| *queued != handle);
    }
}

impl fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualScheduler")
            .field("pending", &self.pending())
            .finish()
    }
}

/// Scheduler that fires frames on a fixed interval using tokio timers.
#[derive(Debug)]
pub struct TokioFrameScheduler {
    runtime: Handle,
    interval: Duration,
    next_id: AtomicU64,
    tasks: Arc<Mutex<HashMap<FrameHandle, JoinHandle<()>>>>,
}

impl TokioFrameScheduler {
    /// Create a scheduler on the current runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn new(interval: Duration) -> Self {
        Self::with_handle(Handle::current(), interval)
    }

    /// Create a scheduler on a specific runtime.
    pub fn with_handle(runtime: Handle, interval: Duration) -> Self {
        Self {
            runtime,
            interval,
            next_id: AtomicU64::new(0),
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Get the frame interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl FrameScheduler for TokioFrameScheduler {
    fn request_frame(&self, callback: FrameCallback) -> FrameHandle {
        let handle = FrameHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        let interval = self.interval;
        let tasks = Arc::clone(&self.tasks);

        // Hold the map lock until the task is registered so it cannot
        // deregister itself first.
        let mut registered = self.tasks.lock();
        let task = self.runtime.spawn(async move {
            tokio::time::sleep(interval).await;
            tasks.lock().remove(&handle);
            callback();
        });
        registered.insert(handle, task);
        handle
    }

    fn cancel_frame(&self, handle: FrameHandle) {
        if let Some(task) = self.tasks.lock().remove(&handle) {
            task.abort();
        }
    }
}

/// Counters reported by [`RenderBatcher::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    /// Calls to `update` that were recorded.
    pub updates: u64,
    /// Calls made to the render callback.
    pub renders: u64,
}

#[derive(Debug, Default)]
struct BatchState {
    latest: String,
    dirty: bool,
    scheduled: Option<FrameHandle>,
    complete: bool,
    stats: BatchStats,
}

impl BatchState {
    /// Take the latest text if it has not been rendered yet.
    fn take_unrendered(&mut self) -> Option<String> {
        if !std::mem::take(&mut self.dirty) {
            return None;
        }
        self.take_latest()
    }

    /// Take the latest text for rendering, whether or not it was painted.
    fn take_latest(&mut self) -> Option<String> {
        self.dirty = false;
        if self.latest.is_empty() {
            return None;
        }
        self.stats.renders += 1;
        Some(self.latest.clone())
    }
}

type RenderFn = Box<dyn Fn(&str) + Send + Sync>;

struct BatcherInner {
    state: Mutex<BatchState>,
    // Serializes render calls. Taken before `state`, never while holding it.
    render_lock: Mutex<()>,
    scheduler: Arc<dyn FrameScheduler>,
    render: RenderFn,
}

impl BatcherInner {
    fn paint(&self) {
        let _rendering = self.render_lock.lock();
        let text = {
            let mut state = self.state.lock();
            state.scheduled = None;
            if state.complete {
                return;
            }
            state.take_unrendered()
        };
        if let Some(text) = text {
            trace!(len = text.len(), "render batcher paint");
            (self.render)(&text);
        }
    }
}

/// Coalesces full-text updates into at most one render per frame.
///
/// Clones share the same state.
#[derive(Clone)]
pub struct RenderBatcher {
    inner: Arc<BatcherInner>,
}

impl RenderBatcher {
    /// Create a batcher that renders through `render`.
    pub fn new<F>(scheduler: Arc<dyn FrameScheduler>, render: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(BatcherInner {
                state: Mutex::new(BatchState::default()),
                render_lock: Mutex::new(()),
                scheduler,
                render: Box::new(render),
            }),
        }
    }

    /// Record the latest full text and schedule a frame if none is pending.
    ///
    /// A newer value overwrites an older one that has not been rendered yet.
    /// Ignored after [`complete`](Self::complete) or [`abandon`](Self::abandon).
    pub fn update(&self, text: impl Into<String>) {
        let mut state = self.inner.state.lock();
        if state.complete {
            trace!("render batcher update after completion ignored");
            return;
        }

        state.latest = text.into();
        state.dirty = true;
        state.stats.updates += 1;

        if state.scheduled.is_none() {
            let inner: Weak<BatcherInner> = Arc::downgrade(&self.inner);
            let handle = self.inner.scheduler.request_frame(Box::new(move || {
                if let Some(inner) = inner.upgrade() {
                    inner.paint();
                }
            }));
            state.scheduled = Some(handle);
        }
    }

    /// Stop scheduling and synchronously render the last recorded value.
    ///
    /// The final render happens even if a frame already painted that value,
    /// and it is never followed by a render from a frame still in flight.
    /// Calling it again does nothing. The render callback must not call it.
    pub fn complete(&self) {
        let handle = {
            let mut state = self.inner.state.lock();
            if state.complete {
                return;
            }
            state.complete = true;
            state.scheduled.take()
        };

        if let Some(handle) = handle {
            self.inner.scheduler.cancel_frame(handle);
        }

        let _rendering = self.inner.render_lock.lock();
        let (text, stats) = {
            let mut state = self.inner.state.lock();
            (state.take_latest(), state.stats)
        };
        if let Some(text) = text {
            (self.inner.render)(&text);
        }
        debug!(
            updates = stats.updates,
            renders = stats.renders,
            "render batcher completed"
        );
    }

    /// Stop scheduling without a final render, for a render target that is gone.
    pub fn abandon(&self) {
        let handle = {
            let mut state = self.inner.state.lock();
            if state.complete {
                return;
            }
            state.complete = true;
            state.dirty = false;
            state.scheduled.take()
        };

        if let Some(handle) = handle {
            self.inner.scheduler.cancel_frame(handle);
        }
        debug!("render batcher abandoned");
    }

    /// Check if the batcher has been completed or abandoned.
    pub fn is_complete(&self) -> bool {
        self.inner.state.lock().complete
    }

    /// Check if a frame is currently scheduled.
    pub fn is_scheduled(&self) -> bool {
        self.inner.state.lock().scheduled.is_some()
    }

    /// Get the update and render counters.
    pub fn stats(&self) -> BatchStats {
        self.inner.state.lock().stats
    }
}

impl fmt::Debug for RenderBatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("RenderBatcher")
            .field("dirty", &state.dirty)
            .field("scheduled", &state.scheduled)
            .field("complete", &state.complete)
            .field("stats", &state.stats)
            .finish()
    }
}
