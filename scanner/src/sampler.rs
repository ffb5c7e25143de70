use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use qr_gate_common::frame::{rgba_len, FrameSource, PixelBuffer, SourceError};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum SamplerError {
    #[error("sampler is already running, stop it before starting again")]
    AlreadyRunning,
    #[error("sampling interval must be greater than zero")]
    ZeroInterval,
}

/// One sampling run: the timer task plus the gate its ticks run under.
struct ActiveRun {
    /// `true` once the run is cancelled. Every tick holds this lock for its
    /// whole body, so setting it also waits out an in-flight tick.
    cancelled: Arc<Mutex<bool>>,
    task: JoinHandle<()>,
    interval: Duration,
}

/// Periodically captures the current frame of a [`FrameSource`] and hands
/// it to a consumer.
///
/// At most one timer is active. Ticks never overlap: the capture and the
/// consumer call run synchronously inside the timer task, and a slow tick
/// pushes the next one back instead of queueing a burst.
#[derive(Default)]
pub struct FrameSampler {
    active: Option<ActiveRun>,
}

impl FrameSampler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }

    /// Cadence of the active run, if any.
    pub fn interval(&self) -> Option<Duration> {
        self.active.as_ref().map(|run| run.interval)
    }

    /// Begin sampling `source` every `interval`. The first tick fires one
    /// interval from now.
    ///
    /// Must be called from within a tokio runtime. `on_frame` must not call
    /// back into this sampler.
    pub fn start<F>(
        &mut self,
        source: Arc<dyn FrameSource>,
        interval: Duration,
        on_frame: F,
    ) -> Result<(), SamplerError>
    where
        F: FnMut(PixelBuffer) + Send + 'static,
    {
        if self.active.is_some() {
            return Err(SamplerError::AlreadyRunning);
        }
        if interval.is_zero() {
            return Err(SamplerError::ZeroInterval);
        }

        info!(
            source = source.name(),
            interval_ms = interval.as_millis() as u64,
            "sampler started"
        );
        let cancelled = Arc::new(Mutex::new(false));
        let task = tokio::spawn(run_ticks(
            source,
            interval,
            Arc::clone(&cancelled),
            on_frame,
        ));
        self.active = Some(ActiveRun {
            cancelled,
            task,
            interval,
        });
        Ok(())
    }

    /// Cancel the active timer. Returns `false` if nothing was running.
    ///
    /// Once this returns, the consumer of the cancelled run is never invoked
    /// again.
    pub fn stop(&mut self) -> bool {
        let Some(run) = self.active.take() else {
            return false;
        };
        *run.cancelled.lock().unwrap_or_else(PoisonError::into_inner) = true;
        run.task.abort();
        info!(interval_ms = run.interval.as_millis() as u64, "sampler stopped");
        true
    }

    /// `stop()` followed by `start()`.
    pub fn restart<F>(
        &mut self,
        source: Arc<dyn FrameSource>,
        interval: Duration,
        on_frame: F,
    ) -> Result<(), SamplerError>
    where
        F: FnMut(PixelBuffer) + Send + 'static,
    {
        self.stop();
        self.start(source, interval, on_frame)
    }
}

impl Drop for FrameSampler {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_ticks<F>(
    source: Arc<dyn FrameSource>,
    interval: Duration,
    cancelled: Arc<Mutex<bool>>,
    mut on_frame: F,
) where
    F: FnMut(PixelBuffer) + Send + 'static,
{
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let guard = cancelled.lock().unwrap_or_else(PoisonError::into_inner);
        if *guard {
            break;
        }
        match capture(source.as_ref()) {
            Ok(frame) => on_frame(frame),
            Err(SourceError::NotReady { width, height }) => {
                debug!(source = source.name(), width, height, "source not ready, skipping tick");
            }
            Err(e) => {
                warn!(error = %e, source = source.name(), "frame capture failed, skipping tick");
            }
        }
        drop(guard);
    }
}

/// Capture the current frame of `source` into a freshly allocated surface
/// sized to the source's intrinsic dimensions.
pub fn capture(source: &dyn FrameSource) -> Result<PixelBuffer, SourceError> {
    let (width, height) = source.dimensions();
    if width == 0 || height == 0 {
        return Err(SourceError::NotReady { width, height });
    }
    let mut surface = vec![0u8; rgba_len(width, height)];
    source.render_into(&mut surface, width, height)?;
    PixelBuffer::new(width, height, surface).map_err(|e| SourceError::Render(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

    struct FakeSource {
        width: AtomicU32,
        height: AtomicU32,
        fail_render: AtomicBool,
        renders: AtomicUsize,
    }

    impl FakeSource {
        fn new(width: u32, height: u32) -> Arc<Self> {
            Arc::new(Self {
                width: AtomicU32::new(width),
                height: AtomicU32::new(height),
                fail_render: AtomicBool::new(false),
                renders: AtomicUsize::new(0),
            })
        }

        fn resize(&self, width: u32, height: u32) {
            self.width.store(width, Ordering::SeqCst);
            self.height.store(height, Ordering::SeqCst);
        }
    }

    impl FrameSource for FakeSource {
        fn dimensions(&self) -> (u32, u32) {
            (
                self.width.load(Ordering::SeqCst),
                self.height.load(Ordering::SeqCst),
            )
        }

        fn render_into(&self, buf: &mut [u8], _w: u32, _h: u32) -> Result<(), SourceError> {
            self.renders.fetch_add(1, Ordering::SeqCst);
            if self.fail_render.load(Ordering::SeqCst) {
                return Err(SourceError::Render("camera glitch".into()));
            }
            buf.fill(0x7F);
            Ok(())
        }

        fn name(&self) -> &str {
            "fake"
        }
    }

    fn counter() -> (Arc<AtomicUsize>, impl FnMut(PixelBuffer) + Send + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        (count, move |_frame: PixelBuffer| {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    const TICK: Duration = Duration::from_millis(500);

    #[tokio::test(start_paused = true)]
    async fn delivers_frames_at_cadence() {
        let source = FakeSource::new(4, 3);
        let frames = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&frames);

        let mut sampler = FrameSampler::new();
        sampler
            .start(source, TICK, move |frame| sink.lock().unwrap().push(frame))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(1600)).await;
        let frames = frames.lock().unwrap();
        assert_eq!(frames.len(), 3);
        assert_eq!((frames[0].width(), frames[0].height()), (4, 3));
        assert!(frames[0].data().iter().all(|&b| b == 0x7F));
    }

    #[tokio::test(start_paused = true)]
    async fn first_tick_waits_one_interval() {
        let (count, on_frame) = counter();
        let mut sampler = FrameSampler::new();
        sampler.start(FakeSource::new(2, 2), TICK, on_frame).unwrap();

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_prevents_further_frames() {
        let (count, on_frame) = counter();
        let mut sampler = FrameSampler::new();
        sampler.start(FakeSource::new(2, 2), TICK, on_frame).unwrap();

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);

        assert!(sampler.stop());
        assert!(!sampler.is_running());
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent() {
        let mut sampler = FrameSampler::new();
        assert!(!sampler.stop());
        let (_count, on_frame) = counter();
        sampler.start(FakeSource::new(2, 2), TICK, on_frame).unwrap();
        assert!(sampler.stop());
        assert!(!sampler.stop());
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_is_rejected() {
        let mut sampler = FrameSampler::new();
        let (_a, first) = counter();
        let (_b, second) = counter();
        sampler.start(FakeSource::new(2, 2), TICK, first).unwrap();
        let err = sampler.start(FakeSource::new(2, 2), TICK, second).unwrap_err();
        assert!(matches!(err, SamplerError::AlreadyRunning));
        assert_eq!(sampler.interval(), Some(TICK));
    }

    #[tokio::test]
    async fn zero_interval_is_rejected() {
        let mut sampler = FrameSampler::new();
        let (_count, on_frame) = counter();
        let err = sampler
            .start(FakeSource::new(2, 2), Duration::ZERO, on_frame)
            .unwrap_err();
        assert!(matches!(err, SamplerError::ZeroInterval));
        assert!(!sampler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn not_ready_ticks_are_skipped() {
        let source = FakeSource::new(0, 0);
        let (count, on_frame) = counter();
        let mut sampler = FrameSampler::new();
        sampler.start(source.clone(), TICK, on_frame).unwrap();

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(source.renders.load(Ordering::SeqCst), 0);

        source.resize(8, 8);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn render_failure_does_not_stall_loop() {
        let source = FakeSource::new(2, 2);
        source.fail_render.store(true, Ordering::SeqCst);
        let (count, on_frame) = counter();
        let mut sampler = FrameSampler::new();
        sampler.start(source.clone(), TICK, on_frame).unwrap();

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(source.renders.load(Ordering::SeqCst), 2);

        source.fail_render.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_silences_previous_consumer() {
        let source = FakeSource::new(2, 2);
        let (old, on_old) = counter();
        let (new, on_new) = counter();
        let mut sampler = FrameSampler::new();
        sampler.start(source.clone(), TICK, on_old).unwrap();
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(old.load(Ordering::SeqCst), 1);

        sampler
            .restart(source, Duration::from_millis(250), on_new)
            .unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(old.load(Ordering::SeqCst), 1);
        assert_eq!(new.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_sampler_stops_ticks() {
        let (count, on_frame) = counter();
        let mut sampler = FrameSampler::new();
        sampler.start(FakeSource::new(2, 2), TICK, on_frame).unwrap();
        drop(sampler);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn capture_reports_not_ready() {
        let source = FakeSource::new(0, 5);
        assert!(matches!(
            capture(source.as_ref()),
            Err(SourceError::NotReady { width: 0, height: 5 })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_waits_for_in_flight_tick() {
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let mut entered_tx = Some(entered_tx);

        let mut sampler = FrameSampler::new();
        sampler
            .start(FakeSource::new(2, 2), Duration::from_millis(5), move |_frame| {
                if let Some(tx) = entered_tx.take() {
                    tx.send(()).unwrap();
                    release_rx.recv().unwrap();
                }
                c.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let released = Arc::new(AtomicBool::new(false));
        let releaser = {
            let released = Arc::clone(&released);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(100));
                released.store(true, Ordering::SeqCst);
                release_tx.send(()).unwrap();
            })
        };

        assert!(sampler.stop());
        assert!(released.load(Ordering::SeqCst), "stop returned mid-tick");
        let at_stop = count.load(Ordering::SeqCst);
        assert_eq!(at_stop, 1);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(count.load(Ordering::SeqCst), at_stop);
        releaser.join().unwrap();
    }
}
