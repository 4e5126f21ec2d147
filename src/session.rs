//! Per-session display loop: pull frames from a feed, rate-control, run
//! detection, overlay results and hand annotated frames to the sink.

use crate::capture::{CaptureError, CaptureSource, FrameGrabber};
use crate::detect::{DetectError, Detection, Detector};
use crate::display::{reorder_channels, ChannelOrder, DisplaySink};
use crate::overlay;
use image::{imageops, RgbImage};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Pause while the background feed has nothing new for us.
const POLL_IDLE: Duration = Duration::from_millis(20);
/// Log a stats line every this many published frames.
const STATS_EVERY: u64 = 30;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Detect(#[from] DetectError),
    #[error("Display sink failed: {0}")]
    Display(anyhow::Error),
    #[error("Stream lost; gave up after {attempts} reconnect attempt(s)")]
    RetriesExhausted { attempts: u32 },
}

pub type Result<T> = std::result::Result<T, SessionError>;

/// Cooperative cancellation flag shared between the loop, the binary's
/// Ctrl+C handler and any embedding UI.
///
/// The loop checks it between the skip, resize, infer and publish phases, so
/// the longest stop latency is one inference-plus-render cycle.
#[derive(Clone, Debug, Default)]
pub struct StopToken(Arc<AtomicBool>);

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Bounded reconnect policy for a stream that dies mid-session.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Reconnect attempts before the session gives up.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff for the given attempt index, capped.
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// How frames are pulled from the camera.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeedMode {
    /// Decode on demand from the loop; a slow stream stalls the iteration.
    Direct,
    /// One background worker decodes continuously; the loop polls the
    /// newest frame without blocking on I/O.
    Background,
}

/// Settings read once per session from the user-facing controls.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Minimum detection confidence, 0..=1.
    pub confidence: f32,
    /// Process every Nth observed frame; 1 = every frame.
    pub frame_skip: u32,
    /// Frames are downscaled to this resolution before inference.
    pub working_width: u32,
    pub working_height: u32,
    pub max_detections: Option<usize>,
    /// Draw the instantaneous FPS readout on published frames.
    pub show_fps: bool,
    pub retry: RetryPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            confidence: 0.5,
            frame_skip: 1,
            working_width: 800,
            working_height: 450,
            max_detections: None,
            show_fps: true,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SessionStats {
    /// Frames successfully pulled from the feed.
    pub frames_observed: u64,
    /// Frames that went through inference and were published.
    pub frames_processed: u64,
    pub reconnects: u32,
}

enum Feed {
    Direct(Box<dyn CaptureSource>),
    Background {
        grabber: FrameGrabber,
        /// Last frame handed out, so a poll that returns the same snapshot
        /// counts as "nothing new" rather than a fresh observation.
        last_seen: Option<Arc<RgbImage>>,
    },
}

impl Feed {
    fn open(
        mode: FeedMode,
        mut source: Box<dyn CaptureSource>,
    ) -> std::result::Result<Self, CaptureError> {
        match mode {
            FeedMode::Direct => {
                source.connect()?;
                Ok(Feed::Direct(source))
            }
            FeedMode::Background => Ok(Feed::Background {
                grabber: FrameGrabber::start(source)?,
                last_seen: None,
            }),
        }
    }

    /// `Ok(Some)` = a new frame; `Ok(None)` = nothing new yet (warm-up or a
    /// slow source); `Err` = the feed is dead and needs a reconnect.
    fn next_frame(&mut self) -> std::result::Result<Option<Arc<RgbImage>>, CaptureError> {
        match self {
            Feed::Direct(source) => source.capture_frame().map(|f| Some(Arc::new(f))),
            Feed::Background { grabber, last_seen } => {
                match grabber.read() {
                    Some(frame)
                        if !last_seen
                            .as_ref()
                            .map(|seen| Arc::ptr_eq(seen, &frame))
                            .unwrap_or(false) =>
                    {
                        *last_seen = Some(frame.clone());
                        Ok(Some(frame))
                    }
                    // Stale or empty slot: the stream is dead once the
                    // worker has exited, otherwise just not ready yet.
                    _ if grabber.is_finished() => Err(CaptureError::StreamEnded),
                    _ => Ok(None),
                }
            }
        }
    }

    /// Release the connection handle.
    fn teardown(self) {
        if let Feed::Background { grabber, .. } = self {
            grabber.shutdown();
        }
    }
}

/// Detections at or above the session threshold; nothing below it ever
/// reaches the overlay, whatever the backend returned.
fn above_threshold(detections: Vec<Detection>, threshold: f32) -> Vec<Detection> {
    detections
        .into_iter()
        .filter(|d| d.score >= threshold)
        .collect()
}

/// Whether the frame-skip stride selects this frame.
///
/// Convention (pinned): the first observed frame is always processed, then
/// every `skip`th after it, so 10 frames at skip 3 process frames
/// 1, 4, 7 and 10.
fn selected_by_stride(observed: u64, skip: u32) -> bool {
    (observed - 1) % skip.max(1) as u64 == 0
}

/// Run one session: open the feed, loop until the stop token trips or the
/// retry budget is exhausted, then tear the feed down.
///
/// A connection that fails on the initial open is surfaced immediately and
/// the detector is never invoked.
pub fn run_session<F>(
    mut make_source: F,
    mode: FeedMode,
    detector: &mut dyn Detector,
    sink: &mut dyn DisplaySink,
    config: &SessionConfig,
    stop: &StopToken,
) -> Result<SessionStats>
where
    F: FnMut() -> Box<dyn CaptureSource>,
{
    let mut feed = Feed::open(mode, make_source())?;
    tracing::info!(
        "Session started ({:?} feed, confidence {:.2}, skip {})",
        mode,
        config.confidence,
        config.frame_skip
    );

    let mut stats = SessionStats::default();
    let mut last_publish: Option<Instant> = None;
    let mut infer_total = Duration::ZERO;
    let mut present_total = Duration::ZERO;
    let mut window_published = 0u64;
    let mut window_start = Instant::now();

    while !stop.is_stopped() {
        let frame = match feed.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                // Warm-up or a slow source; counters do not advance.
                std::thread::sleep(POLL_IDLE);
                continue;
            }
            Err(e) => {
                tracing::warn!("Stream interrupted: {}", e);
                match reconnect(&mut make_source, mode, config, stop, &mut stats)? {
                    Some(new_feed) => {
                        feed = new_feed;
                        continue;
                    }
                    // Stopped while waiting out a backoff.
                    None => break,
                }
            }
        };
        stats.frames_observed += 1;

        if !selected_by_stride(stats.frames_observed, config.frame_skip) {
            // Skipped frames are discarded without inference.
            continue;
        }
        if stop.is_stopped() {
            break;
        }

        let mut working = if frame.dimensions() == (config.working_width, config.working_height) {
            (*frame).clone()
        } else {
            imageops::resize(
                &*frame,
                config.working_width,
                config.working_height,
                imageops::FilterType::Triangle,
            )
        };
        if stop.is_stopped() {
            break;
        }

        let infer_start = Instant::now();
        let detections = detector.detect(&working, config.confidence, config.max_detections)?;
        infer_total += infer_start.elapsed();
        let detections = above_threshold(detections, config.confidence);
        if stop.is_stopped() {
            break;
        }

        overlay::draw_detections(&mut working, &detections);
        let fps = last_publish.map(|t| 1.0 / t.elapsed().as_secs_f32().max(1e-6));
        if config.show_fps {
            if let Some(fps) = fps {
                overlay::draw_fps(&mut working, fps);
            }
        }

        let output = match sink.channel_order() {
            ChannelOrder::Rgb => working,
            order => reorder_channels(&working, order),
        };

        let present_start = Instant::now();
        sink.present(output).map_err(SessionError::Display)?;
        present_total += present_start.elapsed();
        last_publish = Some(Instant::now());
        stats.frames_processed += 1;
        window_published += 1;

        if window_published == STATS_EVERY {
            let elapsed = window_start.elapsed().as_secs_f64();
            tracing::info!(
                "Frame {}: infer={:.1}ms, present={:.1}ms, fps={:.1}",
                stats.frames_processed,
                infer_total.as_secs_f64() * 1000.0 / window_published as f64,
                present_total.as_secs_f64() * 1000.0 / window_published as f64,
                window_published as f64 / elapsed.max(1e-6),
            );
            infer_total = Duration::ZERO;
            present_total = Duration::ZERO;
            window_published = 0;
            window_start = Instant::now();
        }
    }

    feed.teardown();
    tracing::info!(
        "Session stopped ({} observed, {} published, {} reconnect(s))",
        stats.frames_observed,
        stats.frames_processed,
        stats.reconnects
    );
    Ok(stats)
}

/// Reopen a dead feed under the bounded retry policy.
///
/// `Ok(None)` means the stop token tripped while retrying; exhausting the
/// budget is an error.
fn reconnect<F>(
    make_source: &mut F,
    mode: FeedMode,
    config: &SessionConfig,
    stop: &StopToken,
    stats: &mut SessionStats,
) -> Result<Option<Feed>>
where
    F: FnMut() -> Box<dyn CaptureSource>,
{
    let policy = config.retry;
    for attempt in 0..policy.max_attempts {
        if stop.is_stopped() {
            return Ok(None);
        }
        let backoff = policy.backoff(attempt);
        tracing::info!(
            "Reconnecting in {:?} (attempt {}/{})",
            backoff,
            attempt + 1,
            policy.max_attempts
        );
        std::thread::sleep(backoff);

        match Feed::open(mode, make_source()) {
            Ok(feed) => {
                stats.reconnects += 1;
                return Ok(Some(feed));
            }
            Err(e) => tracing::warn!("Reconnect attempt {} failed: {}", attempt + 1, e),
        }
    }

    if stop.is_stopped() {
        return Ok(None);
    }
    Err(SessionError::RetriesExhausted {
        attempts: policy.max_attempts,
    })
}
