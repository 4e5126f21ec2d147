use super::{CaptureSource, Result};
use image::RgbImage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// Pause between decodes so a fast stream does not monopolize a core
/// decoding frames nobody will read.
const WORKER_YIELD: Duration = Duration::from_millis(10);

type FrameSlot = Arc<Mutex<Option<Arc<RgbImage>>>>;

/// Background frame grabber.
///
/// Owns one worker thread that decodes continuously from a
/// [`CaptureSource`] and publishes only the newest frame. Readers never
/// block on I/O: [`read`](FrameGrabber::read) hands out the latest decoded
/// frame or `None` if nothing has been decoded yet.
///
/// The slot holds a whole `Arc<RgbImage>` and is replaced wholesale under a
/// mutex, so a reader can never observe a partially written frame; a
/// published snapshot is never mutated, only superseded.
pub struct FrameGrabber {
    latest: FrameSlot,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl FrameGrabber {
    /// Connect the source and launch the worker. Returns as soon as the
    /// worker is running; allow a short warm-up before expecting frames
    /// (stream buffering).
    pub fn start(mut source: Box<dyn CaptureSource>) -> Result<Self> {
        source.connect()?;

        let latest: FrameSlot = Arc::new(Mutex::new(None));
        let stop = Arc::new(AtomicBool::new(false));

        let worker = {
            let latest = latest.clone();
            let stop = stop.clone();
            std::thread::spawn(move || grab_loop(source, latest, stop))
        };

        Ok(Self {
            latest,
            stop,
            worker: Some(worker),
        })
    }

    /// Latest decoded frame, or `None` before the first successful decode.
    /// Never blocks on the stream.
    pub fn read(&self) -> Option<Arc<RgbImage>> {
        match self.latest.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Request the worker to stop at the top of its next iteration.
    ///
    /// Best-effort: does not wait for the worker to exit, so a decode that is
    /// already in flight may publish one more frame. Nothing reads the slot
    /// after teardown, so that late write is benign.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// True once the worker has exited, whether by `stop()` or because the
    /// stream died. The display loop uses this to decide on a reconnect.
    pub fn is_finished(&self) -> bool {
        self.worker.as_ref().map(|w| w.is_finished()).unwrap_or(true)
    }

    /// Stop and wait for the worker to exit.
    pub fn shutdown(mut self) {
        self.stop();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for FrameGrabber {
    fn drop(&mut self) {
        self.stop();
    }
}

fn grab_loop(mut source: Box<dyn CaptureSource>, latest: FrameSlot, stop: Arc<AtomicBool>) {
    tracing::debug!("Frame grabber worker started for {}", source.url());

    while !stop.load(Ordering::SeqCst) {
        match source.capture_frame() {
            Ok(frame) => {
                let frame = Arc::new(frame);
                match latest.lock() {
                    Ok(mut guard) => *guard = Some(frame),
                    Err(poisoned) => *poisoned.into_inner() = Some(frame),
                }
            }
            Err(e) => {
                // Connection presumed dead; the reader sees is_finished() and
                // decides whether to restart us.
                tracing::warn!("Frame grabber for {} stopping: {}", source.url(), e);
                break;
            }
        }

        std::thread::sleep(WORKER_YIELD);
    }

    tracing::debug!("Frame grabber worker for {} exited", source.url());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CaptureError;
    use std::sync::atomic::AtomicUsize;

    /// Source that yields a scripted sequence of solid-color frames, then
    /// fails as if the stream died.
    struct ScriptedSource {
        frames: Vec<RgbImage>,
        cursor: usize,
        connected: bool,
        fail_connect: bool,
    }

    impl ScriptedSource {
        fn new(count: usize) -> Self {
            let frames = (0..count)
                .map(|i| RgbImage::from_pixel(4, 4, image::Rgb([i as u8, 0, 0])))
                .collect();
            Self {
                frames,
                cursor: 0,
                connected: false,
                fail_connect: false,
            }
        }

        fn failing_to_connect() -> Self {
            let mut source = Self::new(0);
            source.fail_connect = true;
            source
        }
    }

    impl CaptureSource for ScriptedSource {
        fn connect(&mut self) -> Result<()> {
            if self.fail_connect {
                return Err(CaptureError::Connect {
                    url: "test://cam".to_string(),
                    reason: "offline".to_string(),
                });
            }
            self.connected = true;
            Ok(())
        }

        fn capture_frame(&mut self) -> Result<RgbImage> {
            if !self.connected {
                return Err(CaptureError::NotConnected);
            }
            let frame = self.frames.get(self.cursor).cloned();
            self.cursor += 1;
            frame.ok_or(CaptureError::StreamEnded)
        }

        fn url(&self) -> &str {
            "test://cam"
        }
    }

    /// Source whose first decode is slow and then fails, to pin down
    /// read-before-first-decode.
    struct StalledSource {
        polls: Arc<AtomicUsize>,
    }

    impl CaptureSource for StalledSource {
        fn connect(&mut self) -> Result<()> {
            Ok(())
        }

        fn capture_frame(&mut self) -> Result<RgbImage> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(50));
            Err(CaptureError::StreamEnded)
        }

        fn url(&self) -> &str {
            "test://stalled"
        }
    }

    fn wait_until(grabber: &FrameGrabber, pred: impl Fn(&FrameGrabber) -> bool) {
        for _ in 0..200 {
            if pred(grabber) {
                return;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        panic!("condition not reached within timeout");
    }

    #[test]
    fn read_before_first_decode_is_none() {
        let polls = Arc::new(AtomicUsize::new(0));
        let grabber = FrameGrabber::start(Box::new(StalledSource {
            polls: polls.clone(),
        }))
        .unwrap();

        // The worker is still inside its first (slow, failing) decode.
        assert!(grabber.read().is_none());
        grabber.shutdown();
    }

    #[test]
    fn read_returns_most_recent_frame() {
        let grabber = FrameGrabber::start(Box::new(ScriptedSource::new(3))).unwrap();
        // Worker exits once the script runs out; by then the slot holds the
        // last frame of the sequence.
        wait_until(&grabber, |g| g.is_finished());

        let frame = grabber.read().expect("frame after decode");
        assert_eq!(frame.get_pixel(0, 0)[0], 2);
        grabber.shutdown();
    }

    #[test]
    fn stop_then_read_does_not_panic() {
        let grabber = FrameGrabber::start(Box::new(ScriptedSource::new(100))).unwrap();
        grabber.stop();
        // Regardless of worker timing, read stays safe.
        let _ = grabber.read();
        let _ = grabber.read();
        grabber.shutdown();
    }

    #[test]
    fn worker_exits_on_decode_failure() {
        let grabber = FrameGrabber::start(Box::new(ScriptedSource::new(1))).unwrap();
        wait_until(&grabber, |g| g.is_finished());
        // No retry and no recovery inside the grabber itself.
        assert!(grabber.is_finished());
        grabber.shutdown();
    }

    #[test]
    fn connect_failure_surfaces_from_start() {
        let result = FrameGrabber::start(Box::new(ScriptedSource::failing_to_connect()));
        assert!(matches!(result, Err(CaptureError::Connect { .. })));
    }
}
