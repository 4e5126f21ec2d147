mod grabber;
mod mjpeg;

pub use grabber::FrameGrabber;
pub use mjpeg::MjpegCapture;

use image::RgbImage;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },
    #[error("Stream not connected; call connect() first")]
    NotConnected,
    #[error("Failed to decode frame: {0}")]
    Decode(String),
    #[error("Stream ended")]
    StreamEnded,
}

pub type Result<T> = std::result::Result<T, CaptureError>;

/// Trait for camera frame sources.
///
/// `capture_frame` blocks until the next frame has been decoded. This is the
/// synchronous, decode-on-demand variant; wrap a source in a
/// [`FrameGrabber`] to decode on a background worker instead.
pub trait CaptureSource: Send {
    /// Open the connection to the stream.
    fn connect(&mut self) -> Result<()>;

    /// Block until the next frame is decoded and return it.
    fn capture_frame(&mut self) -> Result<RgbImage>;

    /// Stream address, for logging.
    fn url(&self) -> &str;
}
