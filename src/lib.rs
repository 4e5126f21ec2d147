//! streetwatch: object detection over public CCTV streams.
//!
//! The pieces line up as a pipeline: a [`registry::SourceRegistry`] names
//! the cameras, a [`capture::CaptureSource`] (optionally wrapped in a
//! [`capture::FrameGrabber`]) produces frames, a [`detect::Detector`] finds
//! objects, [`overlay`] draws them, and [`session::run_session`] drives the
//! whole loop into a [`display::DisplaySink`].

pub mod capture;
pub mod detect;
pub mod display;
pub mod overlay;
pub mod registry;
pub mod session;

pub use capture::{CaptureSource, FrameGrabber, MjpegCapture};
pub use detect::{Detection, Detector, YoloDetector};
pub use display::{DisplaySink, FrameHandle, LatestFrameSink, SnapshotSink};
pub use registry::SourceRegistry;
pub use session::{run_session, FeedMode, SessionConfig, StopToken};
