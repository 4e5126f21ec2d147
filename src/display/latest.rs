use super::DisplaySink;
use anyhow::Result;
use image::RgbImage;
use std::sync::{Arc, Mutex};

type Slot = Arc<Mutex<Option<Arc<RgbImage>>>>;

/// Read side of [`LatestFrameSink`]: whatever layer renders the dashboard
/// polls this for the image to show.
#[derive(Clone, Default)]
pub struct FrameHandle {
    slot: Slot,
}

impl FrameHandle {
    /// Most recently presented frame, or `None` before the first present.
    pub fn latest(&self) -> Option<Arc<RgbImage>> {
        match self.slot.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

/// In-process presentation sink holding only the most recent frame.
///
/// Each `present` replaces the previous image wholesale; a handle returned
/// by [`handle`](LatestFrameSink::handle) observes the replacement but never
/// a partially written image.
#[derive(Default)]
pub struct LatestFrameSink {
    slot: Slot,
}

impl LatestFrameSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> FrameHandle {
        FrameHandle {
            slot: self.slot.clone(),
        }
    }
}

impl DisplaySink for LatestFrameSink {
    fn present(&mut self, frame: RgbImage) -> Result<()> {
        let frame = Arc::new(frame);
        match self.slot.lock() {
            Ok(mut guard) => *guard = Some(frame),
            Err(poisoned) => *poisoned.into_inner() = Some(frame),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_sees_replacement() {
        let mut sink = LatestFrameSink::new();
        let handle = sink.handle();

        assert!(handle.latest().is_none());

        sink.present(RgbImage::from_pixel(2, 2, image::Rgb([1, 1, 1])))
            .unwrap();
        assert_eq!(handle.latest().unwrap().get_pixel(0, 0)[0], 1);

        sink.present(RgbImage::from_pixel(2, 2, image::Rgb([9, 9, 9])))
            .unwrap();
        assert_eq!(handle.latest().unwrap().get_pixel(0, 0)[0], 9);
    }
}
