mod latest;
mod snapshot;

pub use latest::{FrameHandle, LatestFrameSink};
pub use snapshot::SnapshotSink;

use anyhow::Result;
use image::RgbImage;

/// Channel ordering a sink expects its pixels in.
///
/// Frames flow through the pipeline as RGB; the display loop reorders
/// channels just before presenting when a sink wants BGR.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelOrder {
    Rgb,
    Bgr,
}

/// Swap an RGB buffer into the requested channel order.
pub fn reorder_channels(frame: &RgbImage, order: ChannelOrder) -> RgbImage {
    match order {
        ChannelOrder::Rgb => frame.clone(),
        ChannelOrder::Bgr => {
            let mut swapped = frame.clone();
            for pixel in swapped.pixels_mut() {
                pixel.0.swap(0, 2);
            }
            swapped
        }
    }
}

/// Trait for presentation sinks.
///
/// A sink accepts one color image per call and fully replaces whatever it
/// showed previously.
pub trait DisplaySink {
    /// Pixel channel order this sink expects.
    fn channel_order(&self) -> ChannelOrder {
        ChannelOrder::Rgb
    }

    /// Show `frame`, replacing the previously shown image.
    fn present(&mut self, frame: RgbImage) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bgr_reorder_swaps_red_and_blue() {
        let frame = RgbImage::from_pixel(2, 2, image::Rgb([10, 20, 30]));

        let bgr = reorder_channels(&frame, ChannelOrder::Bgr);
        assert_eq!(bgr.get_pixel(0, 0).0, [30, 20, 10]);

        let rgb = reorder_channels(&frame, ChannelOrder::Rgb);
        assert_eq!(rgb.get_pixel(1, 1).0, [10, 20, 30]);
    }
}
