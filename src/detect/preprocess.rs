use image::{imageops, RgbImage};
use ndarray::Array4;

/// Converts RGB frames into normalized NCHW tensors at the model's input
/// resolution.
pub struct Preprocessor {
    target_width: u32,
    target_height: u32,
}

impl Preprocessor {
    pub fn new(target_width: u32, target_height: u32) -> Self {
        Self {
            target_width,
            target_height,
        }
    }

    /// Resize to the model input size, scale to [0, 1] and transpose from
    /// HWC to NCHW. Returns shape `[1, 3, height, width]`.
    pub fn preprocess(&self, image: &RgbImage) -> Array4<f32> {
        let _span = tracing::debug_span!("preprocess").entered();

        let resized;
        let source = if image.dimensions() == (self.target_width, self.target_height) {
            image
        } else {
            resized = imageops::resize(
                image,
                self.target_width,
                self.target_height,
                imageops::FilterType::Triangle,
            );
            &resized
        };

        let mut tensor = Array4::<f32>::zeros((
            1,
            3,
            self.target_height as usize,
            self.target_width as usize,
        ));
        for (x, y, pixel) in source.enumerate_pixels() {
            for ch in 0..3 {
                tensor[[0, ch, y as usize, x as usize]] = pixel[ch] as f32 / 255.0;
            }
        }

        tensor
    }
}
