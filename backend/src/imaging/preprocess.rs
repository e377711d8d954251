use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array3;
use serde::{Deserialize, Serialize};

/// Normalized CHW float pixels ready for a vision encoder.
pub type PixelTensor = Array3<f32>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessConfig {
    /// `[width, height]` expected by the vision encoder.
    pub size: [u32; 2],
    #[serde(default = "default_mean")]
    pub mean: [f32; 3],
    #[serde(default = "default_std")]
    pub std: [f32; 3],
}

fn default_mean() -> [f32; 3] {
    [0.5, 0.5, 0.5]
}

fn default_std() -> [f32; 3] {
    [0.5, 0.5, 0.5]
}

pub fn preprocess(image: &RgbImage, config: &PreprocessConfig) -> PixelTensor {
    let [width, height] = config.size;
    let resized = if image.dimensions() == (width, height) {
        image.clone()
    } else {
        imageops::resize(image, width, height, FilterType::CatmullRom)
    };

    let mut tensor = Array3::<f32>::zeros((3, height as usize, width as usize));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            let value = f32::from(pixel[c]) / 255.0;
            tensor[[c, y as usize, x as usize]] = (value - config.mean[c]) / config.std[c];
        }
    }
    tensor
}
