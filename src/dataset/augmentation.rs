//! Data Augmentation Module
//!
//! Random geometric augmentation for training images. Every transform is a
//! single affine warp (rotation, shift, zoom, horizontal flip) sampled
//! with bilinear interpolation; pixels that fall outside the source are
//! filled according to [`FillMode`].
//!
//! # Augmentation Strategy
//!
//! - **Training**: random warp, then rescale to [0, 1]
//! - **Validation/Test/Inference**: rescale only

use image::imageops::FilterType;
use image::{DynamicImage, Rgb, RgbImage};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// How to fill pixels exposed by a warp
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FillMode {
    /// Replicate the nearest edge pixel
    Nearest,
    /// Fill with a constant gray level
    Constant(u8),
}

/// Configuration for data augmentation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentationConfig {
    /// Maximum rotation angle in degrees (applies ±rotation_degrees)
    pub rotation_degrees: f32,
    /// Maximum horizontal shift as a fraction of the width
    pub width_shift: f32,
    /// Maximum vertical shift as a fraction of the height
    pub height_shift: f32,
    /// Zoom factors are drawn from [1 - zoom, 1 + zoom] per axis
    pub zoom: f32,
    /// Flip horizontally with probability 0.5
    pub horizontal_flip: bool,
    /// Fill policy for exposed pixels
    pub fill_mode: FillMode,
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            rotation_degrees: 20.0,
            width_shift: 0.2,
            height_shift: 0.2,
            zoom: 0.2,
            horizontal_flip: true,
            fill_mode: FillMode::Nearest,
        }
    }
}

impl AugmentationConfig {
    /// Disable all augmentations (for validation/inference)
    pub fn none() -> Self {
        Self {
            rotation_degrees: 0.0,
            width_shift: 0.0,
            height_shift: 0.0,
            zoom: 0.0,
            horizontal_flip: false,
            fill_mode: FillMode::Nearest,
        }
    }

    /// Whether any random transform is enabled
    pub fn is_enabled(&self) -> bool {
        self.rotation_degrees > 0.0
            || self.width_shift > 0.0
            || self.height_shift > 0.0
            || self.zoom > 0.0
            || self.horizontal_flip
    }
}

/// Parameters of one sampled warp
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AffineParams {
    pub angle_degrees: f32,
    /// Shift in pixels along x and y
    pub shift: (f32, f32),
    /// Zoom factor along x and y
    pub zoom: (f32, f32),
    pub flip: bool,
}

impl AffineParams {
    pub fn identity() -> Self {
        Self {
            angle_degrees: 0.0,
            shift: (0.0, 0.0),
            zoom: (1.0, 1.0),
            flip: false,
        }
    }

    fn is_identity(&self) -> bool {
        *self == Self::identity()
    }
}

/// Image augmenter that applies random transformations
#[derive(Clone, Debug)]
pub struct Augmenter {
    config: AugmentationConfig,
    image_size: u32,
}

impl Augmenter {
    /// Create a new augmenter with the given configuration
    pub fn new(config: AugmentationConfig, image_size: u32) -> Self {
        Self { config, image_size }
    }

    /// Augmenter with the default training policy
    pub fn with_defaults(image_size: u32) -> Self {
        Self::new(AugmentationConfig::default(), image_size)
    }

    /// Create an augmenter with no augmentation (for validation/inference)
    pub fn no_augmentation(image_size: u32) -> Self {
        Self::new(AugmentationConfig::none(), image_size)
    }

    pub fn config(&self) -> &AugmentationConfig {
        &self.config
    }

    pub fn image_size(&self) -> u32 {
        self.image_size
    }

    /// Draw warp parameters for an image of the given size
    pub fn sample_params(&self, width: u32, height: u32, rng: &mut ChaCha8Rng) -> AffineParams {
        let c = &self.config;
        let mut params = AffineParams::identity();

        if c.rotation_degrees > 0.0 {
            params.angle_degrees = rng.gen_range(-c.rotation_degrees..=c.rotation_degrees);
        }
        if c.width_shift > 0.0 {
            params.shift.0 = rng.gen_range(-c.width_shift..=c.width_shift) * width as f32;
        }
        if c.height_shift > 0.0 {
            params.shift.1 = rng.gen_range(-c.height_shift..=c.height_shift) * height as f32;
        }
        if c.zoom > 0.0 {
            params.zoom = (
                rng.gen_range(1.0 - c.zoom..=1.0 + c.zoom),
                rng.gen_range(1.0 - c.zoom..=1.0 + c.zoom),
            );
        }
        if c.horizontal_flip {
            params.flip = rng.gen::<f32>() < 0.5;
        }

        params
    }

    /// Apply a random warp to `img`
    pub fn augment(&self, img: &RgbImage, rng: &mut ChaCha8Rng) -> RgbImage {
        let (width, height) = img.dimensions();
        let params = self.sample_params(width, height, rng);
        self.warp(img, &params)
    }

    /// Warp `img` with fixed parameters
    ///
    /// For each output pixel the source coordinate is
    /// `center + R(angle) * (Z * (p - center) + shift)`, mirrored first when
    /// `flip` is set.
    pub fn warp(&self, img: &RgbImage, params: &AffineParams) -> RgbImage {
        if params.is_identity() {
            return img.clone();
        }

        let (width, height) = img.dimensions();
        let cx = (width as f32 - 1.0) / 2.0;
        let cy = (height as f32 - 1.0) / 2.0;

        let (sin_a, cos_a) = params.angle_degrees.to_radians().sin_cos();

        RgbImage::from_fn(width, height, |x, y| {
            let x = if params.flip { width - 1 - x } else { x };

            let px = (x as f32 - cx) * params.zoom.0 + params.shift.0;
            let py = (y as f32 - cy) * params.zoom.1 + params.shift.1;

            let src_x = cx + px * cos_a - py * sin_a;
            let src_y = cy + px * sin_a + py * cos_a;

            self.bilinear_sample(img, src_x, src_y)
        })
    }

    /// Sample a pixel using bilinear interpolation
    fn bilinear_sample(&self, img: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
        let (width, height) = img.dimensions();
        let max_x = width as f32 - 1.0;
        let max_y = height as f32 - 1.0;

        let outside = x < 0.0 || y < 0.0 || x > max_x || y > max_y;
        let (x, y) = match self.config.fill_mode {
            FillMode::Constant(v) if outside => return Rgb([v, v, v]),
            _ => (x.clamp(0.0, max_x), y.clamp(0.0, max_y)),
        };

        let x0 = x.floor() as u32;
        let y0 = y.floor() as u32;
        let x1 = (x0 + 1).min(width - 1);
        let y1 = (y0 + 1).min(height - 1);

        let fx = x - x0 as f32;
        let fy = y - y0 as f32;

        let p00 = img.get_pixel(x0, y0);
        let p10 = img.get_pixel(x1, y0);
        let p01 = img.get_pixel(x0, y1);
        let p11 = img.get_pixel(x1, y1);

        let mut result = [0u8; 3];
        for c in 0..3 {
            let v = p00[c] as f32 * (1.0 - fx) * (1.0 - fy)
                + p10[c] as f32 * fx * (1.0 - fy)
                + p01[c] as f32 * (1.0 - fx) * fy
                + p11[c] as f32 * fx * fy;

            result[c] = v.round().clamp(0.0, 255.0) as u8;
        }

        Rgb(result)
    }

    /// Resize image to the model input size
    pub fn resize(&self, img: &DynamicImage) -> RgbImage {
        img.resize_exact(self.image_size, self.image_size, FilterType::Triangle)
            .to_rgb8()
    }

    /// Convert image to CHW float data rescaled to [0, 1]
    pub fn to_tensor_data(&self, img: &RgbImage) -> Vec<f32> {
        let (width, height) = img.dimensions();
        let mut data = Vec::with_capacity(3 * height as usize * width as usize);

        for c in 0..3 {
            for y in 0..height {
                for x in 0..width {
                    data.push(img.get_pixel(x, y)[c] as f32 / 255.0);
                }
            }
        }

        data
    }

    /// Full preprocessing pipeline: resize, augment (optional), rescale
    pub fn preprocess(&self, img: &DynamicImage, rng: Option<&mut ChaCha8Rng>) -> Vec<f32> {
        let resized = self.resize(img);
        let result = match rng {
            Some(rng) if self.config.is_enabled() => self.augment(&resized, rng),
            _ => resized,
        };
        self.to_tensor_data(&result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::ImageBuffer;
    use rand::SeedableRng;

    fn create_test_image() -> RgbImage {
        ImageBuffer::from_fn(32, 32, |x, y| Rgb([(x * 8) as u8, (y * 8) as u8, 128]))
    }

    #[test]
    fn test_default_policy() {
        let config = AugmentationConfig::default();
        assert_eq!(config.rotation_degrees, 20.0);
        assert_eq!(config.width_shift, 0.2);
        assert_eq!(config.height_shift, 0.2);
        assert_eq!(config.zoom, 0.2);
        assert!(config.horizontal_flip);
        assert_eq!(config.fill_mode, FillMode::Nearest);
        assert!(!AugmentationConfig::none().is_enabled());
    }

    #[test]
    fn test_sampled_params_within_bounds() {
        let aug = Augmenter::with_defaults(32);
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..200 {
            let p = aug.sample_params(100, 50, &mut rng);
            assert!(p.angle_degrees.abs() <= 20.0);
            assert!(p.shift.0.abs() <= 20.0 + 1e-4);
            assert!(p.shift.1.abs() <= 10.0 + 1e-4);
            assert!((0.8..=1.2).contains(&p.zoom.0));
            assert!((0.8..=1.2).contains(&p.zoom.1));
        }
    }

    #[test]
    fn test_identity_warp_is_exact() {
        let aug = Augmenter::with_defaults(32);
        let img = create_test_image();
        assert_eq!(aug.warp(&img, &AffineParams::identity()), img);
    }

    #[test]
    fn test_flip_mirrors_columns() {
        let aug = Augmenter::with_defaults(32);
        let img = create_test_image();
        let params = AffineParams {
            flip: true,
            ..AffineParams::identity()
        };
        let flipped = aug.warp(&img, &params);
        assert_eq!(flipped.get_pixel(0, 5), img.get_pixel(31, 5));
        assert_eq!(flipped.get_pixel(31, 0), img.get_pixel(0, 0));
    }

    #[test]
    fn test_nearest_fill_never_exposes_black() {
        let aug = Augmenter::with_defaults(32);
        let img = ImageBuffer::from_pixel(32, 32, Rgb([90u8, 90, 90]));
        let params = AffineParams {
            angle_degrees: 20.0,
            shift: (6.0, -6.0),
            zoom: (1.2, 1.2),
            flip: false,
        };
        let warped = aug.warp(&img, &params);
        assert!(warped.pixels().all(|p| *p == Rgb([90, 90, 90])));
    }

    #[test]
    fn test_constant_fill_exposes_fill_value() {
        let config = AugmentationConfig {
            fill_mode: FillMode::Constant(0),
            ..AugmentationConfig::default()
        };
        let aug = Augmenter::new(config, 32);
        let img = ImageBuffer::from_pixel(32, 32, Rgb([90u8, 90, 90]));
        let params = AffineParams {
            shift: (16.0, 0.0),
            ..AffineParams::identity()
        };
        let warped = aug.warp(&img, &params);
        assert_eq!(*warped.get_pixel(31, 16), Rgb([0, 0, 0]));
        assert_eq!(*warped.get_pixel(0, 16), Rgb([90, 90, 90]));
    }

    #[test]
    fn test_augment_is_reproducible() {
        let aug = Augmenter::with_defaults(32);
        let img = create_test_image();
        let a = aug.augment(&img, &mut ChaCha8Rng::seed_from_u64(3));
        let b = aug.augment(&img, &mut ChaCha8Rng::seed_from_u64(3));
        assert_eq!(a, b);
    }

    #[test]
    fn test_preprocess_shape_and_range() {
        let aug = Augmenter::with_defaults(16);
        let img = DynamicImage::ImageRgb8(create_test_image());
        let mut rng = ChaCha8Rng::seed_from_u64(42);

        let data = aug.preprocess(&img, Some(&mut rng));
        assert_eq!(data.len(), 3 * 16 * 16);
        assert!(data.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_preprocess_without_rng_is_deterministic() {
        let aug = Augmenter::with_defaults(16);
        let img = DynamicImage::ImageRgb8(create_test_image());
        assert_eq!(aug.preprocess(&img, None), aug.preprocess(&img, None));
    }

    #[test]
    fn test_to_tensor_data_is_chw() {
        let aug = Augmenter::no_augmentation(2);
        let img = ImageBuffer::from_fn(2, 2, |x, _| Rgb([if x == 0 { 255 } else { 0 }, 0, 51]));
        let data = aug.to_tensor_data(&img);
        assert_eq!(data, vec![1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.2, 0.2, 0.2, 0.2]);
    }
}
