//! アップロード画像からモデル入力テンソルへの変換
//!
//! JPEG/PNGをデコードし、RGB化・299x299へのリサイズ・[0,1]への正規化を行い、
//! 先頭にバッチ次元を付けた (1, 299, 299, 3) のNHWC配列を作ります。

use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, RgbImage};

use crate::error::{LeafError, LeafResult};
use crate::ml::ml_model::IMAGE_SIZE;

/// 前処理済みのモデル入力
///
/// レイアウトは NHWC、値はすべて [0, 1] の範囲です。
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessedTensor {
    data: Vec<f32>,
    shape: [usize; 4],
}

impl PreprocessedTensor {
    /// (batch, height, width, channels)
    pub fn shape(&self) -> [usize; 4] {
        self.shape
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }
}

/// 画像の前処理
#[derive(Debug, Clone)]
pub struct ImagePreprocessor {
    size: u32,
    filter: FilterType,
}

impl Default for ImagePreprocessor {
    fn default() -> Self {
        Self::new(IMAGE_SIZE as u32)
    }
}

impl ImagePreprocessor {
    /// 出力サイズを指定して作成（リサイズはバイキュービック）
    pub fn new(size: u32) -> Self {
        Self {
            size,
            filter: FilterType::CatmullRom,
        }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// バイト列をデコードしてテンソルに変換
    pub fn preprocess(&self, raw: &[u8]) -> LeafResult<PreprocessedTensor> {
        let image = decode_image(raw)?;
        Ok(self.preprocess_image(&image))
    }

    /// デコード済み画像をテンソルに変換
    pub fn preprocess_image(&self, image: &DynamicImage) -> PreprocessedTensor {
        // アルファは捨て、グレースケールは3チャネルに展開
        let rgb = image.to_rgb8();
        let resized = image::imageops::resize(&rgb, self.size, self.size, self.filter);
        to_tensor(&resized)
    }
}

/// JPEG/PNGのみ受け付けてデコードする
pub fn decode_image(raw: &[u8]) -> LeafResult<DynamicImage> {
    if raw.is_empty() {
        return Err(LeafError::Decode("ファイルが空です".to_string()));
    }

    let format = image::guess_format(raw)?;
    if !matches!(format, ImageFormat::Jpeg | ImageFormat::Png) {
        return Err(LeafError::Decode(format!(
            "対応していない画像形式です: {:?} (JPEG/PNGのみ)",
            format
        )));
    }

    Ok(image::load_from_memory_with_format(raw, format)?)
}

fn to_tensor(image: &RgbImage) -> PreprocessedTensor {
    let (width, height) = image.dimensions();
    let data: Vec<f32> = image
        .as_raw()
        .iter()
        .map(|&v| v as f32 / 255.0)
        .collect();

    PreprocessedTensor {
        data,
        shape: [1, height as usize, width as usize, 3],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgb, RgbImage, Rgba, RgbaImage};
    use proptest::prelude::*;
    use std::io::Cursor;

    fn encode(image: DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        image.write_to(&mut buf, format).unwrap();
        buf.into_inner()
    }

    fn gradient_rgb(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
        }))
    }

    fn assert_valid(tensor: &PreprocessedTensor) {
        assert_eq!(tensor.shape(), [1, 299, 299, 3]);
        assert_eq!(tensor.as_slice().len(), 299 * 299 * 3);
        assert!(tensor.as_slice().iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_rgb_png() {
        let bytes = encode(gradient_rgb(512, 512), ImageFormat::Png);
        let tensor = ImagePreprocessor::default().preprocess(&bytes).unwrap();
        assert_valid(&tensor);
    }

    #[test]
    fn test_rgba_png_drops_alpha() {
        let image = RgbaImage::from_pixel(40, 20, Rgba([255, 0, 0, 0]));
        let bytes = encode(DynamicImage::ImageRgba8(image), ImageFormat::Png);
        let tensor = ImagePreprocessor::default().preprocess(&bytes).unwrap();

        assert_valid(&tensor);
        // 透明でも色はそのまま残る
        let first = &tensor.as_slice()[..3];
        assert!((first[0] - 1.0).abs() < 1e-2);
        assert!(first[1] < 1e-2 && first[2] < 1e-2);
    }

    #[test]
    fn test_grayscale_jpeg_expands_channels() {
        let image = GrayImage::from_pixel(64, 100, Luma([128]));
        let bytes = encode(DynamicImage::ImageLuma8(image), ImageFormat::Jpeg);
        let tensor = ImagePreprocessor::default().preprocess(&bytes).unwrap();

        assert_valid(&tensor);
        let pixel = &tensor.as_slice()[..3];
        assert_eq!(pixel[0], pixel[1]);
        assert_eq!(pixel[1], pixel[2]);
    }

    #[test]
    fn test_deterministic() {
        let bytes = encode(gradient_rgb(333, 211), ImageFormat::Jpeg);
        let preprocessor = ImagePreprocessor::default();
        let a = preprocessor.preprocess(&bytes).unwrap();
        let b = preprocessor.preprocess(&bytes).unwrap();

        let a_bits: Vec<u32> = a.as_slice().iter().map(|v| v.to_bits()).collect();
        let b_bits: Vec<u32> = b.as_slice().iter().map(|v| v.to_bits()).collect();
        assert_eq!(a_bits, b_bits);
    }

    #[test]
    fn test_white_maps_to_one() {
        let image = RgbImage::from_pixel(10, 10, Rgb([255, 255, 255]));
        let bytes = encode(DynamicImage::ImageRgb8(image), ImageFormat::Png);
        let tensor = ImagePreprocessor::default().preprocess(&bytes).unwrap();
        assert!(tensor.as_slice().iter().all(|&v| (v - 1.0).abs() < 1e-2));
    }

    #[test]
    fn test_garbage_is_decode_error() {
        let err = ImagePreprocessor::default()
            .preprocess(b"definitely not an image")
            .unwrap_err();
        assert!(matches!(err, LeafError::Decode(_)));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_empty_is_decode_error() {
        let err = ImagePreprocessor::default().preprocess(&[]).unwrap_err();
        assert!(matches!(err, LeafError::Decode(_)));
    }

    #[test]
    fn test_truncated_png_is_decode_error() {
        let bytes = encode(gradient_rgb(64, 64), ImageFormat::Png);
        let err = ImagePreprocessor::default()
            .preprocess(&bytes[..bytes.len() / 2])
            .unwrap_err();
        assert!(matches!(err, LeafError::Decode(_)));
    }

    #[test]
    fn test_other_formats_rejected() {
        let bytes = encode(gradient_rgb(8, 8), ImageFormat::Bmp);
        let err = ImagePreprocessor::default().preprocess(&bytes).unwrap_err();
        assert!(matches!(err, LeafError::Decode(_)));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn any_png_yields_fixed_shape(
            width in 1u32..400,
            height in 1u32..400,
            mode in 0u8..3,
            seed in any::<u8>(),
        ) {
            let image = match mode {
                0 => DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
                    Rgb([seed.wrapping_add(x as u8), y as u8, seed])
                })),
                1 => DynamicImage::ImageRgba8(RgbaImage::from_fn(width, height, |x, y| {
                    Rgba([x as u8, seed, y as u8, seed.wrapping_mul(3)])
                })),
                _ => DynamicImage::ImageLuma8(GrayImage::from_fn(width, height, |x, y| {
                    Luma([seed ^ (x as u8) ^ (y as u8)])
                })),
            };
            let bytes = encode(image, ImageFormat::Png);
            let tensor = ImagePreprocessor::default().preprocess(&bytes).unwrap();

            prop_assert_eq!(tensor.shape(), [1, 299, 299, 3]);
            prop_assert!(tensor.as_slice().iter().all(|v| (0.0..=1.0).contains(v)));
        }
    }
}
