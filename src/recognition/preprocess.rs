// Image preprocessing: base64 / data URL -> normalized [1, 3, H, W] pixel tensor
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use image::{imageops::FilterType, DynamicImage, RgbImage};
use ndarray::Array4;

use crate::recognition::manifest::ModelManifest;
use crate::recognition::session::TensorData;
use crate::types::{OcrError, OcrErrorKind, Result};

/// Strips an optional `data:<mime>;base64,` header.
pub fn strip_data_url(input: &str) -> &str {
    let trimmed = input.trim();
    if trimmed.starts_with("data:") {
        if let Some(pos) = trimmed.find(";base64,") {
            return &trimmed[pos + ";base64,".len()..];
        }
    }
    trimmed
}

pub fn decode_base64_image(input: &str) -> Result<DynamicImage> {
    let payload: String = strip_data_url(input)
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    if payload.is_empty() {
        return Err(OcrError::bad_image("image payload is empty"));
    }
    let bytes = BASE64
        .decode(payload.as_bytes())
        .map_err(|e| OcrError::with_cause(OcrErrorKind::BadImage, "invalid base64 image data", e))?;
    let image = image::load_from_memory(&bytes)
        .map_err(|e| OcrError::with_cause(OcrErrorKind::BadImage, "failed to decode image", e))?;
    if image.width() == 0 || image.height() == 0 {
        return Err(OcrError::bad_image("image has zero width or height"));
    }
    Ok(image)
}

/// Stretches the image onto a white `size x size` canvas, flattening alpha.
/// Aspect ratio is not preserved.
pub fn render_square(image: &DynamicImage, size: u32) -> Result<RgbImage> {
    if size == 0 {
        return Err(OcrError::bad_image("target image size must be positive"));
    }
    let resized = image.resize_exact(size, size, FilterType::Lanczos3).to_rgba8();

    let mut canvas = RgbImage::from_pixel(size, size, image::Rgb([255, 255, 255]));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let [r, g, b, a] = pixel.0;
        let alpha = a as f32 / 255.0;
        let blend = |c: u8| (c as f32 * alpha + 255.0 * (1.0 - alpha)).round().clamp(0.0, 255.0) as u8;
        canvas.put_pixel(x, y, image::Rgb([blend(r), blend(g), blend(b)]));
    }
    Ok(canvas)
}

/// CHW tensor with `(byte / 255 - mean[c]) / std[c]` per channel.
pub fn to_pixel_tensor(rgb: &RgbImage, mean: [f32; 3], std: [f32; 3]) -> TensorData {
    let (width, height) = rgb.dimensions();
    let array = Array4::from_shape_fn((1, 3, height as usize, width as usize), |(_, c, y, x)| {
        let byte = rgb.get_pixel(x as u32, y as u32)[c];
        (byte as f32 / 255.0 - mean[c]) / std[c]
    });
    let shape = array.shape().iter().map(|&d| d as i64).collect();
    TensorData::F32 {
        shape,
        data: array.into_raw_vec(),
    }
}

pub fn preprocess(input: &str, manifest: &ModelManifest) -> Result<TensorData> {
    let image = decode_base64_image(input)?;
    let square = render_square(&image, manifest.image_size)?;
    Ok(to_pixel_tensor(&square, manifest.pixel_mean, manifest.pixel_std))
}
