//! Image preprocessing for the inference endpoint.
//!
//! Every image is normalized to RGB, downscaled to fit a pixel budget,
//! snapped to the model's 28-pixel tiling grid and re-encoded as JPEG.
//! Nothing is cached: each task re-encodes its images, so a change of
//! budget between runs takes effect immediately.

use crate::error::{BenchError, Result};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{
    DynamicImage, GrayAlphaImage, GrayImage, ImageDecoder, ImageFormat, ImageReader, Limits,
    RgbImage, RgbaImage,
};
use std::fs::{self, File};
use std::io::BufReader;
use std::path::Path;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Tile edge imposed by the vision encoder.
pub const TILE: u32 = 28;

/// JPEG quality used for transport.
pub const JPEG_QUALITY: u8 = 90;

/// Extensions accepted by the grayscale tool.
const GRAYSCALE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "webp", "tiff"];

/// A transport-ready image payload.
#[derive(Debug, Clone)]
pub struct EncodedImage {
    /// Encoded bytes.
    pub bytes: Vec<u8>,
    /// Declared media type of `bytes`.
    pub media_type: &'static str,
    /// Final width in pixels.
    pub width: u32,
    /// Final height in pixels.
    pub height: u32,
}

impl EncodedImage {
    /// Base64 text of the payload.
    pub fn base64(&self) -> String {
        BASE64_STANDARD.encode(&self.bytes)
    }

    /// `data:` URL as expected by OpenAI-compatible vision endpoints.
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.media_type, self.base64())
    }

    /// Size of the encoded payload in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Compute the output size for an image of `width` x `height`.
///
/// Images above `max_pixels` are scaled by `sqrt(max_pixels / pixels)` on both
/// axes. Both sides are then snapped down to a multiple of [`TILE`], never
/// below one tile and never above the source size.
pub fn target_dimensions(width: u32, height: u32, max_pixels: u64) -> (u32, u32) {
    let pixels = width as u64 * height as u64;
    let (mut target_w, mut target_h) = (width, height);

    if pixels > max_pixels {
        let scale = (max_pixels as f64 / pixels as f64).sqrt();
        target_w = (width as f64 * scale) as u32;
        target_h = (height as f64 * scale) as u32;
    }

    (snap_to_tile(target_w, width), snap_to_tile(target_h, height))
}

fn snap_to_tile(value: u32, original: u32) -> u32 {
    ((value / TILE) * TILE).max(TILE).min(original)
}

/// Load, normalize and encode the image at `path`.
///
/// Failures are logged and returned as `None`; callers skip the task.
pub fn encode_image(path: &Path, max_pixels: u64) -> Option<EncodedImage> {
    match try_encode_image(path, max_pixels) {
        Ok(encoded) => {
            debug!(
                path = %path.display(),
                width = encoded.width,
                height = encoded.height,
                bytes = encoded.len(),
                "encoded image"
            );
            Some(encoded)
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "image failed to prepare");
            None
        }
    }
}

/// Fallible variant of [`encode_image`].
pub fn try_encode_image(path: &Path, max_pixels: u64) -> Result<EncodedImage> {
    let image = load_image(path)?;
    encode_dynamic(image, max_pixels).map_err(|e| BenchError::image(path, e))
}

/// Decode a file with no size limits and with EXIF orientation applied.
///
/// A PNG the decoder rejects is decoded again row by row, keeping whatever
/// rows precede the damage; missing rows stay black.
fn load_image(path: &Path) -> Result<DynamicImage> {
    match decode_with_limits(path, Limits::no_limits()) {
        Ok(image) => Ok(image),
        Err(e @ BenchError::Image { .. }) if is_png(path) => decode_partial_png(path).map_err(|partial| {
            debug!(path = %path.display(), error = %partial, "partial decode failed");
            e
        }),
        Err(e) => Err(e),
    }
}

fn decode_with_limits(path: &Path, limits: Limits) -> Result<DynamicImage> {
    let mut reader = ImageReader::open(path)
        .map_err(|e| BenchError::io(path, e))?
        .with_guessed_format()
        .map_err(|e| BenchError::io(path, e))?;
    reader.limits(limits);

    let mut decoder = reader
        .into_decoder()
        .map_err(|e| BenchError::image(path, e))?;
    let orientation = decoder
        .orientation()
        .map_err(|e| BenchError::image(path, e))?;
    let mut image = DynamicImage::from_decoder(decoder).map_err(|e| BenchError::image(path, e))?;
    image.apply_orientation(orientation);

    Ok(image)
}

fn is_png(path: &Path) -> bool {
    ImageReader::open(path)
        .and_then(|reader| reader.with_guessed_format())
        .map(|reader| reader.format() == Some(ImageFormat::Png))
        .unwrap_or(false)
}

/// Decode the rows of a damaged PNG up to the first error.
fn decode_partial_png(path: &Path) -> Result<DynamicImage> {
    let file = File::open(path).map_err(|e| BenchError::io(path, e))?;
    let mut decoder = png::Decoder::new(BufReader::new(file));
    decoder.set_transformations(png::Transformations::normalize_to_color8());
    let mut reader = decoder
        .read_info()
        .map_err(|e| BenchError::image(path, e))?;

    let (width, height) = reader.info().size();
    if reader.info().interlaced {
        return Err(BenchError::image(path, "interlaced PNG cannot be decoded partially"));
    }
    let (color, _) = reader.output_color_type();
    let line = reader.output_line_size(width);
    let mut buf = vec![0u8; line * height as usize];

    let mut rows = 0u32;
    for chunk in buf.chunks_exact_mut(line) {
        match reader.next_row() {
            Ok(Some(row)) => {
                chunk.copy_from_slice(row.data());
                rows += 1;
            }
            Ok(None) | Err(_) => break,
        }
    }
    if rows == 0 {
        return Err(BenchError::image(path, "no decodable rows"));
    }
    warn!(path = %path.display(), rows, height, "decoded truncated image partially");

    let image = match color {
        png::ColorType::Grayscale => GrayImage::from_raw(width, height, buf).map(DynamicImage::ImageLuma8),
        png::ColorType::GrayscaleAlpha => {
            GrayAlphaImage::from_raw(width, height, buf).map(DynamicImage::ImageLumaA8)
        }
        png::ColorType::Rgb => RgbImage::from_raw(width, height, buf).map(DynamicImage::ImageRgb8),
        png::ColorType::Rgba => RgbaImage::from_raw(width, height, buf).map(DynamicImage::ImageRgba8),
        _ => None,
    };
    image.ok_or_else(|| BenchError::image(path, format!("unsupported PNG layout {:?}", color)))
}

/// Encode an in-memory image following the same rules as [`encode_image`].
pub fn encode_dynamic(image: DynamicImage, max_pixels: u64) -> image::ImageResult<EncodedImage> {
    let image = match image {
        DynamicImage::ImageRgb8(_) => image,
        other => DynamicImage::ImageRgb8(other.to_rgb8()),
    };

    let (width, height) = (image.width(), image.height());
    let (target_w, target_h) = target_dimensions(width, height, max_pixels);

    let image = if (target_w, target_h) != (width, height) {
        image.resize_exact(target_w, target_h, FilterType::Lanczos3)
    } else {
        image
    };

    let mut bytes = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut bytes, JPEG_QUALITY);
    image.write_with_encoder(encoder)?;

    Ok(EncodedImage {
        bytes,
        media_type: "image/jpeg",
        width: target_w,
        height: target_h,
    })
}

/// Write a three-channel grayscale copy of `src` to `dst`.
///
/// The output format follows the extension of `dst`.
pub fn to_grayscale_rgb(src: &Path, dst: &Path) -> Result<()> {
    let image = load_image(src)?;
    let gray = DynamicImage::ImageLuma8(image.to_luma8()).to_rgb8();
    gray.save(dst).map_err(|e| BenchError::image(dst, e))
}

/// Convert every image directly inside `input` into a grayscale copy in `output`.
///
/// Returns the number of converted files. Unreadable files are skipped.
pub fn grayscale_directory(input: &Path, output: &Path) -> Result<usize> {
    if !input.is_dir() {
        return Err(BenchError::SourceNotFound(input.to_path_buf()));
    }
    fs::create_dir_all(output).map_err(|e| BenchError::io(output, e))?;

    let mut converted = 0;
    for entry in WalkDir::new(input)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let src = entry.path();
        if !has_extension(src, GRAYSCALE_EXTENSIONS) {
            continue;
        }

        let dst = output.join(entry.file_name());
        match to_grayscale_rgb(src, &dst) {
            Ok(()) => converted += 1,
            Err(e) => warn!(path = %src.display(), error = %e, "grayscale conversion failed"),
        }
    }

    Ok(converted)
}

/// Case-insensitive extension check.
pub(crate) fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use tempfile::TempDir;

    fn gradient(width: u32, height: u32) -> RgbImage {
        let mut img = RgbImage::new(width, height);
        for (x, y, pixel) in img.enumerate_pixels_mut() {
            *pixel = Rgb([(x % 256) as u8, (y % 256) as u8, 128]);
        }
        img
    }

    #[test]
    fn test_downscale_respects_budget_and_tiles() {
        let budget = 2_800_000;
        for (w, h) in [(4000, 3000), (6000, 1000), (2000, 2000), (1681, 1667)] {
            let (tw, th) = target_dimensions(w, h, budget);
            assert_eq!(tw % TILE, 0, "{}x{}", w, h);
            assert_eq!(th % TILE, 0, "{}x{}", w, h);
            assert!(tw > 0 && th > 0);
            assert!((tw as u64) * (th as u64) <= budget, "{}x{} -> {}x{}", w, h, tw, th);
        }
    }

    #[test]
    fn test_no_upscale_below_budget() {
        for (w, h) in [(1000, 800), (30, 30), (20, 500), (28, 28), (1, 1)] {
            let (tw, th) = target_dimensions(w, h, 2_800_000);
            assert!(tw <= w && th <= h, "{}x{} -> {}x{}", w, h, tw, th);
        }
        assert_eq!(target_dimensions(1000, 800, 2_800_000), (980, 784));
        assert_eq!(target_dimensions(20, 500, 2_800_000), (20, 476));
    }

    #[test]
    fn test_extreme_aspect_keeps_one_tile() {
        let (tw, th) = target_dimensions(100_000, 40, 1_000_000);
        assert_eq!(th, TILE);
        assert_eq!(tw % TILE, 0);
    }

    #[test]
    fn test_encode_dynamic_converts_rgba() {
        let rgba = RgbaImage::from_pixel(100, 60, image::Rgba([10, 20, 30, 255]));
        let encoded = encode_dynamic(DynamicImage::ImageRgba8(rgba), 2_800_000).unwrap();
        assert_eq!((encoded.width, encoded.height), (84, 56));
        assert_eq!(encoded.media_type, "image/jpeg");
        // JPEG SOI marker
        assert_eq!(&encoded.bytes[..2], &[0xFF, 0xD8]);
        assert!(encoded.data_url().starts_with("data:image/jpeg;base64,/9j/"));
    }

    #[test]
    fn test_encode_image_from_file_downscales() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("big.png");
        gradient(600, 400).save(&path).unwrap();

        let encoded = encode_image(&path, 60_000).unwrap();
        assert_eq!(encoded.width % TILE, 0);
        assert_eq!(encoded.height % TILE, 0);
        assert!((encoded.width as u64) * (encoded.height as u64) <= 60_000);

        let decoded = image::load_from_memory(&encoded.bytes).unwrap();
        assert_eq!(decoded.width(), encoded.width);
        assert_eq!(decoded.height(), encoded.height);
    }

    #[test]
    fn test_encode_image_failures_are_none() {
        let dir = TempDir::new().unwrap();
        assert!(encode_image(&dir.path().join("missing.jpg"), 2_800_000).is_none());

        let corrupt = dir.path().join("corrupt.jpg");
        fs::write(&corrupt, b"definitely not a jpeg").unwrap();
        assert!(encode_image(&corrupt, 2_800_000).is_none());
    }

    fn noise(width: u32, height: u32) -> RgbImage {
        let mut state = 0x2545_f491u32;
        RgbImage::from_fn(width, height, |_, _| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            let [r, g, b, _] = state.to_le_bytes();
            Rgb([r, g, b])
        })
    }

    #[test]
    fn test_truncated_png_keeps_leading_rows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cut.png");
        let source = noise(400, 300);
        source.save(&path).unwrap();
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() * 2 / 3]).unwrap();

        assert!(decode_with_limits(&path, Limits::no_limits()).is_err());
        let image = load_image(&path).unwrap().to_rgb8();
        assert_eq!(image.dimensions(), (400, 300));
        assert_eq!(image.get_pixel(7, 3), source.get_pixel(7, 3));
        assert_eq!(image.get_pixel(399, 299), &Rgb([0, 0, 0]));

        let encoded = encode_image(&path, 2_800_000).unwrap();
        assert_eq!((encoded.width, encoded.height), (392, 280));
    }

    #[test]
    fn test_truncated_jpeg_is_encoded() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cut.jpg");
        noise(400, 300).save(&path).unwrap();
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() * 2 / 3]).unwrap();

        let encoded = encode_image(&path, 2_800_000).unwrap();
        assert_eq!((encoded.width, encoded.height), (392, 280));
    }

    #[test]
    fn test_truncated_header_is_still_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stub.png");
        gradient(40, 30).save(&path).unwrap();
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..20]).unwrap();
        assert!(encode_image(&path, 2_800_000).is_none());
    }

    #[test]
    fn test_large_image_ignores_decoder_limits() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("large.png");
        gradient(1200, 1000).save(&path).unwrap();

        let mut tight = Limits::default();
        tight.max_image_width = Some(1024);
        tight.max_image_height = Some(1024);
        assert!(decode_with_limits(&path, tight).is_err());

        let encoded = encode_image(&path, 500_000).unwrap();
        assert_eq!(encoded.width % TILE, 0);
        assert_eq!(encoded.height % TILE, 0);
        assert!((encoded.width as u64) * (encoded.height as u64) <= 500_000);
    }

    #[test]
    fn test_grayscale_directory() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("color");
        let output = dir.path().join("gray");
        fs::create_dir_all(&input).unwrap();

        gradient(40, 30).save(input.join("a.png")).unwrap();
        gradient(40, 30).save(input.join("b.PNG")).unwrap();
        fs::write(input.join("notes.txt"), "skip me").unwrap();
        fs::write(input.join("broken.jpg"), "nope").unwrap();

        let converted = grayscale_directory(&input, &output).unwrap();
        assert_eq!(converted, 2);

        let gray = image::open(output.join("a.png")).unwrap().to_rgb8();
        assert_eq!(gray.dimensions(), (40, 30));
        for pixel in gray.pixels() {
            assert_eq!(pixel[0], pixel[1]);
            assert_eq!(pixel[1], pixel[2]);
        }
        assert!(!output.join("notes.txt").exists());
    }
}
