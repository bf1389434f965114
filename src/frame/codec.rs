// 图像文件编解码
//
// 流水线两端的文件 <-> ImageFrame 转换，基于 image crate。

use super::ImageFrame;
use crate::error::{RuntimeError, RuntimeResult};
use crate::params::{OutputFormat, OutputParams};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::webp::WebPEncoder;
use image::{DynamicImage, ExtendedColorType, ImageEncoder};
use tracing::debug;

/// 解码任意受支持格式的图像字节为新帧
pub fn decode(bytes: &[u8]) -> RuntimeResult<ImageFrame> {
    let image = image::load_from_memory(bytes)?;
    debug!("[CODEC] 解码图像: {}x{}", image.width(), image.height());
    ImageFrame::from_bitmap(image.into_rgba8())
}

/// 按输出节点参数编码帧
///
/// jpeg 使用 quality (0.0 - 1.0) 且丢弃 alpha；webp 为无损编码，忽略 quality。
pub fn encode(frame: &ImageFrame, params: &OutputParams) -> RuntimeResult<Vec<u8>> {
    let mut out = Vec::new();
    let bitmap = frame.bitmap();
    let (width, height) = (frame.width(), frame.height());

    match params.format {
        OutputFormat::Png => {
            PngEncoder::new(&mut out).write_image(
                bitmap.as_raw(),
                width,
                height,
                ExtendedColorType::Rgba8,
            )?;
        }
        OutputFormat::Jpeg => {
            let quality = (params.quality * 100.0).round().clamp(1.0, 100.0) as u8;
            let rgb = DynamicImage::ImageRgba8(bitmap.clone()).into_rgb8();
            JpegEncoder::new_with_quality(&mut out, quality).write_image(
                rgb.as_raw(),
                width,
                height,
                ExtendedColorType::Rgb8,
            )?;
        }
        OutputFormat::Webp => {
            WebPEncoder::new_lossless(&mut out).write_image(
                bitmap.as_raw(),
                width,
                height,
                ExtendedColorType::Rgba8,
            )?;
        }
    }

    if out.is_empty() {
        return Err(RuntimeError::InvalidInput("编码结果为空".to_string()));
    }
    debug!("[CODEC] 编码完成: {:?}, {} 字节", params.format, out.len());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelBuffer;

    fn sample_frame() -> ImageFrame {
        let data: Vec<u8> = (0..4 * 3).flat_map(|i| [i as u8 * 10, 20, 30, 255]).collect();
        ImageFrame::from_pixels(PixelBuffer::new(4, 3, data).unwrap()).unwrap()
    }

    #[test]
    fn test_png_preserves_pixels() {
        let frame = sample_frame();
        let bytes = encode(&frame, &OutputParams::default()).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (4, 3));
        assert_eq!(decoded.bitmap().as_raw(), frame.bitmap().as_raw());
        assert_ne!(decoded.revision(), frame.revision());
    }

    #[test]
    fn test_jpeg_keeps_dimensions() {
        let params = OutputParams {
            format: OutputFormat::Jpeg,
            quality: 0.8,
        };
        let bytes = encode(&sample_frame(), &params).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (4, 3));
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(matches!(decode(b"not an image"), Err(RuntimeError::Image(_))));
    }
}
