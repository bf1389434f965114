// 图像帧模块
//
// 子模块：
// - codec: 图像文件编解码（png / jpeg / webp）
//
// ImageFrame 是节点之间流转的规范图像值，PixelBuffer 是推理代码使用的线性 RGBA 缓冲区。
// 两者之间的转换保持宽高不变，不做重采样。

pub mod codec;

use crate::error::{RuntimeError, RuntimeResult};
use image::RgbaImage;
use std::sync::atomic::{AtomicU64, Ordering};

/// 每个像素的字节数（RGBA）
pub const CHANNELS: usize = 4;

static LAST_REVISION: AtomicU64 = AtomicU64::new(0);

/// 生成新的修订戳：毫秒时间戳，同一毫秒内递增，保证每帧都不同
fn next_revision() -> u64 {
    let now = chrono::Utc::now().timestamp_millis().max(0) as u64;
    let mut current = LAST_REVISION.load(Ordering::Relaxed);
    loop {
        let next = now.max(current + 1);
        match LAST_REVISION.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Relaxed) {
            Ok(_) => return next,
            Err(actual) => current = actual,
        }
    }
}

/// 线性 RGBA 像素缓冲区
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBuffer {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl PixelBuffer {
    /// 创建缓冲区并校验尺寸与数据长度
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> RuntimeResult<Self> {
        if width == 0 || height == 0 {
            return Err(RuntimeError::InvalidInput(format!(
                "图像尺寸无效: {}x{}", width, height
            )));
        }
        let expected = width as usize * height as usize * CHANNELS;
        if data.len() != expected {
            return Err(RuntimeError::InvalidInput(format!(
                "像素数据长度不匹配: 期望 {} 字节, 实际 {} 字节", expected, data.len()
            )));
        }
        Ok(Self { width, height, data })
    }

    /// 创建全透明黑色缓冲区
    pub fn transparent(width: u32, height: u32) -> RuntimeResult<Self> {
        Self::new(width, height, vec![0; width as usize * height as usize * CHANNELS])
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// 不可变图像帧
///
/// 位图由帧独占；交给下一个执行器后原持有者不得再修改。
#[derive(Debug, Clone)]
pub struct ImageFrame {
    bitmap: RgbaImage,
    revision: u64,
}

impl ImageFrame {
    /// 由像素缓冲区生成新帧（零拷贝，总是打上新的修订戳）
    pub fn from_pixels(pixels: PixelBuffer) -> RuntimeResult<Self> {
        let PixelBuffer { width, height, data } = pixels;
        let bitmap = RgbaImage::from_raw(width, height, data).ok_or_else(|| {
            RuntimeError::InvalidInput(format!("无法由 {}x{} 像素数据构建位图", width, height))
        })?;
        Self::from_bitmap(bitmap)
    }

    /// 由位图生成新帧
    pub fn from_bitmap(bitmap: RgbaImage) -> RuntimeResult<Self> {
        if bitmap.width() == 0 || bitmap.height() == 0 {
            return Err(RuntimeError::InvalidInput(format!(
                "图像尺寸无效: {}x{}", bitmap.width(), bitmap.height()
            )));
        }
        Ok(Self {
            bitmap,
            revision: next_revision(),
        })
    }

    pub fn width(&self) -> u32 {
        self.bitmap.width()
    }

    pub fn height(&self) -> u32 {
        self.bitmap.height()
    }

    /// 修订戳，仅用于变更检测
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn bitmap(&self) -> &RgbaImage {
        &self.bitmap
    }

    /// 复制出像素缓冲区，帧本身保持不变
    pub fn to_pixels(&self) -> PixelBuffer {
        PixelBuffer {
            width: self.width(),
            height: self.height(),
            data: self.bitmap.as_raw().clone(),
        }
    }

    /// 消费帧并取出像素缓冲区（零拷贝）
    pub fn into_pixels(self) -> PixelBuffer {
        let width = self.width();
        let height = self.height();
        PixelBuffer {
            width,
            height,
            data: self.bitmap.into_raw(),
        }
    }
}
