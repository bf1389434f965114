// 推理原始输出校验
//
// 后端返回的原始输出形状不固定，在使用前校验为固定的结果契约；
// 形状不符视为推理错误。

use crate::error::{RuntimeError, RuntimeResult};

/// 深度模型原始输出：扁平数据 + 张量维度（[h, w] 或带前导 1 维，如 [1, h, w]）
#[derive(Debug, Clone, PartialEq)]
pub struct RawDepthOutput {
    pub data: Vec<f32>,
    pub dims: Vec<usize>,
}

/// 校验后的稠密深度图
#[derive(Debug, Clone, PartialEq)]
pub struct DepthMap {
    width: u32,
    height: u32,
    values: Vec<f32>,
}

impl DepthMap {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }
}

impl TryFrom<RawDepthOutput> for DepthMap {
    type Error = RuntimeError;

    fn try_from(raw: RawDepthOutput) -> RuntimeResult<Self> {
        if raw.dims.len() < 2 {
            return Err(RuntimeError::Inference(format!(
                "深度张量维度不足: {:?}", raw.dims
            )));
        }
        let (leading, spatial) = raw.dims.split_at(raw.dims.len() - 2);
        if leading.iter().any(|&d| d != 1) {
            return Err(RuntimeError::Inference(format!(
                "深度张量包含多个批次/通道: {:?}", raw.dims
            )));
        }
        let (height, width) = (spatial[0], spatial[1]);
        if width == 0 || height == 0 {
            return Err(RuntimeError::Inference(format!(
                "深度图尺寸无效: {}x{}", width, height
            )));
        }
        if raw.data.len() != width * height {
            return Err(RuntimeError::Inference(format!(
                "深度数据长度不匹配: 维度 {:?}, 数据 {} 个", raw.dims, raw.data.len()
            )));
        }
        let width = u32::try_from(width)
            .map_err(|_| RuntimeError::Inference(format!("深度图宽度过大: {}", width)))?;
        let height = u32::try_from(height)
            .map_err(|_| RuntimeError::Inference(format!("深度图高度过大: {}", height)))?;
        Ok(Self {
            width,
            height,
            values: raw.data,
        })
    }
}

/// 分割模型原始掩码
#[derive(Debug, Clone, PartialEq)]
pub struct RawMask {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub channels: u32,
}

/// 分割模型原始片段
#[derive(Debug, Clone, PartialEq)]
pub struct RawSegment {
    pub label: String,
    pub score: Option<f32>,
    pub mask: Option<RawMask>,
}

/// 校验后的掩码，按 (x, y) 读取第一个通道的强度
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentMask {
    width: u32,
    height: u32,
    channels: u32,
    data: Vec<u8>,
}

impl SegmentMask {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// 读取 (x, y) 处的掩码强度；调用方保证坐标在范围内
    pub fn value(&self, x: usize, y: usize) -> u8 {
        self.data[(y * self.width as usize + x) * self.channels as usize]
    }
}

impl TryFrom<RawMask> for SegmentMask {
    type Error = RuntimeError;

    fn try_from(raw: RawMask) -> RuntimeResult<Self> {
        if raw.width == 0 || raw.height == 0 || raw.channels == 0 {
            return Err(RuntimeError::Inference(format!(
                "掩码形状无效: {}x{}x{}", raw.width, raw.height, raw.channels
            )));
        }
        let expected = raw.width as usize * raw.height as usize * raw.channels as usize;
        if raw.data.len() < expected {
            return Err(RuntimeError::Inference(format!(
                "掩码数据不足: 期望 {} 字节, 实际 {} 字节", expected, raw.data.len()
            )));
        }
        Ok(Self {
            width: raw.width,
            height: raw.height,
            channels: raw.channels,
            data: raw.data,
        })
    }
}

/// 校验后的分割片段；没有掩码的片段保留为 None
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub label: String,
    pub mask: Option<SegmentMask>,
}

impl TryFrom<RawSegment> for Segment {
    type Error = RuntimeError;

    fn try_from(raw: RawSegment) -> RuntimeResult<Self> {
        Ok(Self {
            label: raw.label,
            mask: raw.mask.map(SegmentMask::try_from).transpose()?,
        })
    }
}

/// 批量校验分割结果，保持结果顺序
pub fn validate_segments(raw: Vec<RawSegment>) -> RuntimeResult<Vec<Segment>> {
    raw.into_iter().map(Segment::try_from).collect()
}
