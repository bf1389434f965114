// 掩码最近邻采样
//
// 掩码分辨率可能与输出不同：缩放系数 = 掩码尺寸 / 输出尺寸（按轴），
// 采样索引 = min(round(坐标 * 系数), 掩码尺寸 - 1)。

use crate::backend::SegmentMask;

/// 预先计算好行列索引的采样器
pub struct MaskSampler<'a> {
    mask: &'a SegmentMask,
    xs: Vec<usize>,
    ys: Vec<usize>,
}

fn nearest_indices(mask_dim: u32, out_dim: u32) -> Vec<usize> {
    let scale = mask_dim as f64 / out_dim as f64;
    let last = mask_dim as usize - 1;
    (0..out_dim as usize)
        .map(|coord| ((coord as f64 * scale).round() as usize).min(last))
        .collect()
}

impl<'a> MaskSampler<'a> {
    pub fn new(mask: &'a SegmentMask, out_width: u32, out_height: u32) -> Self {
        Self {
            mask,
            xs: nearest_indices(mask.width(), out_width),
            ys: nearest_indices(mask.height(), out_height),
        }
    }

    /// 输出坐标 (x, y) 处的掩码强度
    pub fn sample(&self, x: usize, y: usize) -> u8 {
        self.mask.value(self.xs[x], self.ys[y])
    }
}
