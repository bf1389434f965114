// 人脸解析执行器
//
// 分割模型输出 19 类人脸区域掩码，合成为一张彩色分割图：
// 输出初始为全透明黑色，按结果顺序绘制，掩码强度 > 127 的像素写入类别颜色（alpha 255），
// 后面的片段覆盖前面的。掩码分辨率不同时用最近邻采样。

use super::mask::MaskSampler;
use super::{cancelled_or, take_first_input, NodeExecutor, PROGRESS_BACKEND_READY, PROGRESS_INPUT_READY, PROGRESS_STARTED};
use crate::backend::{validate_segments, ModelLoader, Segment, Segmenter};
use crate::context::ExecutionContext;
use crate::error::RuntimeResult;
use crate::frame::{ImageFrame, PixelBuffer, CHANNELS};
use crate::models::FACE_PARSING_MODEL;
use crate::params::{NodeParams, NodeType};
use async_trait::async_trait;
use rayon::prelude::*;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 推理完成后的进度
const PROGRESS_INFERRED: f32 = 0.7;

/// 掩码强度阈值（严格大于）
const MASK_THRESHOLD: u8 = 127;

/// 类别标签与颜色，顺序即类别编号
pub const FACE_CLASSES: [(&str, [u8; 3]); 19] = [
    ("background", [0, 0, 0]),
    ("skin", [255, 224, 189]),
    ("nose", [255, 172, 68]),
    ("eye_g", [255, 255, 109]),
    ("l_eye", [0, 153, 255]),
    ("r_eye", [0, 102, 204]),
    ("l_brow", [102, 204, 0]),
    ("r_brow", [76, 153, 0]),
    ("l_ear", [204, 102, 255]),
    ("r_ear", [153, 51, 204]),
    ("mouth", [255, 0, 102]),
    ("u_lip", [255, 102, 102]),
    ("l_lip", [204, 0, 51]),
    ("hair", [102, 51, 0]),
    ("hat", [255, 0, 255]),
    ("ear_r", [178, 102, 255]),
    ("neck_l", [0, 204, 153]),
    ("neck", [0, 255, 204]),
    ("cloth", [51, 153, 255]),
];

/// 标签对应的颜色，未知标签按背景色处理
pub fn class_color(label: &str) -> [u8; 3] {
    match FACE_CLASSES.iter().find(|(name, _)| *name == label) {
        Some((_, color)) => *color,
        None => {
            warn!("[FACE_PARSE] 未知类别标签: {}，按背景色绘制", label);
            FACE_CLASSES[0].1
        }
    }
}

/// 把分割片段合成为 width x height 的彩色分割图
pub fn composite_segments(segments: &[Segment], width: u32, height: u32) -> RuntimeResult<PixelBuffer> {
    let layers: Vec<(MaskSampler<'_>, [u8; 3])> = segments
        .iter()
        .filter_map(|segment| match &segment.mask {
            Some(mask) => Some((MaskSampler::new(mask, width, height), class_color(&segment.label))),
            None => {
                debug!("[FACE_PARSE] 片段没有掩码，跳过: {}", segment.label);
                None
            }
        })
        .collect();

    let row_len = width as usize * CHANNELS;
    let mut data = vec![0u8; row_len * height as usize];
    data.par_chunks_mut(row_len).enumerate().for_each(|(y, row)| {
        for (sampler, color) in &layers {
            for (x, px) in row.chunks_exact_mut(CHANNELS).enumerate() {
                if sampler.sample(x, y) > MASK_THRESHOLD {
                    px[..3].copy_from_slice(color);
                    px[3] = 255;
                }
            }
        }
    });

    PixelBuffer::new(width, height, data)
}

pub struct FaceParseExecutor {
    loader: Arc<ModelLoader<dyn Segmenter>>,
}

impl FaceParseExecutor {
    pub fn new(loader: Arc<ModelLoader<dyn Segmenter>>) -> Self {
        Self { loader }
    }
}

#[async_trait]
impl NodeExecutor for FaceParseExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::FaceParse
    }

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        inputs: Vec<ImageFrame>,
        params: &NodeParams,
    ) -> RuntimeResult<ImageFrame> {
        let params = match params {
            NodeParams::FaceParse(p) => p,
            other => return Err(other.mismatch(NodeType::FaceParse)),
        };
        let input = take_first_input(inputs)?;
        ctx.check_aborted()?;
        ctx.begin_progress(PROGRESS_STARTED);

        let segmenter = self
            .loader
            .acquire(FACE_PARSING_MODEL, params.device, ctx.load_observer())
            .await
            .map_err(|e| cancelled_or(ctx, e))?;
        ctx.clear_indicators();
        ctx.check_aborted()?;
        ctx.report_progress(PROGRESS_BACKEND_READY);

        let pixels = input.into_pixels();
        ctx.report_progress(PROGRESS_INPUT_READY);

        let segments = validate_segments(segmenter.segment(&pixels).await?)?;
        ctx.check_aborted()?;
        ctx.report_progress(PROGRESS_INFERRED);

        let frame = ImageFrame::from_pixels(composite_segments(&segments, pixels.width, pixels.height)?)?;
        info!(
            "[FACE_PARSE] 人脸解析完成: {} 个片段, 输出 {}x{}",
            segments.len(),
            frame.width(),
            frame.height()
        );
        ctx.report_progress(1.0);
        Ok(frame)
    }
}
