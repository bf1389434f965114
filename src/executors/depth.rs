// 深度估计执行器
//
// 按档位选择深度模型，推理后把深度值归一化为灰度图：
// gray = round(255 * (v - min) / range)，range 为 0 时按 1 处理，alpha 固定 255。
// 输出尺寸与深度图一致（可能与输入不同）。

use super::{cancelled_or, take_first_input, NodeExecutor, PROGRESS_BACKEND_READY, PROGRESS_INPUT_READY, PROGRESS_STARTED};
use crate::backend::{DepthEstimator, DepthMap, ModelLoader};
use crate::context::ExecutionContext;
use crate::error::RuntimeResult;
use crate::frame::{ImageFrame, PixelBuffer, CHANNELS};
use crate::models::depth_model_for_tier;
use crate::params::{NodeParams, NodeType};
use async_trait::async_trait;
use rayon::prelude::*;
use std::sync::Arc;
use tracing::{debug, info};

/// 推理完成后的进度
const PROGRESS_INFERRED: f32 = 0.8;

pub struct DepthExecutor {
    loader: Arc<ModelLoader<dyn DepthEstimator>>,
}

impl DepthExecutor {
    pub fn new(loader: Arc<ModelLoader<dyn DepthEstimator>>) -> Self {
        Self { loader }
    }
}

/// 深度图转灰度 RGBA
pub fn render_depth(depth: &DepthMap) -> RuntimeResult<PixelBuffer> {
    let values = depth.values();
    let (min, max) = values
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let range = if max - min == 0.0 { 1.0 } else { f64::from(max - min) };
    debug!("[DEPTH] 深度范围: min={}, max={}", min, max);

    let mut data = vec![0u8; values.len() * CHANNELS];
    data.par_chunks_mut(CHANNELS)
        .zip(values.par_iter())
        .for_each(|(px, &v)| {
            let gray = (255.0 * f64::from(v - min) / range).round().clamp(0.0, 255.0) as u8;
            px[0] = gray;
            px[1] = gray;
            px[2] = gray;
            px[3] = 255;
        });

    PixelBuffer::new(depth.width(), depth.height(), data)
}

#[async_trait]
impl NodeExecutor for DepthExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::Depth
    }

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        inputs: Vec<ImageFrame>,
        params: &NodeParams,
    ) -> RuntimeResult<ImageFrame> {
        let params = match params {
            NodeParams::Depth(p) => p,
            other => return Err(other.mismatch(NodeType::Depth)),
        };
        let input = take_first_input(inputs)?;
        ctx.check_aborted()?;
        ctx.begin_progress(PROGRESS_STARTED);

        let model_id = depth_model_for_tier(params.model);
        let estimator = self
            .loader
            .acquire(model_id, params.device, ctx.load_observer())
            .await
            .map_err(|e| cancelled_or(ctx, e))?;
        ctx.clear_indicators();
        ctx.check_aborted()?;
        ctx.report_progress(PROGRESS_BACKEND_READY);

        let pixels = input.into_pixels();
        ctx.report_progress(PROGRESS_INPUT_READY);

        let raw = estimator.estimate(&pixels).await?;
        ctx.check_aborted()?;
        ctx.report_progress(PROGRESS_INFERRED);

        let depth = DepthMap::try_from(raw)?;
        let frame = ImageFrame::from_pixels(render_depth(&depth)?)?;
        info!(
            "[DEPTH] 深度估计完成: model={}, 输入 {}x{}, 输出 {}x{}",
            model_id,
            pixels.width,
            pixels.height,
            frame.width(),
            frame.height()
        );
        ctx.report_progress(1.0);
        Ok(frame)
    }
}
