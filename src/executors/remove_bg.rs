// 背景移除执行器
//
// 推理交给后台分割 worker：按 (模型, 设备) 只加载一次，
// 像素缓冲区移交给 worker，worker 原地改写 alpha 后把缓冲区交回。

use super::{cancelled_or, take_first_input, NodeExecutor, PROGRESS_BACKEND_READY, PROGRESS_STARTED};
use crate::context::ExecutionContext;
use crate::error::RuntimeResult;
use crate::frame::ImageFrame;
use crate::params::{NodeParams, NodeType};
use crate::worker::{RunParams, SegmentationWorker};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

/// worker 推理进度映射到 [0.2, 0.95]
const PROGRESS_RUN_SPAN: f32 = 0.75;

pub struct RemoveBgExecutor {
    worker: Arc<SegmentationWorker>,
    model: String,
    threshold: Option<f32>,
    load_lock: tokio::sync::Mutex<()>,
}

impl RemoveBgExecutor {
    pub fn new(worker: Arc<SegmentationWorker>, model: impl Into<String>, threshold: Option<f32>) -> Self {
        Self {
            worker,
            model: model.into(),
            threshold,
            load_lock: tokio::sync::Mutex::new(()),
        }
    }
}

#[async_trait]
impl NodeExecutor for RemoveBgExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::RemoveBg
    }

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        inputs: Vec<ImageFrame>,
        params: &NodeParams,
    ) -> RuntimeResult<ImageFrame> {
        let params = match params {
            NodeParams::RemoveBg(p) => p,
            other => return Err(other.mismatch(NodeType::RemoveBg)),
        };
        let input = take_first_input(inputs)?;
        ctx.check_aborted()?;
        ctx.begin_progress(PROGRESS_STARTED);

        {
            let _guard = self.load_lock.lock().await;
            let wanted = (self.model.clone(), params.device);
            if self.worker.loaded_model().as_ref() != Some(&wanted) {
                // dtype 只影响模型精度，worker 始终加载默认精度
                debug!("[REMOVE_BG] dtype 参数: {:?}", params.dtype);
                let device = self
                    .worker
                    .load(&self.model, params.device, |message| ctx.report_status(Some(message)))
                    .await
                    .map_err(|e| cancelled_or(ctx, e))?;
                info!("[REMOVE_BG] 模型已加载: {} ({})", self.model, device.as_str());
            }
        }
        ctx.clear_indicators();
        ctx.check_aborted()?;
        ctx.report_progress(PROGRESS_BACKEND_READY);

        let pixels = input.into_pixels();
        let output = self
            .worker
            .run(pixels, RunParams { threshold: self.threshold }, |p| {
                ctx.report_progress(PROGRESS_BACKEND_READY + PROGRESS_RUN_SPAN * p)
            })
            .await?;
        ctx.check_aborted()?;

        let frame = ImageFrame::from_pixels(output)?;
        ctx.report_progress(1.0);
        Ok(frame)
    }
}
