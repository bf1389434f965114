// 节点执行器模块
//
// 子模块：
// - depth: 深度估计（模型档位选择 + 灰度归一化）
// - face_parse: 人脸解析（19 类掩码合成彩色分割图）
// - remove_bg: 背景移除（经由后台分割 worker）
// - mask: 掩码最近邻采样
//
// 执行器契约：execute(上下文, 有序输入帧, 参数) -> 输出帧。
// 每个执行器在获取后端前上报早期进度，获取后端后再上报一次；
// 重计算开始前检查取消令牌；成功时最终进度恰好为 1。

pub mod depth;
pub mod face_parse;
pub mod mask;
pub mod remove_bg;

use crate::context::ExecutionContext;
use crate::error::{RuntimeError, RuntimeResult};
use crate::frame::ImageFrame;
use crate::params::{NodeParams, NodeType};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info};

pub use depth::DepthExecutor;
pub use face_parse::FaceParseExecutor;
pub use remove_bg::RemoveBgExecutor;

/// 获取后端之前的进度
pub const PROGRESS_STARTED: f32 = 0.05;
/// 后端就绪后的进度
pub const PROGRESS_BACKEND_READY: f32 = 0.2;
/// 输入转换完成后的进度
pub const PROGRESS_INPUT_READY: f32 = 0.3;

/// 节点执行器
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    fn node_type(&self) -> NodeType;

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        inputs: Vec<ImageFrame>,
        params: &NodeParams,
    ) -> RuntimeResult<ImageFrame>;
}

/// 取出第一个输入帧（所有权转移给执行器）
pub(crate) fn take_first_input(inputs: Vec<ImageFrame>) -> RuntimeResult<ImageFrame> {
    inputs
        .into_iter()
        .next()
        .ok_or_else(|| RuntimeError::InvalidInput("没有输入图像".to_string()))
}

/// 后端获取失败时，若已中止则优先报告取消
pub(crate) fn cancelled_or(ctx: &ExecutionContext, error: RuntimeError) -> RuntimeError {
    if ctx.abort_signal().is_aborted() {
        RuntimeError::Cancelled
    } else {
        error
    }
}

/// 执行器注册表
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: HashMap<NodeType, Arc<dyn NodeExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, executor: Arc<dyn NodeExecutor>) {
        self.executors.insert(executor.node_type(), executor);
    }

    pub fn get(&self, node_type: NodeType) -> Option<Arc<dyn NodeExecutor>> {
        self.executors.get(&node_type).cloned()
    }

    pub fn node_types(&self) -> Vec<NodeType> {
        let mut types: Vec<NodeType> = self.executors.keys().copied().collect();
        types.sort_by_key(|t| t.as_str());
        types
    }

    /// 按节点类型字符串分发执行：解析类型、合并默认参数、调用执行器
    pub async fn execute(
        &self,
        node_type: &str,
        ctx: &ExecutionContext,
        inputs: Vec<ImageFrame>,
        params: serde_json::Value,
    ) -> RuntimeResult<ImageFrame> {
        let node_type: NodeType = node_type.parse()?;
        let executor = self.get(node_type).ok_or_else(|| {
            RuntimeError::InvalidInput(format!("节点类型没有注册执行器: {}", node_type))
        })?;
        let params = NodeParams::resolve(node_type, params)?;

        info!(
            "[EXECUTOR] 开始执行节点: run_id={}, node_id={}, type={}, 输入 {} 帧",
            ctx.run_id(),
            ctx.node_id(),
            node_type,
            inputs.len()
        );
        let result = executor.execute(ctx, inputs, &params).await;
        match &result {
            Ok(frame) => info!(
                "[EXECUTOR] 节点完成: node_id={}, 输出 {}x{}",
                ctx.node_id(),
                frame.width(),
                frame.height()
            ),
            Err(e) if e.is_cancelled() => info!("[EXECUTOR] 节点已取消: node_id={}", ctx.node_id()),
            Err(e) => error!("[EXECUTOR] 节点失败: node_id={}, {}", ctx.node_id(), e),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::AbortSignal;
    use crate::frame::PixelBuffer;

    struct Passthrough;

    #[async_trait]
    impl NodeExecutor for Passthrough {
        fn node_type(&self) -> NodeType {
            NodeType::Normalize
        }

        async fn execute(
            &self,
            ctx: &ExecutionContext,
            inputs: Vec<ImageFrame>,
            params: &NodeParams,
        ) -> RuntimeResult<ImageFrame> {
            assert!(matches!(params, NodeParams::Normalize(_)));
            let input = take_first_input(inputs)?;
            ctx.report_progress(1.0);
            ImageFrame::from_pixels(input.into_pixels())
        }
    }

    fn frame() -> ImageFrame {
        ImageFrame::from_pixels(PixelBuffer::transparent(2, 2).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_dispatch_by_type_string() {
        let mut registry = ExecutorRegistry::new();
        registry.register(Arc::new(Passthrough));
        let ctx = ExecutionContext::new(AbortSignal::default());

        let out = registry
            .execute("normalize", &ctx, vec![frame()], serde_json::json!({"size": 512}))
            .await
            .unwrap();
        assert_eq!((out.width(), out.height()), (2, 2));
        assert_eq!(registry.node_types(), vec![NodeType::Normalize]);
    }

    #[tokio::test]
    async fn test_unknown_or_unregistered_types_fail() {
        let registry = ExecutorRegistry::new();
        let ctx = ExecutionContext::new(AbortSignal::default());

        let err = registry
            .execute("blur", &ctx, vec![frame()], serde_json::Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidInput(_)));

        let err = registry
            .execute("outline", &ctx, vec![frame()], serde_json::Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidInput(_)));
    }

    #[test]
    fn test_empty_inputs_rejected() {
        assert!(matches!(take_first_input(Vec::new()), Err(RuntimeError::InvalidInput(_))));
    }
}
