// 运行时会话
//
// 持有设备能力缓存、两个模型加载器、分割 worker 与执行器注册表。
// 推理后端通过 Backends 注入；会话销毁时 worker 线程随之退出。

use crate::backend::{
    BackendProvider, DepthEstimator, DeviceCapabilities, GpuProbe, ModelLoader, Segmenter,
};
use crate::config::RuntimeConfig;
use crate::context::ExecutionContext;
use crate::error::RuntimeResult;
use crate::executors::{DepthExecutor, ExecutorRegistry, FaceParseExecutor, RemoveBgExecutor};
use crate::frame::ImageFrame;
use crate::worker::SegmentationWorker;
use std::sync::Arc;
use tracing::info;

/// 注入的推理后端
pub struct Backends {
    pub gpu_probe: Arc<dyn GpuProbe>,
    pub depth: Arc<dyn BackendProvider<dyn DepthEstimator>>,
    pub face_parse: Arc<dyn BackendProvider<dyn Segmenter>>,
    pub segmentation: Arc<dyn BackendProvider<dyn Segmenter>>,
}

pub struct RuntimeSession {
    capabilities: Arc<DeviceCapabilities>,
    depth_loader: Arc<ModelLoader<dyn DepthEstimator>>,
    face_parse_loader: Arc<ModelLoader<dyn Segmenter>>,
    worker: Arc<SegmentationWorker>,
    registry: ExecutorRegistry,
}

impl RuntimeSession {
    pub fn new(backends: Backends, config: &RuntimeConfig) -> RuntimeResult<Self> {
        let capabilities = Arc::new(
            DeviceCapabilities::new(backends.gpu_probe).with_gpu_enabled(config.gpu_enabled),
        );
        let depth_loader = Arc::new(ModelLoader::new("depth", backends.depth, capabilities.clone()));
        let face_parse_loader = Arc::new(ModelLoader::new(
            "face-parse",
            backends.face_parse,
            capabilities.clone(),
        ));
        let worker = Arc::new(SegmentationWorker::spawn(backends.segmentation, capabilities.clone())?);

        let mut registry = ExecutorRegistry::new();
        registry.register(Arc::new(DepthExecutor::new(depth_loader.clone())));
        registry.register(Arc::new(FaceParseExecutor::new(face_parse_loader.clone())));
        registry.register(Arc::new(RemoveBgExecutor::new(
            worker.clone(),
            config.remove_bg_model.clone(),
            config.mask_threshold,
        )));

        info!(
            "[SESSION] 运行时会话已创建: gpu_enabled={}, remove_bg_model={}",
            config.gpu_enabled, config.remove_bg_model
        );
        Ok(Self {
            capabilities,
            depth_loader,
            face_parse_loader,
            worker,
            registry,
        })
    }

    pub fn capabilities(&self) -> &Arc<DeviceCapabilities> {
        &self.capabilities
    }

    pub fn depth_loader(&self) -> &Arc<ModelLoader<dyn DepthEstimator>> {
        &self.depth_loader
    }

    pub fn face_parse_loader(&self) -> &Arc<ModelLoader<dyn Segmenter>> {
        &self.face_parse_loader
    }

    pub fn worker(&self) -> &Arc<SegmentationWorker> {
        &self.worker
    }

    pub fn registry(&self) -> &ExecutorRegistry {
        &self.registry
    }

    /// 执行一个节点
    pub async fn execute(
        &self,
        node_type: &str,
        ctx: &ExecutionContext,
        inputs: Vec<ImageFrame>,
        params: serde_json::Value,
    ) -> RuntimeResult<ImageFrame> {
        self.registry.execute(node_type, ctx, inputs, params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{RawDepthOutput, RawMask, RawSegment, ResolvedDevice};
    use crate::context::AbortController;
    use crate::params::NodeType;
    use crate::testing::{solid_pixels, CallbackLog, FakeDepth, FakeSegmenter, FixedGpuProbe, ScriptedProvider};
    use serde_json::json;

    struct Fixture {
        session: RuntimeSession,
        probe: Arc<FixedGpuProbe>,
        depth: Arc<ScriptedProvider<dyn DepthEstimator>>,
    }

    fn fixture(config: &RuntimeConfig) -> Fixture {
        let probe = Arc::new(FixedGpuProbe::available());
        let depth = Arc::new(ScriptedProvider::<dyn DepthEstimator>::new(|_, _| {
            Arc::new(FakeDepth {
                output: RawDepthOutput { data: vec![0.0, 1.0], dims: vec![1, 2] },
            }) as Arc<dyn DepthEstimator>
        }));
        let segmenter = || {
            Arc::new(ScriptedProvider::<dyn Segmenter>::new(|_, _| {
                Arc::new(FakeSegmenter::new(vec![RawSegment {
                    label: "skin".into(),
                    score: None,
                    mask: Some(RawMask { data: vec![255], width: 1, height: 1, channels: 1 }),
                }])) as Arc<dyn Segmenter>
            }))
        };
        let session = RuntimeSession::new(
            Backends {
                gpu_probe: probe.clone(),
                depth: depth.clone(),
                face_parse: segmenter(),
                segmentation: segmenter(),
            },
            config,
        )
        .unwrap();
        Fixture { session, probe, depth }
    }

    fn input() -> Vec<ImageFrame> {
        vec![ImageFrame::from_pixels(solid_pixels(2, 2, [9, 9, 9, 255])).unwrap()]
    }

    #[tokio::test]
    async fn test_registers_model_executors() {
        let f = fixture(&RuntimeConfig::default());
        assert_eq!(
            f.session.registry().node_types(),
            vec![NodeType::Depth, NodeType::FaceParse, NodeType::RemoveBg]
        );
    }

    #[tokio::test]
    async fn test_runs_all_model_nodes_and_probes_gpu_once() {
        let f = fixture(&RuntimeConfig::default());
        let ctx = CallbackLog::default().context(AbortController::new().signal());

        let depth = f.session.execute("depth", &ctx, input(), json!({"model": "fast"})).await.unwrap();
        assert_eq!((depth.width(), depth.height()), (2, 1));

        let faces = f.session.execute("face-parse", &ctx, input(), json!({})).await.unwrap();
        assert_eq!((faces.width(), faces.height()), (2, 2));

        let cut = f.session.execute("remove-bg", &ctx, input(), serde_json::Value::Null).await.unwrap();
        assert!(cut.to_pixels().data.chunks(4).all(|px| px[3] == 255));

        assert_eq!(f.probe.calls(), 1);
        assert_eq!(f.depth.calls()[0].1, ResolvedDevice::Gpu);
    }

    #[tokio::test]
    async fn test_gpu_disabled_skips_probe() {
        let config = RuntimeConfig { gpu_enabled: false, ..RuntimeConfig::default() };
        let f = fixture(&config);
        let ctx = CallbackLog::default().context(AbortController::new().signal());

        f.session.execute("depth", &ctx, input(), json!({})).await.unwrap();
        assert_eq!(f.probe.calls(), 0);
        assert_eq!(f.depth.calls()[0].1, ResolvedDevice::Cpu);
    }
}
