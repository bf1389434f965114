// 测试辅助：可编排的假后端与回调记录器

use crate::backend::{
    AssetProgress, AssetProgressFn, BackendProvider, DepthEstimator, GpuCapability, GpuProbe,
    LoadObserver, RawDepthOutput, RawSegment, ResolvedDevice, Segmenter,
};
use crate::context::{AbortSignal, ExecutionContext};
use crate::error::{RuntimeError, RuntimeResult};
use crate::frame::PixelBuffer;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

type BuildFn<H> = Box<dyn Fn(&str, ResolvedDevice) -> Arc<H> + Send + Sync>;

/// 可编排的后端提供者：记录调用、可指定失败设备、延迟和下载事件
pub struct ScriptedProvider<H: ?Sized> {
    build: BuildFn<H>,
    failing: Mutex<Vec<ResolvedDevice>>,
    delay: Option<Duration>,
    asset_events: Vec<AssetProgress>,
    calls: Mutex<Vec<(String, ResolvedDevice)>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl ScriptedProvider<str> {
    /// 句柄内容为 "模型@设备" 的提供者
    pub fn text() -> Self {
        Self::new(|model, device| Arc::from(format!("{}@{}", model, device.as_str())))
    }
}

impl<H: ?Sized + Send + Sync + 'static> ScriptedProvider<H> {
    pub fn new(build: impl Fn(&str, ResolvedDevice) -> Arc<H> + Send + Sync + 'static) -> Self {
        Self {
            build: Box::new(build),
            failing: Mutex::new(Vec::new()),
            delay: None,
            asset_events: Vec::new(),
            calls: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing_on(self, device: ResolvedDevice) -> Self {
        self.failing.lock().push(device);
        self
    }

    pub fn with_asset_events(mut self, events: Vec<AssetProgress>) -> Self {
        self.asset_events = events;
        self
    }

    /// 清除所有失败设置
    pub fn heal(&self) {
        self.failing.lock().clear();
    }

    pub fn calls(&self) -> Vec<(String, ResolvedDevice)> {
        self.calls.lock().clone()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<H: ?Sized + Send + Sync + 'static> BackendProvider<H> for ScriptedProvider<H> {
    async fn initialize(
        &self,
        model_id: &str,
        device: ResolvedDevice,
        on_asset: AssetProgressFn,
    ) -> RuntimeResult<Arc<H>> {
        self.calls.lock().push((model_id.to_string(), device));
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);

        for event in &self.asset_events {
            on_asset(event.clone());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.active.fetch_sub(1, Ordering::SeqCst);
        if self.failing.lock().contains(&device) {
            return Err(RuntimeError::BackendLoad(format!(
                "{} 无法在 {} 上初始化",
                model_id,
                device.as_str()
            )));
        }
        Ok((self.build)(model_id, device))
    }
}

/// 固定结果的 GPU 探测，None 表示探测抛错
pub struct FixedGpuProbe {
    result: Option<GpuCapability>,
    calls: AtomicUsize,
}

impl FixedGpuProbe {
    pub fn available() -> Self {
        Self { result: Some(GpuCapability::Available), calls: AtomicUsize::new(0) }
    }

    pub fn unavailable() -> Self {
        Self { result: Some(GpuCapability::Unavailable), calls: AtomicUsize::new(0) }
    }

    pub fn failing() -> Self {
        Self { result: None, calls: AtomicUsize::new(0) }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GpuProbe for FixedGpuProbe {
    async fn probe(&self) -> RuntimeResult<GpuCapability> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result
            .ok_or_else(|| RuntimeError::BackendLoad("无法获取 GPU 适配器".to_string()))
    }
}

/// 返回固定深度图的假后端
pub struct FakeDepth {
    pub output: RawDepthOutput,
}

#[async_trait]
impl DepthEstimator for FakeDepth {
    async fn estimate(&self, _image: &PixelBuffer) -> RuntimeResult<RawDepthOutput> {
        Ok(self.output.clone())
    }
}

/// 返回固定分割结果的假后端；设置 gate 后推理会等待放行
pub struct FakeSegmenter {
    pub segments: Vec<RawSegment>,
    pub gate: Option<Arc<Notify>>,
}

impl FakeSegmenter {
    pub fn new(segments: Vec<RawSegment>) -> Self {
        Self { segments, gate: None }
    }
}

#[async_trait]
impl Segmenter for FakeSegmenter {
    async fn segment(&self, _image: &PixelBuffer) -> RuntimeResult<Vec<RawSegment>> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        Ok(self.segments.clone())
    }
}

/// 回调记录器
#[derive(Clone, Default)]
pub struct CallbackLog {
    entries: Arc<Mutex<Vec<String>>>,
    progress: Arc<Mutex<Vec<f32>>>,
}

impl CallbackLog {
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    pub fn progress_values(&self) -> Vec<f32> {
        self.progress.lock().clone()
    }

    pub fn observer(&self) -> LoadObserver {
        let status = self.entries.clone();
        let download = self.entries.clone();
        LoadObserver {
            on_status: Some(Arc::new(move |message: Option<&str>| {
                status.lock().push(format!("status:{}", message.unwrap_or("-")))
            })),
            on_download_progress: Some(Arc::new(move |fraction: f32| {
                download.lock().push(format!("download:{:.2}", fraction))
            })),
        }
    }

    /// 记录全部回调的执行上下文
    pub fn context(&self, abort: AbortSignal) -> ExecutionContext {
        let progress = self.progress.clone();
        let status = self.entries.clone();
        let download = self.entries.clone();
        ExecutionContext::new(abort)
            .with_progress(Arc::new(move |_node: &str, fraction: f32| {
                progress.lock().push(fraction)
            }))
            .with_status_message(Arc::new(move |_node: &str, message: Option<&str>| {
                status.lock().push(format!("status:{}", message.unwrap_or("-")))
            }))
            .with_download_progress(Arc::new(move |_node: &str, fraction: Option<f32>| {
                download.lock().push(match fraction {
                    Some(f) => format!("download:{:.2}", f),
                    None => "download:-".to_string(),
                })
            }))
            .for_node("node-1")
    }
}

/// 生成 RGBA 纯色缓冲区
pub fn solid_pixels(width: u32, height: u32, rgba: [u8; 4]) -> PixelBuffer {
    let data = rgba
        .iter()
        .copied()
        .cycle()
        .take(width as usize * height as usize * 4)
        .collect();
    PixelBuffer { width, height, data }
}
