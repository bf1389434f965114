// 推理后端模块
//
// 子模块：
// - device: GPU 能力探测（每个会话只探测一次）与设备解析
// - download: 模型下载进度跟踪（最大文件启发式）
// - loader: 按执行器划分的单例缓存，单飞加载 + GPU -> CPU 回退
// - output: 推理原始输出在边界处的校验

pub mod device;
pub mod download;
pub mod loader;
pub mod output;

use crate::error::RuntimeResult;
use crate::frame::PixelBuffer;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use device::{DeviceCapabilities, GpuCapability, GpuProbe, NoGpuProbe};
pub use download::{AssetProgress, DownloadTracker};
pub use loader::{LoadObserver, ModelLoader};
pub use output::{validate_segments, DepthMap, RawDepthOutput, RawMask, RawSegment, Segment, SegmentMask};

/// 解析后的实际计算设备
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResolvedDevice {
    #[serde(rename = "webgpu")]
    Gpu,
    #[serde(rename = "wasm")]
    Cpu,
}

impl ResolvedDevice {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolvedDevice::Gpu => "webgpu",
            ResolvedDevice::Cpu => "wasm",
        }
    }
}

/// 模型资源下载进度回调
pub type AssetProgressFn = Arc<dyn Fn(AssetProgress) + Send + Sync>;

/// 推理后端提供者：把模型变体在指定设备上初始化为可用的后端句柄
#[async_trait]
pub trait BackendProvider<H: ?Sized + Send + Sync + 'static>: Send + Sync {
    /// 初始化后端；加载期间通过 on_asset 上报各资源文件的下载进度
    async fn initialize(
        &self,
        model_id: &str,
        device: ResolvedDevice,
        on_asset: AssetProgressFn,
    ) -> RuntimeResult<Arc<H>>;
}

/// 深度估计后端
#[async_trait]
pub trait DepthEstimator: Send + Sync {
    /// 返回稠密深度图（尺寸可能与输入不同）
    async fn estimate(&self, image: &PixelBuffer) -> RuntimeResult<RawDepthOutput>;
}

/// 图像分割后端
#[async_trait]
pub trait Segmenter: Send + Sync {
    /// 返回按结果顺序排列的分割片段
    async fn segment(&self, image: &PixelBuffer) -> RuntimeResult<Vec<RawSegment>>;
}
