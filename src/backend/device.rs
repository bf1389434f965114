// GPU 能力探测
//
// 硬件可用性在会话内不会变化，探测结果按会话缓存，只探测一次。

use super::ResolvedDevice;
use crate::error::RuntimeResult;
use crate::params::Device;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{info, warn};

/// GPU 能力
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuCapability {
    Available,
    Unavailable,
}

/// GPU 可用性探测
#[async_trait]
pub trait GpuProbe: Send + Sync {
    async fn probe(&self) -> RuntimeResult<GpuCapability>;
}

/// 没有 GPU 的环境
#[derive(Debug, Clone, Copy, Default)]
pub struct NoGpuProbe;

#[async_trait]
impl GpuProbe for NoGpuProbe {
    async fn probe(&self) -> RuntimeResult<GpuCapability> {
        Ok(GpuCapability::Unavailable)
    }
}

/// 会话级设备能力缓存
pub struct DeviceCapabilities {
    probe: Arc<dyn GpuProbe>,
    gpu_enabled: bool,
    cached: OnceCell<GpuCapability>,
}

impl DeviceCapabilities {
    pub fn new(probe: Arc<dyn GpuProbe>) -> Self {
        Self {
            probe,
            gpu_enabled: true,
            cached: OnceCell::new(),
        }
    }

    /// 配置禁用 GPU 时跳过探测，auto 总是解析为 CPU
    pub fn with_gpu_enabled(mut self, enabled: bool) -> Self {
        self.gpu_enabled = enabled;
        self
    }

    /// 获取 GPU 能力（使用缓存，探测失败视为不可用）
    pub async fn gpu(&self) -> GpuCapability {
        *self
            .cached
            .get_or_init(|| async {
                if !self.gpu_enabled {
                    info!("[DEVICE] 配置已禁用 GPU");
                    return GpuCapability::Unavailable;
                }
                info!("[DEVICE] 首次检测 GPU 能力...");
                match self.probe.probe().await {
                    Ok(capability) => {
                        info!("[DEVICE] GPU 能力检测完成: {:?}", capability);
                        capability
                    }
                    Err(e) => {
                        warn!("[DEVICE] GPU 探测失败，回退到 CPU: {}", e);
                        GpuCapability::Unavailable
                    }
                }
            })
            .await
    }

    /// 解析请求的设备：auto 按探测结果选择，显式值原样使用
    pub async fn resolve(&self, requested: Device) -> ResolvedDevice {
        match requested {
            Device::Gpu => ResolvedDevice::Gpu,
            Device::Cpu => ResolvedDevice::Cpu,
            Device::Auto => match self.gpu().await {
                GpuCapability::Available => ResolvedDevice::Gpu,
                GpuCapability::Unavailable => ResolvedDevice::Cpu,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FixedGpuProbe;

    #[tokio::test]
    async fn test_auto_prefers_gpu_when_available() {
        let caps = DeviceCapabilities::new(Arc::new(FixedGpuProbe::available()));
        assert_eq!(caps.resolve(Device::Auto).await, ResolvedDevice::Gpu);
        assert_eq!(caps.resolve(Device::Cpu).await, ResolvedDevice::Cpu);
    }

    #[tokio::test]
    async fn test_probe_failure_falls_back_to_cpu() {
        let caps = DeviceCapabilities::new(Arc::new(FixedGpuProbe::failing()));
        assert_eq!(caps.resolve(Device::Auto).await, ResolvedDevice::Cpu);
        // 显式请求不受探测结果影响
        assert_eq!(caps.resolve(Device::Gpu).await, ResolvedDevice::Gpu);
    }

    #[tokio::test]
    async fn test_probe_runs_once() {
        let probe = Arc::new(FixedGpuProbe::available());
        let caps = DeviceCapabilities::new(probe.clone());
        for _ in 0..3 {
            caps.resolve(Device::Auto).await;
        }
        assert_eq!(probe.calls(), 1);
    }

    #[tokio::test]
    async fn test_disabled_gpu_skips_probe() {
        let probe = Arc::new(FixedGpuProbe::available());
        let caps = DeviceCapabilities::new(probe.clone()).with_gpu_enabled(false);
        assert_eq!(caps.resolve(Device::Auto).await, ResolvedDevice::Cpu);
        assert_eq!(probe.calls(), 0);
    }
}
