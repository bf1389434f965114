// 模型加载器
//
// 每个执行器模块持有一个加载器实例，缓存容量为 1：
// - 命中缓存直接返回，不触发任何回调
// - 同一变体的并发请求共享同一个加载任务（单飞）
// - 请求其他变体时先驱逐旧句柄；不同变体的并发请求经由同一个加载器串行化
// - GPU 初始化失败时回退到 CPU 重试一次
// - 加载失败只清除进行中的任务，下一次请求从头重试

use super::device::DeviceCapabilities;
use super::download::{AssetProgress, DownloadTracker};
use super::{AssetProgressFn, BackendProvider, ResolvedDevice};
use crate::error::{RuntimeError, RuntimeResult};
use crate::params::Device;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// 加载状态回调，None 表示清除指示
pub type LoadStatusFn = Arc<dyn Fn(Option<&str>) + Send + Sync>;
/// 下载进度回调 (0.0 - 1.0)
pub type LoadProgressFn = Arc<dyn Fn(f32) + Send + Sync>;

/// GPU 回退时的状态消息
pub const GPU_FALLBACK_STATUS: &str = "GPU 后端初始化失败，正在回退到 CPU...";

/// 加载过程观察者
#[derive(Clone, Default)]
pub struct LoadObserver {
    pub on_status: Option<LoadStatusFn>,
    pub on_download_progress: Option<LoadProgressFn>,
}

impl LoadObserver {
    pub fn status(&self, message: Option<&str>) {
        if let Some(ref cb) = self.on_status {
            cb(message);
        }
    }

    pub fn download_progress(&self, fraction: f32) {
        if let Some(ref cb) = self.on_download_progress {
            cb(fraction);
        }
    }
}

/// 加载结果；错误以消息形式在所有等待者之间共享
type LoadOutcome<H> = Result<Arc<H>, String>;

/// 进行中的加载任务
struct InFlight<H: ?Sized> {
    key: String,
    generation: u64,
    outcome: watch::Receiver<Option<LoadOutcome<H>>>,
}

/// 缓存条目：key + 已加载句柄 + 进行中的任务
struct CacheEntry<H: ?Sized> {
    key: Option<String>,
    pipeline: Option<Arc<H>>,
    loading: Option<InFlight<H>>,
    next_generation: u64,
}

/// 单例模型加载器
pub struct ModelLoader<H: ?Sized + Send + Sync + 'static> {
    name: &'static str,
    provider: Arc<dyn BackendProvider<H>>,
    capabilities: Arc<DeviceCapabilities>,
    state: Arc<Mutex<CacheEntry<H>>>,
}

impl<H: ?Sized + Send + Sync + 'static> ModelLoader<H> {
    pub fn new(
        name: &'static str,
        provider: Arc<dyn BackendProvider<H>>,
        capabilities: Arc<DeviceCapabilities>,
    ) -> Self {
        Self {
            name,
            provider,
            capabilities,
            state: Arc::new(Mutex::new(CacheEntry {
                key: None,
                pipeline: None,
                loading: None,
                next_generation: 0,
            })),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// 当前缓存的变体键（只有加载成功的句柄才算）
    pub fn cached_key(&self) -> Option<String> {
        let state = self.state.lock();
        state.pipeline.as_ref().and(state.key.clone())
    }

    /// 是否有进行中的加载
    pub fn is_loading(&self) -> bool {
        self.state.lock().loading.is_some()
    }

    /// 获取后端句柄，必要时加载
    pub async fn acquire(
        &self,
        variant: &str,
        device: Device,
        observer: LoadObserver,
    ) -> RuntimeResult<Arc<H>> {
        loop {
            // 缓存检查、任务共享与启动在同一把锁内完成
            let (outcome, generation, same_key) = {
                let mut state = self.state.lock();
                if state.key.as_deref() == Some(variant) {
                    if let Some(pipeline) = &state.pipeline {
                        debug!("[LOADER] {} 命中缓存: {}", self.name, variant);
                        return Ok(pipeline.clone());
                    }
                }
                let pending = state.loading.as_ref().map(|inflight| {
                    if inflight.key == variant {
                        debug!("[LOADER] {} 等待进行中的加载: {}", self.name, variant);
                    } else {
                        debug!(
                            "[LOADER] {} 等待其他变体加载结束: {} (请求 {})",
                            self.name, inflight.key, variant
                        );
                    }
                    (inflight.outcome.clone(), inflight.generation, inflight.key == variant)
                });
                match pending {
                    Some(pending) => pending,
                    None => {
                        let (outcome, generation) =
                            self.start_load(&mut state, variant, device, observer.clone());
                        (outcome, generation, true)
                    }
                }
            };

            let result = wait_outcome(outcome).await;
            if result.is_none() {
                // 加载任务异常终止，清理以便后续重试
                let mut state = self.state.lock();
                if state.loading.as_ref().map(|l| l.generation) == Some(generation) {
                    state.loading = None;
                }
            }

            if !same_key {
                continue;
            }

            return match result {
                Some(Ok(pipeline)) => Ok(pipeline),
                Some(Err(message)) => Err(RuntimeError::BackendLoad(message)),
                None => Err(RuntimeError::BackendLoad(format!(
                    "{} 加载任务异常终止: {}",
                    self.name, variant
                ))),
            };
        }
    }

    /// 启动新的加载任务（调用方持有状态锁）
    fn start_load(
        &self,
        state: &mut CacheEntry<H>,
        variant: &str,
        device: Device,
        observer: LoadObserver,
    ) -> (watch::Receiver<Option<LoadOutcome<H>>>, u64) {
        if let (Some(old_key), Some(_)) = (state.key.as_deref(), state.pipeline.as_ref()) {
            info!("[LOADER] {} 驱逐旧模型: {} -> {}", self.name, old_key, variant);
        }
        state.pipeline = None;
        state.key = Some(variant.to_string());

        let generation = state.next_generation;
        state.next_generation += 1;

        let (tx, rx) = watch::channel(None);
        state.loading = Some(InFlight {
            key: variant.to_string(),
            generation,
            outcome: rx.clone(),
        });

        let task = LoadTask {
            name: self.name,
            provider: self.provider.clone(),
            capabilities: self.capabilities.clone(),
            variant: variant.to_string(),
            device,
            observer: observer.clone(),
        };
        let shared_state = self.state.clone();
        let name = self.name;

        // 加载在独立任务中运行，发起者被取消时其他等待者仍能拿到结果
        tokio::spawn(async move {
            let result = task.run().await;
            let outcome = {
                let mut state = shared_state.lock();
                if state.loading.as_ref().map(|l| l.generation) == Some(generation) {
                    state.loading = None;
                }
                match result {
                    Ok(pipeline) => {
                        state.pipeline = Some(pipeline.clone());
                        Ok(pipeline)
                    }
                    Err(e) => {
                        error!("[LOADER] {} 模型加载失败: {}", name, e);
                        Err(load_error_message(e))
                    }
                }
            };
            if outcome.is_ok() {
                observer.status(None);
            }
            let _ = tx.send(Some(outcome));
        });

        (rx, generation)
    }
}

/// 等待加载结果；发送端被丢弃时返回最后的值
async fn wait_outcome<H: ?Sized>(
    mut rx: watch::Receiver<Option<LoadOutcome<H>>>,
) -> Option<LoadOutcome<H>> {
    loop {
        let current = rx.borrow_and_update().clone();
        if current.is_some() {
            return current;
        }
        if rx.changed().await.is_err() {
            let last = rx.borrow().clone();
            return last;
        }
    }
}

fn load_error_message(error: RuntimeError) -> String {
    match error {
        RuntimeError::BackendLoad(message) => message,
        other => other.to_string(),
    }
}

/// 一次加载任务
struct LoadTask<H: ?Sized + Send + Sync + 'static> {
    name: &'static str,
    provider: Arc<dyn BackendProvider<H>>,
    capabilities: Arc<DeviceCapabilities>,
    variant: String,
    device: Device,
    observer: LoadObserver,
}

impl<H: ?Sized + Send + Sync + 'static> LoadTask<H> {
    async fn run(self) -> RuntimeResult<Arc<H>> {
        let resolved = self.capabilities.resolve(self.device).await;
        info!(
            "[LOADER] {} 开始加载模型: {}, 设备: {} -> {}",
            self.name,
            self.variant,
            self.device.as_str(),
            resolved.as_str()
        );
        self.observer
            .status(Some(&format!("正在加载模型 {}...", self.variant)));

        let tracker = Arc::new(Mutex::new(DownloadTracker::default()));
        let on_asset: AssetProgressFn = {
            let observer = self.observer.clone();
            Arc::new(move |event: AssetProgress| {
                let fraction = tracker.lock().observe(&event);
                if let Some(fraction) = fraction {
                    observer.download_progress(fraction);
                }
            })
        };

        match self
            .provider
            .initialize(&self.variant, resolved, on_asset.clone())
            .await
        {
            Ok(pipeline) => {
                info!("[LOADER] {} 模型加载完成: {} ({})", self.name, self.variant, resolved.as_str());
                Ok(pipeline)
            }
            Err(e) if resolved == ResolvedDevice::Gpu => {
                warn!("[LOADER] {} GPU 初始化失败，回退到 CPU: {}", self.name, e);
                self.observer.status(Some(GPU_FALLBACK_STATUS));
                let pipeline = self
                    .provider
                    .initialize(&self.variant, ResolvedDevice::Cpu, on_asset)
                    .await?;
                info!("[LOADER] {} 模型加载完成: {} (CPU 回退)", self.name, self.variant);
                Ok(pipeline)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{CallbackLog, FixedGpuProbe, ScriptedProvider};
    use std::time::Duration;

    fn loader_with(
        provider: Arc<ScriptedProvider<str>>,
        probe: FixedGpuProbe,
    ) -> ModelLoader<str> {
        ModelLoader::<str>::new(
            "test",
            provider,
            Arc::new(DeviceCapabilities::new(Arc::new(probe))),
        )
    }

    #[tokio::test]
    async fn test_concurrent_acquire_loads_once() {
        let provider = Arc::new(ScriptedProvider::text().with_delay(Duration::from_millis(50)));
        let loader = Arc::new(loader_with(provider.clone(), FixedGpuProbe::unavailable()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let loader = loader.clone();
            handles.push(tokio::spawn(async move {
                loader.acquire("model-a", Device::Auto, LoadObserver::default()).await
            }));
        }

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(provider.calls().len(), 1);
        assert!(results.iter().all(|r| Arc::ptr_eq(r, &results[0])));
        assert_eq!(loader.cached_key().as_deref(), Some("model-a"));
        assert!(!loader.is_loading());
    }

    #[tokio::test]
    async fn test_cache_hit_fires_no_callbacks() {
        let provider = Arc::new(ScriptedProvider::text());
        let loader = loader_with(provider.clone(), FixedGpuProbe::unavailable());
        loader.acquire("model-a", Device::Cpu, LoadObserver::default()).await.unwrap();

        let log = CallbackLog::default();
        loader.acquire("model-a", Device::Cpu, log.observer()).await.unwrap();

        assert!(log.entries().is_empty());
        assert_eq!(provider.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_auto_gpu_failure_retries_once_on_cpu() {
        let provider = Arc::new(ScriptedProvider::text().failing_on(ResolvedDevice::Gpu));
        let loader = loader_with(provider.clone(), FixedGpuProbe::available());
        let log = CallbackLog::default();

        let handle = loader.acquire("model-a", Device::Auto, log.observer()).await.unwrap();

        assert_eq!(&*handle, "model-a@wasm");
        assert_eq!(
            provider.calls(),
            vec![
                ("model-a".to_string(), ResolvedDevice::Gpu),
                ("model-a".to_string(), ResolvedDevice::Cpu),
            ]
        );
        let entries = log.entries();
        assert!(entries.contains(&format!("status:{}", GPU_FALLBACK_STATUS)));
        assert_eq!(entries.last().map(String::as_str), Some("status:-"));
    }

    #[tokio::test]
    async fn test_cpu_failure_propagates_without_retry() {
        let provider = Arc::new(ScriptedProvider::text().failing_on(ResolvedDevice::Cpu));
        let loader = loader_with(provider.clone(), FixedGpuProbe::unavailable());

        let err = loader
            .acquire("model-a", Device::Auto, LoadObserver::default())
            .await
            .unwrap_err();

        assert!(matches!(err, RuntimeError::BackendLoad(_)));
        assert_eq!(provider.calls(), vec![("model-a".to_string(), ResolvedDevice::Cpu)]);
    }

    #[tokio::test]
    async fn test_gpu_then_cpu_failure_propagates() {
        let provider = Arc::new(
            ScriptedProvider::text()
                .failing_on(ResolvedDevice::Gpu)
                .failing_on(ResolvedDevice::Cpu),
        );
        let loader = loader_with(provider.clone(), FixedGpuProbe::unavailable());

        let err = loader
            .acquire("model-a", Device::Gpu, LoadObserver::default())
            .await
            .unwrap_err();

        assert!(matches!(err, RuntimeError::BackendLoad(_)));
        assert_eq!(provider.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_failure_clears_task_so_next_call_retries() {
        let provider = Arc::new(ScriptedProvider::text().failing_on(ResolvedDevice::Cpu));
        let loader = loader_with(provider.clone(), FixedGpuProbe::unavailable());

        assert!(loader.acquire("model-a", Device::Cpu, LoadObserver::default()).await.is_err());
        assert!(!loader.is_loading());

        provider.heal();
        let handle = loader.acquire("model-a", Device::Cpu, LoadObserver::default()).await.unwrap();
        assert_eq!(&*handle, "model-a@wasm");
        assert_eq!(provider.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_variant_change_evicts_previous() {
        let provider = Arc::new(ScriptedProvider::text());
        let loader = loader_with(provider.clone(), FixedGpuProbe::unavailable());

        loader.acquire("small", Device::Cpu, LoadObserver::default()).await.unwrap();
        loader.acquire("base", Device::Cpu, LoadObserver::default()).await.unwrap();
        assert_eq!(loader.cached_key().as_deref(), Some("base"));

        loader.acquire("small", Device::Cpu, LoadObserver::default()).await.unwrap();
        assert_eq!(provider.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_different_variants_serialize() {
        let provider = Arc::new(ScriptedProvider::text().with_delay(Duration::from_millis(30)));
        let loader = Arc::new(loader_with(provider.clone(), FixedGpuProbe::unavailable()));

        let a = {
            let loader = loader.clone();
            tokio::spawn(async move { loader.acquire("small", Device::Cpu, LoadObserver::default()).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        let b = {
            let loader = loader.clone();
            tokio::spawn(async move { loader.acquire("base", Device::Cpu, LoadObserver::default()).await })
        };

        assert_eq!(&*a.await.unwrap().unwrap(), "small@wasm");
        assert_eq!(&*b.await.unwrap().unwrap(), "base@wasm");
        assert_eq!(provider.max_concurrent(), 1);
        assert_eq!(loader.cached_key().as_deref(), Some("base"));
    }

    #[tokio::test]
    async fn test_download_progress_tracks_largest_file() {
        let provider = Arc::new(ScriptedProvider::text().with_asset_events(vec![
            AssetProgress::new("config.json", 50, 100),
            AssetProgress::new("model.onnx", 100, 500),
            AssetProgress::new("config.json", 100, 100),
            AssetProgress::new("model.onnx", 500, 500),
        ]));
        let loader = loader_with(provider, FixedGpuProbe::unavailable());
        let log = CallbackLog::default();

        loader.acquire("model-a", Device::Cpu, log.observer()).await.unwrap();

        let downloads: Vec<String> = log
            .entries()
            .into_iter()
            .filter(|e| e.starts_with("download:"))
            .collect();
        assert_eq!(downloads, vec!["download:0.50", "download:0.20", "download:1.00"]);
    }

    #[tokio::test]
    async fn test_status_sequence_on_success() {
        let provider = Arc::new(ScriptedProvider::text());
        let loader = loader_with(provider, FixedGpuProbe::unavailable());
        let log = CallbackLog::default();

        loader.acquire("model-a", Device::Cpu, log.observer()).await.unwrap();

        assert_eq!(
            log.entries(),
            vec!["status:正在加载模型 model-a...".to_string(), "status:-".to_string()]
        );
    }
}
