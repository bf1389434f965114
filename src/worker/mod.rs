// 后台分割 worker
//
// 分割推理跑在独立线程（自带单线程 tokio 运行时）里，通过带标签的消息与调用方通信。
// 调用方可以直接收发原始消息，也可以用 load / run 完成一次完整的请求-响应交换。
// load / run 只接受带自己请求编号的响应，被中途放弃的请求留下的响应会被丢弃。

pub mod protocol;
mod session;

pub use protocol::{Envelope, RunParams, WorkerRequest, WorkerResponse, DEFAULT_THRESHOLD};

use crate::backend::{BackendProvider, DeviceCapabilities, ResolvedDevice, Segmenter};
use crate::error::{RuntimeError, RuntimeResult};
use crate::frame::PixelBuffer;
use crate::params::Device;
use session::WorkerSession;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

pub struct SegmentationWorker {
    requests: Option<mpsc::UnboundedSender<Envelope<WorkerRequest>>>,
    responses: tokio::sync::Mutex<mpsc::UnboundedReceiver<Envelope<WorkerResponse>>>,
    next_id: AtomicU64,
    loaded: parking_lot::Mutex<Option<(String, Device)>>,
    thread: Option<JoinHandle<()>>,
}

impl SegmentationWorker {
    /// 启动 worker 线程
    pub fn spawn(
        provider: Arc<dyn BackendProvider<dyn Segmenter>>,
        capabilities: Arc<DeviceCapabilities>,
    ) -> RuntimeResult<Self> {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (response_tx, response_rx) = mpsc::unbounded_channel();

        let thread = std::thread::Builder::new()
            .name("pipemagic-segmentation".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        error!("[WORKER] 创建运行时失败: {}", e);
                        let _ = response_tx.send(Envelope::new(
                            0,
                            WorkerResponse::Error {
                                message: format!("创建 worker 运行时失败: {}", e),
                            },
                        ));
                        return;
                    }
                };
                let session = WorkerSession::new(provider, capabilities, response_tx);
                runtime.block_on(session.run(request_rx));
            })?;

        info!("[WORKER] 分割 worker 已启动");
        Ok(Self {
            requests: Some(request_tx),
            responses: tokio::sync::Mutex::new(response_rx),
            next_id: AtomicU64::new(1),
            loaded: parking_lot::Mutex::new(None),
            thread: Some(thread),
        })
    }

    /// 发送原始请求，返回分配的请求编号
    pub fn post(&self, request: WorkerRequest) -> RuntimeResult<u64> {
        let sender = self
            .requests
            .as_ref()
            .ok_or_else(|| RuntimeError::Worker("worker 已关闭".to_string()))?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        sender
            .send(Envelope::new(id, request))
            .map_err(|_| RuntimeError::Worker("worker 已退出".to_string()))?;
        Ok(id)
    }

    /// 接收下一条原始响应
    pub async fn next_response(&self) -> RuntimeResult<Envelope<WorkerResponse>> {
        self.responses
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| RuntimeError::Worker("worker 已退出".to_string()))
    }

    /// 最近一次加载成功的 (模型, 请求设备)
    pub fn loaded_model(&self) -> Option<(String, Device)> {
        self.loaded.lock().clone()
    }

    /// 加载模型，返回实际使用的设备
    pub async fn load(
        &self,
        model: &str,
        device: Device,
        on_status: impl Fn(&str) + Send + Sync,
    ) -> RuntimeResult<ResolvedDevice> {
        let mut responses = self.responses.lock().await;
        let id = self.post(WorkerRequest::Load { model: model.to_string(), device })?;

        loop {
            let Some(response) = accept(&mut responses, id).await? else {
                continue;
            };
            match response {
                WorkerResponse::Status { message } => on_status(&message),
                WorkerResponse::Device { device: resolved } => {
                    *self.loaded.lock() = Some((model.to_string(), device));
                    return Ok(resolved);
                }
                WorkerResponse::Error { message } => return Err(RuntimeError::Worker(message)),
                other => debug!("[WORKER] 加载期间忽略响应: {:?}", other),
            }
        }
    }

    /// 对像素缓冲区执行背景移除；缓冲区所有权转移给 worker，结果缓冲区转回调用方
    pub async fn run(
        &self,
        pixels: PixelBuffer,
        params: RunParams,
        on_progress: impl Fn(f32) + Send + Sync,
    ) -> RuntimeResult<PixelBuffer> {
        let mut responses = self.responses.lock().await;
        let id = self.post(WorkerRequest::Run {
            image_data: pixels.data,
            width: pixels.width,
            height: pixels.height,
            params,
        })?;

        loop {
            let Some(response) = accept(&mut responses, id).await? else {
                continue;
            };
            match response {
                WorkerResponse::Progress { progress } => on_progress(progress),
                WorkerResponse::Result { image_data, width, height } => {
                    return PixelBuffer::new(width, height, image_data);
                }
                WorkerResponse::Error { message } => return Err(RuntimeError::Worker(message)),
                other => debug!("[WORKER] 推理期间忽略响应: {:?}", other),
            }
        }
    }
}

/// 接收一条响应；编号不属于当前请求时返回 None
async fn accept(
    responses: &mut mpsc::UnboundedReceiver<Envelope<WorkerResponse>>,
    id: u64,
) -> RuntimeResult<Option<WorkerResponse>> {
    let envelope = responses
        .recv()
        .await
        .ok_or_else(|| RuntimeError::Worker("worker 已退出".to_string()))?;
    // 编号 0 是 worker 启动失败，任何请求都要看到
    if envelope.id == id || envelope.id == 0 {
        return Ok(Some(envelope.message));
    }
    debug!("[WORKER] 丢弃过期响应: 请求 {} (当前 {})", envelope.id, id);
    Ok(None)
}

impl Drop for SegmentationWorker {
    fn drop(&mut self) {
        // 关闭请求通道让事件循环退出
        self.requests.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("[WORKER] worker 线程异常退出");
            }
        }
    }
}
