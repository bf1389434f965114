// 分割 worker 的事件循环
//
// 状态机：Unloaded -> Loading -> Ready <-> Running。
// 同一时刻只处理一个任务（加载或推理）；任务进行中收到的请求立即以 error 拒绝。
// 任何失败都只回复 error，不会终止 worker。
// 响应（包括拒绝）都带上所属请求的编号。

use super::protocol::{Envelope, RunParams, WorkerRequest, WorkerResponse, DEFAULT_THRESHOLD};
use crate::backend::{
    validate_segments, AssetProgressFn, BackendProvider, DeviceCapabilities, ResolvedDevice,
    Segmenter, SegmentMask,
};
use crate::error::RuntimeResult;
use crate::executors::mask::MaskSampler;
use crate::frame::{PixelBuffer, CHANNELS};
use crate::params::Device;
use rayon::prelude::*;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WorkerState {
    Unloaded,
    Loading,
    Ready,
    Running,
}

type Job = Pin<Box<dyn Future<Output = JobOutcome> + Send>>;

enum JobOutcome {
    Loaded(Reply, RuntimeResult<(Arc<dyn Segmenter>, ResolvedDevice, String)>),
    Ran,
}

/// 绑定到某个请求编号的响应发送端
#[derive(Clone)]
struct Reply {
    id: u64,
    tx: mpsc::UnboundedSender<Envelope<WorkerResponse>>,
}

impl Reply {
    fn send(&self, message: WorkerResponse) {
        if self.tx.send(Envelope::new(self.id, message)).is_err() {
            debug!("[WORKER] 响应通道已关闭，丢弃请求 {} 的响应", self.id);
        }
    }
}

pub(crate) struct WorkerSession {
    provider: Arc<dyn BackendProvider<dyn Segmenter>>,
    capabilities: Arc<DeviceCapabilities>,
    responses: mpsc::UnboundedSender<Envelope<WorkerResponse>>,
    state: WorkerState,
    session: Option<Arc<dyn Segmenter>>,
}

impl WorkerSession {
    pub(crate) fn new(
        provider: Arc<dyn BackendProvider<dyn Segmenter>>,
        capabilities: Arc<DeviceCapabilities>,
        responses: mpsc::UnboundedSender<Envelope<WorkerResponse>>,
    ) -> Self {
        Self {
            provider,
            capabilities,
            responses,
            state: WorkerState::Unloaded,
            session: None,
        }
    }

    /// 事件循环，请求通道关闭后退出
    pub(crate) async fn run(mut self, mut requests: mpsc::UnboundedReceiver<Envelope<WorkerRequest>>) {
        let mut job: Option<Job> = None;
        loop {
            tokio::select! {
                request = requests.recv() => match request {
                    Some(request) => self.handle(request, &mut job),
                    None => break,
                },
                outcome = poll_job(&mut job), if job.is_some() => {
                    job = None;
                    self.finish(outcome);
                }
            }
        }
        info!("[WORKER] 请求通道已关闭，worker 退出");
    }

    fn reply_to(&self, id: u64) -> Reply {
        Reply { id, tx: self.responses.clone() }
    }

    fn reject(&self, reply: &Reply, message: String) {
        warn!("[WORKER] 拒绝请求 {}: {}", reply.id, message);
        reply.send(WorkerResponse::Error { message });
    }

    fn handle(&mut self, request: Envelope<WorkerRequest>, job: &mut Option<Job>) {
        let reply = self.reply_to(request.id);
        match request.message {
            WorkerRequest::Load { model, device } => match self.state {
                WorkerState::Loading | WorkerState::Running => {
                    self.reject(&reply, format!("worker 正忙，无法加载模型: {}", model));
                }
                WorkerState::Unloaded | WorkerState::Ready => {
                    self.state = WorkerState::Loading;
                    *job = Some(Box::pin(load_session(
                        self.provider.clone(),
                        self.capabilities.clone(),
                        reply,
                        model,
                        device,
                    )));
                }
            },
            WorkerRequest::Run { image_data, width, height, params } => {
                match (self.state, self.session.clone()) {
                    (WorkerState::Ready, Some(session)) => {
                        self.state = WorkerState::Running;
                        *job = Some(Box::pin(run_segmentation(
                            session,
                            reply,
                            PendingImage { data: image_data, width, height },
                            params,
                        )));
                    }
                    (WorkerState::Running, _) | (WorkerState::Loading, _) => {
                        self.reject(&reply, "worker 正忙，请等待当前任务完成".to_string());
                    }
                    _ => self.reject(&reply, "模型未加载".to_string()),
                }
            }
        }
    }

    fn finish(&mut self, outcome: JobOutcome) {
        match outcome {
            JobOutcome::Loaded(reply, Ok((session, device, model))) => {
                info!("[WORKER] 模型加载完成: {} ({})", model, device.as_str());
                self.session = Some(session);
                self.state = WorkerState::Ready;
                reply.send(WorkerResponse::Device { device });
            }
            JobOutcome::Loaded(reply, Err(e)) => {
                error!("[WORKER] 模型加载失败: {}", e);
                // 重新加载失败时保留之前的会话
                self.state = if self.session.is_some() {
                    WorkerState::Ready
                } else {
                    WorkerState::Unloaded
                };
                reply.send(WorkerResponse::Error { message: e.to_string() });
            }
            JobOutcome::Ran => {
                self.state = WorkerState::Ready;
            }
        }
    }
}

async fn poll_job(job: &mut Option<Job>) -> JobOutcome {
    match job {
        Some(job) => job.await,
        None => std::future::pending().await,
    }
}

async fn load_session(
    provider: Arc<dyn BackendProvider<dyn Segmenter>>,
    capabilities: Arc<DeviceCapabilities>,
    reply: Reply,
    model: String,
    device: Device,
) -> JobOutcome {
    reply.send(WorkerResponse::Status {
        message: format!("正在加载模型 {}...", model),
    });

    let resolved = capabilities.resolve(device).await;
    let on_asset: AssetProgressFn = Arc::new(|_| {});
    info!("[WORKER] 加载模型: {}, 请求设备 {}, 解析为 {}", model, device.as_str(), resolved.as_str());

    let result = match provider.initialize(&model, resolved, on_asset.clone()).await {
        Ok(session) => Ok((session, resolved)),
        Err(e) if device != Device::Cpu => {
            // 静默回退到 CPU 重试一次
            warn!("[WORKER] {} 初始化失败: {}，回退到 CPU", resolved.as_str(), e);
            provider
                .initialize(&model, ResolvedDevice::Cpu, on_asset)
                .await
                .map(|session| (session, ResolvedDevice::Cpu))
        }
        Err(e) => Err(e),
    };
    JobOutcome::Loaded(reply, result.map(|(session, device)| (session, device, model)))
}

struct PendingImage {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

async fn run_segmentation(
    session: Arc<dyn Segmenter>,
    reply: Reply,
    image: PendingImage,
    params: RunParams,
) -> JobOutcome {
    let progress = |value: f32| reply.send(WorkerResponse::Progress { progress: value });

    let outcome = async {
        progress(0.1);
        let pixels = PixelBuffer::new(image.width, image.height, image.data)?;
        progress(0.3);
        let segments = validate_segments(session.segment(&pixels).await?)?;
        progress(0.8);
        let mask = segments.first().and_then(|s| s.mask.as_ref());
        let threshold = params.threshold.unwrap_or(DEFAULT_THRESHOLD);
        let output = apply_alpha_mask(pixels, mask, threshold);
        progress(1.0);
        Ok::<_, crate::error::RuntimeError>(output)
    }
    .await;

    let response = match outcome {
        Ok(output) => WorkerResponse::Result {
            image_data: output.data,
            width: output.width,
            height: output.height,
        },
        Err(e) => {
            error!("[WORKER] 分割失败: {}", e);
            WorkerResponse::Error { message: e.to_string() }
        }
    };
    reply.send(response);
    JobOutcome::Ran
}

/// 按掩码原地改写 alpha：强度 >= threshold * 255 为不透明，否则全透明；没有掩码时原样返回
pub(crate) fn apply_alpha_mask(
    mut pixels: PixelBuffer,
    mask: Option<&SegmentMask>,
    threshold: f32,
) -> PixelBuffer {
    let Some(mask) = mask else {
        debug!("[WORKER] 分割结果没有掩码，原样返回");
        return pixels;
    };
    let cutoff = threshold * 255.0;
    let sampler = MaskSampler::new(mask, pixels.width, pixels.height);
    let row_len = pixels.width as usize * CHANNELS;
    pixels.data.par_chunks_mut(row_len).enumerate().for_each(|(y, row)| {
        for (x, px) in row.chunks_exact_mut(CHANNELS).enumerate() {
            px[3] = if f32::from(sampler.sample(x, y)) >= cutoff { 255 } else { 0 };
        }
    });
    pixels
}
