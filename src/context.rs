// 执行上下文模块
//
// 每次流水线运行一个上下文，不跨运行共享：取消令牌 + 进度/状态/下载进度回调，按节点 ID 寻址。
// 回调均为可选，缺省时静默忽略。

use crate::backend::LoadObserver;
use crate::error::{RuntimeError, RuntimeResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// 进度回调：(节点 ID, 0.0-1.0)
pub type ProgressCallback = Arc<dyn Fn(&str, f32) + Send + Sync>;
/// 状态消息回调：(节点 ID, 消息)，None 表示清除指示
pub type StatusCallback = Arc<dyn Fn(&str, Option<&str>) + Send + Sync>;
/// 下载进度回调：(节点 ID, 0.0-1.0)，None 表示清除指示
pub type DownloadProgressCallback = Arc<dyn Fn(&str, Option<f32>) + Send + Sync>;

/// 取消令牌（只读端）
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    aborted: Arc<AtomicBool>,
}

impl AbortSignal {
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// 检查点：已中止则返回取消信号
    pub fn check(&self) -> RuntimeResult<()> {
        if self.is_aborted() {
            Err(RuntimeError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// 取消控制端
#[derive(Debug, Clone, Default)]
pub struct AbortController {
    signal: AbortSignal,
}

impl AbortController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self) -> AbortSignal {
        self.signal.clone()
    }

    pub fn abort(&self) {
        self.signal.aborted.store(true, Ordering::SeqCst);
    }
}

/// 执行上下文
#[derive(Clone)]
pub struct ExecutionContext {
    run_id: String,
    node_id: String,
    abort: AbortSignal,
    on_progress: Option<ProgressCallback>,
    on_status_message: Option<StatusCallback>,
    on_download_progress: Option<DownloadProgressCallback>,
    /// 每个节点本次执行最近一次上报的进度，用于保证单调不减；begin_progress 重置
    last_progress: Arc<Mutex<HashMap<String, f32>>>,
}

impl ExecutionContext {
    pub fn new(abort: AbortSignal) -> Self {
        Self {
            run_id: crate::utils::generate_id(),
            node_id: String::new(),
            abort,
            on_progress: None,
            on_status_message: None,
            on_download_progress: None,
            last_progress: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.on_progress = Some(callback);
        self
    }

    pub fn with_status_message(mut self, callback: StatusCallback) -> Self {
        self.on_status_message = Some(callback);
        self
    }

    pub fn with_download_progress(mut self, callback: DownloadProgressCallback) -> Self {
        self.on_download_progress = Some(callback);
        self
    }

    /// 为指定节点派生上下文（共享取消令牌、回调和进度记录）
    pub fn for_node(&self, node_id: impl Into<String>) -> Self {
        let mut ctx = self.clone();
        ctx.node_id = node_id.into();
        ctx
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn abort_signal(&self) -> &AbortSignal {
        &self.abort
    }

    /// 取消检查点
    pub fn check_aborted(&self) -> RuntimeResult<()> {
        if self.abort.is_aborted() {
            info!("[CONTEXT] 执行已取消: run_id={}, node_id={}", self.run_id, self.node_id);
            return Err(RuntimeError::Cancelled);
        }
        Ok(())
    }

    /// 上报进度；回退的进度值会被丢弃
    pub fn report_progress(&self, fraction: f32) {
        if fraction.is_nan() {
            return;
        }
        let fraction = fraction.clamp(0.0, 1.0);
        {
            let mut last = self.last_progress.lock();
            let previous = last.entry(self.node_id.clone()).or_insert(0.0);
            if fraction < *previous {
                debug!(
                    "[CONTEXT] 忽略回退进度: node_id={}, {:.3} < {:.3}",
                    self.node_id, fraction, previous
                );
                return;
            }
            *previous = fraction;
        }
        if let Some(ref cb) = self.on_progress {
            cb(&self.node_id, fraction);
        }
    }

    /// 节点开始一次新的执行：清除本节点的进度记录后上报起始进度
    pub fn begin_progress(&self, fraction: f32) {
        self.last_progress.lock().remove(&self.node_id);
        self.report_progress(fraction);
    }

    pub fn report_status(&self, message: Option<&str>) {
        if let Some(ref cb) = self.on_status_message {
            cb(&self.node_id, message);
        }
    }

    pub fn report_download_progress(&self, fraction: Option<f32>) {
        if let Some(ref cb) = self.on_download_progress {
            cb(&self.node_id, fraction.map(|f| f.clamp(0.0, 1.0)));
        }
    }

    /// 清除状态与下载进度指示
    pub fn clear_indicators(&self) {
        self.report_status(None);
        self.report_download_progress(None);
    }

    /// 构造绑定到当前节点的后端加载观察者
    pub fn load_observer(&self) -> LoadObserver {
        let status_ctx = self.clone();
        let download_ctx = self.clone();
        LoadObserver {
            on_status: Some(Arc::new(move |message: Option<&str>| {
                status_ctx.report_status(message)
            })),
            on_download_progress: Some(Arc::new(move |fraction: f32| {
                download_ctx.report_download_progress(Some(fraction))
            })),
        }
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("run_id", &self.run_id)
            .field("node_id", &self.node_id)
            .field("aborted", &self.abort.is_aborted())
            .finish()
    }
}
