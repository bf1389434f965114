// 错误处理模块

use thiserror::Error;
use serde::Serialize;

#[derive(Error, Debug)]
pub enum RuntimeError {
    /// 执行被中止（调度器据此区分"已停止"与"已出错"）
    #[error("任务已取消")]
    Cancelled,

    #[error("推理后端加载失败: {0}")]
    BackendLoad(String),

    #[error("无效输入: {0}")]
    InvalidInput(String),

    #[error("推理输出错误: {0}")]
    Inference(String),

    #[error("后台 worker 错误: {0}")]
    Worker(String),

    #[error("配置错误: {0}")]
    Config(String),

    #[error("图像编解码错误: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON 解析错误: {0}")]
    Json(#[from] serde_json::Error),
}

impl RuntimeError {
    /// 是否为取消信号
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RuntimeError::Cancelled)
    }
}

// 实现 Serialize 以便错误可以跨进程/线程边界传递
impl Serialize for RuntimeError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;
