// 分割 worker 消息协议
//
// 请求与响应都是带 type 标签的 JSON 对象；像素缓冲区在消息之间按所有权转移。
// 每条消息外层带请求编号 id，响应沿用所属请求的编号，调用方据此丢弃不属于自己的响应。

use crate::backend::ResolvedDevice;
use crate::params::Device;
use serde::{Deserialize, Serialize};

/// 默认前景阈值（掩码强度 / 255）
pub const DEFAULT_THRESHOLD: f32 = 0.5;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f32>,
}

/// 带请求编号的消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub id: u64,
    #[serde(flatten)]
    pub message: T,
}

impl<T> Envelope<T> {
    pub fn new(id: u64, message: T) -> Self {
        Self { id, message }
    }
}

/// 发给 worker 的请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WorkerRequest {
    Load {
        model: String,
        device: Device,
    },
    Run {
        #[serde(rename = "imageData")]
        image_data: Vec<u8>,
        width: u32,
        height: u32,
        #[serde(default)]
        params: RunParams,
    },
}

/// worker 发回的响应
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WorkerResponse {
    Status {
        message: String,
    },
    Device {
        device: ResolvedDevice,
    },
    Progress {
        progress: f32,
    },
    Result {
        #[serde(rename = "imageData")]
        image_data: Vec<u8>,
        width: u32,
        height: u32,
    },
    Error {
        message: String,
    },
}
