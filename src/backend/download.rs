// 模型下载进度跟踪
//
// 一个模型由多个资源文件组成，只跟踪目前声明总大小最大的文件；
// 中途出现更大的文件时切换到它，其余文件的进度一律忽略。

use serde::{Deserialize, Serialize};

/// 单个资源文件的下载进度事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetProgress {
    pub file: String,
    pub loaded: u64,
    pub total: u64,
}

impl AssetProgress {
    pub fn new(file: impl Into<String>, loaded: u64, total: u64) -> Self {
        Self {
            file: file.into(),
            loaded,
            total,
        }
    }
}

/// 最大文件启发式跟踪器
#[derive(Debug, Clone, Default)]
pub struct DownloadTracker {
    largest_file: Option<String>,
    largest_total: u64,
}

impl DownloadTracker {
    /// 处理一个进度事件，返回需要上报的进度；非跟踪文件返回 None
    pub fn observe(&mut self, event: &AssetProgress) -> Option<f32> {
        // 未声明总大小的事件无法计算进度
        if event.total == 0 {
            return None;
        }
        if event.total > self.largest_total {
            self.largest_file = Some(event.file.clone());
            self.largest_total = event.total;
        }
        if self.largest_file.as_deref() != Some(event.file.as_str()) {
            return None;
        }
        Some((event.loaded as f64 / event.total as f64).clamp(0.0, 1.0) as f32)
    }

    /// 当前跟踪的文件
    pub fn tracked_file(&self) -> Option<&str> {
        self.largest_file.as_deref()
    }
}
