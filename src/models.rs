// 模型目录模块

use crate::params::DepthTier;
use serde::{Deserialize, Serialize};

/// 深度估计小模型（fast 档位）
pub const DEPTH_SMALL_MODEL: &str = "onnx-community/depth-anything-v2-small";
/// 深度估计基础模型（quality 档位）
pub const DEPTH_BASE_MODEL: &str = "onnx-community/depth-anything-v2-base";
/// 人脸解析模型（单一模型，无档位）
pub const FACE_PARSING_MODEL: &str = "Xenova/face-parsing";

/// 模型任务类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ModelTask {
    DepthEstimation,
    ImageSegmentation,
}

/// 模型信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    /// 模型唯一标识（同时作为加载器的变体键）
    pub id: String,
    /// 显示名称
    pub name: String,
    /// 任务类型
    pub task: ModelTask,
    /// 模型描述
    pub description: String,
    /// 速度评分 (1-5, 5最快)
    pub speed_rating: u8,
    /// 质量评分 (1-5, 5最高)
    pub quality_rating: u8,
    /// 权重文件大致大小 (bytes)
    pub file_size: u64,
}

/// 获取所有已知模型
pub fn get_available_models() -> Vec<ModelInfo> {
    vec![
        ModelInfo {
            id: DEPTH_SMALL_MODEL.to_string(),
            name: "Depth Anything V2 Small".to_string(),
            task: ModelTask::DepthEstimation,
            description: "快速深度估计，适合预览".to_string(),
            speed_rating: 5,
            quality_rating: 3,
            file_size: 99_000_000, // ~99MB
        },
        ModelInfo {
            id: DEPTH_BASE_MODEL.to_string(),
            name: "Depth Anything V2 Base".to_string(),
            task: ModelTask::DepthEstimation,
            description: "高质量深度估计，速度较慢".to_string(),
            speed_rating: 3,
            quality_rating: 5,
            file_size: 390_000_000, // ~390MB
        },
        ModelInfo {
            id: FACE_PARSING_MODEL.to_string(),
            name: "Face Parsing".to_string(),
            task: ModelTask::ImageSegmentation,
            description: "19 类人脸语义分割".to_string(),
            speed_rating: 4,
            quality_rating: 4,
            file_size: 85_000_000, // ~85MB
        },
        ModelInfo {
            id: crate::config::DEFAULT_REMOVE_BG_MODEL.to_string(),
            name: "RMBG 1.4".to_string(),
            task: ModelTask::ImageSegmentation,
            description: "前景分割，用于背景移除".to_string(),
            speed_rating: 4,
            quality_rating: 4,
            file_size: 176_000_000, // ~176MB
        },
    ]
}

/// 根据 ID 获取模型信息
pub fn get_model_by_id(model_id: &str) -> Option<ModelInfo> {
    get_available_models().into_iter().find(|m| m.id == model_id)
}

/// 深度模型档位表：fast -> small, quality -> base
pub fn depth_model_for_tier(tier: DepthTier) -> &'static str {
    match tier {
        DepthTier::Fast => DEPTH_SMALL_MODEL,
        DepthTier::Quality => DEPTH_BASE_MODEL,
    }
}
