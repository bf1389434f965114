// 节点参数目录
//
// 每种节点类型都有固定的参数结构和一份默认值。未指定的字段回退到默认值；
// 合并是唯一的校验，超出范围的数值不会在这里被拒绝。

use crate::error::{RuntimeError, RuntimeResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// 节点类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeType {
    Input,
    Output,
    RemoveBg,
    Normalize,
    Upscale,
    Outline,
    Depth,
    FaceParse,
}

impl NodeType {
    pub const ALL: [NodeType; 8] = [
        NodeType::Input,
        NodeType::Output,
        NodeType::RemoveBg,
        NodeType::Normalize,
        NodeType::Upscale,
        NodeType::Outline,
        NodeType::Depth,
        NodeType::FaceParse,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Input => "input",
            NodeType::Output => "output",
            NodeType::RemoveBg => "remove-bg",
            NodeType::Normalize => "normalize",
            NodeType::Upscale => "upscale",
            NodeType::Outline => "outline",
            NodeType::Depth => "depth",
            NodeType::FaceParse => "face-parse",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeType {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NodeType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| RuntimeError::InvalidInput(format!("未知节点类型: {}", s)))
    }
}

/// 请求的计算设备
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Device {
    #[serde(rename = "webgpu")]
    Gpu,
    #[serde(rename = "wasm")]
    Cpu,
    #[default]
    #[serde(rename = "auto")]
    Auto,
}

impl Device {
    pub fn as_str(&self) -> &'static str {
        match self {
            Device::Gpu => "webgpu",
            Device::Cpu => "wasm",
            Device::Auto => "auto",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Fit {
    #[default]
    Contain,
    Cover,
    Fill,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputParams {
    pub max_size: u32,
    pub fit: Fit,
}

impl Default for InputParams {
    fn default() -> Self {
        Self {
            max_size: 2048,
            fit: Fit::Contain,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Png,
    Jpeg,
    Webp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputParams {
    pub format: OutputFormat,
    pub quality: f32,
}

impl Default for OutputParams {
    fn default() -> Self {
        Self {
            format: OutputFormat::Png,
            quality: 0.92,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Dtype {
    Fp32,
    #[default]
    Fp16,
    Q8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RemoveBgParams {
    pub device: Device,
    pub dtype: Dtype,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizeParams {
    pub size: u32,
    pub padding: u32,
}

impl Default for NormalizeParams {
    fn default() -> Self {
        Self {
            size: 1024,
            padding: 16,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum UpscaleModel {
    #[default]
    #[serde(rename = "cnn-2x-s")]
    Cnn2xS,
    #[serde(rename = "cnn-2x-m")]
    Cnn2xM,
    #[serde(rename = "cnn-2x-l")]
    Cnn2xL,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ContentType {
    #[default]
    #[serde(rename = "rl")]
    RealLife,
    #[serde(rename = "an")]
    Anime,
    #[serde(rename = "3d")]
    ThreeD,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpscaleParams {
    pub model: UpscaleModel,
    pub content_type: ContentType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutlineQuality {
    Low,
    #[default]
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutlinePosition {
    #[default]
    Outside,
    Center,
    Inside,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlineParams {
    pub thickness: f32,
    pub color: String,
    pub opacity: f32,
    pub quality: OutlineQuality,
    pub position: OutlinePosition,
    pub threshold: f32,
}

impl Default for OutlineParams {
    fn default() -> Self {
        Self {
            thickness: 4.0,
            color: "#ffffff".to_string(),
            opacity: 1.0,
            quality: OutlineQuality::Medium,
            position: OutlinePosition::Outside,
            threshold: 0.0,
        }
    }
}

/// 深度模型档位，无法识别的档位按 fast 处理
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DepthTier {
    Quality,
    #[default]
    #[serde(other)]
    Fast,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DepthParams {
    pub model: DepthTier,
    pub device: Device,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct FaceParseParams {
    pub device: Device,
}

/// 按节点类型区分的参数
#[derive(Debug, Clone, PartialEq)]
pub enum NodeParams {
    Input(InputParams),
    Output(OutputParams),
    RemoveBg(RemoveBgParams),
    Normalize(NormalizeParams),
    Upscale(UpscaleParams),
    Outline(OutlineParams),
    Depth(DepthParams),
    FaceParse(FaceParseParams),
}

/// 将部分参数覆盖到默认值之上后反序列化
fn merge_over<T>(defaults: T, overrides: Value) -> RuntimeResult<T>
where
    T: Serialize + serde::de::DeserializeOwned,
{
    let mut merged = serde_json::to_value(defaults)?;
    match overrides {
        Value::Null => {}
        Value::Object(fields) => {
            if let Value::Object(base) = &mut merged {
                for (key, value) in fields {
                    // null 字段视为未指定
                    if !value.is_null() {
                        base.insert(key, value);
                    }
                }
            }
        }
        other => {
            return Err(RuntimeError::InvalidInput(format!("节点参数必须是对象: {}", other)));
        }
    }
    serde_json::from_value(merged)
        .map_err(|e| RuntimeError::InvalidInput(format!("节点参数格式错误: {}", e)))
}

impl NodeParams {
    /// 节点类型的默认参数
    pub fn defaults(node_type: NodeType) -> Self {
        match node_type {
            NodeType::Input => NodeParams::Input(InputParams::default()),
            NodeType::Output => NodeParams::Output(OutputParams::default()),
            NodeType::RemoveBg => NodeParams::RemoveBg(RemoveBgParams::default()),
            NodeType::Normalize => NodeParams::Normalize(NormalizeParams::default()),
            NodeType::Upscale => NodeParams::Upscale(UpscaleParams::default()),
            NodeType::Outline => NodeParams::Outline(OutlineParams::default()),
            NodeType::Depth => NodeParams::Depth(DepthParams::default()),
            NodeType::FaceParse => NodeParams::FaceParse(FaceParseParams::default()),
        }
    }

    /// 将部分参数与默认值合并
    pub fn resolve(node_type: NodeType, overrides: Value) -> RuntimeResult<Self> {
        Ok(match node_type {
            NodeType::Input => NodeParams::Input(merge_over(InputParams::default(), overrides)?),
            NodeType::Output => NodeParams::Output(merge_over(OutputParams::default(), overrides)?),
            NodeType::RemoveBg => NodeParams::RemoveBg(merge_over(RemoveBgParams::default(), overrides)?),
            NodeType::Normalize => NodeParams::Normalize(merge_over(NormalizeParams::default(), overrides)?),
            NodeType::Upscale => NodeParams::Upscale(merge_over(UpscaleParams::default(), overrides)?),
            NodeType::Outline => NodeParams::Outline(merge_over(OutlineParams::default(), overrides)?),
            NodeType::Depth => NodeParams::Depth(merge_over(DepthParams::default(), overrides)?),
            NodeType::FaceParse => NodeParams::FaceParse(merge_over(FaceParseParams::default(), overrides)?),
        })
    }

    pub fn node_type(&self) -> NodeType {
        match self {
            NodeParams::Input(_) => NodeType::Input,
            NodeParams::Output(_) => NodeType::Output,
            NodeParams::RemoveBg(_) => NodeType::RemoveBg,
            NodeParams::Normalize(_) => NodeType::Normalize,
            NodeParams::Upscale(_) => NodeType::Upscale,
            NodeParams::Outline(_) => NodeType::Outline,
            NodeParams::Depth(_) => NodeType::Depth,
            NodeParams::FaceParse(_) => NodeType::FaceParse,
        }
    }

    /// 参数类型与执行器不符时的统一错误
    pub(crate) fn mismatch(&self, expected: NodeType) -> RuntimeError {
        RuntimeError::InvalidInput(format!(
            "参数类型不匹配: 期望 {}, 实际 {}",
            expected,
            self.node_type()
        ))
    }
}
