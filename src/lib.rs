// PipeMagic 节点执行运行时
//
// 负责图像处理流水线中的单节点执行：图像帧、执行上下文、
// 模型加载（单飞缓存 + GPU 回退）、节点执行器与后台分割 worker。
// 调度器与界面不在本 crate 内。

pub mod backend;
pub mod config;
pub mod context;
pub mod error;
pub mod executors;
pub mod frame;
pub mod logging;
pub mod models;
pub mod params;
pub mod session;
pub mod utils;
pub mod worker;

#[cfg(test)]
mod testing;

pub use context::{AbortController, AbortSignal, ExecutionContext};
pub use error::{RuntimeError, RuntimeResult};
pub use executors::{ExecutorRegistry, NodeExecutor};
pub use frame::{ImageFrame, PixelBuffer};
pub use params::{Device, NodeParams, NodeType};
pub use session::{Backends, RuntimeSession};
pub use worker::SegmentationWorker;
