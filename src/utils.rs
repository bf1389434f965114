// 工具模块

use std::path::PathBuf;

/// 生成 UUID
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// 获取运行时数据目录
///
/// 优先使用系统本地数据目录下的 pipemagic，不可用时回退到当前工作目录下的 data
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("pipemagic"))
        .unwrap_or_else(|| {
            std::env::current_dir()
                .unwrap_or_else(|_| PathBuf::from("."))
                .join("data")
        })
}

/// 默认配置文件路径
pub fn default_config_path() -> PathBuf {
    get_data_dir().join("config.json")
}

/// 默认日志目录
pub fn default_log_dir() -> PathBuf {
    get_data_dir().join("logs")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_paths_live_under_data_dir() {
        let data = get_data_dir();
        assert!(data.ends_with("pipemagic") || data.ends_with("data"));
        assert_eq!(default_config_path(), data.join("config.json"));
        assert_eq!(default_log_dir(), data.join("logs"));
    }

    #[test]
    fn test_generated_ids_are_distinct() {
        assert_ne!(generate_id(), generate_id());
    }
}
