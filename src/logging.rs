// 日志
//
// 运行时自身按配置级别输出，依赖库只输出 warn 以上；RUST_LOG 优先。
// 文件按天轮转写入 pipemagic.log.*，debug 构建额外输出到控制台。

use crate::config::LogLevel;
use crate::error::RuntimeResult;
use chrono::{DateTime, Duration, Local};
use std::fs;
use std::path::Path;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_RETENTION_DAYS: i64 = 7;
const LOG_FILE_PREFIX: &str = "pipemagic.log";

/// 默认过滤规则：本 crate 使用配置级别，其余 warn
fn default_filter(level: LogLevel) -> String {
    format!("warn,{}={}", env!("CARGO_CRATE_NAME"), level.as_str())
}

/// 初始化日志；返回的 guard 必须由宿主持有，丢弃后文件日志停止写入。
/// 宿主已安装全局 subscriber 时保留宿主的。
pub fn init_logging(log_dir: &Path, log_level: LogLevel) -> RuntimeResult<WorkerGuard> {
    fs::create_dir_all(log_dir)?;
    let removed = cleanup_old_logs(log_dir, Local::now());

    let appender = RollingFileAppender::new(Rotation::DAILY, log_dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(log_level)));

    let file_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_thread_names(true)
        .with_line_number(true);

    let console_layer = cfg!(debug_assertions).then(|| fmt::layer().with_target(false));

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .is_ok();

    info!(
        "[LOGGING] 日志目录: {:?}, 级别: {}, 清理旧日志 {} 个{}",
        log_dir,
        log_level.as_str(),
        removed,
        if installed { "" } else { "（沿用宿主 subscriber）" }
    );
    Ok(guard)
}

/// 删除修改时间早于保留期限的运行时日志，返回删除数量
fn cleanup_old_logs(log_dir: &Path, now: DateTime<Local>) -> usize {
    let cutoff = now - Duration::days(LOG_RETENTION_DAYS);
    let Ok(entries) = fs::read_dir(log_dir) else {
        return 0;
    };

    entries
        .flatten()
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(LOG_FILE_PREFIX))
        .filter(|entry| {
            entry
                .metadata()
                .and_then(|m| m.modified())
                .map(|modified| DateTime::<Local>::from(modified) < cutoff)
                .unwrap_or(false)
        })
        .filter(|entry| match fs::remove_file(entry.path()) {
            Ok(()) => true,
            Err(e) => {
                eprintln!("删除旧日志失败 {:?}: {}", entry.path(), e);
                false
            }
        })
        .count()
}
