use std::path::PathBuf;

/// 流水线中会中断运行的错误
///
/// 文件名解析失败、遥测匹配失败属于单条记录级别的问题，只会被记录到日志和统计中，
/// 不会出现在这里。
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("无法解析遥测日志 {path}:{line}: {reason}")]
    TelemetryParse { path: PathBuf, line: usize, reason: String },

    #[error("无法解析清单文件 {path}:{line}: {reason}")]
    ManifestParse { path: PathBuf, line: usize, reason: String },

    #[error("无效的批处理参数: {0}")]
    InvalidBatchParameters(String),

    #[error("输出路径已存在: {0}")]
    OutputConflict(PathBuf),

    #[error("没有可处理的数据: {0}")]
    EmptyInputSet(String),

    #[error("无效的遥测格式定义: {0}")]
    Schema(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn telemetry(path: impl Into<PathBuf>, line: usize, reason: impl ToString) -> Self {
        Self::TelemetryParse { path: path.into(), line, reason: reason.to_string() }
    }

    pub(crate) fn manifest(path: impl Into<PathBuf>, line: usize, reason: impl ToString) -> Self {
        Self::ManifestParse { path: path.into(), line, reason: reason.to_string() }
    }
}
