use std::path::PathBuf;
use std::sync::Arc;

use chrono::TimeDelta;
use clap::{Parser, Subcommand, ValueEnum};

use crate::cli::*;
use crate::geodesy::UtmZone;
use crate::manifest::Coordinates;
use crate::matcher::MatchStrategy;
use crate::policy::{AutoPolicy, ConfirmationPolicy, ConflictAction, InteractivePolicy};
use crate::rig::RigPreset;
use crate::telemetry::TelemetrySchema;

#[derive(Parser, Debug, Clone)]
pub struct MatchOptions {
    /// 遥测日志路径
    #[arg(short, long, value_name = "LOG")]
    pub telemetry: PathBuf,
    /// 遥测日志格式定义文件（TOML），默认为 ROV 卡尔曼滤波输出的 CSV
    #[arg(long, value_name = "FILE")]
    pub schema_file: Option<PathBuf>,
    /// 相机支架类型，决定俯仰角的计算方式
    #[arg(long, value_enum, default_value_t = RigPreset::Wca2025)]
    pub rig: RigPreset,
    /// 接受窗口（秒），时间差超过该值的图片视为未匹配
    #[arg(short, long, value_name = "SECONDS", value_parser = parse_window)]
    pub window: Option<TimeDelta>,
    /// 最近邻查找方式
    #[arg(long, value_enum, default_value_t = MatchStrategy::Merge)]
    pub strategy: MatchStrategy,
    /// 固定使用的 UTM 分区，例如 10U，不指定则由第一个有效坐标决定
    #[arg(long, value_name = "ZONE")]
    pub utm_zone: Option<UtmZone>,
    /// 清单中使用的坐标系
    #[arg(long, value_enum, default_value_t = Coordinates::Utm)]
    pub coordinates: Coordinates,
}

impl MatchOptions {
    pub fn schema(&self) -> crate::Result<TelemetrySchema> {
        match &self.schema_file {
            Some(path) => TelemetrySchema::from_file(path),
            None => Ok(TelemetrySchema::wca()),
        }
    }
}

#[derive(Parser, Debug, Clone)]
pub struct OutputOptions {
    /// 输出路径已存在时的处理方式
    #[arg(long, value_enum, value_name = "ACTION", default_value_t = ConflictAction::Abort)]
    pub on_conflict: ConflictAction,
    /// 在终端中询问如何处理冲突，并确认区域划分结果
    #[arg(short, long)]
    pub interactive: bool,
    /// 运行结果的输出格式
    #[arg(long, value_enum, value_name = "FORMAT", default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

impl OutputOptions {
    pub fn policy(&self) -> Arc<dyn ConfirmationPolicy> {
        if self.interactive {
            Arc::new(InteractivePolicy)
        } else {
            Arc::new(AutoPolicy::new(self.on_conflict))
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Table,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "divebatch", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 根据遥测日志为图片估计位置和姿态，生成清单
    Georef(GeorefCommand),
    /// 按时间顺序切分为有重叠的批次
    Batch(BatchCommand),
    /// 按地理位置划分为有重叠的区域
    Zones(ZonesCommand),
}

fn parse_window(s: &str) -> Result<TimeDelta, String> {
    let secs = s.parse::<f64>().map_err(|e| format!("无效的时间窗口 {s}: {e}"))?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(format!("无效的时间窗口: {s}"));
    }
    Ok(TimeDelta::microseconds((secs * 1e6).round() as i64))
}
