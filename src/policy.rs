//! 需要人工确认的决策点

use std::path::Path;

use clap::ValueEnum;
use log::warn;

use crate::batch::ZoneSummary;
use crate::utils::read_line;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    Accept,
    Abort,
    Overwrite,
    Skip,
    /// 使用新的重叠比例重新划分
    Retry(f64),
}

/// 输出路径冲突和划分结果确认，由调用方注入
pub trait ConfirmationPolicy: Send + Sync {
    /// 输出路径已存在，可以返回 `Abort`、`Overwrite` 或 `Skip`
    fn on_conflict(&self, path: &Path) -> Decision;
    /// 审阅区域划分结果，可以返回 `Accept`、`Abort` 或 `Retry`
    fn review_zones(&self, summary: &ZoneSummary) -> Decision;
}

/// 输出路径已存在时的处理方式
#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConflictAction {
    #[default]
    Abort,
    Overwrite,
    Skip,
}

impl From<ConflictAction> for Decision {
    fn from(action: ConflictAction) -> Self {
        match action {
            ConflictAction::Abort => Self::Abort,
            ConflictAction::Overwrite => Self::Overwrite,
            ConflictAction::Skip => Self::Skip,
        }
    }
}

/// 不询问用户，冲突时使用固定的处理方式，划分结果总是接受
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoPolicy {
    conflict: ConflictAction,
}

impl AutoPolicy {
    pub fn new(conflict: ConflictAction) -> Self {
        Self { conflict }
    }
}

impl ConfirmationPolicy for AutoPolicy {
    fn on_conflict(&self, _path: &Path) -> Decision {
        self.conflict.into()
    }

    fn review_zones(&self, _summary: &ZoneSummary) -> Decision {
        Decision::Accept
    }
}

/// 在终端中询问用户
#[derive(Debug, Clone, Copy, Default)]
pub struct InteractivePolicy;

impl ConfirmationPolicy for InteractivePolicy {
    fn on_conflict(&self, path: &Path) -> Decision {
        let prompt = format!("{} 已存在，覆盖(o) / 跳过(s) / 中止(a)？", path.display());
        match read_line(&prompt) {
            Ok(answer) => parse_conflict_answer(&answer),
            Err(e) => {
                warn!("无法读取输入: {e}");
                Decision::Abort
            }
        }
    }

    fn review_zones(&self, summary: &ZoneSummary) -> Decision {
        println!("重叠比例 {}%：", summary.overlap_percent);
        for zone in &summary.zones {
            println!("  区域 {}: 共 {} 张（基础 {}，重叠 {}）", zone.zone, zone.total, zone.base, zone.overlap);
        }
        println!("总计 {} 张，去重后 {} 张", summary.total_images, summary.unique_images);

        match read_line("接受该划分(y)，中止(n)，或输入新的重叠比例：") {
            Ok(answer) => parse_review_answer(&answer),
            Err(e) => {
                warn!("无法读取输入: {e}");
                Decision::Abort
            }
        }
    }
}

fn parse_conflict_answer(answer: &str) -> Decision {
    match answer.to_ascii_lowercase().as_str() {
        "o" | "overwrite" | "y" => Decision::Overwrite,
        "s" | "skip" => Decision::Skip,
        _ => Decision::Abort,
    }
}

fn parse_review_answer(answer: &str) -> Decision {
    match answer.to_ascii_lowercase().as_str() {
        "" | "y" | "yes" => Decision::Accept,
        s => match s.trim_end_matches('%').parse::<f64>() {
            Ok(p) => Decision::Retry(p),
            Err(_) => Decision::Abort,
        },
    }
}
