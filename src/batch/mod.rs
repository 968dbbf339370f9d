//! 将图片集合划分为有重叠的批次

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::metadata::ImageRecord;

pub mod sequential;
pub mod zone;

pub use sequential::*;
pub use zone::*;

static RE_FRAME_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_frame\d+").expect("failed to build regex"));

/// 重叠比例必须在 [0, 100] 之间
pub(crate) fn check_percent(percent: f64) -> Result<()> {
    if !(0.0..=100.0).contains(&percent) {
        return Err(Error::InvalidBatchParameters(format!("重叠比例必须在 0 到 100 之间: {percent}")));
    }
    Ok(())
}

/// 一个输出批次，对应输出目录下的一个子目录
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Batch {
    /// 从 1 开始
    pub id: usize,
    /// 子目录名，例如 `batch_1`、`zone_3`
    pub name: String,
    /// 成员文件名，按输出顺序排列，同一批次内不重复
    pub members: Vec<String>,
    /// `members` 中属于基础成员的区间，其余为重叠成员
    pub base: Range<usize>,
    pub boundary: Option<Boundary>,
}

impl Batch {
    pub fn base_members(&self) -> &[String] {
        &self.members[self.base.clone()]
    }

    pub fn overlap_count(&self) -> usize {
        self.members.len() - self.base.len()
    }
}

/// 按时间划分的批次的边界信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Boundary {
    pub start: String,
    pub end: String,
    /// 重建软件输出的组件文件名
    pub component: String,
}

impl Boundary {
    /// 以第一个成员的文件名为模板，时间戳替换为 `开始-结束`，去掉帧号和扩展名
    pub fn new(first: &ImageRecord, last: &ImageRecord) -> Self {
        let start = first.timestamp_str();
        let end = last.timestamp_str();
        let range = format!("{start}-{end}");

        let name = match first.timestamp_token() {
            Some(token) => first.filename.replacen(token, &range, 1),
            None => format!("{range}_{}", first.filename),
        };
        let name = RE_FRAME_TOKEN.replace_all(&name, "");
        let stem = match name.rfind('.') {
            Some(i) if i > 0 => &name[..i],
            _ => &name[..],
        };
        Self { component: format!("{stem}.rcalign"), start, end }
    }
}
