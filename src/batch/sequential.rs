use std::collections::BTreeMap;
use std::ops::Range;

use log::{info, warn};
use regex::Regex;

use super::{Batch, Boundary, check_percent};
use crate::error::{Error, Result};
use crate::metadata::ImageRecord;

/// 没有匹配分组规则的文件所属的分组
pub const DEFAULT_GROUP: &str = "default";

/// 一个批次在全局时间序列中的位置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRange {
    /// 包含重叠部分的成员区间
    pub members: Range<usize>,
    /// 基础成员区间，各批次互不相交
    pub base: Range<usize>,
}

/// 按时间顺序切分为固定大小、首尾重叠的批次
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SequentialBatcher {
    batch_size: usize,
    overlap_percent: f64,
}

impl SequentialBatcher {
    pub fn new(batch_size: usize, overlap_percent: f64) -> Result<Self> {
        if batch_size < 1 {
            return Err(Error::InvalidBatchParameters("批次大小必须大于 0".to_string()));
        }
        check_percent(overlap_percent)?;
        Ok(Self { batch_size, overlap_percent })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// 相邻批次共享的图片数量，不会达到批次大小
    pub fn overlap_size(&self) -> usize {
        let size = (self.batch_size as f64 * self.overlap_percent / 100.0).floor() as usize;
        size.min(self.batch_size - 1)
    }

    pub fn num_batches(&self, total: usize) -> usize {
        total.div_ceil(self.batch_size)
    }

    /// 第 i 个批次覆盖 `[i·size − overlap·(i>0), min((i+1)·size, N))`
    pub fn plan(&self, total: usize) -> Vec<BatchRange> {
        let overlap = self.overlap_size();
        (0..self.num_batches(total))
            .map(|i| {
                let base = i * self.batch_size..((i + 1) * self.batch_size).min(total);
                let start = if i > 0 { base.start - overlap } else { base.start };
                BatchRange { members: start..base.end, base }
            })
            .collect()
    }

    /// `records` 需要已经按时间排序，见 [`crate::metadata::ordered_records`]
    pub fn batches(&self, records: &[ImageRecord]) -> Result<Vec<Batch>> {
        if records.is_empty() {
            return Err(Error::EmptyInputSet("没有可分批的图片".to_string()));
        }
        let batches = self
            .plan(records.len())
            .into_iter()
            .enumerate()
            .map(|(i, range)| {
                let slice = &records[range.members.clone()];
                let offset = range.members.start;
                Batch {
                    id: i + 1,
                    name: format!("batch_{}", i + 1),
                    members: slice.iter().map(|r| r.filename.clone()).collect(),
                    base: range.base.start - offset..range.base.end - offset,
                    boundary: Some(Boundary::new(&slice[0], &slice[slice.len() - 1])),
                }
            })
            .collect::<Vec<_>>();

        info!(
            "{} 张图片分为 {} 个批次，批次大小 {}，重叠 {} 张",
            records.len(),
            batches.len(),
            self.batch_size,
            self.overlap_size()
        );
        Ok(batches)
    }
}

/// 按文件名中第一个匹配 `pattern` 的片段分组，每组内按时间排序
pub fn group_records(
    records: Vec<ImageRecord>,
    pattern: Option<&Regex>,
) -> BTreeMap<String, Vec<ImageRecord>> {
    let mut groups: BTreeMap<String, Vec<ImageRecord>> = BTreeMap::new();
    for record in records {
        let key = pattern
            .and_then(|re| re.find(&record.filename))
            .map_or(DEFAULT_GROUP, |m| m.as_str())
            .to_string();
        groups.entry(key).or_default().push(record);
    }
    for (key, group) in groups.iter_mut() {
        group.sort();
        if key.contains(['/', '\\']) {
            warn!("分组名 {key} 中包含路径分隔符");
        }
    }
    groups
}
