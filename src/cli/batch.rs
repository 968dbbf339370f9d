use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use regex::Regex;
use serde::Serialize;

use crate::batch::{Batch, SequentialBatcher, group_records};
use crate::cli::SubCommandExtend;
use crate::config::{Opts, OutputFormat, OutputOptions};
use crate::error::Error;
use crate::manifest::Manifest;
use crate::metadata::ordered_records;
use crate::placement::place_batches;
use crate::utils::scan_images;

#[derive(Parser, Debug, Clone)]
pub struct BatchCommand {
    /// 图片所在目录
    pub images: PathBuf,
    /// 批次输出目录
    pub output: PathBuf,
    /// 每个批次的图片数量
    #[arg(short, long, value_name = "SIZE", default_value_t = 100)]
    pub batch_size: usize,
    /// 相邻批次的重叠比例（%）
    #[arg(short = 'p', long, value_name = "PERCENT", default_value_t = 20.0)]
    pub overlap: f64,
    /// 清单文件，每个批次会得到其中属于本批次图片的记录
    #[arg(short, long, value_name = "FILE")]
    pub flight_log: Option<PathBuf>,
    /// 按文件名中匹配该正则的部分分组，每组单独分批
    /// 例：--group-pattern 'cam(lower|mid|upper)'
    #[arg(short, long, value_name = "REGEX", verbatim_doc_comment)]
    pub group_pattern: Option<String>,
    #[command(flatten)]
    pub options: OutputOptions,
}

#[derive(Serialize)]
struct BatchRow<'a> {
    group: &'a str,
    #[serde(flatten)]
    batch: &'a Batch,
}

impl SubCommandExtend for BatchCommand {
    async fn run(&self, _opts: &Opts) -> Result<()> {
        let batcher = SequentialBatcher::new(self.batch_size, self.overlap)?;
        let pattern = match &self.group_pattern {
            Some(p) => Some(Regex::new(p).with_context(|| format!("无效的分组规则: {p}"))?),
            None => None,
        };
        let manifest = self.flight_log.as_ref().map(Manifest::read).transpose()?;

        let records = ordered_records(scan_images(&self.images)?);
        if records.is_empty() {
            return Err(Error::EmptyInputSet(format!("{} 中没有图片", self.images.display())).into());
        }
        let groups = group_records(records, pattern.as_ref());
        info!("共 {} 个分组", groups.len());

        let mut planned = vec![];
        for (group, records) in &groups {
            planned.push((group.as_str(), batcher.batches(records)?));
        }

        // 所有分组一起放置，任何冲突都在写入前确认
        let nested = planned
            .iter()
            .flat_map(|(group, batches)| {
                batches.iter().map(move |b| Batch { name: format!("{group}/{}", b.name), ..b.clone() })
            })
            .collect::<Vec<_>>();
        let policy = self.options.policy();
        tokio::fs::create_dir_all(&self.output).await?;
        let placement =
            place_batches(&self.images, &self.output, &nested, manifest.as_ref(), policy.as_ref()).await?;
        info!("写入 {} 个批次，跳过 {} 个", placement.placed.len(), placement.skipped.len());

        let rows = planned
            .iter()
            .flat_map(|(group, batches)| batches.iter().map(move |batch| BatchRow { group: *group, batch }))
            .collect::<Vec<_>>();
        print_result(&rows, self.options.output_format)
    }
}

fn print_result(rows: &[BatchRow], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(rows)?)
        }
        OutputFormat::Table => {
            for row in rows {
                let component = row.batch.boundary.as_ref().map_or("", |b| b.component.as_str());
                println!(
                    "{}/{}\t{}\t{}\t{}",
                    row.group,
                    row.batch.name,
                    row.batch.members.len(),
                    row.batch.overlap_count(),
                    component
                );
            }
        }
    }
    Ok(())
}
