use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::Parser;
use log::{info, warn};
use tokio::task::block_in_place;

use crate::batch::{ZoneBatcher, ZoneSummary};
use crate::cli::SubCommandExtend;
use crate::config::{Opts, OutputFormat, OutputOptions};
use crate::kmeans::KMeansConfig;
use crate::manifest::{MANIFEST_FILE, Manifest};
use crate::placement::place_batches;

#[derive(Parser, Debug, Clone)]
pub struct ZonesCommand {
    /// 图片所在目录
    pub images: PathBuf,
    /// 区域输出目录
    pub output: PathBuf,
    /// 区域数量
    #[arg(short = 'k', long, value_name = "K")]
    pub zones: usize,
    /// 每个区域从相邻区域补充的图片比例（%）
    #[arg(short = 'p', long, value_name = "PERCENT", default_value_t = 10.0)]
    pub overlap: f64,
    /// 带坐标的清单文件，默认为图片目录下的 flight_log.txt
    #[arg(short, long, value_name = "FILE")]
    pub flight_log: Option<PathBuf>,
    /// 聚类最大迭代次数
    #[arg(long, default_value_t = 300)]
    pub max_iter: usize,
    /// 使用不同初始中心聚类的次数
    #[arg(long, default_value_t = 10)]
    pub n_init: usize,
    /// 随机数种子
    #[arg(long, default_value_t = 42)]
    pub seed: u64,
    #[command(flatten)]
    pub options: OutputOptions,
}

impl SubCommandExtend for ZonesCommand {
    async fn run(&self, _opts: &Opts) -> Result<()> {
        let config = KMeansConfig { k: self.zones, max_iter: self.max_iter, n_init: self.n_init, seed: self.seed };
        let batcher = ZoneBatcher::with_config(config)?;

        let path = self.flight_log.clone().unwrap_or_else(|| self.images.join(MANIFEST_FILE));
        let manifest = Manifest::read(&path)?;
        let rows = manifest.placed_rows();

        let clustering = block_in_place(|| batcher.cluster(&rows))?;
        if !clustering.excluded().is_empty() {
            warn!("{} 张图片没有坐标，未分配到任何区域", clustering.excluded().len());
        }

        let policy = self.options.policy();
        let Some((zones, summary)) = block_in_place(|| clustering.review(self.overlap, policy.as_ref()))? else {
            bail!("已取消区域划分");
        };

        let batches = clustering.batches(&zones);
        tokio::fs::create_dir_all(&self.output).await?;
        let placement =
            place_batches(&self.images, &self.output, &batches, Some(&manifest), policy.as_ref()).await?;
        info!("写入 {} 个区域，跳过 {} 个", placement.placed.len(), placement.skipped.len());

        print_result(&summary, self.options.output_format)
    }
}

fn print_result(summary: &ZoneSummary, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(summary)?)
        }
        OutputFormat::Table => {
            for zone in &summary.zones {
                println!("zone_{}\t{}\t{}\t{}", zone.zone, zone.total, zone.base, zone.overlap);
            }
            println!("total\t{}\t{}", summary.total_images, summary.unique_images);
        }
    }
    Ok(())
}
