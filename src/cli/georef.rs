use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::info;
use serde_json::json;
use tokio::task::block_in_place;

use crate::cli::SubCommandExtend;
use crate::config::{MatchOptions, Opts, OutputFormat, OutputOptions};
use crate::error::Error;
use crate::manifest::{MANIFEST_FILE, Manifest};
use crate::matcher::{MatchStats, Matching, TemporalMatcher};
use crate::metadata::ordered_records;
use crate::telemetry::Telemetry;
use crate::utils::scan_images;

#[derive(Parser, Debug, Clone)]
pub struct GeorefCommand {
    /// 图片所在目录
    pub images: PathBuf,
    #[command(flatten)]
    pub matching: MatchOptions,
    /// 清单输出路径，默认为图片目录下的 flight_log.txt
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,
    #[command(flatten)]
    pub options: OutputOptions,
}

impl SubCommandExtend for GeorefCommand {
    async fn run(&self, _opts: &Opts) -> Result<()> {
        let schema = self.matching.schema()?;
        let telemetry = Telemetry::load(&self.matching.telemetry, &schema)?;

        let images = ordered_records(scan_images(&self.images)?);
        if images.is_empty() {
            return Err(Error::EmptyInputSet(format!("{} 中没有图片", self.images.display())).into());
        }
        info!("共 {} 张图片", images.len());

        let matching = block_in_place(|| {
            TemporalMatcher::new(&telemetry, self.matching.rig.into())
                .window(self.matching.window)
                .strategy(self.matching.strategy)
                .utm_zone(self.matching.utm_zone)
                .run(&images)
        });

        let path = self.output.clone().unwrap_or_else(|| self.images.join(MANIFEST_FILE));
        let manifest = Manifest::from_records(&matching.records, self.matching.coordinates);
        let written = manifest.write(&path, self.options.policy().as_ref())?;

        print_result(&matching, written.then_some(&path), self.options.output_format)
    }
}

fn print_result(matching: &Matching, manifest: Option<&PathBuf>, format: OutputFormat) -> Result<()> {
    let MatchStats { exact, within_4s, within_15s, beyond_15s, unmatched } = matching.stats;
    match format {
        OutputFormat::Json => {
            let value = json!({
                "manifest": manifest,
                "utm_zone": matching.utm_zone.map(|z| z.to_string()),
                "stats": matching.stats,
            });
            println!("{}", serde_json::to_string_pretty(&value)?)
        }
        OutputFormat::Table => {
            println!("完全一致\t{exact}");
            println!("1-4 秒\t{within_4s}");
            println!("5-15 秒\t{within_15s}");
            println!("超过 15 秒\t{beyond_15s}");
            println!("未匹配\t{unmatched}");
            if let Some(zone) = matching.utm_zone {
                println!("UTM 分区\t{zone}");
            }
            if let Some(path) = manifest {
                println!("清单\t{}", path.display());
            }
        }
    }
    Ok(())
}
