use chrono::{NaiveDateTime, TimeDelta};
use clap::ValueEnum;
use indicatif::{ParallelProgressIterator, ProgressBar};
use log::{info, warn};
use rayon::prelude::*;
use serde::Serialize;

use crate::geodesy::{UtmProjector, UtmZone};
use crate::metadata::ImageRecord;
use crate::rig::CameraRig;
use crate::telemetry::{Telemetry, TelemetrySample};
use crate::utils::pb_style;

/// 最近邻查找方式，两者结果完全一致
#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MatchStrategy {
    /// 对每张图片遍历所有遥测数据，O(N·M)
    BruteForce,
    /// 在有序遥测序列上二分查找
    #[default]
    Merge,
}

/// 带有位置和姿态估计的图片记录
#[derive(Debug, Clone, PartialEq)]
pub struct GeoreferencedRecord {
    pub image: ImageRecord,
    pub lat: Option<f64>,
    pub long: Option<f64>,
    pub easting: Option<f64>,
    pub northing: Option<f64>,
    pub altitude: Option<f64>,
    pub heading: Option<f64>,
    pub pitch: Option<f64>,
    pub roll: Option<f64>,
    /// None 表示接受窗口内没有遥测数据
    pub match_delta: Option<TimeDelta>,
}

impl GeoreferencedRecord {
    pub fn filename(&self) -> &str {
        &self.image.filename
    }

    pub fn is_matched(&self) -> bool {
        self.match_delta.is_some()
    }
}

/// 按时间差分段的匹配统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MatchStats {
    pub exact: usize,
    /// (0s, 4s]
    pub within_4s: usize,
    /// (4s, 15s]
    pub within_15s: usize,
    pub beyond_15s: usize,
    pub unmatched: usize,
}

impl MatchStats {
    pub fn record(&mut self, delta: Option<TimeDelta>) {
        match delta {
            None => self.unmatched += 1,
            Some(d) if d.is_zero() => self.exact += 1,
            Some(d) if d <= TimeDelta::seconds(4) => self.within_4s += 1,
            Some(d) if d <= TimeDelta::seconds(15) => self.within_15s += 1,
            Some(_) => self.beyond_15s += 1,
        }
    }

    pub fn matched(&self) -> usize {
        self.exact + self.within_4s + self.within_15s + self.beyond_15s
    }

    pub fn total(&self) -> usize {
        self.matched() + self.unmatched
    }
}

/// 时间匹配的结果
#[derive(Debug, Clone)]
pub struct Matching {
    pub records: Vec<GeoreferencedRecord>,
    pub stats: MatchStats,
    /// 实际使用的 UTM 分区，没有任何点成功投影时为 None
    pub utm_zone: Option<UtmZone>,
}

/// 将图片按时间与最近的遥测数据关联
pub struct TemporalMatcher<'a> {
    telemetry: &'a Telemetry,
    rig: CameraRig,
    window: Option<TimeDelta>,
    strategy: MatchStrategy,
    utm_zone: Option<UtmZone>,
}

impl<'a> TemporalMatcher<'a> {
    pub fn new(telemetry: &'a Telemetry, rig: CameraRig) -> Self {
        Self { telemetry, rig, window: None, strategy: MatchStrategy::default(), utm_zone: None }
    }

    /// 接受窗口，时间差恰好等于窗口时仍然接受
    pub fn window(mut self, window: Option<TimeDelta>) -> Self {
        self.window = window;
        self
    }

    pub fn strategy(mut self, strategy: MatchStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// 固定 UTM 分区，不指定则由第一个成功投影的点决定
    pub fn utm_zone(mut self, zone: Option<UtmZone>) -> Self {
        self.utm_zone = zone;
        self
    }

    /// 时间上最接近的遥测数据下标和时间差，时间差相同时取较早的一条
    pub fn nearest(&self, time: NaiveDateTime) -> Option<(usize, TimeDelta)> {
        let samples = self.telemetry.samples();
        match self.strategy {
            MatchStrategy::BruteForce => nearest_brute_force(samples, time),
            MatchStrategy::Merge => nearest_sorted(samples, time),
        }
    }

    /// 在接受窗口内查找匹配，占位时间戳永远不匹配
    pub fn find(&self, image: &ImageRecord) -> Option<(usize, TimeDelta)> {
        if !image.has_timestamp() {
            return None;
        }
        self.nearest(image.timestamp).filter(|(_, delta)| self.window.is_none_or(|w| *delta <= w))
    }

    /// 匹配所有图片，`images` 的顺序即输出顺序，也决定了自动选择的 UTM 分区
    pub fn run(&self, images: &[ImageRecord]) -> Matching {
        let pb = ProgressBar::new(images.len() as u64).with_style(pb_style());
        let found = images.par_iter().progress_with(pb.clone()).map(|image| self.find(image)).collect::<Vec<_>>();
        pb.finish_and_clear();

        let samples = self.telemetry.samples();
        let mut projector = UtmProjector::new(self.utm_zone);
        let mut stats = MatchStats::default();

        let records = images
            .iter()
            .zip(found)
            .map(|(image, found)| {
                stats.record(found.map(|(_, delta)| delta));
                match found {
                    Some((i, delta)) => self.georeference(image, &samples[i], delta, &mut projector),
                    None => {
                        warn!("没有可接受的遥测数据: {}", image.filename);
                        self.unmatched(image)
                    }
                }
            })
            .collect();

        info!(
            "匹配结果：完全一致 {} | 1-4 秒 {} | 5-15 秒 {} | 超过 15 秒 {} | 未匹配 {}",
            stats.exact, stats.within_4s, stats.within_15s, stats.beyond_15s, stats.unmatched
        );
        match projector.zone() {
            Some(zone) => info!("UTM 分区: {zone}"),
            None => warn!("没有有效的经纬度数据，无法确定 UTM 分区"),
        }

        Matching { records, stats, utm_zone: projector.zone() }
    }

    fn georeference(
        &self,
        image: &ImageRecord,
        sample: &TelemetrySample,
        delta: TimeDelta,
        projector: &mut UtmProjector,
    ) -> GeoreferencedRecord {
        let planar = match (sample.lat, sample.long) {
            (Some(lat), Some(long)) => projector.project(lat, long),
            _ => None,
        };
        GeoreferencedRecord {
            image: image.clone(),
            lat: sample.lat,
            long: sample.long,
            easting: planar.map(|p| p.0),
            northing: planar.map(|p| p.1),
            altitude: sample.depth,
            heading: sample.heading,
            pitch: Some(self.rig.matched_pitch(&image.filename, sample.pitch)),
            roll: sample.roll,
            match_delta: Some(delta),
        }
    }

    fn unmatched(&self, image: &ImageRecord) -> GeoreferencedRecord {
        GeoreferencedRecord {
            image: image.clone(),
            lat: None,
            long: None,
            easting: None,
            northing: None,
            altitude: None,
            heading: None,
            pitch: self.rig.fallback_pitch(&image.filename),
            roll: None,
            match_delta: None,
        }
    }
}

fn nearest_brute_force(samples: &[TelemetrySample], time: NaiveDateTime) -> Option<(usize, TimeDelta)> {
    let mut best: Option<(usize, TimeDelta)> = None;
    for (i, sample) in samples.iter().enumerate() {
        let delta = (sample.time - time).abs();
        // 严格小于，保证取到第一个最小值
        if best.is_none_or(|(_, d)| delta < d) {
            best = Some((i, delta));
        }
    }
    best
}

fn nearest_sorted(samples: &[TelemetrySample], time: NaiveDateTime) -> Option<(usize, TimeDelta)> {
    let upper = samples.partition_point(|s| s.time < time);
    let after = samples.get(upper).map(|s| (upper, s.time - time));
    let before = upper.checked_sub(1).map(|i| {
        // 时间相同的多条数据中取第一条
        let first = samples[..i].partition_point(|s| s.time < samples[i].time);
        (first, time - samples[i].time)
    });
    match (before, after) {
        (Some(b), Some(a)) => Some(if b.1 <= a.1 { b } else { a }),
        (b, a) => b.or(a),
    }
}
