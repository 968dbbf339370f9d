use std::collections::HashSet;

use log::{info, warn};
use rayon::prelude::*;
use rstar::RTree;
use serde::Serialize;

use super::{Batch, check_percent};
use crate::error::{Error, Result};
use crate::kmeans::{KMeansConfig, Point, imbalance_factor, kmeans};
use crate::matcher::GeoreferencedRecord;
use crate::policy::{ConfirmationPolicy, Decision};

/// 可以参与区域划分的记录
pub trait Located {
    fn filename(&self) -> &str;
    /// 平面坐标 (easting, northing)，缺失时该记录不参与划分
    fn planar(&self) -> Option<Point>;
}

impl Located for GeoreferencedRecord {
    fn filename(&self) -> &str {
        &self.image.filename
    }

    fn planar(&self) -> Option<Point> {
        Some([self.easting?, self.northing?])
    }
}

/// 按地理位置将图片聚类为 K 个区域，并从相邻区域补充重叠图片
#[derive(Debug, Clone, Copy)]
pub struct ZoneBatcher {
    config: KMeansConfig,
}

impl ZoneBatcher {
    pub fn new(zones: usize) -> Result<Self> {
        Self::with_config(KMeansConfig::new(zones))
    }

    pub fn with_config(config: KMeansConfig) -> Result<Self> {
        if config.k < 1 {
            return Err(Error::InvalidBatchParameters("区域数量必须大于 0".to_string()));
        }
        Ok(Self { config })
    }

    /// 聚类，得到每张图片的基础区域
    pub fn cluster<T: Located>(&self, records: &[T]) -> Result<Clustering> {
        let mut filenames = vec![];
        let mut points = vec![];
        let mut excluded = vec![];
        for record in records {
            match record.planar().filter(|p| p[0].is_finite() && p[1].is_finite()) {
                Some(p) => {
                    filenames.push(record.filename().to_string());
                    points.push(p);
                }
                None => {
                    warn!("缺少坐标，不参与区域划分: {}", record.filename());
                    excluded.push(record.filename().to_string());
                }
            }
        }
        if points.is_empty() {
            return Err(Error::EmptyInputSet("没有带坐标的图片".to_string()));
        }
        if !excluded.is_empty() {
            warn!("共 {} 张图片因缺少坐标被排除", excluded.len());
        }

        info!("对 {} 个位置进行聚类，区域数量 = {}", points.len(), self.config.k);
        let state = kmeans(&points, self.config)?;
        info!(
            "聚类完成，距离平方和：{:.2}，不平衡度：{:.2}",
            state.inertia,
            imbalance_factor(&state.centroid_frequency)
        );

        Ok(Clustering {
            filenames,
            points,
            assignments: state.assignments,
            centroids: state.centroids,
            excluded,
        })
    }
}

/// 聚类结果，调整重叠比例时可以重复使用
#[derive(Debug, Clone)]
pub struct Clustering {
    filenames: Vec<String>,
    points: Vec<Point>,
    assignments: Vec<usize>,
    centroids: Vec<Point>,
    excluded: Vec<String>,
}

/// 一个区域，成员为 [`Clustering`] 中的下标
#[derive(Debug, Clone, PartialEq)]
pub struct Zone {
    pub cluster_id: usize,
    pub centroid: Point,
    pub base: Vec<usize>,
    /// 按到本区域的距离从近到远排列
    pub overlap: Vec<usize>,
}

impl Clustering {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn filename(&self, index: usize) -> &str {
        &self.filenames[index]
    }

    pub fn point(&self, index: usize) -> Point {
        self.points[index]
    }

    pub fn assignment(&self, index: usize) -> usize {
        self.assignments[index]
    }

    /// 因缺少坐标被排除的文件
    pub fn excluded(&self) -> &[String] {
        &self.excluded
    }

    /// 为每个区域补充 `floor(基础数量 × overlap_percent / 100)` 张其他区域中离它最近的图片
    pub fn zones(&self, overlap_percent: f64) -> Result<Vec<Zone>> {
        check_percent(overlap_percent)?;

        let zones = (0..self.centroids.len())
            .into_par_iter()
            .map(|cluster_id| {
                let base = (0..self.len()).filter(|&i| self.assignments[i] == cluster_id).collect::<Vec<_>>();
                let overlap_size = (base.len() as f64 * overlap_percent / 100.0).floor() as usize;
                let overlap = self.nearest_outside(cluster_id, &base, overlap_size);
                Zone { cluster_id, centroid: self.centroids[cluster_id], base, overlap }
            })
            .collect::<Vec<_>>();
        Ok(zones)
    }

    /// 交给确认策略审阅，重新划分时只重新计算重叠部分，用户中止时返回 None
    pub fn review(
        &self,
        mut overlap_percent: f64,
        policy: &dyn ConfirmationPolicy,
    ) -> Result<Option<(Vec<Zone>, ZoneSummary)>> {
        loop {
            let zones = self.zones(overlap_percent)?;
            let summary = ZoneSummary::new(self, &zones, overlap_percent);
            match policy.review_zones(&summary) {
                Decision::Retry(p) if check_percent(p).is_ok() => {
                    info!("使用新的重叠比例 {p}% 重新划分");
                    overlap_percent = p;
                }
                Decision::Retry(p) => warn!("无效的重叠比例 {p}%，保持 {overlap_percent}%"),
                Decision::Accept => return Ok(Some((zones, summary))),
                Decision::Abort => return Ok(None),
                other => {
                    warn!("划分结果不接受 {other:?}，视为中止");
                    return Ok(None);
                }
            }
        }
    }

    /// 其他区域中离 `base` 最近的 `n` 个点，距离相同时按下标排序
    fn nearest_outside(&self, cluster_id: usize, base: &[usize], n: usize) -> Vec<usize> {
        if n == 0 || base.is_empty() {
            return vec![];
        }
        let tree = RTree::bulk_load(base.iter().map(|&i| self.points[i]).collect());

        let mut candidates = (0..self.len())
            .filter(|&i| self.assignments[i] != cluster_id)
            .filter_map(|i| {
                let p = self.points[i];
                let q = tree.nearest_neighbor(&p)?;
                Some(((p[0] - q[0]).powi(2) + (p[1] - q[1]).powi(2), i))
            })
            .collect::<Vec<_>>();
        candidates.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        candidates.into_iter().take(n).map(|(_, i)| i).collect()
    }

    /// 转换为输出批次，同一区域内重复的文件只保留一次
    pub fn batches(&self, zones: &[Zone]) -> Vec<Batch> {
        zones
            .iter()
            .map(|zone| {
                let mut seen = HashSet::new();
                let mut members = vec![];
                for &i in &zone.base {
                    if seen.insert(self.filename(i)) {
                        members.push(self.filename(i).to_string());
                    }
                }
                let base_len = members.len();
                for &i in &zone.overlap {
                    if seen.insert(self.filename(i)) {
                        members.push(self.filename(i).to_string());
                    }
                }
                Batch {
                    id: zone.cluster_id + 1,
                    name: format!("zone_{}", zone.cluster_id + 1),
                    members,
                    base: 0..base_len,
                    boundary: None,
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ZoneCount {
    pub zone: usize,
    pub total: usize,
    pub base: usize,
    pub overlap: usize,
}

/// 区域划分的概况，写入任何文件前交给确认策略审阅
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneSummary {
    pub overlap_percent: f64,
    pub zones: Vec<ZoneCount>,
    /// 所有区域的成员总数，重叠图片会被重复计算
    pub total_images: usize,
    pub unique_images: usize,
    pub excluded: usize,
}

impl ZoneSummary {
    pub fn new(clustering: &Clustering, zones: &[Zone], overlap_percent: f64) -> Self {
        let counts = zones
            .iter()
            .map(|z| ZoneCount {
                zone: z.cluster_id + 1,
                total: z.base.len() + z.overlap.len(),
                base: z.base.len(),
                overlap: z.overlap.len(),
            })
            .collect::<Vec<_>>();
        let unique = zones
            .iter()
            .flat_map(|z| z.base.iter().chain(&z.overlap))
            .map(|&i| clustering.filename(i))
            .collect::<HashSet<_>>();
        Self {
            overlap_percent,
            total_images: counts.iter().map(|c| c.total).sum(),
            zones: counts,
            unique_images: unique.len(),
            excluded: clustering.excluded().len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Mutex;

    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rstest::rstest;

    use super::*;

    struct P(String, Option<Point>);

    impl Located for P {
        fn filename(&self) -> &str {
            &self.0
        }

        fn planar(&self) -> Option<Point> {
            self.1
        }
    }

    /// 两个相距很远的团，每个团沿 x 轴排成一行
    fn two_rows() -> Vec<P> {
        let mut v = vec![];
        for i in 0..10 {
            v.push(P(format!("a{i}.png"), Some([i as f64, 0.0])));
            v.push(P(format!("b{i}.png"), Some([100.0 + i as f64, 0.0])));
        }
        v
    }

    #[test]
    fn test_overlap_picks_nearest_other_zone_points() {
        let records = two_rows();
        let clustering = ZoneBatcher::new(2).unwrap().cluster(&records).unwrap();
        let zones = clustering.zones(20.0).unwrap();
        assert_eq!(zones.len(), 2);
        for zone in &zones {
            assert_eq!(zone.base.len(), 10);
            assert_eq!(zone.overlap.len(), 2);
        }

        let a = zones.iter().find(|z| z.centroid[0] < 50.0).unwrap();
        let names = a.overlap.iter().map(|&i| clustering.filename(i)).collect::<Vec<_>>();
        assert_eq!(names, ["b0.png", "b1.png"]);
        let b = zones.iter().find(|z| z.centroid[0] > 50.0).unwrap();
        let names = b.overlap.iter().map(|&i| clustering.filename(i)).collect::<Vec<_>>();
        assert_eq!(names, ["a9.png", "a8.png"]);
    }

    #[test]
    fn test_null_coordinates_are_excluded() {
        let mut records = two_rows();
        records.push(P("lost.png".to_string(), None));
        records.push(P("nan.png".to_string(), Some([f64::NAN, 1.0])));
        let clustering = ZoneBatcher::new(2).unwrap().cluster(&records).unwrap();
        assert_eq!(clustering.len(), 20);
        assert_eq!(clustering.excluded(), ["lost.png", "nan.png"]);
    }

    #[test]
    fn test_too_many_zones() {
        let records = vec![P("a.png".into(), Some([0.0, 0.0])), P("b.png".into(), Some([0.0, 0.0]))];
        let err = ZoneBatcher::new(2).unwrap().cluster(&records).unwrap_err();
        assert!(matches!(err, Error::InvalidBatchParameters(_)));
        assert!(matches!(ZoneBatcher::new(0), Err(Error::InvalidBatchParameters(_))));
    }

    #[test]
    fn test_no_coordinates() {
        let records = vec![P("a.png".into(), None)];
        assert!(matches!(ZoneBatcher::new(1).unwrap().cluster(&records), Err(Error::EmptyInputSet(_))));
    }

    #[rstest]
    #[case(1, 0.0)]
    #[case(3, 10.0)]
    #[case(5, 50.0)]
    #[case(8, 100.0)]
    fn test_base_partition(#[case] k: usize, #[case] percent: f64) {
        let mut rng = StdRng::seed_from_u64(1);
        let records = (0..200)
            .map(|i| P(format!("{i}.png"), Some([rng.random_range(0.0..500.0), rng.random_range(0.0..500.0)])))
            .collect::<Vec<_>>();
        let clustering = ZoneBatcher::new(k).unwrap().cluster(&records).unwrap();
        let zones = clustering.zones(percent).unwrap();

        assert_eq!(zones.iter().map(|z| z.base.len()).sum::<usize>(), records.len());
        let mut all = zones.iter().flat_map(|z| z.base.clone()).collect::<Vec<_>>();
        all.sort();
        assert_eq!(all, (0..records.len()).collect::<Vec<_>>());

        for zone in &zones {
            assert_eq!(zone.overlap.len(), (zone.base.len() as f64 * percent / 100.0) as usize);
            assert!(zone.overlap.iter().all(|i| !zone.base.contains(i)));
        }

        let summary = ZoneSummary::new(&clustering, &zones, percent);
        assert_eq!(summary.unique_images, records.len());
        assert_eq!(
            summary.total_images,
            records.len() + zones.iter().map(|z| z.overlap.len()).sum::<usize>()
        );
    }

    #[test]
    fn test_rezoning_keeps_base() {
        let records = two_rows();
        let clustering = ZoneBatcher::new(2).unwrap().cluster(&records).unwrap();
        let a = clustering.zones(10.0).unwrap();
        let b = clustering.zones(50.0).unwrap();
        for (a, b) in a.iter().zip(&b) {
            assert_eq!(a.base, b.base);
            assert_eq!(a.overlap[..], b.overlap[..a.overlap.len()]);
        }
        assert!(matches!(clustering.zones(120.0), Err(Error::InvalidBatchParameters(_))));
    }

    struct Scripted(Mutex<Vec<Decision>>);

    impl ConfirmationPolicy for Scripted {
        fn on_conflict(&self, _path: &Path) -> Decision {
            Decision::Abort
        }

        fn review_zones(&self, _summary: &ZoneSummary) -> Decision {
            self.0.lock().unwrap().remove(0)
        }
    }

    #[test]
    fn test_review_loop() {
        let records = two_rows();
        let clustering = ZoneBatcher::new(2).unwrap().cluster(&records).unwrap();

        let policy = Scripted(Mutex::new(vec![Decision::Retry(300.0), Decision::Retry(50.0), Decision::Accept]));
        let (zones, summary) = clustering.review(10.0, &policy).unwrap().unwrap();
        assert_eq!(summary.overlap_percent, 50.0);
        assert!(zones.iter().all(|z| z.overlap.len() == 5));
        assert!(policy.0.lock().unwrap().is_empty());

        let policy = Scripted(Mutex::new(vec![Decision::Abort]));
        assert!(clustering.review(10.0, &policy).unwrap().is_none());

        // 冲突处理的决定不能当作接受
        for decision in [Decision::Overwrite, Decision::Skip] {
            let policy = Scripted(Mutex::new(vec![decision]));
            assert!(clustering.review(10.0, &policy).unwrap().is_none());
        }
    }

    #[test]
    fn test_batches_dedup_filenames() {
        let mut records = two_rows();
        records.push(P("a0.png".to_string(), Some([0.5, 0.0])));
        let clustering = ZoneBatcher::new(2).unwrap().cluster(&records).unwrap();
        let zones = clustering.zones(30.0).unwrap();
        let batches = clustering.batches(&zones);
        for batch in &batches {
            let unique = batch.members.iter().collect::<HashSet<_>>();
            assert_eq!(unique.len(), batch.members.len());
            assert!(batch.name.starts_with("zone_"));
        }
        let a = batches.iter().find(|b| b.members.contains(&"a1.png".to_string()) && b.base.len() >= 10).unwrap();
        assert_eq!(a.base_members().len(), 10);
    }
}
