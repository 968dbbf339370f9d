use log::debug;
use rand::prelude::*;
use rand::rngs::StdRng;
use rayon::prelude::*;

use crate::error::{Error, Result};

/// 平面坐标点 (easting, northing)
pub type Point = [f64; 2];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct KMeansState {
    /// 所有点到其聚类中心的距离平方和
    pub inertia: f64,
    pub centroids: Vec<Point>,
    /// 每个点所属的聚类中心序号
    pub assignments: Vec<usize>,
    /// 每个聚类中心包含的点数量
    pub centroid_frequency: Vec<usize>,
}

/// 聚类参数，相同的参数和输入总是得到相同的结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KMeansConfig {
    pub k: usize,
    pub max_iter: usize,
    /// 使用不同初始中心运行的次数，取距离平方和最小的一次
    pub n_init: usize,
    pub seed: u64,
}

impl KMeansConfig {
    pub fn new(k: usize) -> Self {
        Self { k, max_iter: 300, n_init: 10, seed: 42 }
    }
}

pub fn imbalance_factor(hist: &[usize]) -> f64 {
    let (mut tot, mut uf) = (0.0, 0.0);
    for h in hist {
        let h = *h as f64;
        tot += h;
        uf += h.powf(2.0);
    }
    uf * hist.len() as f64 / tot.powf(2.0)
}

fn dist2(a: &Point, b: &Point) -> f64 {
    (a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)
}

fn distinct_points(data: &[Point]) -> usize {
    let mut keys = data.iter().map(|p| (p[0].to_bits(), p[1].to_bits())).collect::<Vec<_>>();
    keys.sort_unstable();
    keys.dedup();
    keys.len()
}

/// K-means 聚类，使用 k-means++ 初始化
pub fn kmeans(data: &[Point], config: KMeansConfig) -> Result<KMeansState> {
    let KMeansConfig { k, max_iter, n_init, seed } = config;
    if k == 0 {
        return Err(Error::InvalidBatchParameters("聚类数量必须大于 0".to_string()));
    }
    if data.iter().any(|p| !p[0].is_finite() || !p[1].is_finite()) {
        return Err(Error::InvalidBatchParameters("坐标中存在非有限值".to_string()));
    }
    let distinct = distinct_points(data);
    if distinct < k {
        return Err(Error::InvalidBatchParameters(format!(
            "只有 {distinct} 个不同的位置，无法划分为 {k} 个区域"
        )));
    }

    let runs = (0..n_init.max(1) as u64)
        .into_par_iter()
        .map(|run| {
            let mut rng = StdRng::seed_from_u64(seed.wrapping_add(run));
            let centroids = init_plusplus(data, k, &mut rng);
            lloyd(data, centroids, max_iter)
        })
        .collect::<Vec<_>>();

    // 距离平方和相同时取先运行的一次
    let mut best = KMeansState { inertia: f64::INFINITY, ..Default::default() };
    for (run, state) in runs.into_iter().enumerate() {
        debug!("第 {} 次初始化 - 距离平方和：{:.2}", run + 1, state.inertia);
        if state.inertia < best.inertia {
            best = state;
        }
    }
    Ok(best)
}

/// k-means++：按到已有中心距离的平方加权选择下一个中心
fn init_plusplus(data: &[Point], k: usize, rng: &mut StdRng) -> Vec<Point> {
    let mut centroids = Vec::with_capacity(k);
    centroids.push(data[rng.random_range(0..data.len())]);

    let mut closest = data.iter().map(|p| dist2(p, &centroids[0])).collect::<Vec<_>>();
    while centroids.len() < k {
        let cumsum = closest
            .iter()
            .scan(0.0, |acc, d| {
                *acc += d;
                Some(*acc)
            })
            .collect::<Vec<_>>();
        let total = cumsum[cumsum.len() - 1];
        let target = rng.random::<f64>() * total;
        let mut next = cumsum.partition_point(|c| *c <= target).min(data.len() - 1);
        // 不选择已经是中心的点
        if closest[next] == 0.0 {
            next = closest.iter().position(|d| *d > 0.0).unwrap_or(next);
        }

        let center = data[next];
        centroids.push(center);
        closest.par_iter_mut().zip(data.par_iter()).for_each(|(d, p)| *d = d.min(dist2(p, &center)));
    }
    centroids
}

fn lloyd(data: &[Point], mut centroids: Vec<Point>, max_iter: usize) -> KMeansState {
    let k = centroids.len();
    let (mut assignments, _) = update_assignments(data, &centroids);

    for _ in 0..max_iter {
        let (new_centroids, frequency): (Vec<Point>, Vec<usize>) = (0..k)
            .into_par_iter()
            .map(|cluster_id| update_centroid(data, &assignments, cluster_id))
            .unzip();
        centroids = new_centroids;

        // 空的聚类使用离自己中心最远的点重新初始化
        for cluster_id in (0..k).filter(|&i| frequency[i] == 0) {
            if let Some(far) = farthest_point(data, &assignments, &centroids) {
                centroids[cluster_id] = data[far];
                assignments[far] = cluster_id;
            }
        }

        let (new_assignments, _) = update_assignments(data, &centroids);
        if new_assignments == assignments {
            break;
        }
        assignments = new_assignments;
    }

    let (assignments, inertia) = update_assignments(data, &centroids);
    let mut centroid_frequency = vec![0; k];
    assignments.iter().for_each(|&c| centroid_frequency[c] += 1);
    KMeansState { inertia, centroids, assignments, centroid_frequency }
}

/// 将每个点分配给最近的聚类中心，并返回聚类中心的序号和总距离平方
pub fn update_assignments(data: &[Point], centroids: &[Point]) -> (Vec<usize>, f64) {
    let (assignments, distances): (Vec<_>, Vec<_>) = data
        .par_iter()
        .map(|point| {
            let mut min_distance = f64::INFINITY;
            let mut best_cluster = 0;

            for (j, centroid) in centroids.iter().enumerate() {
                let distance = dist2(point, centroid);
                if distance < min_distance {
                    min_distance = distance;
                    best_cluster = j;
                }
            }

            (best_cluster, min_distance)
        })
        .unzip();
    let distance = distances.iter().sum();
    (assignments, distance)
}

/// 更新聚类中心：计算分配给该聚类的所有点的均值
fn update_centroid(data: &[Point], assignments: &[usize], cluster_id: usize) -> (Point, usize) {
    let (sum, count) = data
        .iter()
        .zip(assignments)
        .filter(|(_, a)| **a == cluster_id)
        .fold(([0.0, 0.0], 0usize), |(s, n), (p, _)| ([s[0] + p[0], s[1] + p[1]], n + 1));
    if count == 0 {
        return ([f64::NAN, f64::NAN], 0);
    }
    ([sum[0] / count as f64, sum[1] / count as f64], count)
}

fn farthest_point(data: &[Point], assignments: &[usize], centroids: &[Point]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, (p, a)) in data.iter().zip(assignments).enumerate() {
        let c = &centroids[*a];
        if !c[0].is_finite() {
            continue;
        }
        let d = dist2(p, c);
        if best.is_none_or(|(_, bd)| d > bd) {
            best = Some((i, d));
        }
    }
    best.map(|(i, _)| i)
}
