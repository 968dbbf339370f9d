//! WGS84 经纬度到 UTM 平面坐标的转换

use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

const K0: f64 = 0.9996;
const E: f64 = 0.00669438;
const E2: f64 = E * E;
const E3: f64 = E2 * E;
const E_P2: f64 = E / (1.0 - E);
const R: f64 = 6_378_137.0;

const M1: f64 = 1.0 - E / 4.0 - 3.0 * E2 / 64.0 - 5.0 * E3 / 256.0;
const M2: f64 = 3.0 * E / 8.0 + 3.0 * E2 / 32.0 + 45.0 * E3 / 1024.0;
const M3: f64 = 15.0 * E2 / 256.0 + 45.0 * E3 / 1024.0;
const M4: f64 = 35.0 * E3 / 3072.0;

const ZONE_LETTERS: &[u8] = b"CDEFGHJKLMNPQRSTUVWXX";

/// UTM 分区，例如 `32U`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UtmZone {
    pub number: u8,
    pub letter: char,
}

impl UtmZone {
    /// 根据经纬度计算所在分区，超出 UTM 纬度范围时返回 None
    pub fn of(lat: f64, lon: f64) -> Option<Self> {
        if !(-80.0..=84.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return None;
        }
        let letter = ZONE_LETTERS[((lat + 80.0) as usize) >> 3] as char;
        Some(Self { number: zone_number(lat, lon), letter })
    }

    pub fn is_northern(&self) -> bool {
        self.letter >= 'N'
    }

    fn central_longitude(&self) -> f64 {
        (self.number as f64 - 1.0) * 6.0 - 180.0 + 3.0
    }
}

impl fmt::Display for UtmZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.number, self.letter)
    }
}

impl FromStr for UtmZone {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let letter = s
            .chars()
            .last()
            .map(|c| c.to_ascii_uppercase())
            .filter(|c| c.is_ascii_uppercase() && ZONE_LETTERS.contains(&(*c as u8)))
            .ok_or_else(|| format!("无效的 UTM 分区: {s}"))?;
        let number = s[..s.len() - 1]
            .parse::<u8>()
            .ok()
            .filter(|n| (1..=60).contains(n))
            .ok_or_else(|| format!("无效的 UTM 分区: {s}"))?;
        Ok(Self { number, letter })
    }
}

fn zone_number(lat: f64, lon: f64) -> u8 {
    if (56.0..64.0).contains(&lat) && (3.0..12.0).contains(&lon) {
        return 32;
    }
    if (72.0..=84.0).contains(&lat) && lon >= 0.0 {
        if lon < 9.0 {
            return 31;
        } else if lon < 21.0 {
            return 33;
        } else if lon < 33.0 {
            return 35;
        } else if lon < 42.0 {
            return 37;
        }
    }
    if lon == 180.0 {
        return 60;
    }
    ((lon + 180.0) / 6.0) as u8 + 1
}

/// 将角度规范化到 [-PI, PI)
fn mod_angle(value: f64) -> f64 {
    (value + PI).rem_euclid(2.0 * PI) - PI
}

/// 在指定分区中投影，返回 (easting, northing)
pub fn project(lat: f64, lon: f64, zone: UtmZone) -> (f64, f64) {
    let lat_rad = lat.to_radians();
    let lat_sin = lat_rad.sin();
    let lat_cos = lat_rad.cos();
    let lat_tan = lat_sin / lat_cos;
    let lat_tan2 = lat_tan * lat_tan;
    let lat_tan4 = lat_tan2 * lat_tan2;

    let central_lon_rad = zone.central_longitude().to_radians();

    let n = R / (1.0 - E * lat_sin * lat_sin).sqrt();
    let c = E_P2 * lat_cos * lat_cos;

    let a = lat_cos * mod_angle(lon.to_radians() - central_lon_rad);
    let a2 = a * a;
    let a3 = a2 * a;
    let a4 = a3 * a;
    let a5 = a4 * a;
    let a6 = a5 * a;

    let m = R
        * (M1 * lat_rad - M2 * (2.0 * lat_rad).sin() + M3 * (4.0 * lat_rad).sin()
            - M4 * (6.0 * lat_rad).sin());

    let easting = K0
        * n
        * (a + a3 / 6.0 * (1.0 - lat_tan2 + c)
            + a5 / 120.0 * (5.0 - 18.0 * lat_tan2 + lat_tan4 + 72.0 * c - 58.0 * E_P2))
        + 500_000.0;

    let mut northing = K0
        * (m + n
            * lat_tan
            * (a2 / 2.0
                + a4 / 24.0 * (5.0 - lat_tan2 + 9.0 * c + 4.0 * c * c)
                + a6 / 720.0 * (61.0 - 58.0 * lat_tan2 + lat_tan4 + 600.0 * c - 330.0 * E_P2)));

    if !zone.is_northern() {
        northing += 10_000_000.0;
    }

    (easting, northing)
}

/// 整个运行过程中使用同一个分区的投影器
///
/// 未指定分区时，由第一个成功投影的点决定，之后不再改变。
#[derive(Debug, Clone, Default)]
pub struct UtmProjector {
    zone: Option<UtmZone>,
}

impl UtmProjector {
    pub fn new(zone: Option<UtmZone>) -> Self {
        Self { zone }
    }

    pub fn zone(&self) -> Option<UtmZone> {
        self.zone
    }

    pub fn project(&mut self, lat: f64, lon: f64) -> Option<(f64, f64)> {
        if !lat.is_finite() || !lon.is_finite() {
            return None;
        }
        let zone = match self.zone {
            Some(zone) => {
                UtmZone::of(lat, lon)?;
                zone
            }
            None => *self.zone.insert(UtmZone::of(lat, lon)?),
        };
        Some(project(lat, lon, zone))
    }
}
