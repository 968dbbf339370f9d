//! 批次清单（flight log）的读写
//!
//! 每行一条记录，`;` 分隔：`文件名;X;Y;高度;航向;俯仰;横滚`，空字段表示缺失。

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use log::{info, warn};
use serde::Serialize;

use crate::batch::Located;
use crate::error::{Error, Result};
use crate::geodesy::UtmProjector;
use crate::kmeans::Point;
use crate::matcher::GeoreferencedRecord;
use crate::policy::{ConfirmationPolicy, Decision};

/// 批次目录中清单文件的文件名
pub const MANIFEST_FILE: &str = "flight_log.txt";
const DELIMITER: char = ';';
const UTM_HEADER: &str = "Name;X (East);Y (North);Alt;Yaw;Pitch;Roll";
const GEOGRAPHIC_HEADER: &str = "Name;Lat;Long;Alt;Yaw;Pitch;Roll";

/// 清单中位置字段使用的坐标系
#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum Coordinates {
    /// UTM 平面坐标，X 为东向，Y 为北向
    #[default]
    Utm,
    /// 经纬度，X 为纬度，Y 为经度
    Geographic,
}

impl Coordinates {
    fn header(&self) -> &'static str {
        match self {
            Self::Utm => UTM_HEADER,
            Self::Geographic => GEOGRAPHIC_HEADER,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ManifestRow {
    pub name: String,
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub alt: Option<f64>,
    pub yaw: Option<f64>,
    pub pitch: Option<f64>,
    pub roll: Option<f64>,
}

impl ManifestRow {
    pub fn from_record(record: &GeoreferencedRecord, coordinates: Coordinates) -> Self {
        let (x, y) = match coordinates {
            Coordinates::Utm => (record.easting, record.northing),
            Coordinates::Geographic => (record.lat, record.long),
        };
        Self {
            name: record.image.filename.clone(),
            x,
            y,
            alt: record.altitude,
            yaw: record.heading,
            pitch: record.pitch,
            roll: record.roll,
        }
    }

    pub fn line(&self) -> String {
        let field = |v: Option<f64>| v.map(|v| v.to_string()).unwrap_or_default();
        [self.x, self.y, self.alt, self.yaw, self.pitch, self.roll]
            .into_iter()
            .fold(self.name.clone(), |mut line, v| {
                line.push(DELIMITER);
                line.push_str(&field(v));
                line
            })
    }

    fn parse(line: &str) -> std::result::Result<Self, String> {
        let cells = line.split(DELIMITER).map(str::trim).collect::<Vec<_>>();
        if cells.len() != 7 {
            return Err(format!("应有 7 列，实际为 {} 列", cells.len()));
        }
        if cells[0].is_empty() {
            return Err("文件名为空".to_string());
        }
        let number = |i: usize| -> std::result::Result<Option<f64>, String> {
            let s = cells[i];
            if s.is_empty() || s.eq_ignore_ascii_case("none") || s.eq_ignore_ascii_case("nan") {
                return Ok(None);
            }
            s.parse::<f64>().map(Some).map_err(|_| format!("第 {} 列不是数字: {s:?}", i + 1))
        };
        Ok(Self {
            name: cells[0].to_string(),
            x: number(1)?,
            y: number(2)?,
            alt: number(3)?,
            yaw: number(4)?,
            pitch: number(5)?,
            roll: number(6)?,
        })
    }
}

/// 带坐标的清单行，用于区域划分
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedRow {
    pub name: String,
    pub point: Option<Point>,
}

impl Located for PlacedRow {
    fn filename(&self) -> &str {
        &self.name
    }

    fn planar(&self) -> Option<Point> {
        self.point
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Manifest {
    pub coordinates: Coordinates,
    pub rows: Vec<ManifestRow>,
}

impl Manifest {
    pub fn from_records(records: &[GeoreferencedRecord], coordinates: Coordinates) -> Self {
        let rows = records.iter().map(|r| ManifestRow::from_record(r, coordinates)).collect();
        Self { coordinates, rows }
    }

    /// 读取清单，表头可以省略，省略时视为 UTM 坐标
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let mut coordinates = Coordinates::Utm;
        let mut rows = vec![];

        let lines = text.lines().enumerate().filter(|(_, line)| !line.trim().is_empty());
        for (i, (no, line)) in lines.enumerate() {
            let line = line.trim_start_matches('\u{feff}');
            if i == 0 && line.starts_with("Name;") {
                let header = line.split(DELIMITER).map(str::trim).collect::<Vec<_>>();
                if header.get(1) == Some(&"Lat") {
                    coordinates = Coordinates::Geographic;
                }
                continue;
            }
            rows.push(ManifestRow::parse(line).map_err(|reason| Error::manifest(path, no + 1, reason))?);
        }

        info!("从 {} 读取了 {} 条记录", path.display(), rows.len());
        Ok(Self { coordinates, rows })
    }

    /// 按 `members` 的顺序选出属于这些文件的行
    pub fn subset<S: AsRef<str>>(&self, members: &[S]) -> Self {
        let mut by_name: HashMap<&str, Vec<&ManifestRow>> = HashMap::new();
        for row in &self.rows {
            by_name.entry(row.name.as_str()).or_default().push(row);
        }
        let mut seen = HashSet::new();
        let rows = members
            .iter()
            .map(|m| m.as_ref())
            .filter(|m| seen.insert(*m))
            .flat_map(|m| by_name.get(m).into_iter().flatten())
            .map(|row| (*row).clone())
            .collect();
        Self { coordinates: self.coordinates, rows }
    }

    /// 每条记录的平面坐标，经纬度清单会被投影到同一个 UTM 分区
    pub fn placed_rows(&self) -> Vec<PlacedRow> {
        let mut projector = UtmProjector::default();
        self.rows
            .iter()
            .map(|row| {
                let point = match (self.coordinates, row.x, row.y) {
                    (Coordinates::Utm, Some(x), Some(y)) => Some([x, y]),
                    (Coordinates::Geographic, Some(lat), Some(long)) => {
                        projector.project(lat, long).map(|(e, n)| [e, n])
                    }
                    _ => None,
                };
                PlacedRow { name: row.name.clone(), point }
            })
            .collect()
    }

    /// 生成文件内容，完全相同的行只保留第一次出现
    pub fn render(&self) -> String {
        let mut seen = HashSet::new();
        let mut text = String::from(self.coordinates.header());
        text.push('\n');
        for line in self.rows.iter().map(ManifestRow::line) {
            if seen.insert(line.clone()) {
                text.push_str(&line);
                text.push('\n');
            } else {
                warn!("跳过重复的记录: {line}");
            }
        }
        text
    }

    /// 写入清单，目标已存在时由 `policy` 决定，返回是否实际写入
    pub fn write(&self, path: impl AsRef<Path>, policy: &dyn ConfirmationPolicy) -> Result<bool> {
        let path = path.as_ref();
        if path.exists() {
            match policy.on_conflict(path) {
                Decision::Overwrite => warn!("覆盖已存在的清单: {}", path.display()),
                Decision::Skip => {
                    warn!("清单已存在，跳过: {}", path.display());
                    return Ok(false);
                }
                _ => return Err(Error::OutputConflict(path.to_path_buf())),
            }
        }

        let tmp = partial_path(path);
        fs::write(&tmp, self.render())?;
        fs::rename(&tmp, path)?;
        info!("清单已写入: {}", path.display());
        Ok(true)
    }
}

/// 写入过程中使用的临时路径
pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".partial");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::policy::{AutoPolicy, ConflictAction};

    fn row(name: &str, x: f64) -> ManifestRow {
        ManifestRow {
            name: name.to_string(),
            x: Some(x),
            y: Some(5_000_000.0),
            alt: Some(-12.5),
            yaw: None,
            pitch: Some(90.0),
            roll: Some(0.0),
        }
    }

    #[test]
    fn test_line_format() {
        assert_eq!(row("a.png", 500000.25).line(), "a.png;500000.25;5000000;-12.5;;90;0");
    }

    #[test]
    fn test_render_dedups_identical_lines() {
        let m = Manifest {
            coordinates: Coordinates::Utm,
            rows: vec![row("a.png", 1.0), row("a.png", 1.0), row("a.png", 2.0)],
        };
        let text = m.render();
        assert_eq!(text.lines().count(), 3);
        assert!(text.starts_with(UTM_HEADER));
    }

    #[test]
    fn test_read_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(MANIFEST_FILE);
        let m = Manifest { coordinates: Coordinates::Geographic, rows: vec![row("a.png", 48.5), row("b.png", 48.6)] };
        assert!(m.write(&path, &AutoPolicy::new(ConflictAction::Abort)).unwrap());
        assert_eq!(Manifest::read(&path).unwrap(), m);
    }

    #[test]
    fn test_read_legacy_without_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("old.txt");
        fs::write(&path, "a.png;1;2;None;nan;;3\n\nb.png;1;2;3;4;5;6\n").unwrap();
        let m = Manifest::read(&path).unwrap();
        assert_eq!(m.coordinates, Coordinates::Utm);
        assert_eq!(m.rows.len(), 2);
        assert_eq!(m.rows[0].alt, None);
        assert_eq!(m.rows[0].yaw, None);
        assert_eq!(m.rows[0].roll, Some(3.0));
    }

    #[test]
    fn test_read_errors() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.txt");
        fs::write(&path, format!("{UTM_HEADER}\na.png;1;2;3;4;5;6\nb.png;1;2\n")).unwrap();
        let err = Manifest::read(&path).unwrap_err();
        assert!(matches!(err, Error::ManifestParse { line: 3, .. }), "{err}");

        fs::write(&path, "a.png;x;2;3;4;5;6\n").unwrap();
        assert!(matches!(Manifest::read(&path), Err(Error::ManifestParse { line: 1, .. })));
    }

    #[test]
    fn test_subset_member_order() {
        let m = Manifest {
            coordinates: Coordinates::Utm,
            rows: vec![row("a.png", 1.0), row("b.png", 2.0), row("c.png", 3.0), row("a.png", 4.0)],
        };
        let s = m.subset(&["c.png", "a.png", "missing.png", "c.png"]);
        let xs = s.rows.iter().map(|r| r.x.unwrap()).collect::<Vec<_>>();
        assert_eq!(xs, [3.0, 1.0, 4.0]);
    }

    #[test]
    fn test_write_conflict() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(MANIFEST_FILE);
        fs::write(&path, "old").unwrap();
        let m = Manifest { coordinates: Coordinates::Utm, rows: vec![row("a.png", 1.0)] };

        let err = m.write(&path, &AutoPolicy::new(ConflictAction::Abort)).unwrap_err();
        assert!(matches!(err, Error::OutputConflict(_)));
        assert!(!m.write(&path, &AutoPolicy::new(ConflictAction::Skip)).unwrap());
        assert_eq!(fs::read_to_string(&path).unwrap(), "old");
        assert!(m.write(&path, &AutoPolicy::new(ConflictAction::Overwrite)).unwrap());
        assert_eq!(fs::read_to_string(&path).unwrap(), m.render());
        assert!(!partial_path(&path).exists());
    }

    #[test]
    fn test_placed_rows() {
        let utm = Manifest { coordinates: Coordinates::Utm, rows: vec![row("a.png", 1.0)] };
        assert_eq!(utm.placed_rows()[0].point, Some([1.0, 5_000_000.0]));

        let mut geo = Manifest { coordinates: Coordinates::Geographic, rows: vec![row("a.png", 51.2)] };
        geo.rows[0].y = Some(7.5);
        geo.rows.push(ManifestRow { x: None, ..row("b.png", 0.0) });
        let placed = geo.placed_rows();
        let p = placed[0].point.unwrap();
        assert!((p[0] - 395201.31).abs() < 0.05);
        assert_eq!(placed[1].point, None);
    }
}
