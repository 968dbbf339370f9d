use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use chrono::{DateTime, NaiveDateTime};
use log::{info, warn};
use serde::Deserialize;

use crate::error::{Error, Result};

/// 一条导航/姿态采样
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetrySample {
    pub time: NaiveDateTime,
    pub lat: Option<f64>,
    pub long: Option<f64>,
    /// 向下为负，即 `-abs(depth)`
    pub depth: Option<f64>,
    pub heading: Option<f64>,
    pub pitch: Option<f64>,
    pub roll: Option<f64>,
}

/// 遥测日志中各语义字段对应的列名
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ColumnMap {
    pub time: String,
    #[serde(default)]
    pub lat: Option<String>,
    #[serde(default)]
    pub long: Option<String>,
    #[serde(default)]
    pub depth: Option<String>,
    #[serde(default)]
    pub heading: Option<String>,
    #[serde(default)]
    pub pitch: Option<String>,
    #[serde(default)]
    pub roll: Option<String>,
}

/// 遥测日志格式定义
///
/// 不同的传感器套件输出的列名和时间格式不同，通过替换格式定义即可支持。
/// 可以从 TOML 文件中加载：
///
/// ```toml
/// delimiter = "\t"
/// time_format = "iso"
///
/// [columns]
/// time = "TIME"
/// lat = "LAT"
/// long = "LONG"
/// depth = "DEPTH"
/// ```
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TelemetrySchema {
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    /// `strftime` 格式，或者 `iso` 表示 ISO 8601
    pub time_format: String,
    pub columns: ColumnMap,
}

fn default_delimiter() -> char {
    ','
}

impl TelemetrySchema {
    /// ROV 卡尔曼滤波输出的 CSV 格式
    pub fn wca() -> Self {
        Self {
            delimiter: ',',
            time_format: "%Y-%m-%dT%H:%M:%SZ".to_string(),
            columns: ColumnMap {
                time: "Timestamp".to_string(),
                lat: Some("kalman_lat".to_string()),
                long: Some("kalman_long".to_string()),
                depth: Some("kalman_depth".to_string()),
                heading: Some("kalman_yaw_deg".to_string()),
                pitch: Some("kalman_pitch_deg".to_string()),
                roll: Some("kalman_roll_deg".to_string()),
            },
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| Error::Schema(format!("{}: {e}", path.display())))
    }

    fn parse_time(&self, s: &str) -> Option<NaiveDateTime> {
        if self.time_format.eq_ignore_ascii_case("iso") {
            return DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.naive_utc())
                .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
                .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
                .ok();
        }
        NaiveDateTime::parse_from_str(s, &self.time_format).ok()
    }
}

impl Default for TelemetrySchema {
    fn default() -> Self {
        Self::wca()
    }
}

/// 按时间排序的遥测序列，加载后不再修改
#[derive(Debug, Clone, Default)]
pub struct Telemetry {
    samples: Vec<TelemetrySample>,
}

/// 列名解析后的下标
struct ColumnIndex {
    time: usize,
    lat: Option<usize>,
    long: Option<usize>,
    depth: Option<usize>,
    heading: Option<usize>,
    pitch: Option<usize>,
    roll: Option<usize>,
}

impl Telemetry {
    pub fn from_samples(mut samples: Vec<TelemetrySample>) -> Self {
        samples.sort_by_key(|s| s.time);
        Self { samples }
    }

    pub fn load(path: impl AsRef<Path>, schema: &TelemetrySchema) -> Result<Self> {
        let path = path.as_ref();
        info!("读取遥测日志: {}", path.display());
        let reader = BufReader::new(File::open(path)?);
        let telemetry = Self::parse(reader, path, schema)?;
        info!("共读取 {} 条遥测数据", telemetry.len());
        Ok(telemetry)
    }

    /// 解析遥测日志，`source` 仅用于错误信息
    pub fn parse(reader: impl BufRead, source: &Path, schema: &TelemetrySchema) -> Result<Self> {
        let mut lines = reader.lines().enumerate();

        let (header_no, header) = loop {
            match lines.next() {
                Some((no, line)) => {
                    let line = line?;
                    if !line.trim().is_empty() {
                        break (no + 1, line);
                    }
                }
                None => return Err(Error::telemetry(source, 0, "缺少表头")),
            }
        };
        let header = header.trim_start_matches('\u{feff}');
        let index = resolve_columns(header, schema)
            .map_err(|reason| Error::telemetry(source, header_no, reason))?;

        let mut samples = vec![];
        for (no, line) in lines {
            let line = line?;
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            let cells = line.split(schema.delimiter).map(str::trim).collect::<Vec<_>>();
            let sample = parse_row(&cells, &index, schema)
                .map_err(|reason| Error::telemetry(source, no + 1, reason))?;
            samples.push(sample);
        }

        if samples.is_empty() {
            warn!("遥测日志中没有数据: {}", source.display());
        }

        Ok(Self::from_samples(samples))
    }

    pub fn samples(&self) -> &[TelemetrySample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

fn resolve_columns(header: &str, schema: &TelemetrySchema) -> std::result::Result<ColumnIndex, String> {
    let names = header
        .trim_end_matches('\r')
        .split(schema.delimiter)
        .enumerate()
        .map(|(i, name)| (name.trim(), i))
        .collect::<HashMap<_, _>>();

    let lookup = |name: &str| names.get(name).copied().ok_or_else(|| format!("缺少列 {name}"));
    let optional = |name: &Option<String>| name.as_deref().map(lookup).transpose();

    let columns = &schema.columns;
    Ok(ColumnIndex {
        time: lookup(columns.time.as_str())?,
        lat: optional(&columns.lat)?,
        long: optional(&columns.long)?,
        depth: optional(&columns.depth)?,
        heading: optional(&columns.heading)?,
        pitch: optional(&columns.pitch)?,
        roll: optional(&columns.roll)?,
    })
}

fn parse_row(
    cells: &[&str],
    index: &ColumnIndex,
    schema: &TelemetrySchema,
) -> std::result::Result<TelemetrySample, String> {
    let raw_time = cells.get(index.time).copied().unwrap_or_default();
    let time = schema
        .parse_time(raw_time)
        .ok_or_else(|| format!("无效的时间 {raw_time:?}，格式应为 {}", schema.time_format))?;

    let number = |column: Option<usize>| -> std::result::Result<Option<f64>, String> {
        let Some(column) = column else {
            return Ok(None);
        };
        match cells.get(column).copied().unwrap_or_default() {
            "" => Ok(None),
            s => s.parse::<f64>().map(Some).map_err(|_| format!("第 {} 列不是数字: {s:?}", column + 1)),
        }
    };

    Ok(TelemetrySample {
        time,
        lat: number(index.lat)?,
        long: number(index.long)?,
        depth: number(index.depth)?.map(|d| -d.abs()),
        heading: number(index.heading)?,
        pitch: number(index.pitch)?,
        roll: number(index.roll)?,
    })
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use chrono::NaiveDate;

    use super::*;

    const WCA_LOG: &str = "\
Timestamp,kalman_lat,kalman_long,kalman_depth,kalman_yaw_deg,kalman_pitch_deg,kalman_roll_deg
2025-07-05T02:00:41Z,48.1,-123.5,12.5,90,1.5,-0.5
2025-07-05T02:00:39Z,48.0,-123.4,,,,

2025-07-05T02:00:40Z,,,-3,10,2,0
";

    fn parse(text: &str, schema: &TelemetrySchema) -> Result<Telemetry> {
        Telemetry::parse(Cursor::new(text), Path::new("test.csv"), schema)
    }

    #[test]
    fn test_parse_wca() {
        let t = parse(WCA_LOG, &TelemetrySchema::wca()).unwrap();
        assert_eq!(t.len(), 3);
        let s = t.samples();
        // 按时间排序
        assert_eq!(s[0].time, NaiveDate::from_ymd_opt(2025, 7, 5).unwrap().and_hms_opt(2, 0, 39).unwrap());
        assert_eq!(s[0].lat, Some(48.0));
        // 空字符串为 None 而不是 0
        assert_eq!(s[0].depth, None);
        assert_eq!(s[0].heading, None);
        assert_eq!(s[1].lat, None);
        // 深度统一为负数
        assert_eq!(s[1].depth, Some(-3.0));
        assert_eq!(s[2].depth, Some(-12.5));
        assert_eq!(s[2].heading, Some(90.0));
    }

    #[test]
    fn test_columns_by_name_not_position() {
        let text = "\
kalman_roll_deg,kalman_pitch_deg,kalman_yaw_deg,kalman_depth,kalman_long,kalman_lat,Timestamp,extra
1,2,3,4,5,6,2025-07-05T02:00:39Z,x
";
        let t = parse(text, &TelemetrySchema::wca()).unwrap();
        let s = &t.samples()[0];
        assert_eq!(s.lat, Some(6.0));
        assert_eq!(s.long, Some(5.0));
        assert_eq!(s.depth, Some(-4.0));
        assert_eq!(s.roll, Some(1.0));
    }

    #[test]
    fn test_missing_column() {
        let text = "Timestamp,kalman_lat\n2025-07-05T02:00:39Z,1\n";
        let err = parse(text, &TelemetrySchema::wca()).unwrap_err();
        assert!(matches!(err, Error::TelemetryParse { line: 1, .. }), "{err}");
        assert!(err.to_string().contains("kalman_long"));
    }

    #[test]
    fn test_invalid_time_is_fatal() {
        let text = WCA_LOG.replace("2025-07-05T02:00:40Z", "yesterday");
        let err = parse(&text, &TelemetrySchema::wca()).unwrap_err();
        assert!(matches!(err, Error::TelemetryParse { line: 5, .. }), "{err}");
    }

    #[test]
    fn test_invalid_number_is_fatal() {
        let text = WCA_LOG.replace("48.1", "north");
        assert!(matches!(parse(&text, &TelemetrySchema::wca()), Err(Error::TelemetryParse { line: 2, .. })));
    }

    #[test]
    fn test_empty_file() {
        assert!(matches!(parse("", &TelemetrySchema::wca()), Err(Error::TelemetryParse { line: 0, .. })));
    }

    #[test]
    fn test_schema_from_toml() {
        let schema: TelemetrySchema = toml::from_str(
            r#"
            delimiter = "\t"
            time_format = "iso"

            [columns]
            time = "TIME"
            lat = "LAT"
            long = "LONG"
            depth = "DEPTH"
            "#,
        )
        .unwrap();
        assert_eq!(schema.delimiter, '\t');
        assert_eq!(schema.columns.heading, None);

        let text = "TIME\tLAT\tLONG\tDEPTH\n2023-10-23T21:29:55.500\t48.5\t-123.1\t20\n2023-10-23 21:29:56\t48.6\t-123.2\t21\n";
        let t = parse(text, &schema).unwrap();
        assert_eq!(t.len(), 2);
        assert_eq!(t.samples()[0].depth, Some(-20.0));
        assert_eq!(t.samples()[0].pitch, None);
    }
}
