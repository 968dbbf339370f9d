use std::cmp::Ordering;
use std::ops::Range;
use std::sync::LazyLock;

use chrono::NaiveDateTime;
use log::warn;
use regex::Regex;

/// 形如 `20250705T020039Z` 的时间戳
static RE_SEPARATED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{8}T\d{6}Z").expect("failed to build regex"));
/// 形如 `20250705020039` 的时间戳
static RE_COMPACT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{14}").expect("failed to build regex"));
static RE_FRAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"frame(\d+)").expect("failed to build regex"));

/// 无法解析时间戳时使用的占位值
pub const TIMESTAMP_SENTINEL: NaiveDateTime = NaiveDateTime::UNIX_EPOCH;
/// 文件名中没有帧号时使用的占位值，保证同一时间戳下排在最后
pub const FRAME_INDEX_SENTINEL: u64 = u64::MAX;

/// 规范化后的时间戳格式
pub const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";
const COMPACT_FORMAT: &str = "%Y%m%d%H%M%S";

/// 从文件名中提取出的图片元数据
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRecord {
    pub filename: String,
    pub timestamp: NaiveDateTime,
    pub frame_index: u64,
    /// 时间戳在文件名中的字节范围
    token: Option<Range<usize>>,
}

impl ImageRecord {
    /// 解析文件名，永远不会失败，无法识别的部分使用占位值
    pub fn from_filename(filename: impl Into<String>) -> Self {
        let filename = filename.into();
        let (timestamp, token) = match find_timestamp(&filename) {
            Some((timestamp, range)) => (timestamp, Some(range)),
            None => (TIMESTAMP_SENTINEL, None),
        };
        let frame_index = RE_FRAME
            .captures(&filename)
            .and_then(|caps| caps[1].parse().ok())
            .unwrap_or(FRAME_INDEX_SENTINEL);
        Self { filename, timestamp, frame_index, token }
    }

    pub fn has_timestamp(&self) -> bool {
        self.token.is_some()
    }

    pub fn has_frame_index(&self) -> bool {
        self.frame_index != FRAME_INDEX_SENTINEL
    }

    /// 文件名中原样出现的时间戳片段
    pub fn timestamp_token(&self) -> Option<&str> {
        self.token.clone().map(|range| &self.filename[range])
    }

    /// `YYYYMMDDTHHMMSSZ` 形式的时间戳，占位值同样会被格式化
    pub fn timestamp_str(&self) -> String {
        self.timestamp.format(TIMESTAMP_FORMAT).to_string()
    }

    /// 排序键：时间戳、帧号、文件名
    pub fn sort_key(&self) -> (NaiveDateTime, u64, &str) {
        (self.timestamp, self.frame_index, &self.filename)
    }
}

impl PartialOrd for ImageRecord {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ImageRecord {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

/// 优先匹配带分隔符的格式，找不到时再尝试紧凑格式
fn find_timestamp(filename: &str) -> Option<(NaiveDateTime, Range<usize>)> {
    if let Some(m) = RE_SEPARATED.find(filename) {
        return NaiveDateTime::parse_from_str(m.as_str(), TIMESTAMP_FORMAT)
            .ok()
            .map(|ts| (ts, m.range()));
    }
    let m = RE_COMPACT.find(filename)?;
    NaiveDateTime::parse_from_str(m.as_str(), COMPACT_FORMAT).ok().map(|ts| (ts, m.range()))
}

/// 解析一组文件名并按时间顺序排列，缺少时间戳的文件会被警告
pub fn ordered_records<I, S>(filenames: I) -> Vec<ImageRecord>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut records = filenames
        .into_iter()
        .map(ImageRecord::from_filename)
        .inspect(|record| {
            if !record.has_timestamp() {
                warn!("无法从文件名中解析时间戳，使用占位值: {}", record.filename);
            }
        })
        .collect::<Vec<_>>();
    records.sort();
    records
}
