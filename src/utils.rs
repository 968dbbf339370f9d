use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::LazyLock;

use indicatif::ProgressStyle;
use log::warn;
use regex::Regex;
use walkdir::WalkDir;

use crate::error::Result;

static RE_IMAGE_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(png|jpg|jpeg)$").expect("failed to build regex"));

pub fn pb_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "[{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} {per_sec:>12} {msg}",
    )
    .expect("failed to build progress style")
    .progress_chars("##-")
}

/// 列出目录下（不含子目录）的图片文件名，按文件名排序
pub fn scan_images(dir: impl AsRef<Path>) -> Result<Vec<String>> {
    let mut images = vec![];
    for entry in WalkDir::new(dir.as_ref()).min_depth(1).max_depth(1) {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        let is_image = entry
            .path()
            .extension()
            .is_some_and(|ext| RE_IMAGE_SUFFIX.is_match(&ext.to_string_lossy()));
        if is_image {
            images.push(name);
        } else if name != crate::manifest::MANIFEST_FILE {
            warn!("跳过非图片文件: {}", entry.path().display());
        }
    }
    images.sort();
    Ok(images)
}

/// 打印提示并读取一行回答
pub fn read_line(prompt: &str) -> Result<String> {
    print!("{prompt}");
    io::stdout().flush()?;
    read_answer(io::stdin().lock())
}

fn read_answer(mut reader: impl BufRead) -> Result<String> {
    let mut answer = String::new();
    reader.read_line(&mut answer)?;
    Ok(answer.trim().to_owned())
}
