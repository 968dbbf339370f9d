//! 把批次成员复制到各自的输出目录

use std::path::{Path, PathBuf};

use futures::{StreamExt, TryStreamExt, stream};
use indicatif::ProgressBar;
use log::{info, warn};
use serde::Serialize;

use crate::batch::Batch;
use crate::error::{Error, Result};
use crate::manifest::{MANIFEST_FILE, Manifest, partial_path};
use crate::policy::{ConfirmationPolicy, Decision};
use crate::utils::pb_style;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Placement {
    pub placed: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
}

struct Job<'a> {
    batch: &'a Batch,
    target: PathBuf,
    partial: PathBuf,
    overwrite: bool,
}

/// 为每个批次在 `output` 下创建子目录，复制成员图片并写入该批次的清单
///
/// 批次名可以包含多级路径，例如 `cammid/batch_1`。
/// 目录先以 `<名称>.partial` 创建，全部写入后才重命名为最终名称。
/// 所有冲突在复制开始前确认完毕，中止时不会留下任何输出。
pub async fn place_batches(
    source: &Path,
    output: &Path,
    batches: &[Batch],
    manifest: Option<&Manifest>,
    policy: &dyn ConfirmationPolicy,
) -> Result<Placement> {
    let mut placement = Placement::default();
    let mut jobs = vec![];
    for batch in batches {
        let target = output.join(&batch.name);
        let mut overwrite = false;
        if target.exists() {
            match policy.on_conflict(&target) {
                Decision::Overwrite => overwrite = true,
                Decision::Skip => {
                    warn!("批次目录已存在，跳过: {}", target.display());
                    placement.skipped.push(target);
                    continue;
                }
                _ => return Err(Error::OutputConflict(target)),
            }
        }
        let partial = partial_path(&target);
        jobs.push(Job { batch, target, partial, overwrite });
    }

    for job in &jobs {
        if job.partial.exists() {
            warn!("清理上次未完成的目录: {}", job.partial.display());
            tokio::fs::remove_dir_all(&job.partial).await?;
        }
        tokio::fs::create_dir_all(&job.partial).await?;
    }

    let copies = jobs
        .iter()
        .flat_map(|job| job.batch.members.iter().map(move |name| (name, job.partial.as_path())))
        .collect::<Vec<_>>();
    let pb = ProgressBar::new(copies.len() as u64).with_style(pb_style());
    stream::iter(copies)
        .map(Ok::<_, Error>)
        .try_for_each_concurrent(num_cpus::get(), |(name, dir)| {
            let pb = pb.clone();
            async move {
                tokio::fs::copy(source.join(name), dir.join(name)).await?;
                pb.inc(1);
                Ok(())
            }
        })
        .await?;
    pb.finish_with_message("复制完成");

    for job in jobs {
        if let Some(manifest) = manifest {
            let subset = manifest.subset(&job.batch.members);
            if subset.rows.is_empty() {
                warn!("{} 中没有任何图片的遥测数据", job.batch.name);
            }
            tokio::fs::write(job.partial.join(MANIFEST_FILE), subset.render()).await?;
        }
        if job.overwrite {
            warn!("覆盖已存在的批次目录: {}", job.target.display());
            tokio::fs::remove_dir_all(&job.target).await?;
        }
        tokio::fs::rename(&job.partial, &job.target).await?;
        info!("{}: {} 张图片（重叠 {} 张）", job.target.display(), job.batch.members.len(), job.batch.overlap_count());
        placement.placed.push(job.target);
    }

    Ok(placement)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;
    use crate::manifest::{Coordinates, ManifestRow};
    use crate::policy::{AutoPolicy, ConflictAction};

    fn batch(id: usize, members: &[&str], base: std::ops::Range<usize>) -> Batch {
        Batch {
            id,
            name: format!("batch_{id}"),
            members: members.iter().map(|s| s.to_string()).collect(),
            base,
            boundary: None,
        }
    }

    fn setup() -> (TempDir, PathBuf, PathBuf) {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("images");
        let output = dir.path().join("out");
        fs::create_dir_all(&source).unwrap();
        fs::create_dir_all(&output).unwrap();
        for name in ["a.png", "b.png", "c.png"] {
            fs::write(source.join(name), name).unwrap();
        }
        (dir, source, output)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_place_batches() {
        let (_dir, source, output) = setup();
        let batches = [batch(1, &["a.png", "b.png"], 0..2), batch(2, &["b.png", "c.png"], 1..2)];
        let row = |name: &str| ManifestRow {
            name: name.to_string(),
            x: Some(1.0),
            y: Some(2.0),
            alt: None,
            yaw: None,
            pitch: None,
            roll: None,
        };
        let manifest = Manifest { coordinates: Coordinates::Utm, rows: vec![row("a.png"), row("c.png")] };

        let policy = AutoPolicy::new(ConflictAction::Abort);
        let placement = place_batches(&source, &output, &batches, Some(&manifest), &policy).await.unwrap();
        assert_eq!(placement.placed.len(), 2);

        assert_eq!(fs::read_to_string(output.join("batch_2/b.png")).unwrap(), "b.png");
        let log = fs::read_to_string(output.join("batch_1").join(MANIFEST_FILE)).unwrap();
        assert_eq!(log.lines().collect::<Vec<_>>(), ["Name;X (East);Y (North);Alt;Yaw;Pitch;Roll", "a.png;1;2;;;;"]);
        assert!(!output.join("batch_1.partial").exists());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_conflicts() {
        let (_dir, source, output) = setup();
        fs::create_dir_all(output.join("batch_2")).unwrap();
        fs::write(output.join("batch_2/old.png"), "old").unwrap();
        let batches = [batch(1, &["a.png"], 0..1), batch(2, &["b.png"], 0..1)];

        let abort = AutoPolicy::new(ConflictAction::Abort);
        let err = place_batches(&source, &output, &batches, None, &abort).await.unwrap_err();
        assert!(matches!(err, Error::OutputConflict(_)));
        // 中止时不写入任何目录
        assert!(!output.join("batch_1").exists());

        let skip = AutoPolicy::new(ConflictAction::Skip);
        let placement = place_batches(&source, &output, &batches, None, &skip).await.unwrap();
        assert_eq!(placement.skipped, [output.join("batch_2")]);
        assert!(output.join("batch_2/old.png").exists());

        let overwrite = AutoPolicy::new(ConflictAction::Overwrite);
        let placement = place_batches(&source, &output, &batches, None, &overwrite).await.unwrap();
        assert_eq!(placement.placed.len(), 2);
        assert!(!output.join("batch_2/old.png").exists());
        assert!(output.join("batch_2/b.png").exists());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_nested_names_abort_before_writing() {
        let (_dir, source, output) = setup();
        fs::create_dir_all(output.join("upper/batch_1")).unwrap();
        let mut lower = batch(1, &["a.png"], 0..1);
        lower.name = "lower/batch_1".to_string();
        let mut upper = batch(1, &["b.png"], 0..1);
        upper.name = "upper/batch_1".to_string();

        let policy = AutoPolicy::default();
        let err = place_batches(&source, &output, &[lower.clone(), upper.clone()], None, &policy).await.unwrap_err();
        assert!(matches!(err, Error::OutputConflict(_)));
        assert!(!output.join("lower").exists());

        let skip = AutoPolicy::new(ConflictAction::Skip);
        let placement = place_batches(&source, &output, &[lower, upper], None, &skip).await.unwrap();
        assert_eq!(placement.placed, [output.join("lower/batch_1")]);
        assert!(output.join("lower/batch_1/a.png").exists());
        assert!(!output.join("lower/batch_1.partial").exists());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_missing_source_leaves_partial() {
        let (_dir, source, output) = setup();
        let batches = [batch(1, &["a.png", "missing.png"], 0..2)];
        let policy = AutoPolicy::default();
        assert!(place_batches(&source, &output, &batches, None, &policy).await.is_err());
        assert!(!output.join("batch_1").exists());
        assert!(output.join("batch_1.partial").exists());
    }
}
