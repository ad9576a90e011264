// 该文件是 Tanshang （探伤） 项目的一部分。
// src/batch.rs - 批量检测
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Tanshang 项目贡献者

//! 对一组图像文件顺序执行检测：单个文件失败不会中断整个批次，
//! 标注图写入 results 子目录，统计随批次增量累积。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use image::ImageReader;
use thiserror::Error;
use tracing::{info, warn};

use crate::annotate::{Annotator, save_jpeg, write_record};
use crate::detector::Detector;
use crate::stats::DefectStatistics;

/// 输出子目录名
pub const RESULT_DIR_NAME: &str = "results";
/// 输出文件名后缀
pub const RESULT_SUFFIX: &str = "_result";
/// 输出 JPEG 质量
pub const JPEG_QUALITY: u8 = 90;

const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "bmp", "tif", "tiff"];

#[derive(Error, Debug)]
pub enum BatchError {
  #[error("输入目录不可读 {path}: {source}")]
  ReadDir {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("无法创建输出目录 {path}: {source}")]
  CreateOutputDir {
    path: PathBuf,
    source: std::io::Error,
  },
}

/// 批量检测的可选项
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchOptions {
  /// 同时输出每图的纯文本记录
  pub write_records: bool,
}

/// 一次批量检测的结果汇总
#[derive(Debug)]
pub struct BatchReport {
  pub stats: DefectStatistics,
  pub succeeded: usize,
  pub failed: usize,
  /// 批次是否被取消信号截断
  pub cancelled: bool,
}

/// 扫描目录中的图像文件，按文件名排序保证批次顺序确定
pub fn find_image_files(dir: &Path) -> Result<Vec<PathBuf>, BatchError> {
  let entries = std::fs::read_dir(dir).map_err(|source| BatchError::ReadDir {
    path: dir.to_path_buf(),
    source,
  })?;
  let mut files = Vec::new();
  for entry in entries {
    let entry = entry.map_err(|source| BatchError::ReadDir {
      path: dir.to_path_buf(),
      source,
    })?;
    let path = entry.path();
    if !path.is_file() {
      continue;
    }
    let matches = path
      .extension()
      .and_then(|ext| ext.to_str())
      .is_some_and(|ext| {
        let ext = ext.to_ascii_lowercase();
        IMAGE_EXTENSIONS.contains(&ext.as_str())
      });
    if matches {
      files.push(path);
    }
  }
  files.sort();
  Ok(files)
}

/// 批量检测执行器
pub struct BatchRunner {
  detector: Arc<Detector>,
  annotator: Annotator,
  cancel: Arc<AtomicBool>,
  options: BatchOptions,
}

impl BatchRunner {
  pub fn new(detector: Arc<Detector>, annotator: Annotator) -> Self {
    BatchRunner {
      detector,
      annotator,
      cancel: Arc::new(AtomicBool::new(false)),
      options: BatchOptions::default(),
    }
  }

  /// 共享取消标志，置位后批次在下一幅图像前停止
  pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
    self.cancel = cancel;
    self
  }

  pub fn with_options(mut self, options: BatchOptions) -> Self {
    self.options = options;
    self
  }

  pub fn cancel_flag(&self) -> Arc<AtomicBool> {
    Arc::clone(&self.cancel)
  }

  /// 扫描目录并跑完整个批次，输出写入其 results 子目录
  pub fn run_directory(&self, input_dir: &Path) -> Result<BatchReport, BatchError> {
    let files = find_image_files(input_dir)?;
    let output_dir = input_dir.join(RESULT_DIR_NAME);
    self.run(&files, &output_dir)
  }

  /// 按给定顺序处理图像列表。取消只在图像之间生效，
  /// 已累积的统计随报告返回而不是丢弃。
  pub fn run(
    &self,
    files: &[PathBuf],
    output_dir: &Path,
  ) -> Result<BatchReport, BatchError> {
    std::fs::create_dir_all(output_dir).map_err(|source| {
      BatchError::CreateOutputDir {
        path: output_dir.to_path_buf(),
        source,
      }
    })?;

    let mut report = BatchReport {
      stats: DefectStatistics::new(),
      succeeded: 0,
      failed: 0,
      cancelled: false,
    };
    let total = files.len();

    for (index, path) in files.iter().enumerate() {
      if self.cancel.load(Ordering::Acquire) {
        info!("批量检测被取消, 已处理 {}/{} 幅", index, total);
        report.cancelled = true;
        break;
      }
      info!("处理 {}/{}: {}", index + 1, total, path.display());

      let decoded = ImageReader::open(path)
        .map_err(image::ImageError::IoError)
        .and_then(|reader| reader.decode());
      let image = match decoded {
        Ok(image) => image.to_rgb8(),
        Err(e) => {
          warn!("图像读取失败, 跳过 {}: {}", path.display(), e);
          report.stats.record_failure();
          report.failed += 1;
          continue;
        }
      };

      let result = match self.detector.detect(&image) {
        Ok(result) => result,
        Err(e) => {
          warn!("检测失败, 跳过 {}: {}", path.display(), e);
          report.stats.record_failure();
          report.failed += 1;
          continue;
        }
      };

      let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("image");
      let output_path = output_dir.join(format!("{stem}{RESULT_SUFFIX}.jpg"));
      let annotated = self.annotator.render(&image, &result);
      if let Err(e) = save_jpeg(&annotated, &output_path, JPEG_QUALITY) {
        warn!("结果图保存失败 {}: {}", output_path.display(), e);
        report.stats.record_failure();
        report.failed += 1;
        continue;
      }

      if self.options.write_records {
        let record_path = output_dir.join(format!("{stem}{RESULT_SUFFIX}.txt"));
        if let Err(e) = write_record(&record_path, &result) {
          warn!("记录文件写入失败 {}: {}", record_path.display(), e);
        }
      }

      report.stats.record_image(&result);
      report.succeeded += 1;
    }

    info!(
      "批量检测结束: 成功 {}, 失败 {}, 检出缺陷 {}",
      report.succeeded,
      report.failed,
      report.stats.total_defects()
    );
    Ok(report)
  }
}
