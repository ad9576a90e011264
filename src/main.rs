// 该文件是 Tanshang （探伤） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::{Context, Result};
use clap::Parser;
use image::ImageReader;

use tanshang::annotate::{Annotator, save_jpeg, write_record};
use tanshang::batch::{BatchOptions, BatchReport, BatchRunner, JPEG_QUALITY, RESULT_SUFFIX, find_image_files};
use tanshang::detector::Detector;
use tanshang::engine::Engine;
use tanshang::postprocess::PostConfig;
use tanshang::stats::CONFIDENCE_BUCKET_LABELS;

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();
  let args = args::Args::parse();

  println!("Tanshang 钢材表面缺陷检测");
  println!("========================");
  println!("模型文件路径: {}", args.model);
  println!("输入: {}", args.input.display());
  println!("置信度阈值: {}", args.confidence);
  println!("NMS 阈值: {}", args.nms_threshold);
  println!();

  println!("正在加载模型...");
  let engine = Engine::load(&args.model).context("模型加载失败")?;
  let shape = engine.input_shape();
  println!("模型加载完成, 输入 {}x{}", shape.width, shape.height);

  let detector = Arc::new(Detector::new(
    engine,
    PostConfig {
      confidence_threshold: args.confidence,
      nms_threshold: args.nms_threshold,
    },
  ));
  let annotator = match &args.font {
    Some(path) => Annotator::with_font_file(path)
      .with_context(|| format!("字体加载失败: {}", path.display()))?,
    None => Annotator::new(),
  };

  if args.input.is_dir() {
    run_batch(&args, detector, annotator)
  } else {
    run_single(&args, &detector, &annotator)
  }
}

fn run_batch(
  args: &args::Args,
  detector: Arc<Detector>,
  annotator: Annotator,
) -> Result<()> {
  let runner = BatchRunner::new(detector, annotator).with_options(BatchOptions {
    write_records: args.record,
  });

  let cancel = runner.cancel_flag();
  ctrlc::set_handler(move || {
    cancel.store(true, Ordering::Release);
  })
  .context("无法注册 Ctrl-C 处理器")?;

  let report = match &args.output {
    Some(output_dir) => {
      let files = find_image_files(&args.input)?;
      runner.run(&files, output_dir)?
    }
    None => runner.run_directory(&args.input)?,
  };

  print_summary(&report);

  if let Some(path) = &args.stats_json {
    let json = serde_json::to_string_pretty(&report.stats.to_json())
      .context("统计报告序列化失败")?;
    std::fs::write(path, json)
      .with_context(|| format!("统计报告写入失败: {}", path.display()))?;
    println!("统计报告: {}", path.display());
  }

  Ok(())
}

fn print_summary(report: &BatchReport) {
  println!();
  if report.cancelled {
    println!("批量检测已取消");
  }
  println!("批量检测完成!");
  println!("图像总数: {}", report.stats.total_images);
  println!("成功: {}, 失败: {}", report.succeeded, report.failed);
  println!(
    "有缺陷图像: {} ({:.1}%)",
    report.stats.images_with_defects,
    report.stats.defect_image_ratio() * 100.0
  );
  println!("缺陷总数: {}", report.stats.total_defects());
  for (name, count) in &report.stats.class_counts {
    let avg = report.stats.average_confidence(name).unwrap_or(0.0);
    let images = report
      .stats
      .class_image_counts
      .get(name)
      .copied()
      .unwrap_or(0);
    println!(
      "  - {}: {} 处, 涉及 {} 幅图像, 平均置信度 {:.2}",
      name, count, images, avg
    );
  }
  println!("置信度分布:");
  for (label, count) in CONFIDENCE_BUCKET_LABELS
    .iter()
    .zip(report.stats.confidence_distribution())
  {
    println!("  {}: {}", label, count);
  }
}

fn run_single(
  args: &args::Args,
  detector: &Detector,
  annotator: &Annotator,
) -> Result<()> {
  let path = &args.input;
  let image = ImageReader::open(path)
    .with_context(|| format!("图像不可读: {}", path.display()))?
    .decode()
    .with_context(|| format!("图像解码失败: {}", path.display()))?
    .to_rgb8();

  let result = detector
    .detect(&image)
    .with_context(|| format!("检测失败: {}", path.display()))?;

  println!("检测到 {} 个缺陷:", result.items.len());
  for detection in &result.items {
    println!(
      "  - {}: {:.2}% at ({}, {})-({}, {})",
      detection.class().name,
      detection.score * 100.0,
      detection.bbox[0],
      detection.bbox[1],
      detection.bbox[2],
      detection.bbox[3],
    );
  }

  let stem = path
    .file_stem()
    .and_then(|s| s.to_str())
    .unwrap_or("image");
  let output_dir = match &args.output {
    Some(dir) => {
      std::fs::create_dir_all(dir)
        .with_context(|| format!("无法创建输出目录: {}", dir.display()))?;
      dir.clone()
    }
    None => path.parent().unwrap_or(Path::new(".")).to_path_buf(),
  };
  let output_path = output_dir.join(format!("{stem}{RESULT_SUFFIX}.jpg"));

  let annotated = annotator.render(&image, &result);
  save_jpeg(&annotated, &output_path, JPEG_QUALITY)
    .with_context(|| format!("结果图保存失败: {}", output_path.display()))?;
  println!("结果图: {}", output_path.display());

  if args.record {
    let record_path = output_dir.join(format!("{stem}{RESULT_SUFFIX}.txt"));
    write_record(&record_path, &result)
      .with_context(|| format!("记录文件写入失败: {}", record_path.display()))?;
    println!("检测记录: {}", record_path.display());
  }

  Ok(())
}
