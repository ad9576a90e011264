// 该文件是 Tanshang （探伤） 项目的一部分。
// src/bin/huifang.rs - 帧序列回放推理
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

//! 把图片目录当成活动源按固定帧率回放，送入实时帧调度器，
//! 用于在没有相机的环境下验证忙则丢帧的调度行为。

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use image::ImageReader;
use tracing::{info, warn};

use tanshang::batch::find_image_files;
use tanshang::detector::Detector;
use tanshang::engine::Engine;
use tanshang::postprocess::PostConfig;
use tanshang::scheduler::{FrameOutcome, FrameScheduler};

/// 帧序列回放推理
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// RKNN 模型文件路径
  #[arg(long, value_name = "FILE")]
  pub model: String,

  /// 帧图片目录
  #[arg(value_name = "DIR")]
  pub frames: PathBuf,

  /// 回放帧率
  #[arg(long, default_value = "30.0", value_name = "FPS")]
  pub fps: f64,

  /// 循环回放轮数
  #[arg(long, default_value = "1", value_name = "COUNT")]
  pub loops: u32,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.5", value_name = "THRESHOLD")]
  pub confidence: f32,

  /// NMS IoU 阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.45", value_name = "THRESHOLD")]
  pub nms_threshold: f32,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();
  let args = Args::parse();

  let engine = Engine::load(&args.model).context("模型加载失败")?;
  let detector = Arc::new(Detector::new(
    engine,
    PostConfig {
      confidence_threshold: args.confidence,
      nms_threshold: args.nms_threshold,
    },
  ));
  let scheduler = Arc::new(FrameScheduler::new(detector));

  let files = find_image_files(&args.frames)?;
  if files.is_empty() {
    anyhow::bail!("目录中没有图片: {}", args.frames.display());
  }
  info!("回放 {} 帧, {} 轮, {:.1} fps", files.len(), args.loops, args.fps);

  let stop_requested = Arc::new(AtomicBool::new(false));
  {
    let stop_requested = Arc::clone(&stop_requested);
    ctrlc::set_handler(move || {
      stop_requested.store(true, Ordering::Release);
    })
    .context("无法注册 Ctrl-C 处理器")?;
  }

  let interval = Duration::from_secs_f64(1.0 / args.fps.max(0.001));
  scheduler.start();

  'outer: for _ in 0..args.loops {
    for path in &files {
      if stop_requested.load(Ordering::Acquire) {
        break 'outer;
      }
      let frame = match ImageReader::open(path).and_then(|r| {
        r.decode()
          .map_err(|e| std::io::Error::other(e.to_string()))
      }) {
        Ok(image) => image.to_rgb8(),
        Err(e) => {
          warn!("帧读取失败, 跳过 {}: {}", path.display(), e);
          continue;
        }
      };
      if let FrameOutcome::Processed(result) = scheduler.submit(&frame) {
        if result.has_defects() {
          info!("{}: 检出 {} 个缺陷", path.display(), result.items.len());
        }
      }
      std::thread::sleep(interval);
    }
  }

  let stats = scheduler.stop();
  println!();
  println!("回放结束!");
  println!("处理帧数: {}", stats.frames_processed);
  println!("丢弃帧数: {}", stats.frames_dropped);
  println!("失败帧数: {}", stats.frames_failed);
  println!("缺陷总数: {}", stats.detections);

  Ok(())
}
