// 该文件是 Tanshang （探伤） 项目的一部分。
// src/args.rs - 命令行参数
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

use std::path::PathBuf;

use clap::Parser;

/// Tanshang 钢材表面缺陷检测
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// RKNN 模型文件路径
  #[arg(long, value_name = "FILE")]
  pub model: String,

  /// 输入：单张图片，或待批量检测的图片目录
  #[arg(value_name = "INPUT")]
  pub input: PathBuf,

  /// 输出目录（批量模式缺省为输入目录下的 results）
  #[arg(long, value_name = "DIR")]
  pub output: Option<PathBuf>,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.5", value_name = "THRESHOLD")]
  pub confidence: f32,

  /// NMS IoU 阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.45", value_name = "THRESHOLD")]
  pub nms_threshold: f32,

  /// 标签字体文件（TTF），缺省时标签只画底色不写字
  #[arg(long, value_name = "FILE")]
  pub font: Option<PathBuf>,

  /// 同时输出每图的纯文本检测记录
  #[arg(long)]
  pub record: bool,

  /// 统计报告 JSON 输出路径（仅批量模式）
  #[arg(long, value_name = "FILE")]
  pub stats_json: Option<PathBuf>,
}
