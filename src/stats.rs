// 该文件是 Tanshang （探伤） 项目的一部分。
// src/stats.rs - 批量检测统计
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

use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use serde_json::{Value, json};

use crate::detector::DetectResult;

/// 置信度分布的区间标签
pub const CONFIDENCE_BUCKET_LABELS: [&str; 6] = [
  "0.0-0.5", "0.5-0.6", "0.6-0.7", "0.7-0.8", "0.8-0.9", "0.9-1.0",
];

fn bucket_index(score: f32) -> usize {
  if score < 0.5 {
    0
  } else {
    (1 + ((score - 0.5) / 0.1) as usize).min(5)
  }
}

/// 一次批量检测的累积统计。
/// 逐图增量更新，批次结束后只读。
#[derive(Debug, Clone, Default)]
pub struct DefectStatistics {
  /// 处理过的图像总数（含失败后跳过的不计入）
  pub total_images: usize,
  /// 至少检出一个缺陷的图像数
  pub images_with_defects: usize,
  /// 各类别检出总数
  pub class_counts: BTreeMap<String, usize>,
  /// 各类别置信度样本
  pub class_confidences: BTreeMap<String, Vec<f32>>,
  /// 各类别受影响图像数，同图同类只计一次
  pub class_image_counts: BTreeMap<String, usize>,
}

impl DefectStatistics {
  pub fn new() -> Self {
    DefectStatistics::default()
  }

  /// 记录一幅处理失败的图像，只计入总数
  pub fn record_failure(&mut self) {
    self.total_images += 1;
  }

  /// 记录一幅图像的检测结果
  pub fn record_image(&mut self, result: &DetectResult) {
    self.total_images += 1;
    if result.has_defects() {
      self.images_with_defects += 1;
    }
    let mut seen = BTreeSet::new();
    for detection in &result.items {
      let name = detection.class().name;
      *self.class_counts.entry(name.to_string()).or_default() += 1;
      self
        .class_confidences
        .entry(name.to_string())
        .or_default()
        .push(detection.score);
      if seen.insert(name) {
        *self.class_image_counts.entry(name.to_string()).or_default() += 1;
      }
    }
  }

  /// 全部类别的检出总数
  pub fn total_defects(&self) -> usize {
    self.class_counts.values().sum()
  }

  /// 有缺陷图像占比
  pub fn defect_image_ratio(&self) -> f64 {
    if self.total_images == 0 {
      0.0
    } else {
      self.images_with_defects as f64 / self.total_images as f64
    }
  }

  /// 某类别的平均置信度
  pub fn average_confidence(&self, class_name: &str) -> Option<f32> {
    let samples = self.class_confidences.get(class_name)?;
    if samples.is_empty() {
      return None;
    }
    Some(samples.iter().sum::<f32>() / samples.len() as f32)
  }

  /// 全部检出的置信度分布，区间见 [`CONFIDENCE_BUCKET_LABELS`]
  pub fn confidence_distribution(&self) -> [usize; 6] {
    let mut buckets = [0usize; 6];
    for samples in self.class_confidences.values() {
      for &score in samples {
        buckets[bucket_index(score)] += 1;
      }
    }
    buckets
  }

  /// 导出为 JSON 报告
  pub fn to_json(&self) -> Value {
    let per_class: Vec<Value> = self
      .class_counts
      .keys()
      .map(|name| {
        json!({
          "class": name,
          "count": self.class_counts.get(name).copied().unwrap_or(0),
          "affected_images": self.class_image_counts.get(name).copied().unwrap_or(0),
          "average_confidence": self.average_confidence(name),
        })
      })
      .collect();
    let distribution: Vec<Value> = CONFIDENCE_BUCKET_LABELS
      .iter()
      .zip(self.confidence_distribution())
      .map(|(label, count)| json!({ "range": label, "count": count }))
      .collect();
    json!({
      "generated_at": Utc::now().to_rfc3339(),
      "total_images": self.total_images,
      "images_with_defects": self.images_with_defects,
      "total_defects": self.total_defects(),
      "defect_image_ratio": self.defect_image_ratio(),
      "classes": per_class,
      "confidence_distribution": distribution,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::detector::Detection;

  fn result(detections: &[(u32, f32)]) -> DetectResult {
    DetectResult {
      items: detections
        .iter()
        .map(|&(class_id, score)| Detection {
          class_id,
          score,
          bbox: [0, 0, 10, 10],
        })
        .collect(),
      width: 200,
      height: 200,
    }
  }

  #[test]
  fn counts_class_twice_but_image_once() {
    let mut stats = DefectStatistics::new();
    stats.record_image(&result(&[(0, 0.9), (0, 0.7), (1, 0.6)]));
    stats.record_image(&result(&[]));
    assert_eq!(stats.total_images, 2);
    assert_eq!(stats.images_with_defects, 1);
    assert_eq!(stats.class_counts["cr"], 2);
    assert_eq!(stats.class_image_counts["cr"], 1);
    assert_eq!(stats.class_image_counts["ic"], 1);
    assert_eq!(stats.total_defects(), 3);
  }

  #[test]
  fn averages_confidence_per_class() {
    let mut stats = DefectStatistics::new();
    stats.record_image(&result(&[(4, 0.6), (4, 0.8)]));
    let avg = stats.average_confidence("sc").unwrap();
    assert!((avg - 0.7).abs() < 1e-6);
    assert!(stats.average_confidence("cr").is_none());
  }

  #[test]
  fn buckets_cover_the_whole_range() {
    let mut stats = DefectStatistics::new();
    stats.record_image(&result(&[
      (0, 0.1),
      (0, 0.55),
      (1, 0.65),
      (2, 0.75),
      (3, 0.85),
      (5, 0.95),
      (5, 1.0),
    ]));
    assert_eq!(stats.confidence_distribution(), [1, 1, 1, 1, 1, 2]);
  }

  #[test]
  fn json_report_carries_the_totals() {
    let mut stats = DefectStatistics::new();
    stats.record_image(&result(&[(0, 0.9)]));
    let report = stats.to_json();
    assert_eq!(report["total_images"], 1);
    assert_eq!(report["total_defects"], 1);
    assert_eq!(report["classes"][0]["class"], "cr");
  }
}
