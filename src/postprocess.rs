// 该文件是 Tanshang （探伤） 项目的一部分。
// src/postprocess.rs - 输出解码与后处理
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

//! 把原始输出张量变成原图坐标系下的检测结果：
//! 反量化 → 逐头解码 → 置信度过滤 → 逐类贪心 NMS → 逆信箱映射。

use thiserror::Error;
use tracing::debug;

use crate::detector::{DetectResult, Detection};
use crate::engine::{InputShape, OutputTensor};
use crate::preprocess::LetterboxTransform;

/// 三个检测头的步长
pub const STRIDES: [u32; 3] = [8, 16, 32];

#[derive(Error, Debug)]
pub enum DecodeError {
  #[error("输出张量数量不符: 期望 {expected}, 实际 {actual}")]
  WrongTensorCount { expected: usize, actual: usize },
  #[error("模型输入尺寸 {width}x{height} 不能被步长 {stride} 整除")]
  BadInputSize { width: u32, height: u32, stride: u32 },
  #[error(
    "检测头 {head} 的张量大小不匹配: {len_a} 与 {len_b}, 空间大小 {spatial}"
  )]
  HeadShapeMismatch {
    head: usize,
    len_a: usize,
    len_b: usize,
    spatial: usize,
  },
  #[error("各检测头推得的类别数不一致: 首头 {first}, 检测头 {head} 为 {other}")]
  InconsistentClassCount {
    first: usize,
    head: usize,
    other: usize,
  },
}

/// 后处理阈值参数
#[derive(Debug, Clone, Copy)]
pub struct PostConfig {
  pub confidence_threshold: f32,
  pub nms_threshold: f32,
}

impl Default for PostConfig {
  fn default() -> Self {
    PostConfig {
      confidence_threshold: 0.5,
      nms_threshold: 0.45,
    }
  }
}

/// 张量空间中的候选框
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
  pub class_id: u32,
  pub score: f32,
  /// [左, 上, 右, 下]，模型输入空间像素
  pub bbox: [f32; 4],
}

fn sigmoid(x: f32) -> f32 {
  1.0 / (1.0 + (-x).exp())
}

/// 按张量大小匹配每个检测头的回归和分类输出，
/// RKNN 导出的输出顺序在头内可能互换。
fn match_reg_cls<'a>(
  tensor_a: &'a [f32],
  tensor_b: &'a [f32],
  reg_expected: usize,
  cls_expected: usize,
) -> Option<(&'a [f32], &'a [f32])> {
  if tensor_a.len() == reg_expected && tensor_b.len() == cls_expected {
    Some((tensor_a, tensor_b))
  } else if tensor_a.len() == cls_expected && tensor_b.len() == reg_expected {
    Some((tensor_b, tensor_a))
  } else {
    None
  }
}

/// 从第一个检测头的张量对推出类别数
fn infer_class_count(
  len_a: usize,
  len_b: usize,
  spatial: usize,
) -> Result<usize, DecodeError> {
  let reg_expected = 4 * spatial;
  let cls_len = if len_a == reg_expected {
    len_b
  } else if len_b == reg_expected {
    len_a
  } else {
    return Err(DecodeError::HeadShapeMismatch {
      head: 0,
      len_a,
      len_b,
      spatial,
    });
  };
  if cls_len == 0 || cls_len % spatial != 0 {
    return Err(DecodeError::HeadShapeMismatch {
      head: 0,
      len_a,
      len_b,
      spatial,
    });
  }
  Ok(cls_len / spatial)
}

/// 解码所有检测头为候选框，置信度低于阈值的直接丢弃。
/// 量化张量按引擎上报的 scale / zero_point 反量化后再解释。
pub fn decode_candidates(
  outputs: &[OutputTensor],
  input: InputShape,
  confidence_threshold: f32,
) -> Result<Vec<Candidate>, DecodeError> {
  let expected = STRIDES.len() * 2;
  if outputs.len() != expected {
    return Err(DecodeError::WrongTensorCount {
      expected,
      actual: outputs.len(),
    });
  }
  for stride in STRIDES {
    if input.width % stride != 0 || input.height % stride != 0 {
      return Err(DecodeError::BadInputSize {
        width: input.width,
        height: input.height,
        stride,
      });
    }
  }

  let input_w = input.width as f32;
  let input_h = input.height as f32;
  let mut num_classes = None;
  let mut candidates = Vec::new();

  for (head_idx, stride) in STRIDES.into_iter().enumerate() {
    let map_w = (input.width / stride) as usize;
    let map_h = (input.height / stride) as usize;
    let spatial = map_w * map_h;

    let tensor_a = outputs[head_idx * 2].to_f32();
    let tensor_b = outputs[head_idx * 2 + 1].to_f32();

    let nc = match num_classes {
      Some(nc) => nc,
      None => {
        let nc = infer_class_count(tensor_a.len(), tensor_b.len(), spatial)?;
        debug!("从输出张量推得类别数: {}", nc);
        num_classes = Some(nc);
        nc
      }
    };

    let reg_expected = 4 * spatial;
    let cls_expected = nc * spatial;
    let (reg, cls) = match match_reg_cls(&tensor_a, &tensor_b, reg_expected, cls_expected)
    {
      Some(pair) => pair,
      None => {
        // 与首头推得的类别数对不上，检查是否是头内类别数漂移
        if let Ok(other) =
          infer_class_count(tensor_a.len(), tensor_b.len(), spatial)
        {
          return Err(DecodeError::InconsistentClassCount {
            first: nc,
            head: head_idx,
            other,
          });
        }
        return Err(DecodeError::HeadShapeMismatch {
          head: head_idx,
          len_a: tensor_a.len(),
          len_b: tensor_b.len(),
          spatial,
        });
      }
    };

    let stride = stride as f32;
    for row in 0..map_h {
      for col in 0..map_w {
        let idx = row * map_w + col;

        let mut max_logit = f32::MIN;
        let mut class_id = 0u32;
        for c in 0..nc {
          let logit = cls[c * spatial + idx];
          if logit > max_logit {
            max_logit = logit;
            class_id = c as u32;
          }
        }
        let score = sigmoid(max_logit);
        if score <= confidence_threshold {
          continue;
        }

        let grid_x = col as f32 + 0.5;
        let grid_y = row as f32 + 0.5;
        let xmin = ((grid_x - reg[idx]) * stride).clamp(0.0, input_w);
        let ymin = ((grid_y - reg[spatial + idx]) * stride).clamp(0.0, input_h);
        let xmax = ((grid_x + reg[2 * spatial + idx]) * stride).clamp(0.0, input_w);
        let ymax = ((grid_y + reg[3 * spatial + idx]) * stride).clamp(0.0, input_h);
        if xmax <= xmin || ymax <= ymin {
          continue;
        }

        candidates.push(Candidate {
          class_id,
          score,
          bbox: [xmin, ymin, xmax, ymax],
        });
      }
    }
  }

  debug!("解码得到 {} 个候选框", candidates.len());
  Ok(candidates)
}

/// 交并比
pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let inter_left = a[0].max(b[0]);
  let inter_top = a[1].max(b[1]);
  let inter_right = a[2].min(b[2]);
  let inter_bottom = a[3].min(b[3]);
  let inter_w = (inter_right - inter_left).max(0.0);
  let inter_h = (inter_bottom - inter_top).max(0.0);
  let inter = inter_w * inter_h;
  let area_a = (a[2] - a[0]) * (a[3] - a[1]);
  let area_b = (b[2] - b[0]) * (b[3] - b[1]);
  let union = area_a + area_b - inter;
  if union <= 0.0 { 0.0 } else { inter / union }
}

/// 逐类贪心 NMS：按置信度降序取框，
/// 只抑制同类且 IoU 超阈值的余框，异类框互不影响。
pub fn nms(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
  candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
  let mut kept = Vec::new();
  while !candidates.is_empty() {
    let best = candidates.remove(0);
    candidates.retain(|other| {
      other.class_id != best.class_id || iou(&other.bbox, &best.bbox) <= iou_threshold
    });
    kept.push(best);
  }
  kept
}

/// 完整后处理：解码、过滤、NMS、映射回原图并整数化。
/// 逆映射后坍缩成退化框的候选被丢弃。
pub fn postprocess(
  outputs: &[OutputTensor],
  input: InputShape,
  transform: &LetterboxTransform,
  config: &PostConfig,
) -> Result<DetectResult, DecodeError> {
  let candidates = decode_candidates(outputs, input, config.confidence_threshold)?;
  let kept = nms(candidates, config.nms_threshold);

  let src_w = transform.src_width as f32;
  let src_h = transform.src_height as f32;
  let mut items = Vec::with_capacity(kept.len());
  for candidate in kept {
    let (left, top) = transform.to_source(candidate.bbox[0], candidate.bbox[1]);
    let (right, bottom) = transform.to_source(candidate.bbox[2], candidate.bbox[3]);
    let left = left.clamp(0.0, src_w).round() as i32;
    let top = top.clamp(0.0, src_h).round() as i32;
    let right = right.clamp(0.0, src_w).round() as i32;
    let bottom = bottom.clamp(0.0, src_h).round() as i32;
    if right <= left || bottom <= top {
      continue;
    }
    items.push(Detection {
      class_id: candidate.class_id,
      score: candidate.score,
      bbox: [left, top, right, bottom],
    });
  }

  Ok(DetectResult {
    items,
    width: transform.src_width,
    height: transform.src_height,
  })
}
