// 该文件是 Tanshang （探伤） 项目的一部分。
// src/detector.rs - 检测器门面
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

use image::RgbImage;
use thiserror::Error;
use tracing::debug;

use crate::classes::{DefectClass, class_info};
use crate::engine::{Engine, EngineError};
use crate::postprocess::{self, DecodeError, PostConfig};
use crate::preprocess::{self, PreprocessError};

/// 原图坐标系下的一条检测
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
  pub class_id: u32,
  pub score: f32,
  /// [左, 上, 右, 下]，原图像素，已截断
  pub bbox: [i32; 4],
}

impl Detection {
  /// 对应的缺陷类别信息，越界 id 得到兜底类别
  pub fn class(&self) -> &'static DefectClass {
    class_info(self.class_id)
  }
}

/// 一次推理的全部检测结果
#[derive(Debug, Clone, PartialEq)]
pub struct DetectResult {
  pub items: Vec<Detection>,
  /// 原图宽度
  pub width: u32,
  /// 原图高度
  pub height: u32,
}

impl DetectResult {
  pub fn has_defects(&self) -> bool {
    !self.items.is_empty()
  }
}

#[derive(Error, Debug)]
pub enum DetectError {
  #[error("预处理失败: {0}")]
  Preprocess(#[from] PreprocessError),
  #[error("推理失败: {0}")]
  Engine(#[from] EngineError),
  #[error("解码失败: {0}")]
  Decode(#[from] DecodeError),
}

/// 检测器：预处理、推理、后处理一条龙。
/// 引擎为其独占资源，实时调度与批量检测共用时以 `Arc` 共享。
pub struct Detector {
  engine: Engine,
  config: PostConfig,
}

impl Detector {
  pub fn new(engine: Engine, config: PostConfig) -> Self {
    Detector { engine, config }
  }

  pub fn engine(&self) -> &Engine {
    &self.engine
  }

  pub fn config(&self) -> &PostConfig {
    &self.config
  }

  /// 对一幅 RGB 图像执行完整检测
  pub fn detect(&self, image: &RgbImage) -> Result<DetectResult, DetectError> {
    let shape = self.engine.input_shape();
    // 信箱缓冲区在此作用域存活，覆盖整个推理调用
    let (tensor_image, transform) =
      preprocess::letterbox(image, shape.width, shape.height)?;
    let outputs = self.engine.infer(tensor_image.as_raw())?;
    let result = postprocess::postprocess(&outputs, shape, &transform, &self.config)?;
    debug!(
      "检测完成: {}x{} 图像, {} 个缺陷",
      result.width,
      result.height,
      result.items.len()
    );
    Ok(result)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::engine::testing::{ScriptedBackend, SynthDetection};

  fn detector_with(backend: ScriptedBackend, config: PostConfig) -> Detector {
    Detector::new(Engine::new(Box::new(backend)), config)
  }

  #[test]
  fn end_to_end_keeps_only_the_confident_box() {
    // 1280x720 原图信箱到 640x640: scale 0.5, pad_y 140。
    // 原图框 (100,100)-(300,300) 对应张量空间 (50,190)-(150,290)，
    // 再放一个 IoU 约 0.8 的低置信度重复框。
    let detections = [
      SynthDetection {
        class_id: 0,
        score: 0.9,
        bbox: [50.0, 190.0, 150.0, 290.0],
      },
      SynthDetection {
        class_id: 0,
        score: 0.6,
        bbox: [50.0, 201.0, 150.0, 301.0],
      },
    ];
    let detector = detector_with(
      ScriptedBackend::with_detections(&detections),
      PostConfig {
        confidence_threshold: 0.5,
        nms_threshold: 0.5,
      },
    );

    let image = RgbImage::new(1280, 720);
    let result = detector.detect(&image).unwrap();

    assert_eq!(result.items.len(), 1);
    let kept = &result.items[0];
    assert_eq!(kept.class_id, 0);
    assert!((kept.score - 0.9).abs() < 0.01);
    for (got, expected) in kept.bbox.iter().zip([100, 100, 300, 300]) {
      assert!(
        (got - expected).abs() <= 2,
        "检测框偏差过大: {:?}", kept.bbox
      );
    }
  }

  #[test]
  fn unknown_class_id_is_tagged_not_fatal() {
    let outputs = crate::engine::testing::synth_outputs(
      &[SynthDetection {
        class_id: 7,
        score: 0.8,
        bbox: [100.0, 100.0, 200.0, 200.0],
      }],
      9,
      None,
    );
    let detector = detector_with(
      ScriptedBackend::with_outputs(outputs),
      PostConfig::default(),
    );
    let image = RgbImage::new(640, 640);
    let result = detector.detect(&image).unwrap();
    assert_eq!(result.items.len(), 1);
    assert_eq!(result.items[0].class().name, "unknown");
  }

  #[test]
  fn engine_failure_surfaces_as_detect_error() {
    let mut backend = ScriptedBackend::empty(640, 640);
    backend.push_failure("NPU 超时");
    let detector = detector_with(backend, PostConfig::default());
    let image = RgbImage::new(640, 640);
    assert!(matches!(
      detector.detect(&image),
      Err(DetectError::Engine(_))
    ));
  }

  #[test]
  fn zero_size_image_is_a_preprocess_error() {
    let detector = detector_with(
      ScriptedBackend::empty(640, 640),
      PostConfig::default(),
    );
    let image = RgbImage::new(0, 0);
    assert!(matches!(
      detector.detect(&image),
      Err(DetectError::Preprocess(_))
    ));
  }
}
