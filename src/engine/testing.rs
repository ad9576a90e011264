// 该文件是 Tanshang （探伤） 项目的一部分。
// src/engine/testing.rs - 测试用脚本化后端
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

//! 按三检测头布局合成输出张量的脚本化后端，
//! 让不接 NPU 的测试也能走完整条解码路径。

use std::collections::VecDeque;

use super::{EngineBackend, EngineError, InputShape, OutputTensor, QuantParams};

pub const TEST_INPUT_W: u32 = 640;
pub const TEST_INPUT_H: u32 = 640;
pub const TEST_NUM_CLASSES: usize = 6;

const HEADS: [(usize, usize, f32); 3] = [(80, 80, 8.0), (40, 40, 16.0), (20, 20, 32.0)];
/// 非目标格子的分类 logit，sigmoid 后趋近于零
const COLD_LOGIT: f32 = -20.0;

/// 张量空间中待合成的一条检测
#[derive(Debug, Clone, Copy)]
pub struct SynthDetection {
  pub class_id: u32,
  pub score: f32,
  /// [左, 上, 右, 下]，像素（模型输入空间）
  pub bbox: [f32; 4],
}

fn logit(p: f32) -> f32 {
  (p / (1.0 - p)).ln()
}

fn quantize(values: &[f32], params: QuantParams) -> Vec<i8> {
  values
    .iter()
    .map(|v| {
      ((v / params.scale).round() as i32 + params.zero_point).clamp(-128, 127) as i8
    })
    .collect()
}

/// 合成六个输出张量（每头一对回归 + 分类）。
/// 所有检测写入第一个检测头；同一格子的后写者覆盖先写者。
pub fn synth_outputs(
  detections: &[SynthDetection],
  num_classes: usize,
  quant: Option<QuantParams>,
) -> Vec<OutputTensor> {
  let mut tensors = Vec::with_capacity(HEADS.len() * 2);
  for (head_idx, (map_h, map_w, stride)) in HEADS.into_iter().enumerate() {
    let spatial = map_h * map_w;
    let mut reg = vec![0.0f32; 4 * spatial];
    let mut cls = vec![COLD_LOGIT; num_classes * spatial];

    if head_idx == 0 {
      for det in detections {
        let [xmin, ymin, xmax, ymax] = det.bbox;
        let col = (((xmin + xmax) / 2.0 / stride).floor() as usize).min(map_w - 1);
        let row = (((ymin + ymax) / 2.0 / stride).floor() as usize).min(map_h - 1);
        let grid_x = col as f32 + 0.5;
        let grid_y = row as f32 + 0.5;
        let idx = row * map_w + col;
        reg[idx] = grid_x - xmin / stride;
        reg[spatial + idx] = grid_y - ymin / stride;
        reg[2 * spatial + idx] = xmax / stride - grid_x;
        reg[3 * spatial + idx] = ymax / stride - grid_y;
        cls[det.class_id as usize * spatial + idx] = logit(det.score);
      }
    }

    match quant {
      Some(params) => {
        tensors.push(OutputTensor::Quantized {
          data: quantize(&reg, params),
          params,
        });
        tensors.push(OutputTensor::Quantized {
          data: quantize(&cls, params),
          params,
        });
      }
      None => {
        tensors.push(OutputTensor::Float(reg));
        tensors.push(OutputTensor::Float(cls));
      }
    }
  }
  tensors
}

type RunHook = Box<dyn FnMut() + Send>;

/// 脚本化后端：按预设顺序返回输出或失败，
/// 脚本耗尽后回落到默认输出。
pub struct ScriptedBackend {
  shape: InputShape,
  quantized: bool,
  script: VecDeque<Result<Vec<OutputTensor>, String>>,
  default_output: Vec<OutputTensor>,
  on_run: Option<RunHook>,
}

impl ScriptedBackend {
  /// 每次推理都返回空检测
  pub fn empty(width: u32, height: u32) -> Self {
    ScriptedBackend {
      shape: InputShape {
        width,
        height,
        channels: 3,
      },
      quantized: false,
      script: VecDeque::new(),
      default_output: synth_outputs(&[], TEST_NUM_CLASSES, None),
      on_run: None,
    }
  }

  /// 每次推理都返回同一组检测（浮点张量）
  pub fn with_detections(detections: &[SynthDetection]) -> Self {
    let mut backend = Self::empty(TEST_INPUT_W, TEST_INPUT_H);
    backend.default_output = synth_outputs(detections, TEST_NUM_CLASSES, None);
    backend
  }

  /// 每次推理都返回同一组检测（INT8 量化张量）
  pub fn quantized_with_detections(
    detections: &[SynthDetection],
    params: QuantParams,
  ) -> Self {
    let mut backend = Self::empty(TEST_INPUT_W, TEST_INPUT_H);
    backend.quantized = true;
    backend.default_output = synth_outputs(detections, TEST_NUM_CLASSES, Some(params));
    backend
  }

  /// 每次推理都返回给定的原始张量
  pub fn with_outputs(outputs: Vec<OutputTensor>) -> Self {
    let mut backend = Self::empty(TEST_INPUT_W, TEST_INPUT_H);
    backend.default_output = outputs;
    backend
  }

  /// 追加一次脚本化的成功输出
  pub fn push_detections(&mut self, detections: &[SynthDetection]) {
    self
      .script
      .push_back(Ok(synth_outputs(detections, TEST_NUM_CLASSES, None)));
  }

  /// 追加一次脚本化的推理失败
  pub fn push_failure(&mut self, message: &str) {
    self.script.push_back(Err(message.to_string()));
  }

  /// 每次 run 开始时调用的钩子（用于并发测试同步）
  pub fn set_on_run(&mut self, hook: impl FnMut() + Send + 'static) {
    self.on_run = Some(Box::new(hook));
  }
}

impl EngineBackend for ScriptedBackend {
  fn input_shape(&self) -> InputShape {
    self.shape
  }

  fn num_outputs(&self) -> usize {
    HEADS.len() * 2
  }

  fn is_quantized(&self) -> bool {
    self.quantized
  }

  fn run(&mut self, _input: &[u8]) -> Result<Vec<OutputTensor>, EngineError> {
    if let Some(hook) = self.on_run.as_mut() {
      hook();
    }
    match self.script.pop_front() {
      Some(Ok(outputs)) => Ok(outputs),
      Some(Err(message)) => Err(EngineError::Runtime(message)),
      None => Ok(self.default_output.clone()),
    }
  }
}
