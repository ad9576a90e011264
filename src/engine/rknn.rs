// 该文件是 Tanshang （探伤） 项目的一部分。
// src/engine/rknn.rs - RKNN NPU 后端
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

use rknpu::{Context, InitFlags, TensorFormat, TensorType};
use tracing::{debug, error, info};

use super::{EngineBackend, EngineError, InputShape, OutputTensor};

const DETECT_NUM_INPUTS: u32 = 1;
const DETECT_NUM_OUTPUTS: u32 = 6;
const DETECT_INPUT_W: u32 = 640;
const DETECT_INPUT_H: u32 = 640;
const DETECT_INPUT_C: u32 = 3;

/// RKNN NPU 后端。输出以浮点取回（驱动侧完成反量化）。
pub struct RknnBackend {
  context: Context,
}

impl RknnBackend {
  /// 读取模型文件并创建推理上下文，校验输入输出张量数量。
  pub fn load(model_path: &str) -> Result<Self, EngineError> {
    info!("加载模型文件: {}", model_path);
    let model_data = std::fs::read(model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    info!("创建 RKNN 推理上下文");
    let context = Context::new(&model_data, InitFlags::default())
      .map_err(|e| EngineError::ModelInvalid(format!("创建上下文失败: {}", e)))?;

    match context.sdk_version() {
      Ok(version) => {
        if let Ok(api_ver) = version.api_version() {
          debug!("RKNN API 版本: {}", api_ver);
        }
        if let Ok(drv_ver) = version.driver_version() {
          debug!("RKNN 驱动版本: {}", drv_ver);
        }
      }
      Err(e) => {
        error!("查询 SDK 版本失败: {}", e);
        return Err(EngineError::ModelInvalid(format!(
          "无法查询 SDK 版本: {}",
          e
        )));
      }
    }

    let num_inputs = context
      .num_inputs()
      .map_err(|e| EngineError::ModelInvalid(format!("无法获取输入数量: {}", e)))?;
    let num_outputs = context
      .num_outputs()
      .map_err(|e| EngineError::ModelInvalid(format!("无法获取输出数量: {}", e)))?;

    if num_inputs != DETECT_NUM_INPUTS {
      return Err(EngineError::ModelInvalid(format!(
        "预期模型输入数量为 {}, 实际为 {}",
        DETECT_NUM_INPUTS, num_inputs
      )));
    }
    if num_outputs != DETECT_NUM_OUTPUTS {
      return Err(EngineError::ModelInvalid(format!(
        "预期模型输出数量为 {}, 实际为 {}",
        DETECT_NUM_OUTPUTS, num_outputs
      )));
    }

    info!("模型加载完成, 输入 {} 个, 输出 {} 个", num_inputs, num_outputs);
    Ok(RknnBackend { context })
  }
}

impl EngineBackend for RknnBackend {
  fn input_shape(&self) -> InputShape {
    InputShape {
      width: DETECT_INPUT_W,
      height: DETECT_INPUT_H,
      channels: DETECT_INPUT_C,
    }
  }

  fn num_outputs(&self) -> usize {
    DETECT_NUM_OUTPUTS as usize
  }

  fn is_quantized(&self) -> bool {
    // 输出统一以浮点取回，量化模型由驱动完成反量化
    false
  }

  fn run(&mut self, input: &[u8]) -> Result<Vec<OutputTensor>, EngineError> {
    debug!("设置模型输入");
    self
      .context
      .set_input(0, input, TensorFormat::NHWC, TensorType::UInt8)
      .map_err(|e| EngineError::Runtime(format!("设置输入失败: {}", e)))?;

    debug!("执行模型推理");
    self
      .context
      .run()
      .map_err(|e| EngineError::Runtime(format!("推理失败: {}", e)))?;

    debug!("获取模型输出");
    let output = self
      .context
      .get_outputs()
      .map_err(|e| EngineError::Runtime(format!("获取输出失败: {}", e)))?;

    let mut tensors = Vec::with_capacity(DETECT_NUM_OUTPUTS as usize);
    for idx in 0..DETECT_NUM_OUTPUTS as usize {
      let data = output
        .get_f32(idx)
        .map_err(|e| EngineError::Runtime(format!("获取第 {} 个输出失败: {}", idx, e)))?;
      tensors.push(OutputTensor::Float(data.to_vec()));
    }
    Ok(tensors)
  }
}
