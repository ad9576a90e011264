// 该文件是 Tanshang （探伤） 项目的一部分。
// src/engine/mod.rs - 推理引擎封装
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

#[cfg(feature = "rknpu")]
pub mod rknn;
#[cfg(test)]
pub mod testing;

use std::borrow::Cow;
use std::sync::Mutex;

use thiserror::Error;

/// 模型输入张量形状（NHWC，uint8）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputShape {
  pub width: u32,
  pub height: u32,
  pub channels: u32,
}

impl InputShape {
  /// 输入缓冲区应有的字节数
  pub fn byte_len(&self) -> usize {
    self.width as usize * self.height as usize * self.channels as usize
  }
}

/// 量化参数（每张量一组）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuantParams {
  pub scale: f32,
  pub zero_point: i32,
}

/// 单个输出张量，浮点或 INT8 量化
#[derive(Debug, Clone)]
pub enum OutputTensor {
  Float(Vec<f32>),
  Quantized { data: Vec<i8>, params: QuantParams },
}

impl OutputTensor {
  pub fn len(&self) -> usize {
    match self {
      OutputTensor::Float(data) => data.len(),
      OutputTensor::Quantized { data, .. } => data.len(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// 取浮点视图，量化张量按 scale * (q - zero_point) 反量化
  pub fn to_f32(&self) -> Cow<'_, [f32]> {
    match self {
      OutputTensor::Float(data) => Cow::Borrowed(data),
      OutputTensor::Quantized { data, params } => Cow::Owned(
        data
          .iter()
          .map(|&q| params.scale * (q as i32 - params.zero_point) as f32)
          .collect(),
      ),
    }
  }
}

#[derive(Error, Debug)]
pub enum EngineError {
  #[error("模型加载错误: {0}")]
  ModelLoad(#[from] std::io::Error),
  #[error("模型无效: {0}")]
  ModelInvalid(String),
  #[error("输入缓冲区大小不符: 期望 {expected} 字节, 实际 {actual} 字节")]
  InputSizeMismatch { expected: usize, actual: usize },
  #[error("推理执行失败: {0}")]
  Runtime(String),
}

/// 推理后端。实现方负责结构校验与张量搬运，
/// 单次调用语义由外层 [`Engine`] 的互斥锁保证。
pub trait EngineBackend: Send {
  fn input_shape(&self) -> InputShape;
  fn num_outputs(&self) -> usize;
  /// 输出是否为 INT8 量化张量
  fn is_quantized(&self) -> bool;
  fn run(&mut self, input: &[u8]) -> Result<Vec<OutputTensor>, EngineError>;
}

/// 推理引擎句柄。持有后端的唯一所有权，
/// 加速器会话不可重入，所有调用经互斥锁串行化；
/// 资源随句柄析构释放，不存在二次释放的可能。
pub struct Engine {
  backend: Mutex<Box<dyn EngineBackend>>,
  input_shape: InputShape,
  num_outputs: usize,
  quantized: bool,
}

impl Engine {
  pub fn new(backend: Box<dyn EngineBackend>) -> Self {
    let input_shape = backend.input_shape();
    let num_outputs = backend.num_outputs();
    let quantized = backend.is_quantized();
    Engine {
      backend: Mutex::new(backend),
      input_shape,
      num_outputs,
      quantized,
    }
  }

  /// 从模型文件加载 NPU 后端
  #[cfg(feature = "rknpu")]
  pub fn load(model_path: &str) -> Result<Self, EngineError> {
    let backend = rknn::RknnBackend::load(model_path)?;
    Ok(Engine::new(Box::new(backend)))
  }

  pub fn input_shape(&self) -> InputShape {
    self.input_shape
  }

  pub fn num_outputs(&self) -> usize {
    self.num_outputs
  }

  pub fn is_quantized(&self) -> bool {
    self.quantized
  }

  /// 执行一次推理。输入为 NHWC uint8 字节序列，
  /// 长度必须与模型输入形状一致。
  pub fn infer(&self, input: &[u8]) -> Result<Vec<OutputTensor>, EngineError> {
    let expected = self.input_shape.byte_len();
    if input.len() != expected {
      return Err(EngineError::InputSizeMismatch {
        expected,
        actual: input.len(),
      });
    }
    let mut backend = self
      .backend
      .lock()
      .map_err(|_| EngineError::Runtime("推理后端互斥锁中毒".to_string()))?;
    backend.run(input)
  }
}
