// 该文件是 Tanshang （探伤） 项目的一部分。
// src/preprocess.rs - 信箱式预处理
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

use image::{Rgb, RgbImage, imageops};
use thiserror::Error;

/// 信箱填充的中性灰度值
pub const PAD_VALUE: u8 = 114;

#[derive(Error, Debug)]
pub enum PreprocessError {
  #[error("输入图像尺寸为零: {width}x{height}")]
  EmptyImage { width: u32, height: u32 },
  #[error("模型输入尺寸为零: {width}x{height}")]
  EmptyTarget { width: u32, height: u32 },
}

/// 信箱变换参数，用于把张量空间坐标映射回原图坐标
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LetterboxTransform {
  /// 等比缩放系数
  pub scale: f32,
  /// 水平方向填充（左侧像素数）
  pub pad_x: u32,
  /// 垂直方向填充（顶部像素数）
  pub pad_y: u32,
  /// 原图宽度
  pub src_width: u32,
  /// 原图高度
  pub src_height: u32,
}

impl LetterboxTransform {
  /// 原图坐标 → 张量空间坐标
  pub fn to_tensor(&self, x: f32, y: f32) -> (f32, f32) {
    (x * self.scale + self.pad_x as f32, y * self.scale + self.pad_y as f32)
  }

  /// 张量空间坐标 → 原图坐标（未截断）
  pub fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
    (
      (x - self.pad_x as f32) / self.scale,
      (y - self.pad_y as f32) / self.scale,
    )
  }
}

/// 等比缩放并居中填充到目标尺寸，边缘填中性灰。
///
/// 返回新分配的目标尺寸图像与对应的逆变换参数，
/// 该缓冲区由调用者持有，推理调用期间必须保持存活。
pub fn letterbox(
  src: &RgbImage,
  target_width: u32,
  target_height: u32,
) -> Result<(RgbImage, LetterboxTransform), PreprocessError> {
  let (src_width, src_height) = src.dimensions();
  if src_width == 0 || src_height == 0 {
    return Err(PreprocessError::EmptyImage {
      width: src_width,
      height: src_height,
    });
  }
  if target_width == 0 || target_height == 0 {
    return Err(PreprocessError::EmptyTarget {
      width: target_width,
      height: target_height,
    });
  }

  let scale = (target_width as f32 / src_width as f32)
    .min(target_height as f32 / src_height as f32);
  let new_width = ((src_width as f32 * scale).round() as u32)
    .clamp(1, target_width);
  let new_height = ((src_height as f32 * scale).round() as u32)
    .clamp(1, target_height);
  let pad_x = (target_width - new_width) / 2;
  let pad_y = (target_height - new_height) / 2;

  let mut canvas =
    RgbImage::from_pixel(target_width, target_height, Rgb([PAD_VALUE; 3]));
  let resized = if (new_width, new_height) == (src_width, src_height) {
    src.clone()
  } else {
    imageops::resize(src, new_width, new_height, imageops::FilterType::Triangle)
  };
  imageops::replace(&mut canvas, &resized, pad_x as i64, pad_y as i64);

  Ok((
    canvas,
    LetterboxTransform {
      scale,
      pad_x,
      pad_y,
      src_width,
      src_height,
    },
  ))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn corner_round_trip_within_one_pixel() {
    let cases = [(1280u32, 720u32), (720, 1280), (640, 640), (33, 17), (1, 1)];
    for (w, h) in cases {
      let src = RgbImage::from_pixel(w, h, Rgb([10, 20, 30]));
      let (_, tf) = letterbox(&src, 640, 640).unwrap();
      let corners = [
        (0.0, 0.0),
        (w as f32, 0.0),
        (0.0, h as f32),
        (w as f32, h as f32),
      ];
      for (x, y) in corners {
        let (tx, ty) = tf.to_tensor(x, y);
        let (bx, by) = tf.to_source(tx, ty);
        assert!((bx - x).abs() <= 1.0, "{w}x{h} 角点 x 偏差过大: {bx} vs {x}");
        assert!((by - y).abs() <= 1.0, "{w}x{h} 角点 y 偏差过大: {by} vs {y}");
      }
    }
  }

  #[test]
  fn wide_image_pads_top_and_bottom() {
    let src = RgbImage::from_pixel(1280, 720, Rgb([200, 0, 0]));
    let (out, tf) = letterbox(&src, 640, 640).unwrap();
    assert_eq!(out.dimensions(), (640, 640));
    assert_eq!(tf.scale, 0.5);
    assert_eq!(tf.pad_x, 0);
    assert_eq!(tf.pad_y, 140);
    assert_eq!(out.get_pixel(320, 0), &Rgb([PAD_VALUE; 3]));
    assert_eq!(out.get_pixel(320, 639), &Rgb([PAD_VALUE; 3]));
    assert_eq!(out.get_pixel(320, 320), &Rgb([200, 0, 0]));
  }

  #[test]
  fn zero_size_image_is_rejected() {
    let src = RgbImage::new(0, 10);
    assert!(matches!(
      letterbox(&src, 640, 640),
      Err(PreprocessError::EmptyImage { .. })
    ));
  }
}
