// 该文件是 Tanshang （探伤） 项目的一部分。
// src/annotate.rs - 检测结果可视化与记录
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

use std::io::Write;
use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_text_mut};
use thiserror::Error;

use crate::detector::DetectResult;

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 18.0;
const LABEL_HEIGHT: i32 = 20;
const LABEL_CHAR_WIDTH: f32 = 10.0; // 每字符平均宽度（粗略估计）
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const BOX_THICKNESS: i32 = 2;

#[derive(Error, Debug)]
pub enum AnnotateError {
  #[error("读取字体文件失败: {0}")]
  FontRead(#[from] std::io::Error),
  #[error("字体文件无效")]
  FontInvalid,
}

/// 检测结果绘制器。颜色取自类别表；
/// 字体从外部文件加载，未配置字体时只画框和标签底色。
pub struct Annotator {
  font: Option<FontVec>,
  font_scale: PxScale,
}

impl Default for Annotator {
  fn default() -> Self {
    Annotator {
      font: None,
      font_scale: PxScale::from(LABEL_FONT_SIZE),
    }
  }
}

impl Annotator {
  pub fn new() -> Self {
    Annotator::default()
  }

  /// 从 TTF 文件加载标签字体
  pub fn with_font_file(path: &Path) -> Result<Self, AnnotateError> {
    let data = std::fs::read(path)?;
    let font = FontVec::try_from_vec(data).map_err(|_| AnnotateError::FontInvalid)?;
    Ok(Annotator {
      font: Some(font),
      font_scale: PxScale::from(LABEL_FONT_SIZE),
    })
  }

  /// 在图像上就地绘制全部检测
  pub fn draw(&self, image: &mut RgbImage, result: &DetectResult) {
    for detection in &result.items {
      let class = detection.class();
      self.draw_bbox_with_label(
        image,
        detection.bbox,
        class.name,
        detection.score,
        class.box_color,
        class.text_color,
      );
    }
  }

  /// 返回绘制好的副本，原图不动
  pub fn render(&self, image: &RgbImage, result: &DetectResult) -> RgbImage {
    let mut annotated = image.clone();
    self.draw(&mut annotated, result);
    annotated
  }

  fn draw_bbox_with_label(
    &self,
    image: &mut RgbImage,
    bbox: [i32; 4],
    name: &str,
    score: f32,
    box_color: [u8; 3],
    text_color: [u8; 3],
  ) {
    let (w, h) = (image.width() as i32, image.height() as i32);

    let x_min = bbox[0].clamp(0, w - 1);
    let y_min = bbox[1].clamp(0, h - 1);
    let x_max = bbox[2].clamp(0, w - 1);
    let y_max = bbox[3].clamp(0, h - 1);
    if x_min >= x_max || y_min >= y_max {
      return;
    }

    // 绘制边框（加粗为 2 像素）
    for thickness in 0..BOX_THICKNESS {
      let x_min_t = (x_min + thickness).min(w - 1);
      let y_min_t = (y_min + thickness).min(h - 1);
      let x_max_t = (x_max - thickness).max(0);
      let y_max_t = (y_max - thickness).max(0);

      for x in x_min_t..=x_max_t {
        *image.get_pixel_mut(x as u32, y_min_t as u32) = Rgb(box_color);
        *image.get_pixel_mut(x as u32, y_max_t as u32) = Rgb(box_color);
      }
      for y in y_min_t..=y_max_t {
        *image.get_pixel_mut(x_min_t as u32, y as u32) = Rgb(box_color);
        *image.get_pixel_mut(x_max_t as u32, y as u32) = Rgb(box_color);
      }
    }

    let label = format!("{} {:.2}", name, score);

    // 标签放在边框上方，贴顶的框放在框内
    let label_x = x_min;
    let label_y = (y_min - LABEL_HEIGHT).max(0);
    let text_width = (label.len() as f32 * LABEL_CHAR_WIDTH) as i32;
    let label_width = text_width.min(w - label_x);
    if label_width <= 0 {
      return;
    }

    let rect = imageproc::rect::Rect::at(label_x, label_y)
      .of_size(label_width as u32, LABEL_HEIGHT as u32);
    draw_filled_rect_mut(image, rect, Rgb(box_color));

    if let Some(font) = &self.font {
      draw_text_mut(
        image,
        Rgb(text_color),
        label_x,
        label_y + LABEL_TEXT_VERTICAL_PADDING,
        self.font_scale,
        font,
        &label,
      );
    }
  }
}

/// 按指定质量保存 JPEG
pub fn save_jpeg(
  image: &RgbImage,
  path: &Path,
  quality: u8,
) -> Result<(), image::ImageError> {
  let file = std::fs::File::create(path).map_err(image::ImageError::IoError)?;
  let mut writer = std::io::BufWriter::new(file);
  let encoder =
    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut writer, quality);
  image.write_with_encoder(encoder)
}

/// 把检测结果写成纯文本记录，每行一条:
/// `类别 置信度 左 上 右 下`
pub fn write_record(path: &Path, result: &DetectResult) -> std::io::Result<()> {
  let mut file = std::fs::File::create(path)?;
  for detection in &result.items {
    writeln!(
      file,
      "{} {:.4} {} {} {} {}",
      detection.class().name,
      detection.score,
      detection.bbox[0],
      detection.bbox[1],
      detection.bbox[2],
      detection.bbox[3],
    )?;
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::detector::Detection;

  fn single_detection(class_id: u32) -> DetectResult {
    DetectResult {
      items: vec![Detection {
        class_id,
        score: 0.93,
        bbox: [40, 40, 120, 120],
      }],
      width: 200,
      height: 200,
    }
  }

  #[test]
  fn paints_box_edges_in_class_color() {
    let annotator = Annotator::new();
    let image = RgbImage::new(200, 200);
    let annotated = annotator.render(&image, &single_detection(0));
    assert_eq!(annotated.get_pixel(80, 40), &Rgb([255, 0, 0]));
    assert_eq!(annotated.get_pixel(40, 80), &Rgb([255, 0, 0]));
    // 原图保持不变
    assert_eq!(image.get_pixel(80, 40), &Rgb([0, 0, 0]));
  }

  #[test]
  fn label_strip_sits_above_the_box() {
    let annotator = Annotator::new();
    let image = RgbImage::new(200, 200);
    let annotated = annotator.render(&image, &single_detection(4));
    assert_eq!(annotated.get_pixel(42, 25), &Rgb([0, 0, 255]));
  }

  #[test]
  fn unknown_class_paints_gray() {
    let annotator = Annotator::new();
    let image = RgbImage::new(200, 200);
    let annotated = annotator.render(&image, &single_detection(42));
    assert_eq!(annotated.get_pixel(80, 40), &Rgb([128, 128, 128]));
  }

  #[test]
  fn record_file_lists_one_line_per_detection() {
    let dir = std::env::temp_dir().join(format!(
      "tanshang-record-{}",
      std::process::id()
    ));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("sample_result.txt");
    write_record(&path, &single_detection(0)).unwrap();
    let content = std::fs::read_to_string(&path).unwrap();
    assert_eq!(content.trim(), "cr 0.9300 40 40 120 120");
    std::fs::remove_dir_all(&dir).unwrap();
  }
}
