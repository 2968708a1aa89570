// 该文件是 Renmian （人面桃花） 项目的一部分。
// src/output/draw.rs - 人脸检测结果可视化
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
  rect::Rect,
};
use thiserror::Error;
use tracing::debug;

use crate::{
  frame::BgrFrame,
  model::{DetectResult, Detection},
};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 16.0;
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const BOX_THICKNESS: u32 = 2;
const BOX_COLOR: [u8; 3] = [0, 255, 0]; // 绿色

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("字体无效: {0}")]
  InvalidFont(String),
}

/// 在图像上绘制检测框；配置了字体时在框上方标注置信度
#[derive(Clone)]
pub struct Draw {
  font: Option<FontArc>,
  font_size: f32,
  color: [u8; 3],
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      font: None,
      font_size: LABEL_FONT_SIZE,
      color: BOX_COLOR,
    }
  }
}

impl Draw {
  pub fn with_font(mut self, font: FontArc) -> Self {
    self.font = Some(font);
    self
  }

  pub fn with_font_file(self, path: impl AsRef<Path>) -> Result<Self, DrawError> {
    let data = std::fs::read(path.as_ref())?;
    let font = FontArc::try_from_vec(data).map_err(|e| DrawError::InvalidFont(e.to_string()))?;
    debug!("加载标签字体: {}", path.as_ref().display());
    Ok(self.with_font(font))
  }

  pub fn with_font_size(mut self, font_size: f32) -> Self {
    self.font_size = font_size;
    self
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  pub fn draw_detections(&self, frame: &BgrFrame, result: &DetectResult) -> RgbImage {
    let mut image = frame.to_rgb_image();
    for detection in result.iter() {
      self.draw_bbox_with_label(&mut image, detection);
    }
    image
  }

  fn draw_bbox_with_label(&self, image: &mut RgbImage, detection: &Detection) {
    let (x, y, w, h) = detection.bbox();
    let color = Rgb(self.color);

    // 边框向内加粗
    for t in 0..BOX_THICKNESS {
      if w <= 2 * t || h <= 2 * t {
        break;
      }
      let rect = Rect::at((x + t) as i32, (y + t) as i32).of_size(w - 2 * t, h - 2 * t);
      draw_hollow_rect_mut(image, rect, color);
    }

    let Some(font) = &self.font else {
      return;
    };

    let label = format!("{:.2}", detection.confidence);
    let scale = PxScale::from(self.font_size);
    let (text_w, text_h) = text_size(scale, font, &label);
    let label_h = text_h as i32 + 2 * LABEL_TEXT_VERTICAL_PADDING;

    // 标签放在框的上方，顶端放不下时贴着图像上边缘
    let label_x = x as i32;
    let label_y = (y as i32 - label_h).max(0);
    let label_w = text_w.min(image.width().saturating_sub(x));
    if label_w == 0 {
      return;
    }

    let background = Rect::at(label_x, label_y).of_size(label_w, label_h as u32);
    draw_filled_rect_mut(image, background, color);
    draw_text_mut(
      image,
      Rgb([0u8, 0u8, 0u8]),
      label_x,
      label_y + LABEL_TEXT_VERTICAL_PADDING,
      scale,
      font,
      &label,
    );
  }
}

/// 以文本记录检测结果，每行 `x, y, w, h, confidence`
#[derive(Debug, Clone, Copy, Default)]
pub struct Record;

impl Record {
  pub fn lines(&self, result: &DetectResult) -> String {
    result
      .iter()
      .map(|d| {
        format!(
          "{}, {}, {}, {}, {:.2}",
          d.x, d.y, d.width, d.height, d.confidence
        )
      })
      .collect::<Vec<_>>()
      .join("\n")
  }

  pub fn record(&self, result: &DetectResult, path: &Path) -> Result<(), std::io::Error> {
    std::fs::write(path.with_extension("txt"), self.lines(result))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn gray_frame(width: u32, height: u32) -> BgrFrame {
    BgrFrame::from_raw(width, height, vec![100; (width * height * 3) as usize]).unwrap()
  }

  #[test]
  fn boxes_are_green_and_two_pixels_thick() {
    let frame = gray_frame(40, 40);
    let result = DetectResult::from(vec![Detection::new(10, 10, 20, 20)]);
    let image = Draw::default().draw_detections(&frame, &result);

    assert_eq!(image.get_pixel(10, 10), &Rgb([0, 255, 0]));
    assert_eq!(image.get_pixel(11, 15), &Rgb([0, 255, 0]));
    assert_eq!(image.get_pixel(29, 29), &Rgb([0, 255, 0]));
    assert_eq!(image.get_pixel(12, 15), &Rgb([100, 100, 100]));
    assert_eq!(image.get_pixel(5, 5), &Rgb([100, 100, 100]));
  }

  #[test]
  fn no_detections_leaves_image_untouched() {
    let frame = gray_frame(8, 8);
    let image = Draw::default().draw_detections(&frame, &DetectResult::default());
    assert_eq!(image, frame.to_rgb_image());
  }

  #[test]
  fn missing_font_file_is_io_error() {
    let result = Draw::default().with_font_file("/renmian/no/such/font.ttf");
    assert!(matches!(result, Err(DrawError::IoError(_))));
  }

  #[test]
  fn garbage_font_is_rejected() {
    let path = std::env::temp_dir().join(format!("renmian-font-{}.ttf", std::process::id()));
    std::fs::write(&path, b"not a font").unwrap();
    let result = Draw::default().with_font_file(&path);
    std::fs::remove_file(&path).ok();
    assert!(matches!(result, Err(DrawError::InvalidFont(_))));
  }

  #[test]
  fn record_lists_one_box_per_line() {
    let result = DetectResult::from(vec![
      Detection::new(1, 2, 30, 40),
      Detection::new(50, 60, 25, 25),
    ]);
    assert_eq!(
      Record.lines(&result),
      "1, 2, 30, 40, 1.00\n50, 60, 25, 25, 1.00"
    );
  }
}
