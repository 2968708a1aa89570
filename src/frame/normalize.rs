// 该文件是 Renmian （人面桃花） 项目的一部分。
// src/frame/normalize.rs - 图像规范化（统一为 BGR 三通道）
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

use image::DynamicImage;
use ndarray::ArrayViewD;
use thiserror::Error;
use tracing::debug;

use super::{BgrFrame, ChannelOrder, ImageInput};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NormalizeError {
  #[error("输入类型无效: {0}")]
  InvalidInputType(String),
  #[error("不支持的图像格式: {0}")]
  UnsupportedFormat(String),
}

/// 将任意输入图像转换为 BGR 三通道规范帧
///
/// 单通道图像复制到三个通道；四通道图像丢弃 alpha；
/// 解码图像一律视为 RGB(A)；未声明通道顺序的原始数组按通道均值推测。
pub fn normalize(image: &ImageInput) -> Result<BgrFrame, NormalizeError> {
  match image {
    ImageInput::Array { pixels, order } => normalize_array(pixels.view(), *order),
    ImageInput::Decoded(image) => normalize_decoded(image),
  }
}

fn normalize_array(
  pixels: ArrayViewD<'_, u8>,
  order: Option<ChannelOrder>,
) -> Result<BgrFrame, NormalizeError> {
  let (height, width, channels) = match pixels.shape() {
    &[h, w] => (h, w, 1),
    &[h, w, c] => (h, w, c),
    shape => {
      return Err(NormalizeError::UnsupportedFormat(format!(
        "数组维度 {:?} 不是 (H, W) 或 (H, W, C)",
        shape
      )));
    }
  };
  let (width, height) = dimensions(width, height)?;

  let standard = pixels.as_standard_layout();
  let samples = standard
    .as_slice()
    .ok_or_else(|| NormalizeError::UnsupportedFormat("数组内存布局不连续".to_string()))?;

  match channels {
    1 => Ok(expand_gray(samples, width, height)),
    3 | 4 => {
      let order = order.unwrap_or_else(|| guess_order(samples, channels));
      Ok(reorder(samples, width, height, channels, order))
    }
    c => Err(NormalizeError::UnsupportedFormat(format!(
      "不支持的通道数: {}",
      c
    ))),
  }
}

fn normalize_decoded(image: &DynamicImage) -> Result<BgrFrame, NormalizeError> {
  let (width, height) = (image.width(), image.height());
  match image {
    DynamicImage::ImageLuma8(gray) => Ok(expand_gray(gray.as_raw(), width, height)),
    DynamicImage::ImageRgb8(rgb) => {
      Ok(reorder(rgb.as_raw(), width, height, 3, ChannelOrder::Rgb))
    }
    DynamicImage::ImageRgba8(rgba) => {
      Ok(reorder(rgba.as_raw(), width, height, 4, ChannelOrder::Rgb))
    }
    DynamicImage::ImageLuma16(_) => {
      let gray = image.to_luma8();
      Ok(expand_gray(gray.as_raw(), width, height))
    }
    DynamicImage::ImageRgb16(_) | DynamicImage::ImageRgb32F(_) => {
      let rgb = image.to_rgb8();
      Ok(reorder(rgb.as_raw(), width, height, 3, ChannelOrder::Rgb))
    }
    DynamicImage::ImageRgba16(_) | DynamicImage::ImageRgba32F(_) => {
      let rgba = image.to_rgba8();
      Ok(reorder(rgba.as_raw(), width, height, 4, ChannelOrder::Rgb))
    }
    other => Err(NormalizeError::UnsupportedFormat(format!(
      "不支持的颜色类型: {:?}",
      other.color()
    ))),
  }
}

fn dimensions(width: usize, height: usize) -> Result<(u32, u32), NormalizeError> {
  match (u32::try_from(width), u32::try_from(height)) {
    (Ok(w), Ok(h)) => Ok((w, h)),
    _ => Err(NormalizeError::UnsupportedFormat(format!(
      "图像尺寸过大: {}x{}",
      width, height
    ))),
  }
}

/// 通道 0 均值严格小于通道 2 均值时认为是 RGB，否则认为已是 BGR
fn guess_order(samples: &[u8], channels: usize) -> ChannelOrder {
  let (first, third) = samples
    .chunks_exact(channels)
    .fold((0u64, 0u64), |(a, c), p| (a + p[0] as u64, c + p[2] as u64));
  let pixels = (samples.len() / channels).max(1) as f64;
  debug!(
    "通道均值: c0={:.2}, c2={:.2}",
    first as f64 / pixels,
    third as f64 / pixels
  );
  if first < third {
    ChannelOrder::Rgb
  } else {
    ChannelOrder::Bgr
  }
}

fn expand_gray(samples: &[u8], width: u32, height: u32) -> BgrFrame {
  let data = samples.iter().flat_map(|&v| [v, v, v]).collect();
  BgrFrame {
    width,
    height,
    data,
  }
}

fn reorder(
  samples: &[u8],
  width: u32,
  height: u32,
  channels: usize,
  order: ChannelOrder,
) -> BgrFrame {
  let data = samples
    .chunks_exact(channels)
    .flat_map(|p| match order {
      ChannelOrder::Rgb => [p[2], p[1], p[0]],
      ChannelOrder::Bgr => [p[0], p[1], p[2]],
    })
    .collect();
  BgrFrame {
    width,
    height,
    data,
  }
}
