// 该文件是 Renmian （人面桃花） 项目的一部分。
// src/frame.rs - 图像输入与 BGR 规范帧定义
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

use std::any::Any;

use image::{DynamicImage, GrayImage, ImageBuffer, Luma, Rgb, RgbImage, RgbaImage};
use ndarray::{Array2, Array3, ArrayD};

mod normalize;
pub use self::normalize::{NormalizeError, normalize};

const BGR_CHANNELS: usize = 3;

// BT.601 亮度系数的 14 位定点表示
const LUMA_SHIFT: u32 = 14;
const LUMA_R: u32 = 4899;
const LUMA_G: u32 = 9617;
const LUMA_B: u32 = 1868;

/// 三通道图像的通道排列顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOrder {
  Rgb,
  Bgr,
}

/// 待检测的图像
///
/// - `Array`：原始像素数组，形状为 `(H, W)` 或 `(H, W, C)`，`C ∈ {1, 3, 4}`。
///   `order` 为调用方声明的通道顺序；缺省时按通道均值推测（对单一色调为主的图像不可靠）。
///   四通道数组同样按前三个通道推测，已知是 RGBA 时请用 [`ImageInput::array_with_order`] 声明。
/// - `Decoded`：由图像解码库得到的图像对象，彩色图像按 RGB(A) 处理。
#[derive(Debug, Clone)]
pub enum ImageInput {
  Array {
    pixels: ArrayD<u8>,
    order: Option<ChannelOrder>,
  },
  Decoded(DynamicImage),
}

impl ImageInput {
  pub fn array(pixels: ArrayD<u8>) -> Self {
    ImageInput::Array {
      pixels,
      order: None,
    }
  }

  pub fn array_with_order(pixels: ArrayD<u8>, order: ChannelOrder) -> Self {
    ImageInput::Array {
      pixels,
      order: Some(order),
    }
  }

  /// 从动态类型的值构造输入，既不是数组也不是图像对象时返回 `InvalidInputType`
  pub fn from_any(value: &dyn Any) -> Result<Self, NormalizeError> {
    if let Some(input) = value.downcast_ref::<ImageInput>() {
      return Ok(input.clone());
    }
    if let Some(pixels) = value.downcast_ref::<ArrayD<u8>>() {
      return Ok(Self::array(pixels.clone()));
    }
    if let Some(pixels) = value.downcast_ref::<Array3<u8>>() {
      return Ok(Self::array(pixels.clone().into_dyn()));
    }
    if let Some(pixels) = value.downcast_ref::<Array2<u8>>() {
      return Ok(Self::array(pixels.clone().into_dyn()));
    }
    if let Some(image) = value.downcast_ref::<DynamicImage>() {
      return Ok(ImageInput::Decoded(image.clone()));
    }
    if let Some(image) = value.downcast_ref::<RgbImage>() {
      return Ok(ImageInput::Decoded(DynamicImage::ImageRgb8(image.clone())));
    }
    if let Some(image) = value.downcast_ref::<RgbaImage>() {
      return Ok(ImageInput::Decoded(DynamicImage::ImageRgba8(image.clone())));
    }
    if let Some(image) = value.downcast_ref::<GrayImage>() {
      return Ok(ImageInput::Decoded(DynamicImage::ImageLuma8(image.clone())));
    }
    Err(NormalizeError::InvalidInputType(
      "期望像素数组或解码后的图像对象".to_string(),
    ))
  }
}

impl From<ArrayD<u8>> for ImageInput {
  fn from(pixels: ArrayD<u8>) -> Self {
    Self::array(pixels)
  }
}

impl From<Array3<u8>> for ImageInput {
  fn from(pixels: Array3<u8>) -> Self {
    Self::array(pixels.into_dyn())
  }
}

impl From<Array2<u8>> for ImageInput {
  fn from(pixels: Array2<u8>) -> Self {
    Self::array(pixels.into_dyn())
  }
}

impl From<DynamicImage> for ImageInput {
  fn from(image: DynamicImage) -> Self {
    ImageInput::Decoded(image)
  }
}

impl From<RgbImage> for ImageInput {
  fn from(image: RgbImage) -> Self {
    ImageInput::Decoded(DynamicImage::ImageRgb8(image))
  }
}

/// 规范化后的 BGR 帧，按行优先交错存储
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BgrFrame {
  width: u32,
  height: u32,
  data: Box<[u8]>,
}

impl BgrFrame {
  pub fn with_shape(height: u32, width: u32) -> Self {
    let size = BGR_CHANNELS * (width as usize) * (height as usize);
    Self {
      width,
      height,
      data: vec![0u8; size].into_boxed_slice(),
    }
  }

  /// 数据长度与尺寸不匹配时返回 `None`
  pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
    if data.len() != BGR_CHANNELS * (width as usize) * (height as usize) {
      return None;
    }
    Some(Self {
      width,
      height,
      data: data.into_boxed_slice(),
    })
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn channels(&self) -> usize {
    BGR_CHANNELS
  }

  pub fn is_empty(&self) -> bool {
    self.width == 0 || self.height == 0
  }

  pub fn as_bgr(&self) -> &[u8] {
    &self.data
  }

  pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
    let idx = ((y as usize) * (self.width as usize) + (x as usize)) * BGR_CHANNELS;
    [self.data[idx], self.data[idx + 1], self.data[idx + 2]]
  }

  /// 灰度化：Y = 0.299 R + 0.587 G + 0.114 B
  pub fn to_luma(&self) -> GrayImage {
    let luma = self
      .data
      .chunks_exact(BGR_CHANNELS)
      .map(|p| {
        let (b, g, r) = (p[0] as u32, p[1] as u32, p[2] as u32);
        ((b * LUMA_B + g * LUMA_G + r * LUMA_R + (1 << (LUMA_SHIFT - 1))) >> LUMA_SHIFT) as u8
      })
      .collect::<Vec<_>>();
    ImageBuffer::<Luma<u8>, _>::from_raw(self.width, self.height, luma)
      .unwrap_or_else(|| GrayImage::new(self.width, self.height))
  }

  pub fn to_rgb_image(&self) -> RgbImage {
    ImageBuffer::from_fn(self.width, self.height, |x, y| {
      let [b, g, r] = self.pixel(x, y);
      Rgb([r, g, b])
    })
  }
}

impl AsMut<[u8]> for BgrFrame {
  fn as_mut(&mut self) -> &mut [u8] {
    &mut self.data
  }
}

impl From<&RgbImage> for BgrFrame {
  fn from(image: &RgbImage) -> Self {
    let (width, height) = image.dimensions();
    let mut frame = BgrFrame::with_shape(height, width);
    for (dst, src) in frame
      .as_mut()
      .chunks_exact_mut(BGR_CHANNELS)
      .zip(image.pixels())
    {
      dst.copy_from_slice(&[src[2], src[1], src[0]]);
    }
    frame
  }
}
