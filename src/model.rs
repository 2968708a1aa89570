// 该文件是 Renmian （人面桃花） 项目的一部分。
// src/model.rs - 模型
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

use serde::Serialize;

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

/// Haar 级联不输出分数，所有检测框的置信度固定为 1.0。
///
/// 这是占位标记，不是概率，下游不要把它当作校准过的分数使用。
pub const FIXED_CONFIDENCE: f32 = 1.0;

/// 单个人脸检测框，坐标为输入图像的像素坐标，(x, y) 为左上角
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Detection {
  pub x: u32,
  pub y: u32,
  pub width: u32,
  pub height: u32,
  /// 恒为 [`FIXED_CONFIDENCE`]
  pub confidence: f32,
}

impl Detection {
  pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
    Self {
      x,
      y,
      width,
      height,
      confidence: FIXED_CONFIDENCE,
    }
  }

  pub fn bbox(&self) -> (u32, u32, u32, u32) {
    (self.x, self.y, self.width, self.height)
  }

  pub fn right(&self) -> u32 {
    self.x + self.width
  }

  pub fn bottom(&self) -> u32 {
    self.y + self.height
  }

  pub fn overlaps(&self, x: u32, y: u32, width: u32, height: u32) -> bool {
    self.x < x + width && x < self.right() && self.y < y + height && y < self.bottom()
  }
}

/// 检测结果，顺序即分组后各簇首次出现的顺序，重叠框不去重
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DetectResult {
  pub items: Box<[Detection]>,
}

impl DetectResult {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn iter(&self) -> impl Iterator<Item = &Detection> {
    self.items.iter()
  }
}

impl From<Vec<Detection>> for DetectResult {
  fn from(items: Vec<Detection>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

mod cascade;
mod group;
mod haar;

pub use self::cascade::{Cascade, CascadeError};
pub use self::haar::{
  DEFAULT_MODEL_PATH, DetectParams, HaarCascade, HaarCascadeBuilder, HaarError,
  default_model_path,
};
