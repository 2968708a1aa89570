// 该文件是 Renmian （人面桃花） 项目的一部分。
// src/model/haar.rs - Haar 级联人脸检测器
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

use std::{borrow::Cow, path::PathBuf, time::Instant};

use image::{GrayImage, imageops::FilterType};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use super::{
  Detection, DetectResult, Model,
  cascade::{Cascade, CascadeError},
  group::{Rect, group_rectangles},
};
use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{BgrFrame, ImageInput, NormalizeError, normalize},
  url_to_path,
};

/// 默认模型位置，先在可执行文件所在目录下查找，再在当前工作目录下查找
pub const DEFAULT_MODEL_PATH: &str = "models/haarcascade_frontalface_default.xml";

const HAAR_SCHEME: &str = "haar";
const GROUP_EPS: f64 = 0.2;

#[derive(Error, Debug)]
pub enum HaarError {
  #[error("未找到模型文件: {0}")]
  ModelNotFound(String),
  #[error("模型无效: {0}, 错误: {1}")]
  InvalidModel(String, CascadeError),
  #[error("模型加载错误: {0}")]
  ModelLoadError(#[from] std::io::Error),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("图像无效: {0}")]
  InvalidImage(String),
  #[error("检测参数无效: {0}")]
  InvalidParams(String),
  #[error(transparent)]
  Normalize(#[from] NormalizeError),
}

/// 多尺度检测参数
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectParams {
  /// 相邻尺度之间窗口的放大倍数，必须大于 1
  pub scale_factor: f64,
  /// 一个候选簇至少需要多于该数量的成员才会被保留，0 表示不分组
  pub min_neighbors: u32,
  /// 最小窗口 (宽, 高)
  pub min_size: (u32, u32),
  /// 最大窗口 (宽, 高)，缺省为整幅图像
  pub max_size: Option<(u32, u32)>,
}

impl Default for DetectParams {
  fn default() -> Self {
    Self {
      scale_factor: 1.1,
      min_neighbors: 5,
      min_size: (30, 30),
      max_size: None,
    }
  }
}

impl DetectParams {
  pub fn with_scale_factor(mut self, scale_factor: f64) -> Self {
    self.scale_factor = scale_factor;
    self
  }

  pub fn with_min_neighbors(mut self, min_neighbors: u32) -> Self {
    self.min_neighbors = min_neighbors;
    self
  }

  pub fn with_min_size(mut self, width: u32, height: u32) -> Self {
    self.min_size = (width, height);
    self
  }

  pub fn with_max_size(mut self, max_size: Option<(u32, u32)>) -> Self {
    self.max_size = max_size;
    self
  }

  pub fn validate(&self) -> Result<(), HaarError> {
    if !self.scale_factor.is_finite() || self.scale_factor <= 1.0 {
      return Err(HaarError::InvalidParams(format!(
        "scale_factor 必须大于 1, 实际为 {}",
        self.scale_factor
      )));
    }
    if self.min_size.0 == 0 || self.min_size.1 == 0 {
      return Err(HaarError::InvalidParams(format!(
        "min_size 不能为 0: {:?}",
        self.min_size
      )));
    }
    if let Some((w, h)) = self.max_size
      && (w == 0 || h == 0)
    {
      return Err(HaarError::InvalidParams(format!(
        "max_size 不能为 0: {:?}",
        self.max_size
      )));
    }
    Ok(())
  }
}

/// 默认模型路径：可执行文件旁的 `models/` 优先，否则相对于当前工作目录
pub fn default_model_path() -> PathBuf {
  let beside_exe = std::env::current_exe()
    .ok()
    .and_then(|exe| exe.parent().map(|dir| dir.join(DEFAULT_MODEL_PATH)));
  match beside_exe {
    Some(path) if path.is_file() => path,
    _ => PathBuf::from(DEFAULT_MODEL_PATH),
  }
}

pub struct HaarCascadeBuilder {
  model_path: PathBuf,
  params: DetectParams,
}

impl Default for HaarCascadeBuilder {
  fn default() -> Self {
    Self::new(default_model_path())
  }
}

impl FromUrl for HaarCascadeBuilder {
  type Error = HaarError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != HAAR_SCHEME {
      return Err(HaarError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        HAAR_SCHEME
      )));
    }

    let path = url_to_path(url).map_err(|e| HaarError::ModelPathError(e.to_string()))?;
    Ok(Self::new(path))
  }
}

impl FromUrlWithScheme for HaarCascadeBuilder {
  const SCHEME: &'static str = HAAR_SCHEME;
}

impl HaarCascadeBuilder {
  pub fn new(model_path: impl Into<PathBuf>) -> Self {
    Self {
      model_path: model_path.into(),
      params: DetectParams::default(),
    }
  }

  pub fn params(mut self, params: DetectParams) -> Self {
    self.params = params;
    self
  }

  pub fn build(self) -> Result<HaarCascade, HaarError> {
    let path_text = self.model_path.display().to_string();
    if !self.model_path.is_file() {
      return Err(HaarError::ModelNotFound(path_text));
    }

    info!("加载模型文件: {}", path_text);
    let xml = std::fs::read_to_string(&self.model_path)?;
    debug!("模型文件大小: {:.2} KB", xml.len() as f64 / 1024.0);

    let cascade = Cascade::from_xml(&xml).map_err(|e| HaarError::InvalidModel(path_text, e))?;
    self.params.validate()?;
    info!("模型加载完成");

    Ok(HaarCascade::from_cascade(cascade).with_params(self.params))
  }
}

/// Haar 级联人脸检测器，模型只在构造时加载，之后只读，可在线程间共享
#[derive(Debug, Clone)]
pub struct HaarCascade {
  cascade: Cascade,
  params: DetectParams,
}

impl HaarCascade {
  pub fn from_cascade(cascade: Cascade) -> Self {
    let (w, h) = cascade.window();
    debug!("级联窗口尺寸: {}x{}", w, h);
    debug!("级联级数: {}", cascade.stage_count());
    debug!("级联特征数: {}", cascade.feature_count());
    Self {
      cascade,
      params: DetectParams::default(),
    }
  }

  pub fn with_params(mut self, params: DetectParams) -> Self {
    self.params = params;
    self
  }

  pub fn params(&self) -> &DetectParams {
    &self.params
  }

  pub fn cascade(&self) -> &Cascade {
    &self.cascade
  }

  /// 使用构造时的参数检测
  pub fn detect(&self, image: &ImageInput) -> Result<DetectResult, HaarError> {
    self.detect_with(image, &self.params)
  }

  pub fn detect_with(
    &self,
    image: &ImageInput,
    params: &DetectParams,
  ) -> Result<DetectResult, HaarError> {
    params.validate()?;
    let frame = normalize(image)?;
    self.detect_frame(&frame, params)
  }

  pub fn detect_frame(
    &self,
    frame: &BgrFrame,
    params: &DetectParams,
  ) -> Result<DetectResult, HaarError> {
    params.validate()?;
    if frame.is_empty() {
      return Err(HaarError::InvalidImage(format!(
        "图像尺寸为 {}x{}",
        frame.width(),
        frame.height()
      )));
    }

    let gray = frame.to_luma();
    let start = Instant::now();
    let hits = self.scan(&gray, params);
    debug!("候选窗口数: {}", hits.len());

    let grouped = group_rectangles(&hits, params.min_neighbors, GROUP_EPS);
    let (img_w, img_h) = (frame.width() as i32, frame.height() as i32);
    let items = grouped
      .into_iter()
      .filter_map(|r| clip(r, img_w, img_h))
      .collect::<Vec<_>>();

    debug!(
      "检测到 {} 张人脸, 耗时 {:.2} ms",
      items.len(),
      start.elapsed().as_secs_f64() * 1000.0
    );
    Ok(DetectResult::from(items))
  }

  fn scan(&self, gray: &GrayImage, params: &DetectParams) -> Vec<Rect> {
    let (base_w, base_h) = self.cascade.window();
    let (img_w, img_h) = gray.dimensions();
    let (max_w, max_h) = params.max_size.unwrap_or((img_w, img_h));

    let mut hits = Vec::new();
    let mut factor = 1.0f64;
    loop {
      let win_w = round(base_w as f64 * factor) as u32;
      let win_h = round(base_h as f64 * factor) as u32;
      if win_w > max_w || win_h > max_h || win_w > img_w || win_h > img_h {
        break;
      }
      let scaled_w = round(img_w as f64 / factor) as u32;
      let scaled_h = round(img_h as f64 / factor) as u32;
      if scaled_w <= base_w || scaled_h <= base_h {
        break;
      }
      if win_w < params.min_size.0 || win_h < params.min_size.1 {
        factor *= params.scale_factor;
        continue;
      }

      let scaled = if (scaled_w, scaled_h) == (img_w, img_h) {
        Cow::Borrowed(gray)
      } else {
        Cow::Owned(image::imageops::resize(
          gray,
          scaled_w,
          scaled_h,
          FilterType::Triangle,
        ))
      };
      let integral = IntegralImage::new(&scaled);

      let step = if factor > 2.0 { 1 } else { 2 };
      let before = hits.len();
      let mut y = 0;
      while y < scaled_h - base_h {
        let mut x = 0;
        while x < scaled_w - base_w {
          match self.evaluate(&integral, x, y) {
            None => hits.push(Rect::new(
              round(x as f64 * factor),
              round(y as f64 * factor),
              win_w as i32,
              win_h as i32,
            )),
            Some(0) => x += step,
            Some(_) => {}
          }
          x += step;
        }
        y += step;
      }
      debug!(
        "尺度 {:.3}: 窗口 {}x{}, 缩放图像 {}x{}, 命中 {}",
        factor,
        win_w,
        win_h,
        scaled_w,
        scaled_h,
        hits.len() - before
      );

      factor *= params.scale_factor;
    }
    hits
  }

  /// 评估一个窗口，全部通过返回 `None`，否则返回拒绝它的级下标
  fn evaluate(&self, integral: &IntegralImage, x: u32, y: u32) -> Option<usize> {
    let (base_w, base_h) = self.cascade.window();
    let (nw, nh) = (base_w - 2, base_h - 2);
    let area = (nw * nh) as f64;
    let sum = integral.sum(x + 1, y + 1, nw, nh) as f64;
    let sq_sum = integral.sq_sum(x + 1, y + 1, nw, nh) as f64;
    let nf = area * sq_sum - sum * sum;
    let norm = if nf > 0.0 { 1.0 / nf.sqrt() } else { 1.0 };

    let features = self.cascade.features();
    for (idx, stage) in self.cascade.stages().iter().enumerate() {
      let total: f64 = stage
        .classifiers
        .iter()
        .map(|weak| {
          weak.predict(|fi| {
            let value: f64 = features[fi]
              .rects
              .iter()
              .map(|r| r.weight as f64 * integral.sum(x + r.x, y + r.y, r.width, r.height) as f64)
              .sum();
            value * norm
          })
        })
        .sum();
      if total < stage.threshold as f64 {
        return Some(idx);
      }
    }
    None
  }
}

impl Model for HaarCascade {
  type Input = BgrFrame;
  type Output = DetectResult;
  type Error = HaarError;

  /// 输入已是规范帧，不再重复转换
  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    self.detect_frame(input, &self.params)
  }
}

fn round(v: f64) -> i32 {
  v.round_ties_even() as i32
}

fn clip(rect: Rect, img_w: i32, img_h: i32) -> Option<Detection> {
  let x = rect.x.clamp(0, img_w);
  let y = rect.y.clamp(0, img_h);
  let right = (rect.x + rect.width).clamp(0, img_w);
  let bottom = (rect.y + rect.height).clamp(0, img_h);
  if right <= x || bottom <= y {
    return None;
  }
  Some(Detection::new(
    x as u32,
    y as u32,
    (right - x) as u32,
    (bottom - y) as u32,
  ))
}

/// 积分图与平方积分图，尺寸为 (W + 1) x (H + 1)
struct IntegralImage {
  stride: usize,
  sum: Vec<u64>,
  sq_sum: Vec<u64>,
}

impl IntegralImage {
  fn new(gray: &GrayImage) -> Self {
    let (w, h) = (gray.width() as usize, gray.height() as usize);
    let stride = w + 1;
    let mut sum = vec![0u64; stride * (h + 1)];
    let mut sq_sum = vec![0u64; stride * (h + 1)];

    for (y, row) in gray.as_raw().chunks_exact(w.max(1)).take(h).enumerate() {
      let (mut row_sum, mut row_sq) = (0u64, 0u64);
      for (x, &v) in row.iter().enumerate() {
        let v = v as u64;
        row_sum += v;
        row_sq += v * v;
        let idx = (y + 1) * stride + x + 1;
        sum[idx] = sum[idx - stride] + row_sum;
        sq_sum[idx] = sq_sum[idx - stride] + row_sq;
      }
    }

    Self {
      stride,
      sum,
      sq_sum,
    }
  }

  fn rect(table: &[u64], stride: usize, x: u32, y: u32, w: u32, h: u32) -> u64 {
    let (x1, y1) = (x as usize, y as usize);
    let (x2, y2) = (x1 + w as usize, y1 + h as usize);
    (table[y2 * stride + x2] + table[y1 * stride + x1])
      - (table[y1 * stride + x2] + table[y2 * stride + x1])
  }

  fn sum(&self, x: u32, y: u32, w: u32, h: u32) -> u64 {
    Self::rect(&self.sum, self.stride, x, y, w, h)
  }

  fn sq_sum(&self, x: u32, y: u32, w: u32, h: u32) -> u64 {
    Self::rect(&self.sq_sum, self.stride, x, y, w, h)
  }
}

#[cfg(test)]
mod tests {
  use image::{DynamicImage, Rgb, RgbImage};
  use ndarray::Array3;

  use super::*;
  use crate::model::cascade::tests::DARK_CENTER_CASCADE;

  fn detector() -> HaarCascade {
    HaarCascade::from_cascade(DARK_CENTER_CASCADE.parse().unwrap())
  }

  /// 120x120 浅色背景，(42, 42) 处有 24x24 的暗块
  fn scene() -> ImageInput {
    let picture = RgbImage::from_fn(120, 120, |x, y| {
      if (42..66).contains(&x) && (42..66).contains(&y) {
        Rgb([40, 40, 40])
      } else {
        Rgb([200, 200, 200])
      }
    });
    ImageInput::Decoded(DynamicImage::ImageRgb8(picture))
  }

  #[test]
  fn integral_image_sums_rectangles() {
    let gray = GrayImage::from_fn(4, 3, |x, y| image::Luma([(x + 4 * y) as u8]));
    let integral = IntegralImage::new(&gray);
    assert_eq!(integral.sum(0, 0, 4, 3), (0..12).sum::<u64>());
    assert_eq!(integral.sum(1, 1, 2, 2), 5 + 6 + 9 + 10);
    assert_eq!(integral.sq_sum(3, 2, 1, 1), 121);
  }

  #[test]
  fn blank_image_has_no_detections() {
    let blank = Array3::<u8>::from_elem((100, 100, 3), 128);
    let result = detector().detect(&ImageInput::array(blank.into_dyn())).unwrap();
    assert!(result.is_empty());
  }

  #[test]
  fn dark_block_is_detected_once() {
    let result = detector().detect(&scene()).unwrap();
    assert_eq!(result.len(), 1);
    assert!(result.items[0].overlaps(30, 30, 48, 48));
  }

  /// 160x160 浅色背景，(55, 55) 处有 50x50 的暗块，只在大于 2 倍的尺度上命中
  fn large_scene() -> BgrFrame {
    let picture = RgbImage::from_fn(160, 160, |x, y| {
      if (55..105).contains(&x) && (55..105).contains(&y) {
        Rgb([40, 40, 40])
      } else {
        Rgb([200, 200, 200])
      }
    });
    BgrFrame::from(&picture)
  }

  #[test]
  fn face_sized_block_is_found_on_large_scales() {
    let result = detector().infer(&large_scene()).unwrap();
    assert_eq!(result.len(), 1);
    let det = result.items[0];
    assert!(det.overlaps(55, 55, 50, 50));
    assert!(det.width > 2 * 12 && det.height > 2 * 12);
  }

  #[test]
  fn detections_stay_inside_the_image() {
    let params = DetectParams::default().with_min_neighbors(0);
    let result = detector().detect_with(&scene(), &params).unwrap();
    assert!(!result.is_empty());
    for det in result.iter() {
      assert!(det.width > 0 && det.height > 0);
      assert!(det.right() <= 120 && det.bottom() <= 120);
      assert_eq!(det.confidence, 1.0);
    }
  }

  #[test]
  fn more_neighbors_never_add_detections() {
    let detector = detector();
    let image = scene();
    let counts = (0..=8)
      .map(|n| {
        let params = DetectParams::default().with_min_neighbors(n);
        detector.detect_with(&image, &params).unwrap().len()
      })
      .collect::<Vec<_>>();
    assert!(counts.windows(2).all(|w| w[1] <= w[0]), "{:?}", counts);
  }

  #[test]
  fn min_size_larger_than_image_finds_nothing() {
    let params = DetectParams::default().with_min_size(200, 200);
    assert!(detector().detect_with(&scene(), &params).unwrap().is_empty());
  }

  #[test]
  fn invalid_params_are_rejected() {
    let detector = detector();
    for params in [
      DetectParams::default().with_scale_factor(1.0),
      DetectParams::default().with_scale_factor(f64::NAN),
      DetectParams::default().with_min_size(0, 30),
      DetectParams::default().with_max_size(Some((0, 0))),
    ] {
      assert!(matches!(
        detector.detect_with(&scene(), &params),
        Err(HaarError::InvalidParams(_))
      ));
    }
  }

  #[test]
  fn empty_image_is_invalid() {
    let empty = Array3::<u8>::zeros((0, 10, 3));
    assert!(matches!(
      detector().detect(&ImageInput::array(empty.into_dyn())),
      Err(HaarError::InvalidImage(_))
    ));
  }

  #[test]
  fn normalizer_errors_propagate() {
    let two_channels = Array3::<u8>::zeros((10, 10, 2));
    assert!(matches!(
      detector().detect(&ImageInput::array(two_channels.into_dyn())),
      Err(HaarError::Normalize(NormalizeError::UnsupportedFormat(_)))
    ));
  }

  #[test]
  fn missing_model_is_reported() {
    let path = std::env::temp_dir().join("renmian-no-such-cascade.xml");
    assert!(matches!(
      HaarCascadeBuilder::new(&path).build(),
      Err(HaarError::ModelNotFound(_))
    ));
  }

  #[test]
  fn unparsable_model_is_invalid() {
    let path = std::env::temp_dir().join(format!("renmian-bad-cascade-{}.xml", std::process::id()));
    std::fs::write(&path, "<opencv_storage><nothing/></opencv_storage>").unwrap();
    let result = HaarCascadeBuilder::new(&path).build();
    std::fs::remove_file(&path).ok();
    assert!(matches!(result, Err(HaarError::InvalidModel(_, _))));
  }

  #[test]
  fn builder_loads_model_from_url() {
    let path = std::env::temp_dir().join(format!("renmian-cascade-{}.xml", std::process::id()));
    std::fs::write(&path, DARK_CENTER_CASCADE).unwrap();
    let url = Url::from_file_path(&path).unwrap();
    let url = Url::parse(&format!("haar://{}", url.path())).unwrap();
    let detector = HaarCascadeBuilder::from_url(&url)
      .unwrap()
      .params(DetectParams::default().with_min_neighbors(3))
      .build();
    std::fs::remove_file(&path).ok();

    let detector = detector.unwrap();
    assert_eq!(detector.params().min_neighbors, 3);
    assert_eq!(detector.cascade().window(), (12, 12));
  }

  #[test]
  fn builder_rejects_other_schemes() {
    let url = Url::parse("image:///models/cascade.xml").unwrap();
    assert!(matches!(
      HaarCascadeBuilder::from_url(&url),
      Err(HaarError::ModelPathError(_))
    ));
  }
}
