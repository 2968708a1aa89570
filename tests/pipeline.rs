// 该文件是 Renmian （人面桃花） 项目的一部分。
// tests/pipeline.rs - 端到端流程测试
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

use std::path::{Path, PathBuf};

use image::{Rgb, RgbImage, Rgba, RgbaImage};
use ndarray::{Array3, s};
use url::Url;

use renmian::{
  FromUrl,
  frame::{ImageInput, normalize},
  input::InputWrapper,
  model::{DetectParams, HaarCascadeBuilder, HaarError},
  narrate::FallbackNarrator,
  output::OutputWrapper,
  task::{OneShotTask, Task},
};

/// 12x12 窗口，中心比四周暗时通过
const DARK_CENTER_CASCADE: &str = r#"<?xml version="1.0"?>
<opencv_storage>
<cascade type_id="opencv-cascade-classifier">
  <stageType>BOOST</stageType>
  <featureType>HAAR</featureType>
  <height>12</height>
  <width>12</width>
  <stages>
    <_>
      <stageThreshold>0.</stageThreshold>
      <weakClassifiers>
        <_>
          <internalNodes>0 -1 0 1.0</internalNodes>
          <leafValues>-1. 1.</leafValues></_></weakClassifiers></_></stages>
  <features>
    <_>
      <rects>
        <_>0 0 12 12 1.</_>
        <_>3 3 6 6 -4.</_></rects></_></features></cascade>
</opencv_storage>
"#;

struct Workspace(PathBuf);

impl Workspace {
  fn new(name: &str) -> Self {
    let dir = std::env::temp_dir().join(format!("renmian-{}-{}", name, std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    Self(dir)
  }

  fn path(&self, name: &str) -> PathBuf {
    self.0.join(name)
  }

  fn url(scheme: &str, path: &Path) -> Url {
    Url::parse(&format!("{}://{}", scheme, path.display())).unwrap()
  }
}

impl Drop for Workspace {
  fn drop(&mut self) {
    std::fs::remove_dir_all(&self.0).ok();
  }
}

/// 浅色背景中 (42, 42) 处有 24x24 的暗块
fn scene() -> RgbImage {
  RgbImage::from_fn(120, 120, |x, y| {
    if (42..66).contains(&x) && (42..66).contains(&y) {
      Rgb([40, 40, 40])
    } else {
      Rgb([200, 200, 200])
    }
  })
}

#[test]
fn image_file_to_report_and_annotated_output() {
  let ws = Workspace::new("pipeline");
  let model_path = ws.path("cascade.xml");
  let photo_path = ws.path("scene.png");
  let out_path = ws.path("annotated/out.png");
  std::fs::write(&model_path, DARK_CENTER_CASCADE).unwrap();
  scene().save(&photo_path).unwrap();

  let model = HaarCascadeBuilder::from_url(&Workspace::url("haar", &model_path))
    .unwrap()
    .build()
    .unwrap();
  let input = InputWrapper::from_url(&Workspace::url("image", &photo_path)).unwrap();
  let output = OutputWrapper::from_url(&Workspace::url("image", &out_path)).unwrap();

  let report = OneShotTask::new(FallbackNarrator)
    .run_task(input.into_images(), model, Some(output))
    .unwrap();

  assert_eq!(report.filename.as_deref(), Some("scene.png"));
  assert_eq!(report.count, 1);
  let face = report.detections[0];
  assert!(face.overlaps(30, 30, 48, 48));
  assert_eq!(face.confidence, 1.0);
  assert!(report.narration.starts_with("Detected 1 face. Bounding boxes: ("));

  let annotated = image::open(&out_path).unwrap().to_rgb8();
  assert_eq!(annotated.dimensions(), (120, 120));
  assert_eq!(annotated.get_pixel(face.x, face.y), &Rgb([0, 255, 0]));
}

#[test]
fn face_sized_region_is_reported() {
  let ws = Workspace::new("large");
  let model_path = ws.path("cascade.xml");
  let photo_path = ws.path("portrait.png");
  std::fs::write(&model_path, DARK_CENTER_CASCADE).unwrap();
  RgbImage::from_fn(160, 160, |x, y| {
    if (55..105).contains(&x) && (55..105).contains(&y) {
      Rgb([40, 40, 40])
    } else {
      Rgb([200, 200, 200])
    }
  })
  .save(&photo_path)
  .unwrap();

  let model = HaarCascadeBuilder::new(&model_path).build().unwrap();
  let input = InputWrapper::from_url(&Workspace::url("image", &photo_path)).unwrap();
  let report = OneShotTask::new(FallbackNarrator)
    .run_task(input.into_images(), model, None::<OutputWrapper>)
    .unwrap();

  assert_eq!(report.count, 1);
  assert!(report.detections[0].overlaps(55, 55, 50, 50));
}

#[test]
fn blank_photo_reports_no_faces() {
  let ws = Workspace::new("blank");
  let model_path = ws.path("cascade.xml");
  std::fs::write(&model_path, DARK_CENTER_CASCADE).unwrap();
  let model = HaarCascadeBuilder::new(&model_path).build().unwrap();

  let blank = Array3::<u8>::from_elem((100, 100, 3), 128);
  let result = model.detect(&ImageInput::array(blank.into_dyn())).unwrap();
  assert!(result.is_empty());
}

#[test]
fn detections_never_grow_with_min_neighbors() {
  let ws = Workspace::new("neighbors");
  let model_path = ws.path("cascade.xml");
  std::fs::write(&model_path, DARK_CENTER_CASCADE).unwrap();
  let model = HaarCascadeBuilder::new(&model_path).build().unwrap();
  let image = ImageInput::from(scene());

  let mut previous = usize::MAX;
  for n in 0..=10 {
    let params = DetectParams::default().with_min_neighbors(n);
    let count = model.detect_with(&image, &params).unwrap().len();
    assert!(count <= previous, "min_neighbors {} gave {} > {}", n, count, previous);
    previous = count;
  }
}

#[test]
fn missing_default_model_is_fatal() {
  let ws = Workspace::new("missing");
  let result = HaarCascadeBuilder::new(ws.path("models/haarcascade_frontalface_default.xml")).build();
  assert!(matches!(result, Err(HaarError::ModelNotFound(_))));
}

#[test]
fn rgba_and_rgb_arrays_normalize_identically() {
  let rgba = RgbaImage::from_fn(6, 4, |x, y| Rgba([x as u8 * 40, y as u8 * 60, 90, 255 - x as u8]));
  let pixels = Array3::from_shape_vec((4, 6, 4), rgba.into_raw()).unwrap();
  let rgb = pixels.slice(s![.., .., 0..3]).to_owned();

  let with_alpha = normalize(&ImageInput::array(pixels.into_dyn())).unwrap();
  let without_alpha = normalize(&ImageInput::array(rgb.into_dyn())).unwrap();
  assert_eq!(with_alpha, without_alpha);
  assert_eq!(with_alpha.channels(), 3);
}
