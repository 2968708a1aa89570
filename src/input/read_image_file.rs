// 该文件是 Renmian （人面桃花） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use image::{DynamicImage, ImageReader};
use thiserror::Error;
use tracing::{debug, error};
use url::Url;

use super::SourceImage;
use crate::{FromUrl, FromUrlWithScheme, frame::ImageInput, url_to_path};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("路径解码错误: {0}")]
  PathError(#[from] std::string::FromUtf8Error),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像加载错误: {0}")]
  ImageLoadError(#[from] image::ImageError),
}

const READ_IMAGE_FILE_SCHEME: &str = "image";

/// 从 `image:///path/to/photo.jpg` 读取单张图像
pub struct ImageFileInput {
  source: Option<SourceImage>,
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != READ_IMAGE_FILE_SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际为 '{}'",
        READ_IMAGE_FILE_SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemeMismatch);
    }

    let path = url_to_path(url)?;
    let image = ImageReader::open(&path)?.with_guessed_format()?.decode()?;
    debug!(
      "读取图像 {}: {}x{}, {:?}",
      path.display(),
      image.width(),
      image.height(),
      image.color()
    );
    // 文件中的图像统一转为 RGB，灰度+alpha 等颜色类型也能检测
    let image = match image {
      DynamicImage::ImageRgb8(_) => image,
      other => DynamicImage::ImageRgb8(other.to_rgb8()),
    };

    let name = path
      .file_name()
      .map(|name| name.to_string_lossy().into_owned());
    Ok(ImageFileInput {
      source: Some(SourceImage {
        name,
        image: ImageInput::Decoded(image),
      }),
    })
  }
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = READ_IMAGE_FILE_SCHEME;
}

impl ImageFileInput {
  pub fn into_images(self) -> ImageFileInputIter {
    ImageFileInputIter { inner: self }
  }
}

pub struct ImageFileInputIter {
  inner: ImageFileInput,
}

impl Iterator for ImageFileInputIter {
  type Item = SourceImage;

  fn next(&mut self) -> Option<Self::Item> {
    self.inner.source.take()
  }
}

#[cfg(test)]
mod tests {
  use image::{GrayAlphaImage, LumaA, Rgb, RgbImage};

  use super::*;
  use crate::frame::normalize;

  #[test]
  fn reads_image_and_file_name_once() {
    let dir = std::env::temp_dir().join(format!("renmian-input-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("two faces.png");
    RgbImage::from_pixel(8, 6, Rgb([10, 20, 30])).save(&path).unwrap();

    let url = Url::from_file_path(&path).unwrap();
    let url = Url::parse(&format!("image://{}", url.path())).unwrap();
    let mut images = ImageFileInput::from_url(&url).unwrap().into_images();
    std::fs::remove_dir_all(&dir).ok();

    let source = images.next().unwrap();
    assert_eq!(source.name.as_deref(), Some("two faces.png"));
    match source.image {
      ImageInput::Decoded(image) => assert_eq!((image.width(), image.height()), (8, 6)),
      other => panic!("unexpected input: {:?}", other),
    }
    assert!(images.next().is_none());
  }

  #[test]
  fn gray_alpha_png_is_read_as_rgb() {
    let dir = std::env::temp_dir().join(format!("renmian-input-la-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("gray.png");
    GrayAlphaImage::from_pixel(64, 64, LumaA([128, 255]))
      .save(&path)
      .unwrap();

    let url = Url::parse(&format!("image://{}", path.display())).unwrap();
    let source = ImageFileInput::from_url(&url)
      .unwrap()
      .into_images()
      .next()
      .unwrap();
    std::fs::remove_dir_all(&dir).ok();

    let frame = normalize(&source.image).unwrap();
    assert_eq!((frame.width(), frame.height()), (64, 64));
    assert_eq!(frame.pixel(10, 20), [128, 128, 128]);
  }

  #[test]
  fn missing_file_is_io_error() {
    let url = Url::parse("image:///renmian/does/not/exist.png").unwrap();
    assert!(matches!(
      ImageFileInput::from_url(&url),
      Err(ImageFileInputError::IoError(_))
    ));
  }

  #[test]
  fn scheme_must_be_image() {
    let url = Url::parse("folder:///tmp/photo.png").unwrap();
    assert!(matches!(
      ImageFileInput::from_url(&url),
      Err(ImageFileInputError::SchemeMismatch)
    ));
  }
}
