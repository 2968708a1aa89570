// 该文件是 Renmian （人面桃花） 项目的一部分。
// src/narrate.rs - 检测结果的自然语言描述
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

use thiserror::Error;
use tracing::info;

use crate::{config::NarrationConfig, model::DetectResult};

mod fallback;
pub use self::fallback::FallbackNarrator;

#[cfg(feature = "hosted_narrator")]
mod hosted;
#[cfg(feature = "hosted_narrator")]
pub use self::hosted::HostedNarrator;

pub trait Narrator {
  fn narrate(&self, request: &NarrationRequest) -> Result<String, NarrateError>;
}

#[derive(Error, Debug)]
pub enum NarrateError {
  #[cfg(feature = "hosted_narrator")]
  #[error("HTTP 请求错误: {0}")]
  HttpError(#[from] reqwest::Error),
  #[error("服务返回状态 {0}: {1}")]
  Status(u16, String),
  #[error("服务返回内容为空")]
  EmptyResponse,
}

/// 交给描述器的检测摘要：数量、按顺序的框、可选的文件名
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NarrationRequest {
  pub count: usize,
  pub boxes: Vec<(u32, u32, u32, u32)>,
  pub filename: Option<String>,
}

impl NarrationRequest {
  pub fn new(result: &DetectResult, filename: Option<&str>) -> Self {
    Self {
      count: result.len(),
      boxes: result.iter().map(|d| d.bbox()).collect(),
      filename: filename.map(str::to_string),
    }
  }

  /// `(x,y,w,h), (x,y,w,h)`，没有框时为 `none`
  pub fn boxes_text(&self) -> String {
    if self.boxes.is_empty() {
      return "none".to_string();
    }
    self
      .boxes
      .iter()
      .map(|(x, y, w, h)| format!("({},{},{},{})", x, y, w, h))
      .collect::<Vec<_>>()
      .join(", ")
  }

  pub fn prompt(&self) -> String {
    let named = self
      .filename
      .as_deref()
      .map(|name| format!(" named {}", name))
      .unwrap_or_default();
    format!(
      "You are given detection metadata extracted from an image{named}.\n\
       Detected face count: {count}\n\
       Bounding boxes (x,y,w,h): {boxes}\n\
       \n\
       Please:\n\
       1) State the detected face count in a single short sentence.\n\
       2) Provide a 1-2 sentence human-friendly description of the image scene \
       (based on the detection metadata and typical photo patterns).\n\
       3) Give one suggestion to improve detection quality (lighting/angle) in one short sentence.\n\
       \n\
       Keep the total response under 120 tokens. Be concise and friendly.\n",
      named = named,
      count = self.count,
      boxes = self.boxes_text(),
    )
  }
}

/// 按配置选择描述器，不做探测
pub enum NarratorWrapper {
  Fallback(FallbackNarrator),
  #[cfg(feature = "hosted_narrator")]
  Hosted(HostedNarrator),
}

impl NarratorWrapper {
  /// 配置或环境变量中有 API Key 时使用托管 LLM，否则使用固定模板
  pub fn from_config(config: &NarrationConfig) -> Result<Self, NarrateError> {
    Self::select(config, config.resolve_api_key())
  }

  pub fn select(config: &NarrationConfig, api_key: Option<String>) -> Result<Self, NarrateError> {
    #[cfg(feature = "hosted_narrator")]
    {
      if let Some(api_key) = api_key {
        info!("使用托管 LLM 生成描述: {}", config.model);
        return Ok(NarratorWrapper::Hosted(HostedNarrator::new(api_key, config)?));
      }
    }
    #[cfg(not(feature = "hosted_narrator"))]
    let _ = (config, api_key);

    info!("未配置 API Key, 使用固定模板生成描述");
    Ok(NarratorWrapper::Fallback(FallbackNarrator))
  }
}

impl Narrator for NarratorWrapper {
  fn narrate(&self, request: &NarrationRequest) -> Result<String, NarrateError> {
    match self {
      NarratorWrapper::Fallback(narrator) => narrator.narrate(request),
      #[cfg(feature = "hosted_narrator")]
      NarratorWrapper::Hosted(narrator) => narrator.narrate(request),
    }
  }
}
