// 该文件是 Renmian （人面桃花） 项目的一部分。
// src/config.rs - 配置文件
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

//! # 配置
//!
//! JSON 配置文件，所有字段都有默认值，缺省字段按默认处理：
//!
//! ```json
//! {
//!   "detect": { "scale_factor": 1.1, "min_neighbors": 5, "min_size": [30, 30] },
//!   "narration": { "model": "llama-3.1-8b-instant", "timeout_secs": 30 },
//!   "render": { "font": "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf" }
//! }
//! ```
//!
//! 命令行参数覆盖配置文件，API Key 还可以来自 `GROQ_API_KEY` 环境变量。

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::model::DetectParams;

/// 托管 LLM 的 API Key 环境变量
pub const API_KEY_ENV: &str = "GROQ_API_KEY";
pub const DEFAULT_ENDPOINT: &str = "https://api.groq.com/openai/v1/chat/completions";
pub const DEFAULT_LLM_MODEL: &str = "llama-3.1-8b-instant";

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("读取配置文件错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("解析配置文件错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("尺寸格式无效, 应为 WxH: {0}")]
  InvalidSize(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
  pub detect: DetectParams,
  pub narration: NarrationConfig,
  pub render: RenderConfig,
}

impl AppConfig {
  pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let text = std::fs::read_to_string(path.as_ref())?;
    let config = serde_json::from_str(&text)?;
    debug!("加载配置文件: {}", path.as_ref().display());
    Ok(config)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NarrationConfig {
  pub api_key: Option<String>,
  pub endpoint: String,
  pub model: String,
  pub temperature: f32,
  pub max_tokens: u32,
  pub timeout_secs: u64,
}

impl Default for NarrationConfig {
  fn default() -> Self {
    Self {
      api_key: None,
      endpoint: DEFAULT_ENDPOINT.to_string(),
      model: DEFAULT_LLM_MODEL.to_string(),
      temperature: 0.2,
      max_tokens: 150,
      timeout_secs: 30,
    }
  }
}

impl NarrationConfig {
  /// 配置中的 Key 优先，其次是环境变量；空字符串视为未配置
  pub fn resolve_api_key(&self) -> Option<String> {
    self.api_key_or(std::env::var(API_KEY_ENV).ok())
  }

  pub fn api_key_or(&self, fallback: Option<String>) -> Option<String> {
    self
      .api_key
      .clone()
      .or(fallback)
      .map(|key| key.trim().to_string())
      .filter(|key| !key.is_empty())
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
  /// 标签字体，缺省时只画框不写置信度
  pub font: Option<PathBuf>,
  pub font_size: f32,
}

impl Default for RenderConfig {
  fn default() -> Self {
    Self {
      font: None,
      font_size: 16.0,
    }
  }
}

/// 解析 `WxH` 形式的尺寸，例如 `30x30`
pub fn parse_size(text: &str) -> Result<(u32, u32), ConfigError> {
  let invalid = || ConfigError::InvalidSize(text.to_string());
  let (w, h) = text
    .trim()
    .split_once(['x', 'X'])
    .ok_or_else(invalid)?;
  let w = w.trim().parse().map_err(|_| invalid())?;
  let h = h.trim().parse().map_err(|_| invalid())?;
  Ok((w, h))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn missing_fields_take_defaults() {
    let config: AppConfig = serde_json::from_str(r#"{ "detect": { "min_neighbors": 3 } }"#).unwrap();
    assert_eq!(config.detect.min_neighbors, 3);
    assert_eq!(config.detect.scale_factor, 1.1);
    assert_eq!(config.detect.min_size, (30, 30));
    assert_eq!(config.narration, NarrationConfig::default());
    assert_eq!(config.render.font, None);
  }

  #[test]
  fn empty_object_is_default_config() {
    let config: AppConfig = serde_json::from_str("{}").unwrap();
    assert_eq!(config, AppConfig::default());
    assert_eq!(config.narration.model, "llama-3.1-8b-instant");
    assert_eq!(config.narration.max_tokens, 150);
  }

  #[test]
  fn load_reads_json_file() {
    let path = std::env::temp_dir().join(format!("renmian-config-{}.json", std::process::id()));
    std::fs::write(
      &path,
      r#"{ "narration": { "api_key": "k", "timeout_secs": 5 }, "render": { "font_size": 12.0 } }"#,
    )
    .unwrap();
    let config = AppConfig::load(&path);
    std::fs::remove_file(&path).ok();

    let config = config.unwrap();
    assert_eq!(config.narration.api_key.as_deref(), Some("k"));
    assert_eq!(config.narration.timeout_secs, 5);
    assert_eq!(config.render.font_size, 12.0);
  }

  #[test]
  fn load_reports_bad_json() {
    let path = std::env::temp_dir().join(format!("renmian-bad-config-{}.json", std::process::id()));
    std::fs::write(&path, "{ detect: ").unwrap();
    let config = AppConfig::load(&path);
    std::fs::remove_file(&path).ok();
    assert!(matches!(config, Err(ConfigError::JsonError(_))));
  }

  #[test]
  fn api_key_prefers_config_and_ignores_blank() {
    let mut narration = NarrationConfig::default();
    assert_eq!(narration.api_key_or(None), None);
    assert_eq!(narration.api_key_or(Some("env".into())).as_deref(), Some("env"));
    assert_eq!(narration.api_key_or(Some("  ".into())), None);

    narration.api_key = Some("cfg".into());
    assert_eq!(narration.api_key_or(Some("env".into())).as_deref(), Some("cfg"));
  }

  #[test]
  fn sizes_parse_as_width_by_height() {
    assert_eq!(parse_size("30x30").unwrap(), (30, 30));
    assert_eq!(parse_size(" 64X48 ").unwrap(), (64, 48));
    assert!(matches!(parse_size("30"), Err(ConfigError::InvalidSize(_))));
    assert!(matches!(parse_size("ax3"), Err(ConfigError::InvalidSize(_))));
  }
}
