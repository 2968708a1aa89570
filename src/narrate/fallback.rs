// 该文件是 Renmian （人面桃花） 项目的一部分。
// src/narrate/fallback.rs - 固定模板描述
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

use super::{NarrateError, NarrationRequest, Narrator};

const DESCRIPTION: &str = "Description: A typical photo with subjects facing the camera.";
const SUGGESTION: &str =
  "Suggestion: Improve lighting and try a frontal angle for better detection.";

/// LLM 不可用时的确定性描述
#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackNarrator;

impl FallbackNarrator {
  /// `error` 不为空时在末尾附上 LLM 不可用的原因
  pub fn summary(&self, request: &NarrationRequest, error: Option<&str>) -> String {
    let count = request.count;
    let mut parts = vec![format!(
      "Detected {} face{}.",
      count,
      if count == 1 { "" } else { "s" }
    )];
    if count > 0 {
      parts.push(format!("Bounding boxes: {}.", request.boxes_text()));
    } else {
      parts.push("No faces were detected in this photo.".to_string());
    }
    parts.push(DESCRIPTION.to_string());
    parts.push(SUGGESTION.to_string());
    if let Some(error) = error {
      parts.push(format!("(LLM unavailable: {})", error));
    }
    parts.join(" ")
  }
}

impl Narrator for FallbackNarrator {
  fn narrate(&self, request: &NarrationRequest) -> Result<String, NarrateError> {
    Ok(self.summary(request, None))
  }
}
