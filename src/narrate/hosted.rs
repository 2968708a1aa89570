// 该文件是 Renmian （人面桃花） 项目的一部分。
// src/narrate/hosted.rs - 托管 LLM（OpenAI 兼容的 chat completions 接口）
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

use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{FallbackNarrator, NarrateError, NarrationRequest, Narrator};
use crate::config::NarrationConfig;

#[derive(Serialize)]
struct ChatRequest<'a> {
  model: &'a str,
  messages: [ChatMessage<'a>; 1],
  temperature: f32,
  max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
  role: &'a str,
  content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
  choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
  message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
  content: Option<String>,
}

/// 调用托管 LLM 生成描述，任何失败都退回固定模板，不会让流程失败
pub struct HostedNarrator {
  client: Client,
  endpoint: String,
  api_key: String,
  model: String,
  temperature: f32,
  max_tokens: u32,
  fallback: FallbackNarrator,
}

impl HostedNarrator {
  pub fn new(api_key: String, config: &NarrationConfig) -> Result<Self, NarrateError> {
    let client = Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .build()?;
    Ok(Self {
      client,
      endpoint: config.endpoint.clone(),
      api_key,
      model: config.model.clone(),
      temperature: config.temperature,
      max_tokens: config.max_tokens,
      fallback: FallbackNarrator,
    })
  }

  fn complete(&self, prompt: &str) -> Result<String, NarrateError> {
    let body = ChatRequest {
      model: &self.model,
      messages: [ChatMessage {
        role: "user",
        content: prompt,
      }],
      temperature: self.temperature,
      max_tokens: self.max_tokens,
    };

    debug!("请求 LLM: {} ({})", self.endpoint, self.model);
    let response = self
      .client
      .post(&self.endpoint)
      .bearer_auth(&self.api_key)
      .json(&body)
      .send()?;

    let status = response.status();
    if !status.is_success() {
      let text = response.text().unwrap_or_default();
      return Err(NarrateError::Status(status.as_u16(), text));
    }

    let reply: ChatResponse = response.json()?;
    reply
      .choices
      .into_iter()
      .next()
      .and_then(|choice| choice.message.content)
      .map(|content| content.trim().to_string())
      .filter(|content| !content.is_empty())
      .ok_or(NarrateError::EmptyResponse)
  }
}

impl Narrator for HostedNarrator {
  fn narrate(&self, request: &NarrationRequest) -> Result<String, NarrateError> {
    match self.complete(&request.prompt()) {
      Ok(text) => Ok(text),
      Err(e) => {
        warn!("LLM 调用失败, 使用固定模板: {}", e);
        Ok(self.fallback.summary(request, Some(&e.to_string())))
      }
    }
  }
}
