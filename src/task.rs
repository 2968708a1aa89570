// 该文件是 Renmian （人面桃花） 项目的一部分。
// src/task.rs - 检测任务
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
use tracing::{error, info};

use crate::{
  frame::{BgrFrame, normalize},
  input::SourceImage,
  model::{DetectResult, Detection, Model},
  narrate::{NarrationRequest, Narrator},
  output::Render,
};

pub trait Task<I, M, O>: Sized {
  type Output;
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<Self::Output, Self::Error>;
}

/// 单张图像的处理结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaceReport {
  pub filename: Option<String>,
  pub count: usize,
  pub detections: Vec<Detection>,
  pub narration: String,
}

/// 取第一张图像：检测、渲染、生成描述
pub struct OneShotTask<N> {
  narrator: N,
}

impl<N: Narrator> OneShotTask<N> {
  pub fn new(narrator: N) -> Self {
    Self { narrator }
  }

  /// 描述失败不影响检测结果，失败原因写进描述文本
  fn narrate(&self, result: &DetectResult, filename: Option<&str>) -> String {
    let request = NarrationRequest::new(result, filename);
    match self.narrator.narrate(&request) {
      Ok(text) => text,
      Err(e) => {
        error!("生成描述失败: {}", e);
        format!("Analysis failed: {}", e)
      }
    }
  }
}

impl<
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = SourceImage>,
  M: Model<Input = BgrFrame, Output = DetectResult, Error = ME>,
  O: Render<BgrFrame, DetectResult, Error = RE>,
  N: Narrator,
> Task<I, M, O> for OneShotTask<N>
{
  type Output = FaceReport;
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, model: M, output: O) -> Result<Self::Output, Self::Error> {
    info!("开始任务...");
    let source = input.next().ok_or_else(|| anyhow::anyhow!("没有输入图像"))?;
    info!("输入图像获取成功，开始检测...");
    let now = std::time::Instant::now();
    let frame = normalize(&source.image)?;
    let result = model.infer(&frame)?;
    info!("检测完成，共 {} 张人脸，耗时: {:.2?}", result.len(), now.elapsed());

    output.render_result(&frame, &result)?;
    info!("渲染完成，耗时: {:.2?}", now.elapsed());

    let narration = self.narrate(&result, source.name.as_deref());
    info!("描述生成完成，耗时: {:.2?}", now.elapsed());

    Ok(FaceReport {
      filename: source.name,
      count: result.len(),
      detections: result.items.into_vec(),
      narration,
    })
  }
}
