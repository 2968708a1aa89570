// 该文件是 Renmian （人面桃花） 项目的一部分。
// src/bin/simple_oneshot.rs - 单张图像人脸计数与描述
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

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use url::Url;

use renmian::{
  FromUrl,
  config::{AppConfig, parse_size},
  input::InputWrapper,
  model::HaarCascadeBuilder,
  narrate::NarratorWrapper,
  output::{OutputWrapper, draw::Draw},
  task::{OneShotTask, Task},
};

/// Renmian 人脸计数与描述
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 输入图像，例如 image:///path/to/photo.jpg
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出，image:///out.png 或 folder:///dir[?record][&always]
  #[arg(long, value_name = "OUTPUT")]
  pub output: Option<Url>,
  /// 级联模型，例如 haar:///path/to/cascade.xml，缺省为 models/ 下的正脸模型
  #[arg(long, value_name = "MODEL")]
  pub model: Option<Url>,
  /// JSON 配置文件
  #[arg(long, value_name = "FILE")]
  pub config: Option<PathBuf>,

  #[arg(long, value_name = "FACTOR")]
  pub scale_factor: Option<f64>,
  #[arg(long, value_name = "COUNT")]
  pub min_neighbors: Option<u32>,
  /// 最小人脸尺寸，WxH
  #[arg(long, value_name = "WxH", value_parser = parse_size)]
  pub min_size: Option<(u32, u32)>,

  /// 标签字体文件，缺省时不标注置信度
  #[arg(long, value_name = "FILE")]
  pub font: Option<PathBuf>,
  /// 托管 LLM 的 API Key
  #[arg(long, env = "GROQ_API_KEY", hide_env_values = true)]
  pub api_key: Option<String>,

  /// 以 JSON 输出完整结果
  #[arg(long)]
  pub json: bool,
}

impl Args {
  fn apply(&self, config: &mut AppConfig) {
    if let Some(scale_factor) = self.scale_factor {
      config.detect.scale_factor = scale_factor;
    }
    if let Some(min_neighbors) = self.min_neighbors {
      config.detect.min_neighbors = min_neighbors;
    }
    if let Some(min_size) = self.min_size {
      config.detect.min_size = min_size;
    }
    if let Some(font) = &self.font {
      config.render.font = Some(font.clone());
    }
    if let Some(api_key) = &self.api_key {
      config.narration.api_key = Some(api_key.clone());
    }
  }
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();

  let mut config = match &args.config {
    Some(path) => AppConfig::load(path)?,
    None => AppConfig::default(),
  };
  args.apply(&mut config);

  info!("输入来源: {}", args.input);
  if let Some(output) = &args.output {
    info!("输出路径: {}", output);
  }
  info!("检测参数: {:?}", config.detect);

  let builder = match &args.model {
    Some(url) => HaarCascadeBuilder::from_url(url)?,
    None => HaarCascadeBuilder::default(),
  };
  let model = builder.params(config.detect).build()?;

  let input = InputWrapper::from_url(&args.input)?;

  let mut draw = Draw::default().with_font_size(config.render.font_size);
  if let Some(font) = &config.render.font {
    draw = draw.with_font_file(font)?;
  }
  let output = args
    .output
    .as_ref()
    .map(OutputWrapper::from_url)
    .transpose()?
    .map(|output| output.with_draw(draw));

  let narrator = NarratorWrapper::from_config(&config.narration)?;

  let report = OneShotTask::new(narrator).run_task(input.into_images(), model, output)?;

  if args.json {
    println!("{}", serde_json::to_string_pretty(&report)?);
  } else {
    println!("{}", report.narration);
  }

  Ok(())
}
