// 该文件是 Renmian （人面桃花） 项目的一部分。
// src/model/cascade.rs - Haar 级联分类器模型文件解析
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

//! # 级联模型
//!
//! 解析 OpenCV 训练得到的 Haar 级联 XML 文件，支持两种布局：
//!
//! - 新版 `opencv-cascade-classifier`：`<cascade>` 下包含 `stageType`、`featureType`、
//!   `width`/`height`、`stages` 与全局 `features` 表；
//! - 旧版 `opencv-haar-classifier`：`<size>` 给出窗口尺寸，特征内嵌在每个树节点中。
//!
//! 两种布局都会被转换为同一种内存结构：弱分类器是一棵小决策树，
//! 节点的左右子指针大于 0 表示内部节点下标，小于等于 0 表示叶子下标的相反数。
//!
//! 只支持 `BOOST` + `HAAR` 组合，倾斜（tilted）特征会被拒绝。

use std::str::FromStr;

use roxmltree::{Document, Node as XmlNode};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CascadeError {
  #[error("XML 解析错误: {0}")]
  Xml(#[from] roxmltree::Error),
  #[error("缺少节点 <{0}>")]
  MissingNode(&'static str),
  #[error("数值无效: {0}")]
  InvalidValue(String),
  #[error("不支持的级联分类器: {0}")]
  Unsupported(String),
  #[error("级联结构无效: {0}")]
  Malformed(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct WeightedRect {
  pub x: u32,
  pub y: u32,
  pub width: u32,
  pub height: u32,
  pub weight: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Feature {
  pub rects: Vec<WeightedRect>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct TreeNode {
  pub feature: usize,
  pub threshold: f32,
  pub left: i32,
  pub right: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct WeakClassifier {
  pub nodes: Vec<TreeNode>,
  pub leaves: Vec<f32>,
}

impl WeakClassifier {
  /// 沿决策树走到叶子，返回叶子值；`feature_value` 按特征下标给出归一化后的特征值
  pub fn predict(&self, mut feature_value: impl FnMut(usize) -> f64) -> f64 {
    let mut idx = 0usize;
    loop {
      let node = &self.nodes[idx];
      let next = if feature_value(node.feature) < node.threshold as f64 {
        node.left
      } else {
        node.right
      };
      if next <= 0 {
        return self.leaves[next.unsigned_abs() as usize] as f64;
      }
      idx = next as usize;
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Stage {
  pub threshold: f32,
  pub classifiers: Vec<WeakClassifier>,
}

/// 加载完成的级联分类器，只读，可在线程间共享
#[derive(Debug, Clone, PartialEq)]
pub struct Cascade {
  width: u32,
  height: u32,
  stages: Vec<Stage>,
  features: Vec<Feature>,
}

impl Cascade {
  pub fn from_xml(xml: &str) -> Result<Self, CascadeError> {
    let doc = Document::parse(xml)?;
    let storage = doc.root_element();
    let top = elements(storage)
      .next()
      .ok_or(CascadeError::MissingNode("cascade"))?;

    let cascade = if top.tag_name().name() == "cascade" || find(top, "stageType").is_some() {
      parse_current(top)?
    } else if top.attribute("type_id") == Some("opencv-haar-classifier")
      || find(top, "size").is_some()
    {
      parse_legacy(top)?
    } else {
      return Err(CascadeError::Unsupported(format!(
        "未知的模型布局 <{}>",
        top.tag_name().name()
      )));
    };

    cascade.validate()?;
    Ok(cascade)
  }

  /// 训练窗口尺寸 (宽, 高)
  pub fn window(&self) -> (u32, u32) {
    (self.width, self.height)
  }

  pub fn stage_count(&self) -> usize {
    self.stages.len()
  }

  pub fn feature_count(&self) -> usize {
    self.features.len()
  }

  pub(crate) fn stages(&self) -> &[Stage] {
    &self.stages
  }

  pub(crate) fn features(&self) -> &[Feature] {
    &self.features
  }

  fn validate(&self) -> Result<(), CascadeError> {
    if self.width < 3 || self.height < 3 {
      return Err(CascadeError::Malformed(format!(
        "窗口尺寸过小: {}x{}",
        self.width, self.height
      )));
    }
    if self.stages.is_empty() {
      return Err(CascadeError::Malformed("没有任何级".to_string()));
    }

    for (fi, feature) in self.features.iter().enumerate() {
      if feature.rects.is_empty() {
        return Err(CascadeError::Malformed(format!("特征 {} 没有矩形", fi)));
      }
      for rect in &feature.rects {
        let right = rect.x.checked_add(rect.width);
        let bottom = rect.y.checked_add(rect.height);
        if right.is_none_or(|r| r > self.width) || bottom.is_none_or(|b| b > self.height) {
          return Err(CascadeError::Malformed(format!(
            "特征 {} 的矩形超出窗口: {:?}",
            fi, rect
          )));
        }
      }
    }

    for (si, stage) in self.stages.iter().enumerate() {
      for (wi, weak) in stage.classifiers.iter().enumerate() {
        if weak.nodes.is_empty() {
          return Err(CascadeError::Malformed(format!(
            "第 {} 级第 {} 个弱分类器为空",
            si, wi
          )));
        }
        for (ni, node) in weak.nodes.iter().enumerate() {
          if node.feature >= self.features.len() {
            return Err(CascadeError::Malformed(format!(
              "特征下标越界: {} (共 {} 个)",
              node.feature,
              self.features.len()
            )));
          }
          for next in [node.left, node.right] {
            let valid = if next <= 0 {
              (next.unsigned_abs() as usize) < weak.leaves.len()
            } else {
              (next as usize) > ni && (next as usize) < weak.nodes.len()
            };
            if !valid {
              return Err(CascadeError::Malformed(format!(
                "第 {} 级第 {} 个弱分类器的节点指针无效: {}",
                si, wi, next
              )));
            }
          }
        }
      }
    }
    Ok(())
  }
}

impl FromStr for Cascade {
  type Err = CascadeError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Cascade::from_xml(s)
  }
}

fn parse_current(cascade: XmlNode<'_, '_>) -> Result<Cascade, CascadeError> {
  let stage_type = text_of(child(cascade, "stageType")?);
  if stage_type.trim() != "BOOST" {
    return Err(CascadeError::Unsupported(format!(
      "stageType = {}",
      stage_type.trim()
    )));
  }
  let feature_type = text_of(child(cascade, "featureType")?);
  if feature_type.trim() != "HAAR" {
    return Err(CascadeError::Unsupported(format!(
      "featureType = {}",
      feature_type.trim()
    )));
  }

  let width = value::<u32>(child(cascade, "width")?)?;
  let height = value::<u32>(child(cascade, "height")?)?;

  let features = elements(child(cascade, "features")?)
    .map(parse_feature)
    .collect::<Result<Vec<_>, _>>()?;

  let stages = elements(child(cascade, "stages")?)
    .map(|stage| {
      let threshold = value::<f32>(child(stage, "stageThreshold")?)?;
      let classifiers = elements(child(stage, "weakClassifiers")?)
        .map(parse_weak_classifier)
        .collect::<Result<Vec<_>, _>>()?;
      Ok(Stage {
        threshold,
        classifiers,
      })
    })
    .collect::<Result<Vec<_>, CascadeError>>()?;

  Ok(Cascade {
    width,
    height,
    stages,
    features,
  })
}

fn parse_weak_classifier(weak: XmlNode<'_, '_>) -> Result<WeakClassifier, CascadeError> {
  let raw = text_of(child(weak, "internalNodes")?);
  let tokens = raw.split_whitespace().collect::<Vec<_>>();
  if tokens.is_empty() || tokens.len() % 4 != 0 {
    return Err(CascadeError::InvalidValue(format!(
      "internalNodes 长度应为 4 的倍数: {}",
      raw.trim()
    )));
  }

  let nodes = tokens
    .chunks_exact(4)
    .map(|c| {
      Ok(TreeNode {
        left: parse_value(c[0])?,
        right: parse_value(c[1])?,
        feature: parse_value(c[2])?,
        threshold: parse_value(c[3])?,
      })
    })
    .collect::<Result<Vec<_>, CascadeError>>()?;
  let leaves = values::<f32>(child(weak, "leafValues")?)?;

  Ok(WeakClassifier { nodes, leaves })
}

fn parse_legacy(root: XmlNode<'_, '_>) -> Result<Cascade, CascadeError> {
  let size = values::<u32>(child(root, "size")?)?;
  let &[width, height] = size.as_slice() else {
    return Err(CascadeError::InvalidValue(format!("size: {:?}", size)));
  };

  let mut features = Vec::new();
  let mut stages = Vec::new();
  for stage in elements(child(root, "stages")?) {
    let threshold = value::<f32>(child(stage, "stage_threshold")?)?;
    let mut classifiers = Vec::new();
    for tree in elements(child(stage, "trees")?) {
      let mut nodes = Vec::new();
      let mut leaves = Vec::new();
      for node in elements(tree) {
        features.push(parse_feature(child(node, "feature")?)?);
        let threshold = value::<f32>(child(node, "threshold")?)?;
        let left = legacy_branch(node, "left_val", "left_node", &mut leaves)?;
        let right = legacy_branch(node, "right_val", "right_node", &mut leaves)?;
        nodes.push(TreeNode {
          feature: features.len() - 1,
          threshold,
          left,
          right,
        });
      }
      classifiers.push(WeakClassifier { nodes, leaves });
    }
    stages.push(Stage {
      threshold,
      classifiers,
    });
  }

  Ok(Cascade {
    width,
    height,
    stages,
    features,
  })
}

fn legacy_branch(
  node: XmlNode<'_, '_>,
  leaf_name: &'static str,
  node_name: &'static str,
  leaves: &mut Vec<f32>,
) -> Result<i32, CascadeError> {
  if let Some(leaf) = find(node, leaf_name) {
    leaves.push(value::<f32>(leaf)?);
    let idx = i32::try_from(leaves.len() - 1)
      .map_err(|_| CascadeError::Malformed("叶子数量过多".to_string()))?;
    return Ok(-idx);
  }
  value::<i32>(child(node, node_name)?)
}

fn parse_feature(feature: XmlNode<'_, '_>) -> Result<Feature, CascadeError> {
  if let Some(tilted) = find(feature, "tilted")
    && value::<i32>(tilted)? != 0
  {
    return Err(CascadeError::Unsupported("倾斜 Haar 特征".to_string()));
  }

  let rects = elements(child(feature, "rects")?)
    .map(|rect| {
      let raw = text_of(rect);
      let tokens = raw.split_whitespace().collect::<Vec<_>>();
      let &[x, y, w, h, weight] = tokens.as_slice() else {
        return Err(CascadeError::InvalidValue(format!("rect: {}", raw.trim())));
      };
      Ok(WeightedRect {
        x: parse_value(x)?,
        y: parse_value(y)?,
        width: parse_value(w)?,
        height: parse_value(h)?,
        weight: parse_value(weight)?,
      })
    })
    .collect::<Result<Vec<_>, CascadeError>>()?;

  Ok(Feature { rects })
}

fn elements<'a, 'i>(node: XmlNode<'a, 'i>) -> impl Iterator<Item = XmlNode<'a, 'i>> {
  node.children().filter(|n| n.is_element())
}

fn find<'a, 'i>(node: XmlNode<'a, 'i>, name: &str) -> Option<XmlNode<'a, 'i>> {
  elements(node).find(|n| n.tag_name().name() == name)
}

fn child<'a, 'i>(node: XmlNode<'a, 'i>, name: &'static str) -> Result<XmlNode<'a, 'i>, CascadeError> {
  find(node, name).ok_or(CascadeError::MissingNode(name))
}

// 数值可能被注释或换行拆成多个文本节点
fn text_of(node: XmlNode<'_, '_>) -> String {
  node
    .children()
    .filter(|n| n.is_text())
    .filter_map(|n| n.text())
    .collect()
}

fn parse_value<T: FromStr>(token: &str) -> Result<T, CascadeError> {
  token
    .parse()
    .map_err(|_| CascadeError::InvalidValue(token.to_string()))
}

fn values<T: FromStr>(node: XmlNode<'_, '_>) -> Result<Vec<T>, CascadeError> {
  text_of(node).split_whitespace().map(parse_value).collect()
}

fn value<T: FromStr>(node: XmlNode<'_, '_>) -> Result<T, CascadeError> {
  let raw = text_of(node);
  let mut tokens = raw.split_whitespace();
  match (tokens.next(), tokens.next()) {
    (Some(token), None) => parse_value(token),
    _ => Err(CascadeError::InvalidValue(format!(
      "<{}> 应只包含一个数值: {}",
      node.tag_name().name(),
      raw.trim()
    ))),
  }
}
