// 该文件是 Linzhi （林芝） 项目的一部分。
// src/config.rs - 训练元数据配置
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

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

/// 背景类别名称
pub const BACKGROUND_LABEL: &str = "bg";

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("无法读取配置文件 {path}: {source}")]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("配置文件 {path} 格式错误: {source}")]
  Parse {
    path: PathBuf,
    source: serde_json::Error,
  },
  #[error("类别表为空")]
  EmptyClassTable,
  #[error("类别索引不连续: 类别 {name} 的索引为 {index}, 共 {count} 个类别")]
  ClassIndex {
    name: String,
    index: usize,
    count: usize,
  },
  #[error("配置无效: {0}")]
  Invalid(String),
}

/// 锚框放置策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnchorPlacement {
  /// 所有网格位置都放置锚框，回归后裁剪到图像范围内
  #[default]
  Partial,
  /// 只保留完全落在特征图内的锚框
  Inside,
}

/// 类别表：索引与名称一一对应，且总包含背景类别
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassTable {
  names: Box<[String]>,
  background: usize,
}

impl ClassTable {
  /// 从「名称 -> 索引」映射构建类别表，缺少背景类别时追加在末尾
  pub fn from_mapping(mapping: &BTreeMap<String, usize>) -> Result<Self, ConfigError> {
    if mapping.is_empty() {
      return Err(ConfigError::EmptyClassTable);
    }

    let mut mapping = mapping.clone();
    if !mapping.contains_key(BACKGROUND_LABEL) {
      let index = mapping.len();
      debug!("类别表中没有背景类别, 追加为索引 {}", index);
      mapping.insert(BACKGROUND_LABEL.to_string(), index);
    }

    let count = mapping.len();
    let mut names = vec![None; count];
    for (name, &index) in &mapping {
      match names.get_mut(index) {
        Some(slot) if slot.is_none() => *slot = Some(name.clone()),
        _ => {
          return Err(ConfigError::ClassIndex {
            name: name.clone(),
            index,
            count,
          });
        }
      }
    }

    let names: Box<[String]> = names.into_iter().flatten().collect();
    let background = names
      .iter()
      .position(|name| name == BACKGROUND_LABEL)
      .ok_or(ConfigError::EmptyClassTable)?;

    Ok(Self { names, background })
  }

  /// 类别数量（包含背景）
  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }

  pub fn background(&self) -> usize {
    self.background
  }

  pub fn is_background(&self, index: usize) -> bool {
    index == self.background
  }

  pub fn name(&self, index: usize) -> Option<&str> {
    self.names.get(index).map(String::as_str)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct RawConfig {
  anchor_box_scales: Vec<f32>,
  anchor_box_ratios: Vec<[f32; 2]>,
  im_size: u32,
  rpn_stride: f32,
  std_scaling: f32,
  classifier_regr_std: [f32; 4],
  num_rois: usize,
  bbox_threshold: f32,
  rpn_overlap: f32,
  detection_overlap: f32,
  max_proposals: usize,
  max_detections: usize,
  anchor_placement: AnchorPlacement,
  class_mapping: BTreeMap<String, usize>,
}

impl Default for RawConfig {
  fn default() -> Self {
    Self {
      anchor_box_scales: vec![128.0, 256.0, 512.0],
      anchor_box_ratios: vec![[1.0, 1.0], [1.0, 2.0], [2.0, 1.0]],
      im_size: 600,
      rpn_stride: 16.0,
      std_scaling: 4.0,
      classifier_regr_std: [8.0, 8.0, 4.0, 4.0],
      num_rois: 32,
      bbox_threshold: 0.8,
      rpn_overlap: 0.7,
      detection_overlap: 0.5,
      max_proposals: 300,
      max_detections: 300,
      anchor_placement: AnchorPlacement::default(),
      class_mapping: BTreeMap::new(),
    }
  }
}

/// 训练时保存的元数据，运行期间只读
#[derive(Debug, Clone)]
pub struct Config {
  pub anchor_box_scales: Vec<f32>,
  pub anchor_box_ratios: Vec<[f32; 2]>,
  /// 缩放后图像短边长度
  pub im_size: u32,
  /// 特征图步长
  pub rpn_stride: f32,
  /// RPN 回归量的归一化系数
  pub std_scaling: f32,
  /// 分类器回归量的归一化系数 (x, y, w, h)
  pub classifier_regr_std: [f32; 4],
  /// 每批送入分类器的区域数 K
  pub num_rois: usize,
  pub bbox_threshold: f32,
  pub rpn_overlap: f32,
  pub detection_overlap: f32,
  pub max_proposals: usize,
  pub max_detections: usize,
  pub anchor_placement: AnchorPlacement,
  pub classes: ClassTable,
}

impl Config {
  pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    info!("加载配置文件: {}", path.display());
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    let raw: RawConfig = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })?;
    let config = Self::from_raw(raw)?;
    debug!("配置内容: {:?}", config);
    Ok(config)
  }

  pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
    let raw: RawConfig = serde_json::from_str(json).map_err(|source| ConfigError::Parse {
      path: PathBuf::from("<inline>"),
      source,
    })?;
    Self::from_raw(raw)
  }

  fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
    let classes = ClassTable::from_mapping(&raw.class_mapping)?;
    let config = Self {
      anchor_box_scales: raw.anchor_box_scales,
      anchor_box_ratios: raw.anchor_box_ratios,
      im_size: raw.im_size,
      rpn_stride: raw.rpn_stride,
      std_scaling: raw.std_scaling,
      classifier_regr_std: raw.classifier_regr_std,
      num_rois: raw.num_rois,
      bbox_threshold: raw.bbox_threshold,
      rpn_overlap: raw.rpn_overlap,
      detection_overlap: raw.detection_overlap,
      max_proposals: raw.max_proposals,
      max_detections: raw.max_detections,
      anchor_placement: raw.anchor_placement,
      classes,
    };
    config.validate()?;
    Ok(config)
  }

  /// 命令行覆盖每批区域数
  pub fn with_num_rois(mut self, num_rois: usize) -> Result<Self, ConfigError> {
    if num_rois != self.num_rois {
      warn!("每批区域数由 {} 覆盖为 {}", self.num_rois, num_rois);
    }
    self.num_rois = num_rois;
    self.validate()?;
    Ok(self)
  }

  /// 锚框形状数量
  pub fn num_anchors(&self) -> usize {
    self.anchor_box_scales.len() * self.anchor_box_ratios.len()
  }

  fn validate(&self) -> Result<(), ConfigError> {
    let invalid = |msg: String| Err(ConfigError::Invalid(msg));

    if self.num_rois == 0 {
      return invalid("num_rois 必须大于 0".to_string());
    }
    if self.num_anchors() == 0 {
      return invalid("锚框尺度与比例不能为空".to_string());
    }
    if self.im_size == 0 {
      return invalid("im_size 必须大于 0".to_string());
    }
    for (name, value) in [
      ("rpn_stride", self.rpn_stride),
      ("std_scaling", self.std_scaling),
    ] {
      if !(value.is_finite() && value > 0.0) {
        return invalid(format!("{} 必须为正数, 实际为 {}", name, value));
      }
    }
    if self
      .classifier_regr_std
      .iter()
      .any(|v| !(v.is_finite() && *v != 0.0))
    {
      return invalid(format!(
        "classifier_regr_std 不能包含 0 或非有限值: {:?}",
        self.classifier_regr_std
      ));
    }
    for (name, value) in [
      ("bbox_threshold", self.bbox_threshold),
      ("rpn_overlap", self.rpn_overlap),
      ("detection_overlap", self.detection_overlap),
    ] {
      if !(0.0..=1.0).contains(&value) {
        return invalid(format!("{} 必须在 [0, 1] 内, 实际为 {}", name, value));
      }
    }
    if self.classes.len() < 2 {
      return invalid("类别表至少需要一个前景类别".to_string());
    }

    Ok(())
  }
}
