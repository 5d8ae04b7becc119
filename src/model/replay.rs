// 该文件是 Linzhi （林芝） 项目的一部分。
// src/model/replay.rs - 回放已记录的网络输出
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
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::{
  batch::RegionBatch,
  input::working_size,
  model::{ClassifierOutput, ModelError, Network, RpnOutput, ScoreMap},
};

#[derive(Error, Debug)]
pub enum ReplayError {
  #[error("无法读取网络输出记录 {path}: {source}")]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("网络输出记录 {path} 格式错误: {source}")]
  Parse {
    path: PathBuf,
    source: serde_json::Error,
  },
  #[error("网络输出记录 {path} 形状错误: {source}")]
  Shape { path: PathBuf, source: ModelError },
  #[error("网络输出记录 {path} 缺少第 {index} 批分类器输出")]
  MissingBatch { path: PathBuf, index: usize },
}

#[derive(Deserialize)]
struct Dump {
  ratio: Option<f64>,
  width: Option<u32>,
  height: Option<u32>,
  rpn: DumpRpn,
  #[serde(default)]
  classifier: Vec<DumpBatch>,
}

#[derive(Deserialize)]
struct DumpRpn {
  rows: usize,
  cols: usize,
  objectness: Vec<f32>,
  regression: Vec<f32>,
}

#[derive(Deserialize)]
struct DumpBatch {
  probs: Vec<Vec<f32>>,
  deltas: Vec<Vec<f32>>,
}

/// 一张切片的网络输出记录
///
/// 文件格式：
///
/// ```json
/// {
///   "ratio": 1.171875,
///   "width": 512, "height": 512,
///   "rpn": { "rows": 37, "cols": 37, "objectness": [...], "regression": [...] },
///   "classifier": [ { "probs": [[...], ...], "deltas": [[...], ...] } ]
/// }
/// ```
///
/// `ratio` 与 `width`/`height` 至少给出一个；RPN 张量按 [rows][cols][channels] 展平。
#[derive(Debug, Clone)]
pub struct ReplayFrame {
  source: PathBuf,
  ratio: Option<f64>,
  size: Option<(u32, u32)>,
  objectness: ScoreMap,
  regression: ScoreMap,
  batches: Arc<[ClassifierOutput]>,
}

impl ReplayFrame {
  pub fn new(objectness: ScoreMap, regression: ScoreMap, batches: Vec<ClassifierOutput>) -> Self {
    Self {
      source: PathBuf::from("<memory>"),
      ratio: None,
      size: None,
      objectness,
      regression,
      batches: batches.into(),
    }
  }

  pub fn with_ratio(mut self, ratio: f64) -> Self {
    self.ratio = Some(ratio);
    self
  }

  pub fn with_size(mut self, width: u32, height: u32) -> Self {
    self.size = Some((width, height));
    self
  }

  pub fn load(path: impl AsRef<Path>) -> Result<Self, ReplayError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ReplayError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    let dump: Dump = serde_json::from_str(&content).map_err(|source| ReplayError::Parse {
      path: path.to_path_buf(),
      source,
    })?;
    let shape_error = |source| ReplayError::Shape {
      path: path.to_path_buf(),
      source,
    };

    let DumpRpn {
      rows,
      cols,
      objectness,
      regression,
    } = dump.rpn;
    let anchors = objectness.len() / (rows * cols).max(1);
    let objectness = ScoreMap::new(rows, cols, anchors, objectness).map_err(shape_error)?;
    let regression = ScoreMap::new(rows, cols, 4 * anchors, regression).map_err(shape_error)?;

    let batches = dump
      .classifier
      .iter()
      .map(|batch| ClassifierOutput::from_rows(&batch.probs, &batch.deltas))
      .collect::<Result<Vec<_>, _>>()
      .map_err(shape_error)?;

    debug!(
      "读取网络输出记录 {}: 特征图 {}x{}, {} 批分类器输出",
      path.display(),
      rows,
      cols,
      batches.len()
    );

    Ok(Self {
      source: path.to_path_buf(),
      ratio: dump.ratio,
      size: dump.width.zip(dump.height),
      objectness,
      regression,
      batches: batches.into(),
    })
  }

  /// 工作分辨率缩放比例：优先使用记录中的值，否则由原图尺寸推算
  pub fn resize_ratio(&self, im_size: u32) -> Option<f64> {
    self
      .ratio
      .or_else(|| self.size.map(|(w, h)| working_size(w, h, im_size).ratio))
  }
}

/// 回放网络共享给分类阶段的「特征」：即记录下的分类器输出
#[derive(Debug, Clone)]
pub struct ReplayFeatures {
  source: PathBuf,
  batches: Arc<[ClassifierOutput]>,
}

/// 按批次序号返回记录的输出，不做任何推理
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplayNetwork;

impl Network for ReplayNetwork {
  type Image = ReplayFrame;
  type Features = ReplayFeatures;
  type Error = ReplayError;

  fn propose(&self, image: &ReplayFrame) -> Result<RpnOutput<ReplayFeatures>, ReplayError> {
    Ok(RpnOutput {
      objectness: image.objectness.clone(),
      regression: image.regression.clone(),
      features: ReplayFeatures {
        source: image.source.clone(),
        batches: Arc::clone(&image.batches),
      },
    })
  }

  fn classify(
    &self,
    features: &ReplayFeatures,
    batch: &RegionBatch,
  ) -> Result<ClassifierOutput, ReplayError> {
    features
      .batches
      .get(batch.index())
      .cloned()
      .ok_or_else(|| ReplayError::MissingBatch {
        path: features.source.clone(),
        index: batch.index(),
      })
  }
}
