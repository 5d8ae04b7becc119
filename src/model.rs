// 该文件是 Linzhi （林芝） 项目的一部分。
// src/model.rs - 网络协作者接口
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

use std::sync::{Mutex, PoisonError};

use thiserror::Error;

use crate::batch::RegionBatch;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
  #[error("{what} 形状不匹配: 期望 {expected}, 实际 {actual}")]
  Shape {
    what: &'static str,
    expected: String,
    actual: String,
  },
}

impl ModelError {
  pub fn shape(what: &'static str, expected: impl ToString, actual: impl ToString) -> Self {
    ModelError::Shape {
      what,
      expected: expected.to_string(),
      actual: actual.to_string(),
    }
  }
}

/// 特征图上的输出张量，布局为 [rows][cols][channels]
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreMap {
  rows: usize,
  cols: usize,
  channels: usize,
  data: Box<[f32]>,
}

impl ScoreMap {
  pub fn new(rows: usize, cols: usize, channels: usize, data: Vec<f32>) -> Result<Self, ModelError> {
    let expected = rows * cols * channels;
    if data.len() != expected {
      return Err(ModelError::shape(
        "特征图张量",
        format!("{}x{}x{} = {}", rows, cols, channels, expected),
        data.len(),
      ));
    }

    Ok(Self {
      rows,
      cols,
      channels,
      data: data.into_boxed_slice(),
    })
  }

  pub fn rows(&self) -> usize {
    self.rows
  }

  pub fn cols(&self) -> usize {
    self.cols
  }

  pub fn channels(&self) -> usize {
    self.channels
  }

  pub fn get(&self, row: usize, col: usize, channel: usize) -> f32 {
    self.data[(row * self.cols + col) * self.channels + channel]
  }
}

/// RPN 输出：目标性分数、回归量以及共享特征
#[derive(Debug, Clone)]
pub struct RpnOutput<F> {
  /// 每个锚框形状一个通道
  pub objectness: ScoreMap,
  /// 每个锚框形状四个通道 (tx, ty, tw, th)
  pub regression: ScoreMap,
  pub features: F,
}

/// 分类器对一批区域的输出
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierOutput {
  num_classes: usize,
  probs: Box<[f32]>,
  deltas: Box<[f32]>,
}

impl ClassifierOutput {
  /// `probs` 为 rois x C，`deltas` 为 rois x 4C，C 包含背景类别
  pub fn new(
    rois: usize,
    num_classes: usize,
    probs: Vec<f32>,
    deltas: Vec<f32>,
  ) -> Result<Self, ModelError> {
    if probs.len() != rois * num_classes {
      return Err(ModelError::shape(
        "分类概率",
        format!("{}x{}", rois, num_classes),
        probs.len(),
      ));
    }
    if deltas.len() != rois * num_classes * 4 {
      return Err(ModelError::shape(
        "分类回归量",
        format!("{}x{}", rois, num_classes * 4),
        deltas.len(),
      ));
    }

    Ok(Self {
      num_classes,
      probs: probs.into_boxed_slice(),
      deltas: deltas.into_boxed_slice(),
    })
  }

  /// 从逐区域的二维数组构建
  pub fn from_rows(probs: &[Vec<f32>], deltas: &[Vec<f32>]) -> Result<Self, ModelError> {
    let rois = probs.len();
    let num_classes = probs.first().map(Vec::len).unwrap_or_default();
    if deltas.len() != rois {
      return Err(ModelError::shape("分类回归量行数", rois, deltas.len()));
    }
    for (roi, (p, d)) in probs.iter().zip(deltas).enumerate() {
      if p.len() != num_classes {
        return Err(ModelError::shape(
          "分类概率行长度",
          num_classes,
          format!("第 {} 行 {}", roi, p.len()),
        ));
      }
      if d.len() != 4 * num_classes {
        return Err(ModelError::shape(
          "分类回归量行长度",
          4 * num_classes,
          format!("第 {} 行 {}", roi, d.len()),
        ));
      }
    }
    Self::new(rois, num_classes, probs.concat(), deltas.concat())
  }

  pub fn rois(&self) -> usize {
    if self.num_classes == 0 {
      0
    } else {
      self.probs.len() / self.num_classes
    }
  }

  pub fn num_classes(&self) -> usize {
    self.num_classes
  }

  pub fn probs(&self, roi: usize) -> &[f32] {
    &self.probs[roi * self.num_classes..(roi + 1) * self.num_classes]
  }

  /// 指定区域、指定类别的四个回归量
  pub fn deltas(&self, roi: usize, class: usize) -> [f32; 4] {
    let base = (roi * self.num_classes + class) * 4;
    [
      self.deltas[base],
      self.deltas[base + 1],
      self.deltas[base + 2],
      self.deltas[base + 3],
    ]
  }
}

/// 外部网络：RPN 与区域分类器
pub trait Network {
  type Image;
  type Features;
  type Error;

  fn propose(&self, image: &Self::Image) -> Result<RpnOutput<Self::Features>, Self::Error>;
  fn classify(
    &self,
    features: &Self::Features,
    batch: &RegionBatch,
  ) -> Result<ClassifierOutput, Self::Error>;
}

/// 以互斥锁串行化访问不可重入的网络
pub struct Serialized<N> {
  inner: Mutex<N>,
}

impl<N> Serialized<N> {
  pub fn new(network: N) -> Self {
    Self {
      inner: Mutex::new(network),
    }
  }

  pub fn into_inner(self) -> N {
    self.inner.into_inner().unwrap_or_else(PoisonError::into_inner)
  }
}

impl<N: Network> Network for Serialized<N> {
  type Image = N::Image;
  type Features = N::Features;
  type Error = N::Error;

  fn propose(&self, image: &Self::Image) -> Result<RpnOutput<Self::Features>, Self::Error> {
    let network = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
    network.propose(image)
  }

  fn classify(
    &self,
    features: &Self::Features,
    batch: &RegionBatch,
  ) -> Result<ClassifierOutput, Self::Error> {
    let network = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
    network.classify(features, batch)
  }
}

mod replay;
pub use self::replay::{ReplayError, ReplayFeatures, ReplayFrame, ReplayNetwork};

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn score_map_is_channels_last() {
    let map = ScoreMap::new(2, 3, 2, (0..12).map(|v| v as f32).collect()).unwrap();
    assert_eq!(map.get(0, 0, 1), 1.0);
    assert_eq!(map.get(0, 2, 0), 4.0);
    assert_eq!(map.get(1, 1, 1), 9.0);
  }

  #[test]
  fn score_map_rejects_wrong_length() {
    assert!(matches!(
      ScoreMap::new(2, 2, 1, vec![0.0; 3]),
      Err(ModelError::Shape { .. })
    ));
  }

  #[test]
  fn classifier_output_indexing() {
    let probs = vec![vec![0.1, 0.9], vec![0.7, 0.3]];
    let deltas = vec![
      vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0],
      vec![9.0, 10.0, 11.0, 12.0, 13.0, 14.0, 15.0, 16.0],
    ];
    let output = ClassifierOutput::from_rows(&probs, &deltas).unwrap();
    assert_eq!(output.rois(), 2);
    assert_eq!(output.num_classes(), 2);
    assert_eq!(output.probs(1), &[0.7, 0.3]);
    assert_eq!(output.deltas(0, 1), [5.0, 6.0, 7.0, 8.0]);
    assert_eq!(output.deltas(1, 0), [9.0, 10.0, 11.0, 12.0]);
  }

  #[test]
  fn serialized_network_forwards_calls() {
    let frame = ReplayFrame::new(
      ScoreMap::new(1, 1, 1, vec![0.5]).unwrap(),
      ScoreMap::new(1, 1, 4, vec![0.0; 4]).unwrap(),
      Vec::new(),
    );
    let network = Serialized::new(ReplayNetwork);
    let rpn = std::thread::scope(|scope| {
      scope
        .spawn(|| network.propose(&frame))
        .join()
        .unwrap()
        .unwrap()
    });
    assert_eq!(rpn.objectness.get(0, 0, 0), 0.5);
    let _: ReplayNetwork = network.into_inner();
  }

  #[test]
  fn classifier_output_rejects_ragged_probability_rows() {
    // 总长度恰好为 3 x 2，但各行长度不一致
    let probs = vec![vec![0.1, 0.9], vec![0.2, 0.3, 0.5], vec![0.7]];
    let deltas = vec![vec![0.0; 8]; 3];
    let err = ClassifierOutput::from_rows(&probs, &deltas).unwrap_err();
    assert!(matches!(err, ModelError::Shape { ref actual, .. } if actual.contains("第 1 行")));
  }

  #[test]
  fn classifier_output_rejects_ragged_delta_rows() {
    let probs = vec![vec![0.1, 0.9], vec![0.2, 0.8]];
    let deltas = vec![vec![0.0; 12], vec![0.0; 4]];
    assert!(matches!(
      ClassifierOutput::from_rows(&probs, &deltas),
      Err(ModelError::Shape { .. })
    ));
  }

  #[test]
  fn classifier_output_rejects_ragged_deltas() {
    let probs = vec![vec![0.1, 0.9]];
    let deltas = vec![vec![1.0, 2.0, 3.0]];
    assert!(ClassifierOutput::from_rows(&probs, &deltas).is_err());
  }
}
