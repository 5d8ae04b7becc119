// 该文件是 Linzhi （林芝） 项目的一部分。
// src/nms.rs - 非极大值抑制
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

use tracing::debug;

use crate::geometry::{CornerBox, Unit};

/// 贪心非极大值抑制
///
/// 候选框按分数降序处理（分数相同时原始索引小者优先），每保留一个框，
/// 就移除剩余框中与其交并比严格大于阈值的框。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NonMaxSuppression {
  overlap: f32,
  max_boxes: Option<usize>,
}

impl NonMaxSuppression {
  pub fn new(overlap: f32) -> Self {
    Self {
      overlap,
      max_boxes: None,
    }
  }

  /// 最多保留的框数
  pub fn with_max_boxes(mut self, max_boxes: usize) -> Self {
    self.max_boxes = Some(max_boxes);
    self
  }

  /// 返回保留框的索引，按保留顺序（分数降序）排列
  ///
  /// `boxes` 与 `scores` 一一对应，长度不一致时以较短者为准。
  pub fn keep<U: Unit>(&self, boxes: &[CornerBox<U>], scores: &[f32]) -> Vec<usize> {
    debug_assert_eq!(boxes.len(), scores.len());
    let n = boxes.len().min(scores.len());
    let limit = self.max_boxes.unwrap_or(n);
    if n == 0 || limit == 0 {
      return Vec::new();
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]).then(a.cmp(&b)));

    let mut keep = Vec::new();
    let mut suppressed = vec![false; n];

    for (rank, &current) in order.iter().enumerate() {
      if suppressed[current] {
        continue;
      }

      keep.push(current);
      if keep.len() >= limit {
        break;
      }

      let best = &boxes[current];
      for &other in &order[(rank + 1)..] {
        if !suppressed[other] && best.iou(&boxes[other]) > self.overlap {
          suppressed[other] = true;
        }
      }
    }

    debug!("非极大值抑制: {} 个候选框保留 {} 个", n, keep.len());
    keep
  }

  /// 对框与分数执行抑制，返回保留的框与分数
  pub fn suppress<U: Unit>(
    &self,
    boxes: &[CornerBox<U>],
    scores: &[f32],
  ) -> (Vec<CornerBox<U>>, Vec<f32>) {
    self
      .keep(boxes, scores)
      .into_iter()
      .map(|i| (boxes[i], scores[i]))
      .unzip()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::geometry::Working;

  fn b(x1: f32, y1: f32, x2: f32, y2: f32) -> CornerBox<Working> {
    CornerBox::new(x1, y1, x2, y2)
  }

  fn sample() -> (Vec<CornerBox<Working>>, Vec<f32>) {
    let boxes = vec![
      b(10.0, 10.0, 50.0, 50.0),
      b(12.0, 12.0, 48.0, 48.0),
      b(100.0, 100.0, 140.0, 150.0),
      b(30.0, 30.0, 70.0, 70.0),
      b(105.0, 98.0, 141.0, 149.0),
      b(0.0, 0.0, 5.0, 5.0),
    ];
    let scores = vec![0.9, 0.85, 0.95, 0.6, 0.7, 0.99];
    (boxes, scores)
  }

  #[test]
  fn overlapping_pair_keeps_the_higher_score() {
    let boxes = vec![b(10.0, 10.0, 50.0, 50.0), b(12.0, 12.0, 48.0, 48.0)];
    let scores = vec![0.9, 0.85];
    let (kept, kept_scores) = NonMaxSuppression::new(0.5).suppress(&boxes, &scores);
    assert_eq!(kept, vec![boxes[0]]);
    assert_eq!(kept_scores, vec![0.9]);
  }

  #[test]
  fn output_is_in_descending_score_order() {
    let (boxes, scores) = sample();
    let keep = NonMaxSuppression::new(0.5).keep(&boxes, &scores);
    assert_eq!(keep, vec![5, 2, 0, 3]);
  }

  #[test]
  fn is_idempotent() {
    let (boxes, scores) = sample();
    let nms = NonMaxSuppression::new(0.3);
    let (once, once_scores) = nms.suppress(&boxes, &scores);
    let (twice, twice_scores) = nms.suppress(&once, &once_scores);
    assert_eq!(once, twice);
    assert_eq!(once_scores, twice_scores);
  }

  #[test]
  fn threshold_one_suppresses_nothing() {
    let (boxes, scores) = sample();
    let mut keep = NonMaxSuppression::new(1.0).keep(&boxes, &scores);
    keep.sort_unstable();
    assert_eq!(keep, (0..boxes.len()).collect::<Vec<_>>());
  }

  #[test]
  fn threshold_zero_leaves_no_overlapping_pair() {
    let (boxes, scores) = sample();
    let (kept, _) = NonMaxSuppression::new(0.0).suppress(&boxes, &scores);
    for (i, a) in kept.iter().enumerate() {
      for other in &kept[(i + 1)..] {
        assert_eq!(a.iou(other), 0.0);
      }
    }
    assert_eq!(kept.len(), 3);
  }

  #[test]
  fn equal_scores_prefer_lower_index() {
    let boxes = vec![b(0.0, 0.0, 10.0, 10.0), b(1.0, 1.0, 10.0, 10.0)];
    let keep = NonMaxSuppression::new(0.5).keep(&boxes, &[0.8, 0.8]);
    assert_eq!(keep, vec![0]);
  }

  #[test]
  fn max_boxes_caps_the_output() {
    let (boxes, scores) = sample();
    let keep = NonMaxSuppression::new(0.5)
      .with_max_boxes(2)
      .keep(&boxes, &scores);
    assert_eq!(keep, vec![5, 2]);
  }

  #[test]
  fn empty_input() {
    let keep = NonMaxSuppression::new(0.5).keep::<Working>(&[], &[]);
    assert!(keep.is_empty());
  }

  #[test]
  fn zero_area_boxes_only_suppressed_by_duplicates() {
    let boxes = vec![
      b(5.0, 5.0, 5.0, 5.0),
      b(5.0, 5.0, 5.0, 5.0),
      b(0.0, 0.0, 10.0, 10.0),
      b(5.0, 5.0, 5.0, 9.0),
    ];
    let keep = NonMaxSuppression::new(0.5).keep(&boxes, &[0.9, 0.8, 0.7, 0.6]);
    assert_eq!(keep, vec![0, 2, 3]);
  }
}
