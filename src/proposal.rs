// 该文件是 Linzhi （林芝） 项目的一部分。
// src/proposal.rs - RPN 候选区域解码
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

use crate::{
  config::{AnchorPlacement, Config},
  decode::apply_regression,
  geometry::{CornerBox, Grid, SizeBox},
  model::{ModelError, ScoreMap},
  nms::NonMaxSuppression,
};

/// 将 RPN 输出的目标性分数与回归量解码为候选区域（特征图网格坐标）
#[derive(Debug, Clone)]
pub struct AnchorProposalDecoder {
  /// 每个锚框形状在网格单位下的 (宽, 高)，按「尺度优先、比例其次」排列
  anchors: Vec<(f32, f32)>,
  std_scaling: f32,
  placement: AnchorPlacement,
  nms: NonMaxSuppression,
}

impl AnchorProposalDecoder {
  pub fn new(config: &Config) -> Self {
    let anchors = config
      .anchor_box_scales
      .iter()
      .flat_map(|&scale| {
        config.anchor_box_ratios.iter().map(move |ratio| {
          (
            scale * ratio[0] / config.rpn_stride,
            scale * ratio[1] / config.rpn_stride,
          )
        })
      })
      .collect();

    Self {
      anchors,
      std_scaling: config.std_scaling,
      placement: config.anchor_placement,
      nms: NonMaxSuppression::new(config.rpn_overlap).with_max_boxes(config.max_proposals),
    }
  }

  pub fn num_anchors(&self) -> usize {
    self.anchors.len()
  }

  /// 解码候选区域，结果按分数降序排列
  ///
  /// 没有候选区域不是错误，返回空列表。
  pub fn decode(
    &self,
    objectness: &ScoreMap,
    regression: &ScoreMap,
  ) -> Result<Vec<CornerBox<Grid>>, ModelError> {
    self.check_shapes(objectness, regression)?;

    let (rows, cols) = (objectness.rows(), objectness.cols());
    let max_x = cols.saturating_sub(1) as f32;
    let max_y = rows.saturating_sub(1) as f32;

    let mut boxes = Vec::new();
    let mut scores = Vec::new();
    let mut fallbacks = 0usize;

    for (a, &(anchor_w, anchor_h)) in self.anchors.iter().enumerate() {
      for r in 0..rows {
        for c in 0..cols {
          let anchor = SizeBox::<Grid>::new(
            c as f32 - anchor_w / 2.0,
            r as f32 - anchor_h / 2.0,
            anchor_w,
            anchor_h,
          );

          if self.placement == AnchorPlacement::Inside
            && (anchor.x < 0.0
              || anchor.y < 0.0
              || anchor.x + anchor.w > max_x
              || anchor.y + anchor.h > max_y)
          {
            continue;
          }

          let deltas = [0, 1, 2, 3].map(|k| regression.get(r, c, 4 * a + k) / self.std_scaling);
          let regressed = apply_regression(&anchor, deltas);
          if regressed.is_fallback() {
            fallbacks += 1;
          }
          let regressed = regressed.into_box();

          let w = regressed.w.max(1.0);
          let h = regressed.h.max(1.0);
          let proposal = CornerBox::new(
            regressed.x.max(0.0),
            regressed.y.max(0.0),
            (regressed.x + w).min(max_x),
            (regressed.y + h).min(max_y),
          );

          if proposal.is_degenerate() {
            continue;
          }

          boxes.push(proposal);
          scores.push(objectness.get(r, c, a));
        }
      }
    }

    if fallbacks > 0 {
      debug!("{} 个锚框回归反变换失败, 使用原始锚框", fallbacks);
    }

    let (proposals, _) = self.nms.suppress(&boxes, &scores);
    debug!(
      "特征图 {}x{}: {} 个有效锚框, 保留 {} 个候选区域",
      rows,
      cols,
      boxes.len(),
      proposals.len()
    );

    Ok(proposals)
  }

  fn check_shapes(&self, objectness: &ScoreMap, regression: &ScoreMap) -> Result<(), ModelError> {
    let num_anchors = self.num_anchors();
    if objectness.channels() != num_anchors {
      return Err(ModelError::shape(
        "目标性分数通道数",
        num_anchors,
        objectness.channels(),
      ));
    }
    if regression.channels() != 4 * num_anchors {
      return Err(ModelError::shape(
        "RPN 回归量通道数",
        4 * num_anchors,
        regression.channels(),
      ));
    }
    if (objectness.rows(), objectness.cols()) != (regression.rows(), regression.cols()) {
      return Err(ModelError::shape(
        "RPN 回归量尺寸",
        format!("{}x{}", objectness.rows(), objectness.cols()),
        format!("{}x{}", regression.rows(), regression.cols()),
      ));
    }
    Ok(())
  }
}
