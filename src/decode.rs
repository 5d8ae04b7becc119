// 该文件是 Linzhi （林芝） 项目的一部分。
// src/decode.rs - 分类器输出解码
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

use tracing::debug;

use crate::{
  batch::RegionBatch,
  config::{ClassTable, Config},
  geometry::{CornerBox, Grid, SizeBox, Working},
  model::{ClassifierOutput, ModelError},
};

/// 回归反变换的结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Regression {
  /// 反变换成功
  Refined(SizeBox<Grid>),
  /// 反变换产生非有限值，退回原始区域
  Fallback(SizeBox<Grid>),
}

impl Regression {
  pub fn into_box(self) -> SizeBox<Grid> {
    match self {
      Regression::Refined(b) | Regression::Fallback(b) => b,
    }
  }

  pub fn is_fallback(&self) -> bool {
    matches!(self, Regression::Fallback(_))
  }
}

/// 将回归量 (tx, ty, tw, th) 作用于区域，结果取整到网格坐标
///
/// ```text
/// cx' = cx + tx * w    w' = w * exp(tw)
/// cy' = cy + ty * h    h' = h * exp(th)
/// ```
pub fn apply_regression(region: &SizeBox<Grid>, deltas: [f32; 4]) -> Regression {
  let [tx, ty, tw, th] = deltas.map(f64::from);
  let (x, y, w, h) = (
    f64::from(region.x),
    f64::from(region.y),
    f64::from(region.w),
    f64::from(region.h),
  );

  let cx = x + w / 2.0;
  let cy = y + h / 2.0;
  let cx1 = tx * w + cx;
  let cy1 = ty * h + cy;
  let w1 = tw.exp() * w;
  let h1 = th.exp() * h;
  let x1 = cx1 - w1 / 2.0;
  let y1 = cy1 - h1 / 2.0;

  let refined = SizeBox::new(
    x1.round_ties_even() as f32,
    y1.round_ties_even() as f32,
    w1.round_ties_even() as f32,
    h1.round_ties_even() as f32,
  );

  if refined.is_finite() {
    Regression::Refined(refined)
  } else {
    Regression::Fallback(*region)
  }
}

/// 单个类别累积的检测框
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassBucket {
  pub boxes: Vec<CornerBox<Working>>,
  pub scores: Vec<f32>,
}

impl ClassBucket {
  pub fn len(&self) -> usize {
    self.boxes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.boxes.is_empty()
  }
}

/// 类别索引 -> 检测框
pub type ClassBuckets = BTreeMap<usize, ClassBucket>;

/// 分类器输出解码：置信度过滤、回归反变换、按类别累积
#[derive(Debug, Clone)]
pub struct DetectionDecoder {
  classes: ClassTable,
  bbox_threshold: f32,
  regr_std: [f32; 4],
  stride: f32,
}

impl DetectionDecoder {
  pub fn new(config: &Config) -> Self {
    Self {
      classes: config.classes.clone(),
      bbox_threshold: config.bbox_threshold,
      regr_std: config.classifier_regr_std,
      stride: config.rpn_stride,
    }
  }

  /// 解码一个批次，返回本批次保留的区域数
  ///
  /// 填充区域与普通区域同样处理，产生的重复框由后续的非极大值抑制去除。
  pub fn decode_batch(
    &self,
    batch: &RegionBatch,
    output: &ClassifierOutput,
    buckets: &mut ClassBuckets,
  ) -> Result<usize, ModelError> {
    if output.rois() != batch.len() {
      return Err(ModelError::shape("分类器输出区域数", batch.len(), output.rois()));
    }
    if output.num_classes() != self.classes.len() {
      return Err(ModelError::shape(
        "分类器输出类别数",
        self.classes.len(),
        output.num_classes(),
      ));
    }

    let mut retained = 0;
    for (roi, region) in batch.regions().iter().enumerate() {
      let Some((class, score)) = argmax(output.probs(roi)) else {
        continue;
      };

      // 恰好等于阈值的区域同样丢弃
      if score <= self.bbox_threshold || self.classes.is_background(class) {
        continue;
      }

      let deltas = output.deltas(roi, class);
      let deltas = [0, 1, 2, 3].map(|i| deltas[i] / self.regr_std[i]);

      let regression = apply_regression(region, deltas);
      if regression.is_fallback() {
        debug!(
          "批次 {} 区域 {} 回归反变换失败, 使用原始区域 {:?}",
          batch.index(),
          roi,
          region
        );
      }

      let bucket = buckets.entry(class).or_default();
      bucket.boxes.push(regression.into_box().to_working(self.stride));
      bucket.scores.push(score);
      retained += 1;
    }

    debug!("批次 {} 保留 {} 个区域", batch.index(), retained);
    Ok(retained)
  }
}

/// 最大值及其索引，相同时取第一个
fn argmax(values: &[f32]) -> Option<(usize, f32)> {
  let mut best: Option<(usize, f32)> = None;
  for (i, &v) in values.iter().enumerate() {
    match best {
      Some((_, max)) if v <= max => {}
      _ if v.is_nan() => {}
      _ => best = Some((i, v)),
    }
  }
  best
}
