// 该文件是 Linzhi （林芝） 项目的一部分。
// src/detector.rs - 单张切片的检测流程
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

use std::num::NonZeroUsize;
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, info};

use crate::{
  batch::RegionBatcher,
  config::{ClassTable, Config, ConfigError},
  coord::{CoordError, CoordinateMapper},
  decode::{ClassBuckets, DetectionDecoder},
  geometry::{CornerBox, Grid, SizeBox},
  input::Sample,
  model::{ModelError, Network},
  nms::NonMaxSuppression,
  output::Detection,
  proposal::AnchorProposalDecoder,
};

#[derive(Error, Debug)]
pub enum DetectError {
  #[error("网络推理错误: {0}")]
  Network(#[source] Box<dyn std::error::Error + Send + Sync>),
  #[error("网络输出错误: {0}")]
  Model(#[from] ModelError),
  #[error("坐标映射错误: {0}")]
  Coord(#[from] CoordError),
}

impl DetectError {
  fn network<E: std::error::Error + Send + Sync + 'static>(err: E) -> Self {
    DetectError::Network(Box::new(err))
  }
}

/// 两阶段检测器：候选区域解码 -> 分批分类 -> 按类别抑制 -> 坐标映射
///
/// 检测器本身不持有可变状态，`N: Sync` 时可在多个线程间共享。
pub struct Detector<N> {
  network: N,
  proposals: AnchorProposalDecoder,
  batcher: RegionBatcher,
  decoder: DetectionDecoder,
  nms: NonMaxSuppression,
  classes: ClassTable,
  mapper: CoordinateMapper,
}

impl<N> Detector<N> {
  pub fn new(config: &Config, mapper: CoordinateMapper, network: N) -> Result<Self, ConfigError> {
    let capacity = NonZeroUsize::new(config.num_rois)
      .ok_or_else(|| ConfigError::Invalid("num_rois 必须大于 0".to_string()))?;

    info!(
      "检测器: {} 个锚框形状, 每批 {} 个区域, {} 个类别",
      config.num_anchors(),
      capacity,
      config.classes.len()
    );
    if mapper.is_physical() {
      info!("启用物理坐标映射");
    }

    Ok(Self {
      network,
      proposals: AnchorProposalDecoder::new(config),
      batcher: RegionBatcher::new(capacity),
      decoder: DetectionDecoder::new(config),
      nms: NonMaxSuppression::new(config.detection_overlap).with_max_boxes(config.max_detections),
      classes: config.classes.clone(),
      mapper,
    })
  }
}

impl<N> Detector<N>
where
  N: Network,
  N::Error: std::error::Error + Send + Sync + 'static,
{
  /// 检测一张切片，结果按类别索引、类内分数降序排列
  pub fn detect(&self, sample: &Sample<N::Image>) -> Result<Vec<Detection>, DetectError> {
    let now = Instant::now();

    let rpn = self
      .network
      .propose(&sample.image)
      .map_err(DetectError::network)?;
    let proposals = self.proposals.decode(&rpn.objectness, &rpn.regression)?;
    let regions: Vec<SizeBox<Grid>> = proposals.iter().map(CornerBox::to_size).collect();

    let mut buckets = ClassBuckets::new();
    for batch in self.batcher.batches(&regions) {
      let output = self
        .network
        .classify(&rpn.features, &batch)
        .map_err(DetectError::network)?;
      self.decoder.decode_batch(&batch, &output, &mut buckets)?;
    }

    let mut detections = Vec::new();
    for (&class, bucket) in &buckets {
      let label = self
        .classes
        .name(class)
        .map(str::to_string)
        .unwrap_or_else(|| class.to_string());
      let (boxes, scores) = self.nms.suppress(&bucket.boxes, &bucket.scores);
      debug!(
        "类别 {}: {} 个框, 抑制后保留 {} 个",
        label,
        bucket.len(),
        boxes.len()
      );

      for (working, score) in boxes.iter().zip(scores) {
        let bbox = self.mapper.to_original(working, sample.resize_ratio);
        let position = self
          .mapper
          .locate(&sample.sample_id, sample.slice_index, &bbox)?;
        info!("{}: {:.0} {:?}", label, score * 100.0, bbox);

        detections.push(Detection {
          sample_id: sample.sample_id.clone(),
          slice_index: sample.slice_index,
          class,
          label: label.clone(),
          score,
          bbox,
          position,
        });
      }
    }

    info!(
      "{} 第 {} 张切片: {} 个候选区域, {} 个检测结果, 耗时 {:.2?}",
      sample.sample_id,
      sample.slice_index,
      proposals.len(),
      detections.len(),
      now.elapsed()
    );
    Ok(detections)
  }
}
