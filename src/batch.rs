// 该文件是 Linzhi （林芝） 项目的一部分。
// src/batch.rs - 候选区域分批
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

use tracing::debug;

use crate::geometry::{Grid, SizeBox};

/// 一次送入分类器的定长区域批次
#[derive(Debug, Clone, PartialEq)]
pub struct RegionBatch {
  index: usize,
  regions: Box<[SizeBox<Grid>]>,
  padded: usize,
}

impl RegionBatch {
  /// 批次序号，从 0 开始
  pub fn index(&self) -> usize {
    self.index
  }

  pub fn regions(&self) -> &[SizeBox<Grid>] {
    &self.regions
  }

  pub fn len(&self) -> usize {
    self.regions.len()
  }

  pub fn is_empty(&self) -> bool {
    self.regions.is_empty()
  }

  /// 末尾填充的区域数
  pub fn padded(&self) -> usize {
    self.padded
  }
}

/// 将候选区域切分为容量为 K 的批次
///
/// 最后一个不满的批次用该批次的第一个区域重复填充，而不是补零：
/// 全零区域在分类器中的行为不可预期。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionBatcher {
  capacity: NonZeroUsize,
}

impl RegionBatcher {
  pub fn new(capacity: NonZeroUsize) -> Self {
    Self { capacity }
  }

  pub fn capacity(&self) -> usize {
    self.capacity.get()
  }

  pub fn batches(&self, regions: &[SizeBox<Grid>]) -> Vec<RegionBatch> {
    let capacity = self.capacity.get();

    regions
      .chunks(capacity)
      .enumerate()
      .map(|(index, chunk)| {
        let padded = capacity - chunk.len();
        let mut batch = Vec::with_capacity(capacity);
        batch.extend_from_slice(chunk);
        batch.resize(capacity, chunk[0]);
        if padded > 0 {
          debug!("第 {} 批区域不足 {} 个, 填充 {} 个", index, capacity, padded);
        }
        RegionBatch {
          index,
          regions: batch.into_boxed_slice(),
          padded,
        }
      })
      .collect()
  }
}
