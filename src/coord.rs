// 该文件是 Linzhi （林芝） 项目的一部分。
// src/coord.rs - 坐标映射：工作分辨率 -> 原图 -> 物理空间
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

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::geometry::{CornerBox, PixelBox, VoxelPoint, Working, WorldPoint};

#[derive(Error, Debug)]
pub enum CoordError {
  #[error("无法读取空间参数文件 {path}: {source}")]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("空间参数文件 {path} 格式错误: {source}")]
  Parse {
    path: PathBuf,
    source: serde_json::Error,
  },
  #[error("样本 {sample_id} 缺少空间参数 (origin/spacing)")]
  MissingMetadata { sample_id: String },
}

/// 单个样本的体素到物理空间变换参数，均按 (z, y, x) 排列
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(from = "RawSpatialMetadata")]
pub struct SpatialMetadata {
  pub origin: [f64; 3],
  pub spacing: [f64; 3],
}

/// 同时接受 `{"origin": [...], "spacing": [...]}` 与 `[[origin], [spacing]]`
#[derive(Deserialize)]
#[serde(untagged)]
enum RawSpatialMetadata {
  Named { origin: [f64; 3], spacing: [f64; 3] },
  Pair([f64; 3], [f64; 3]),
}

impl From<RawSpatialMetadata> for SpatialMetadata {
  fn from(raw: RawSpatialMetadata) -> Self {
    match raw {
      RawSpatialMetadata::Named { origin, spacing } | RawSpatialMetadata::Pair(origin, spacing) => {
        Self { origin, spacing }
      }
    }
  }
}

impl SpatialMetadata {
  /// world = voxel * spacing + origin
  pub fn to_world(&self, voxel: VoxelPoint) -> WorldPoint {
    WorldPoint {
      z: voxel.z * self.spacing[0] + self.origin[0],
      y: voxel.y * self.spacing[1] + self.origin[1],
      x: voxel.x * self.spacing[2] + self.origin[2],
    }
  }
}

/// 样本编号 -> 空间参数，启动时加载一次
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct SpatialMetadataStore {
  entries: HashMap<String, SpatialMetadata>,
}

impl SpatialMetadataStore {
  pub fn load(path: impl AsRef<Path>) -> Result<Self, CoordError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| CoordError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    let store: Self = serde_json::from_str(&content).map_err(|source| CoordError::Parse {
      path: path.to_path_buf(),
      source,
    })?;
    info!("加载 {} 个样本的空间参数: {}", store.len(), path.display());
    Ok(store)
  }

  pub fn insert(&mut self, sample_id: impl Into<String>, metadata: SpatialMetadata) {
    self.entries.insert(sample_id.into(), metadata);
  }

  pub fn get(&self, sample_id: &str) -> Option<&SpatialMetadata> {
    self.entries.get(sample_id)
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}

/// 检测结果的位置
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Position {
  /// 未启用物理映射时的体素坐标
  Voxel(VoxelPoint),
  /// 物理空间坐标
  World(WorldPoint),
}

impl Position {
  /// (z, y, x)
  pub fn zyx(&self) -> (f64, f64, f64) {
    match self {
      Position::Voxel(p) => (p.z, p.y, p.x),
      Position::World(p) => (p.z, p.y, p.x),
    }
  }
}

/// 坐标映射器
#[derive(Debug, Clone, Default)]
pub struct CoordinateMapper {
  metadata: Option<Arc<SpatialMetadataStore>>,
}

impl CoordinateMapper {
  /// 只做像素缩放，不做物理映射
  pub fn pixel() -> Self {
    Self { metadata: None }
  }

  pub fn physical(metadata: Arc<SpatialMetadataStore>) -> Self {
    Self {
      metadata: Some(metadata),
    }
  }

  pub fn is_physical(&self) -> bool {
    self.metadata.is_some()
  }

  /// 工作分辨率 -> 原图像素：floor(coord / ratio)
  pub fn to_original(&self, working: &CornerBox<Working>, resize_ratio: f64) -> PixelBox {
    let real = |coord: f32| (f64::from(coord) / resize_ratio).floor() as i32;
    PixelBox {
      x1: real(working.x1),
      y1: real(working.y1),
      x2: real(working.x2),
      y2: real(working.y2),
    }
  }

  /// 以框中心与切片序号构成体素坐标，启用物理映射时再变换到物理空间
  pub fn locate(
    &self,
    sample_id: &str,
    slice_index: usize,
    pixel: &PixelBox,
  ) -> Result<Position, CoordError> {
    let (x, y) = pixel.center();
    let voxel = VoxelPoint {
      z: slice_index as f64,
      y,
      x,
    };

    match &self.metadata {
      None => Ok(Position::Voxel(voxel)),
      Some(store) => {
        let metadata = store
          .get(sample_id)
          .ok_or_else(|| CoordError::MissingMetadata {
            sample_id: sample_id.to_string(),
          })?;
        Ok(Position::World(metadata.to_world(voxel)))
      }
    }
  }
}
