// 该文件是 Linzhi （林芝） 项目的一部分。
// src/output.rs - 检测结果输出
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

use std::path::PathBuf;

use thiserror::Error;

use crate::{coord::Position, geometry::PixelBox};

mod csv_record;
pub use self::csv_record::{CSV_HEADER, CsvFileOutput, CsvRecordOutput};

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("URI 方案不匹配: 期望 '{expected}', 实际 '{actual}'")]
  SchemeMismatch {
    expected: &'static str,
    actual: String,
  },
  #[error("URI 路径解码失败: {0}")]
  PathEncoding(#[from] std::string::FromUtf8Error),
  #[error("无法创建结果文件 {path}: {source}")]
  Create {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("写入结果失败: {0}")]
  Io(#[from] std::io::Error),
}

/// 一条最终检测结果
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
  pub sample_id: String,
  pub slice_index: usize,
  /// 类别索引，不会是背景
  pub class: usize,
  pub label: String,
  pub score: f32,
  /// 原图像素坐标
  pub bbox: PixelBox,
  pub position: Position,
}

/// 只追加的结果记录流
///
/// 并行任务中多个工作线程共享同一个输出，实现需自行加锁；
/// 同一样本的记录在一次 `append` 中写入，保持连续。
pub trait RecordSink {
  type Error;

  fn append(&self, detections: &[Detection]) -> Result<(), Self::Error>;
  fn finish(&self) -> Result<(), Self::Error>;
}

impl<S: RecordSink> RecordSink for &S {
  type Error = S::Error;

  fn append(&self, detections: &[Detection]) -> Result<(), Self::Error> {
    (**self).append(detections)
  }

  fn finish(&self) -> Result<(), Self::Error> {
    (**self).finish()
  }
}
