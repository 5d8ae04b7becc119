// 该文件是 Linzhi （林芝） 项目的一部分。
// src/input.rs - 样本输入
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
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::model::ReplayError;

mod replay_directory;
pub use self::replay_directory::ReplayDirectory;

#[cfg(feature = "read_image_file")]
mod read_image_file;
#[cfg(feature = "read_image_file")]
pub use self::read_image_file::ImageDirectory;

#[derive(Error, Debug)]
pub enum InputError {
  #[error("URI 方案不匹配: 期望 '{expected}', 实际 '{actual}'")]
  SchemeMismatch {
    expected: &'static str,
    actual: String,
  },
  #[error("URI 路径解码失败: {0}")]
  PathEncoding(#[from] std::string::FromUtf8Error),
  #[error("无法读取 {path}: {source}")]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("文件名 {0} 不符合 <样本编号>_<切片序号>.<扩展名> 格式")]
  BadName(String),
  #[error("{0} 既没有缩放比例也没有原图尺寸")]
  MissingRatio(PathBuf),
  #[error("网络输出记录错误: {0}")]
  Replay(#[from] ReplayError),
  #[cfg(feature = "read_image_file")]
  #[error("图像解码错误 {path}: {source}")]
  Image {
    path: PathBuf,
    source: image::ImageError,
  },
}

/// 一张待检测的切片
#[derive(Debug, Clone)]
pub struct Sample<I> {
  pub image: I,
  pub sample_id: String,
  pub slice_index: usize,
  /// 原图 -> 工作分辨率的缩放比例
  pub resize_ratio: f64,
}

/// 由文件名 `<样本编号>_<切片序号>.<扩展名>` 解析出的样本信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleName {
  pub sample_id: String,
  pub slice_index: usize,
}

impl SampleName {
  pub fn parse(file_name: &str) -> Result<Self, InputError> {
    let bad_name = || InputError::BadName(file_name.to_string());

    let mut parts = file_name.split('_');
    let sample_id = parts.next().filter(|id| !id.is_empty()).ok_or_else(bad_name)?;
    let slice_index = parts
      .next()
      .and_then(|rest| rest.split('.').next())
      .and_then(|slice| slice.parse().ok())
      .ok_or_else(bad_name)?;

    Ok(Self {
      sample_id: sample_id.to_string(),
      slice_index,
    })
  }

  pub fn from_path(path: &Path) -> Result<Self, InputError> {
    let file_name = path
      .file_name()
      .and_then(|name| name.to_str())
      .ok_or_else(|| InputError::BadName(path.display().to_string()))?;
    Self::parse(file_name)
  }
}

/// 工作分辨率
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorkingSize {
  pub ratio: f64,
  pub width: u32,
  pub height: u32,
}

/// 短边缩放到 `im_size`，长边按同一比例缩放并向下取整
pub fn working_size(width: u32, height: u32, im_size: u32) -> WorkingSize {
  let side = f64::from(im_size);
  if width <= height {
    let ratio = side / f64::from(width);
    WorkingSize {
      ratio,
      width: im_size,
      height: (ratio * f64::from(height)) as u32,
    }
  } else {
    let ratio = side / f64::from(height);
    WorkingSize {
      ratio,
      width: (ratio * f64::from(width)) as u32,
      height: im_size,
    }
  }
}

/// `--skip` 时的切片间隔
pub const SKIP_EVERY: NonZeroUsize = NonZeroUsize::new(3).unwrap();

/// 每个序列只保留 `(slice_index + 1) % every == 0` 的切片，错误原样传递
pub struct SkipSlices<I> {
  inner: I,
  every: NonZeroUsize,
}

impl<I> SkipSlices<I> {
  pub fn new(inner: I, every: NonZeroUsize) -> Self {
    Self { inner, every }
  }

  pub fn every_third(inner: I) -> Self {
    Self::new(inner, SKIP_EVERY)
  }
}

impl<I, T> Iterator for SkipSlices<I>
where
  I: Iterator<Item = Result<Sample<T>, InputError>>,
{
  type Item = Result<Sample<T>, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    loop {
      match self.inner.next()? {
        Ok(sample) if (sample.slice_index + 1) % self.every.get() != 0 => {
          debug!("跳过 {} 第 {} 张切片", sample.sample_id, sample.slice_index);
        }
        item => return Some(item),
      }
    }
  }
}
