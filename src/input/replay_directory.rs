// 该文件是 Linzhi （林芝） 项目的一部分。
// src/input/replay_directory.rs - 网络输出记录目录输入
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

use tracing::{error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  input::{InputError, Sample, SampleName},
  model::ReplayFrame,
  utils::{sorted_files, url_path},
};

const DEFAULT_IM_SIZE: u32 = 600;

/// 按文件名顺序逐个读取目录中的 `<样本编号>_<切片序号>.json`
pub struct ReplayDirectory {
  files: std::vec::IntoIter<PathBuf>,
  im_size: u32,
}

impl FromUrlWithScheme for ReplayDirectory {
  const SCHEME: &'static str = "replay";
}

impl FromUrl for ReplayDirectory {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(InputError::SchemeMismatch {
        expected: Self::SCHEME,
        actual: url.scheme().to_string(),
      });
    }

    Self::open(url_path(url)?)
  }
}

impl ReplayDirectory {
  pub fn open(directory: impl AsRef<Path>) -> Result<Self, InputError> {
    let directory = directory.as_ref();
    let files = sorted_files(directory, &["json"]).map_err(|source| InputError::Io {
      path: directory.to_path_buf(),
      source,
    })?;
    info!("记录目录 {}: {} 个文件", directory.display(), files.len());

    Ok(Self {
      files: files.into_iter(),
      im_size: DEFAULT_IM_SIZE,
    })
  }

  /// 记录中只有原图尺寸时，用于推算缩放比例
  pub fn with_im_size(mut self, im_size: u32) -> Self {
    self.im_size = im_size;
    self
  }

  /// 剩余文件数
  pub fn remaining(&self) -> usize {
    self.files.len()
  }

  fn load(&self, path: &Path) -> Result<Sample<ReplayFrame>, InputError> {
    let name = SampleName::from_path(path)?;
    let frame = ReplayFrame::load(path)?;
    let resize_ratio = frame
      .resize_ratio(self.im_size)
      .ok_or_else(|| InputError::MissingRatio(path.to_path_buf()))?;

    Ok(Sample {
      image: frame,
      sample_id: name.sample_id,
      slice_index: name.slice_index,
      resize_ratio,
    })
  }
}

impl Iterator for ReplayDirectory {
  type Item = Result<Sample<ReplayFrame>, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    let path = self.files.next()?;
    Some(self.load(&path))
  }
}
