// 该文件是 Linzhi （林芝） 项目的一部分。
// src/input/read_image_file.rs - 切片图像目录输入
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

use image::{ImageReader, RgbImage, imageops::FilterType};
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  input::{InputError, Sample, SampleName, working_size},
  utils::{sorted_files, url_path},
};

const IMAGE_EXTENSIONS: &[&str] = &["bmp", "jpeg", "jpg", "png", "tif", "tiff"];

/// 按文件名顺序读取切片图像，缩放到工作分辨率
///
/// 灰度图像扩展为三通道 RGB。
pub struct ImageDirectory {
  files: std::vec::IntoIter<PathBuf>,
  im_size: u32,
}

impl FromUrlWithScheme for ImageDirectory {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageDirectory {
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

impl ImageDirectory {
  pub fn open(directory: impl AsRef<Path>) -> Result<Self, InputError> {
    let directory = directory.as_ref();
    let files = sorted_files(directory, IMAGE_EXTENSIONS).map_err(|source| InputError::Io {
      path: directory.to_path_buf(),
      source,
    })?;
    info!("图像目录 {}: {} 个文件", directory.display(), files.len());

    Ok(Self {
      files: files.into_iter(),
      im_size: 600,
    })
  }

  pub fn with_im_size(mut self, im_size: u32) -> Self {
    self.im_size = im_size;
    self
  }

  fn load(&self, path: &Path) -> Result<Sample<RgbImage>, InputError> {
    let name = SampleName::from_path(path)?;
    let image = ImageReader::open(path)
      .map_err(|source| InputError::Io {
        path: path.to_path_buf(),
        source,
      })?
      .decode()
      .map_err(|source| InputError::Image {
        path: path.to_path_buf(),
        source,
      })?
      .to_rgb8();

    let (width, height) = image.dimensions();
    let size = working_size(width, height, self.im_size);
    debug!(
      "{}: {}x{} -> {}x{}",
      path.display(),
      width,
      height,
      size.width,
      size.height
    );
    let image = image::imageops::resize(&image, size.width, size.height, FilterType::CatmullRom);

    Ok(Sample {
      image,
      sample_id: name.sample_id,
      slice_index: name.slice_index,
      resize_ratio: size.ratio,
    })
  }
}

impl Iterator for ImageDirectory {
  type Item = Result<Sample<RgbImage>, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    let path = self.files.next()?;
    Some(self.load(&path))
  }
}
