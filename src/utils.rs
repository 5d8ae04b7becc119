// 该文件是 Linzhi （林芝） 项目的一部分。
// src/utils.rs - 通用工具函数
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

use url::Url;

/// 取出 URL 中的路径并做百分号解码
///
/// `replay:///data/ct%20dumps` -> `/data/ct dumps`，`replay:dumps` -> `dumps`
pub fn url_path(url: &Url) -> Result<PathBuf, std::string::FromUtf8Error> {
  let decoded = urlencoding::decode(url.path())?;
  Ok(PathBuf::from(decoded.into_owned()))
}

/// 列出目录下扩展名匹配的文件（不区分大小写），按文件名字典序排列
pub fn sorted_files(directory: &Path, extensions: &[&str]) -> std::io::Result<Vec<PathBuf>> {
  let mut files = Vec::new();
  for entry in std::fs::read_dir(directory)? {
    let path = entry?.path();
    if !path.is_file() {
      continue;
    }
    let matched = path
      .extension()
      .and_then(|ext| ext.to_str())
      .map(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
      .unwrap_or(false);
    if matched {
      files.push(path);
    }
  }
  files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
  Ok(files)
}
