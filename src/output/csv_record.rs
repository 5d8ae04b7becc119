// 该文件是 Linzhi （林芝） 项目的一部分。
// src/output/csv_record.rs - CSV 结果记录
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

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use tracing::{error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  output::{Detection, OutputError, RecordSink},
  utils::url_path,
};

pub const CSV_HEADER: &str = "seriesuid,coordX,coordY,coordZ,probability";

struct Inner<W> {
  writer: W,
  records: usize,
}

/// 每条检测结果写一行 `seriesuid,coordX,coordY,coordZ,probability`
pub struct CsvRecordOutput<W: Write> {
  inner: Mutex<Inner<W>>,
}

/// 写入文件的 CSV 输出
pub type CsvFileOutput = CsvRecordOutput<BufWriter<File>>;

impl<W: Write> CsvRecordOutput<W> {
  /// 立即写入表头
  pub fn new(mut writer: W) -> Result<Self, OutputError> {
    writeln!(writer, "{}", CSV_HEADER)?;
    Ok(Self {
      inner: Mutex::new(Inner { writer, records: 0 }),
    })
  }

  /// 已写入的记录数，不含表头
  pub fn records(&self) -> usize {
    self.inner.lock().unwrap_or_else(PoisonError::into_inner).records
  }

  pub fn into_inner(self) -> W {
    self
      .inner
      .into_inner()
      .unwrap_or_else(PoisonError::into_inner)
      .writer
  }
}

impl CsvFileOutput {
  pub fn create(path: impl AsRef<Path>) -> Result<Self, OutputError> {
    let path = path.as_ref();
    let create_error = |source| OutputError::Create {
      path: path.to_path_buf(),
      source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
      std::fs::create_dir_all(parent).map_err(create_error)?;
    }
    let file = File::create(path).map_err(create_error)?;
    info!("检测结果写入 {}", path.display());
    Self::new(BufWriter::new(file))
  }
}

impl FromUrlWithScheme for CsvFileOutput {
  const SCHEME: &'static str = "csv";
}

impl FromUrl for CsvFileOutput {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(OutputError::SchemeMismatch {
        expected: Self::SCHEME,
        actual: url.scheme().to_string(),
      });
    }

    Self::create(url_path(url)?)
  }
}

impl<W: Write> RecordSink for CsvRecordOutput<W> {
  type Error = OutputError;

  fn append(&self, detections: &[Detection]) -> Result<(), Self::Error> {
    if detections.is_empty() {
      return Ok(());
    }

    let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
    for detection in detections {
      let (z, y, x) = detection.position.zyx();
      writeln!(
        inner.writer,
        "{},{},{},{},{}",
        detection.sample_id, x, y, z, detection.score
      )?;
    }
    inner.records += detections.len();
    Ok(())
  }

  fn finish(&self) -> Result<(), Self::Error> {
    let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
    inner.writer.flush()?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    coord::Position,
    geometry::{PixelBox, VoxelPoint, WorldPoint},
  };

  fn detection(sample_id: &str, position: Position, score: f32) -> Detection {
    Detection {
      sample_id: sample_id.to_string(),
      slice_index: 0,
      class: 0,
      label: "nodule".to_string(),
      score,
      bbox: PixelBox {
        x1: 0,
        y1: 0,
        x2: 1,
        y2: 1,
      },
      position,
    }
  }

  #[test]
  fn header_is_written_even_without_records() {
    let output = CsvRecordOutput::new(Vec::new()).unwrap();
    output.append(&[]).unwrap();
    output.finish().unwrap();
    assert_eq!(output.records(), 0);
    assert_eq!(
      String::from_utf8(output.into_inner()).unwrap(),
      format!("{CSV_HEADER}\n")
    );
  }

  #[test]
  fn records_are_x_y_z_ordered() {
    let output = CsvRecordOutput::new(Vec::new()).unwrap();
    output
      .append(&[
        detection(
          "1.3.6.1",
          Position::World(WorldPoint {
            z: -290.0,
            y: -135.5,
            x: 31.25,
          }),
          0.875,
        ),
        detection(
          "ct2",
          Position::Voxel(VoxelPoint {
            z: 3.0,
            y: 4.5,
            x: 7.0,
          }),
          0.5,
        ),
      ])
      .unwrap();
    assert_eq!(output.records(), 2);

    let text = String::from_utf8(output.into_inner()).unwrap();
    let lines: Vec<_> = text.lines().collect();
    assert_eq!(
      lines,
      vec![CSV_HEADER, "1.3.6.1,31.25,-135.5,-290,0.875", "ct2,7,4.5,3,0.5"]
    );
  }

  #[test]
  fn csv_url_creates_parent_directories() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("runs").join("result.csv");
    let url = Url::parse(&format!("csv://{}", path.display())).unwrap();

    let output = CsvFileOutput::from_url(&url).unwrap();
    output.finish().unwrap();
    drop(output);
    assert_eq!(
      std::fs::read_to_string(&path).unwrap(),
      format!("{CSV_HEADER}\n")
    );
  }

  #[test]
  fn wrong_scheme_is_rejected() {
    let url = Url::parse("replay:///tmp/result.csv").unwrap();
    assert!(matches!(
      CsvFileOutput::from_url(&url),
      Err(OutputError::SchemeMismatch { .. })
    ));
  }
}
