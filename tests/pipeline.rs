// 该文件是 Linzhi （林芝） 项目的一部分。
// tests/pipeline.rs - 端到端检测流程测试
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
use std::sync::Arc;

use linzhi::{
  FromUrl,
  config::Config,
  coord::{CoordinateMapper, SpatialMetadataStore},
  detector::Detector,
  input::{ReplayDirectory, SkipSlices},
  model::ReplayNetwork,
  output::{CSV_HEADER, CsvFileOutput},
  task::{ParallelTask, RunSummary, SequentialTask, Task},
};
use tempfile::TempDir;
use url::Url;

const CONFIG: &str = r#"{
  "class_mapping": { "nodule": 0 },
  "anchor_box_scales": [32],
  "anchor_box_ratios": [[1, 1]],
  "rpn_stride": 16,
  "num_rois": 2,
  "max_proposals": 2
}"#;

/// 4x4 特征图上两个候选区域 (0,0,2,2) 与 (1,1,3,3)；`hit` 时第一个区域判为结节
fn dump(hit: bool) -> String {
  let mut objectness = vec![0.1; 16];
  objectness[5] = 0.9;
  objectness[10] = 0.8;
  let probs = if hit {
    "[[0.95, 0.05], [0.1, 0.9]]"
  } else {
    "[[0.05, 0.95], [0.1, 0.9]]"
  };
  format!(
    r#"{{
      "ratio": 2.0,
      "rpn": {{ "rows": 4, "cols": 4, "objectness": {:?}, "regression": {:?} }},
      "classifier": [ {{ "probs": {}, "deltas": {:?} }} ]
    }}"#,
    objectness,
    vec![0.0; 64],
    probs,
    vec![vec![0.0; 8]; 2],
  )
}

const EMPTY_DUMP: &str = r#"{
  "ratio": 1.0,
  "rpn": { "rows": 1, "cols": 1, "objectness": [0.99], "regression": [0, 0, 0, 0] }
}"#;

struct Fixture {
  dir: TempDir,
}

impl Fixture {
  fn new(dumps: &[(&str, String)]) -> Self {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("dumps")).unwrap();
    for (name, content) in dumps {
      std::fs::write(dir.path().join("dumps").join(name), content).unwrap();
    }
    Self { dir }
  }

  fn input(&self) -> ReplayDirectory {
    let url = Url::parse(&format!("replay://{}", self.dir.path().join("dumps").display())).unwrap();
    ReplayDirectory::from_url(&url).unwrap()
  }

  fn output_path(&self) -> PathBuf {
    self.dir.path().join("result.csv")
  }

  fn spatial(&self, json: &str) -> Arc<SpatialMetadataStore> {
    let path = self.dir.path().join("spatial.json");
    std::fs::write(&path, json).unwrap();
    Arc::new(SpatialMetadataStore::load(&path).unwrap())
  }

  fn detector(&self, mapper: CoordinateMapper) -> Detector<ReplayNetwork> {
    let config = Config::from_json_str(CONFIG).unwrap();
    Detector::new(&config, mapper, ReplayNetwork).unwrap()
  }

  fn run(&self, mapper: CoordinateMapper) -> anyhow::Result<RunSummary> {
    let output = CsvFileOutput::create(self.output_path()).unwrap();
    SequentialTask::default().run_task(self.input(), self.detector(mapper), &output)
  }

  fn lines(&self) -> Vec<String> {
    read_lines(&self.output_path())
  }
}

fn read_lines(path: &Path) -> Vec<String> {
  std::fs::read_to_string(path)
    .unwrap()
    .lines()
    .map(str::to_string)
    .collect()
}

#[test]
fn zero_proposals_write_only_the_header() {
  let fixture = Fixture::new(&[("ct_0.json", EMPTY_DUMP.to_string())]);
  let summary = fixture.run(CoordinateMapper::pixel()).unwrap();

  assert_eq!(
    summary,
    RunSummary {
      samples: 1,
      records: 0
    }
  );
  assert_eq!(fixture.lines(), vec![CSV_HEADER]);
}

#[test]
fn records_are_mapped_to_world_coordinates() {
  let fixture = Fixture::new(&[
    ("ctA_0.json", dump(true)),
    ("ctA_1.json", dump(false)),
    ("ctB_4.json", dump(true)),
  ]);
  let store = fixture.spatial(
    r#"{
      "ctA": { "origin": [0, 0, 0], "spacing": [1, 1, 1] },
      "ctB": [[-10, 5, 5], [2, 0.5, 0.5]]
    }"#,
  );

  let summary = fixture.run(CoordinateMapper::physical(store)).unwrap();
  assert_eq!(summary.samples, 3);
  assert_eq!(summary.records, 2);
  // 工作分辨率 (0, 0, 32, 32) / 2 -> (0, 0, 16, 16)，中心 (8, 8)
  assert_eq!(
    fixture.lines(),
    vec![CSV_HEADER, "ctA,8,8,0,0.95", "ctB,9,9,-2,0.95"]
  );
}

#[test]
fn pixel_mode_reports_voxel_coordinates() {
  let fixture = Fixture::new(&[("ct_7.json", dump(true))]);
  fixture.run(CoordinateMapper::pixel()).unwrap();
  assert_eq!(fixture.lines(), vec![CSV_HEADER, "ct,8,8,7,0.95"]);
}

#[test]
fn missing_metadata_aborts_the_run() {
  let fixture = Fixture::new(&[("ctA_0.json", dump(true)), ("ctB_0.json", dump(true))]);
  let store = fixture.spatial(r#"{ "ctA": [[0, 0, 0], [1, 1, 1]] }"#);

  let err = fixture
    .run(CoordinateMapper::physical(store))
    .unwrap_err();
  assert!(err.to_string().contains("ctB"), "{err}");
}

#[test]
fn samples_without_detections_need_no_metadata() {
  let fixture = Fixture::new(&[("ctA_0.json", dump(true)), ("ctB_0.json", dump(false))]);
  let store = fixture.spatial(r#"{ "ctA": [[0, 0, 0], [1, 1, 1]] }"#);

  let summary = fixture.run(CoordinateMapper::physical(store)).unwrap();
  assert_eq!(summary.records, 1);
}

#[test]
fn parallel_run_produces_the_same_record_set() {
  let dumps: Vec<_> = (0..12)
    .map(|i| (format!("ct{}_{}.json", i % 4, i), dump(i % 3 != 0)))
    .collect();
  let dumps: Vec<_> = dumps.iter().map(|(n, d)| (n.as_str(), d.clone())).collect();
  let fixture = Fixture::new(&dumps);

  fixture.run(CoordinateMapper::pixel()).unwrap();
  let mut sequential = fixture.lines();

  let parallel_path = fixture.dir.path().join("parallel.csv");
  let output = CsvFileOutput::create(&parallel_path).unwrap();
  let summary = ParallelTask::new(NonZeroUsize::new(4).unwrap())
    .run_task(
      fixture.input(),
      fixture.detector(CoordinateMapper::pixel()),
      &output,
    )
    .unwrap();
  assert_eq!(summary.samples, 12);
  assert_eq!(summary.records, 8);

  let mut parallel = read_lines(&parallel_path);
  assert_eq!(parallel[0], CSV_HEADER);
  sequential.sort();
  parallel.sort();
  assert_eq!(sequential, parallel);
}

#[test]
fn skip_keeps_every_third_slice() {
  let dumps: Vec<_> = (0..7).map(|i| (format!("ct_{i}.json"), dump(true))).collect();
  let dumps: Vec<_> = dumps.iter().map(|(n, d)| (n.as_str(), d.clone())).collect();
  let fixture = Fixture::new(&dumps);

  let output = CsvFileOutput::create(fixture.output_path()).unwrap();
  let summary = SequentialTask::default()
    .run_task(
      SkipSlices::every_third(fixture.input()),
      fixture.detector(CoordinateMapper::pixel()),
      &output,
    )
    .unwrap();

  assert_eq!(summary.samples, 2);
  assert_eq!(
    fixture.lines(),
    vec![CSV_HEADER, "ct,8,8,2,0.95", "ct,8,8,5,0.95"]
  );
}
