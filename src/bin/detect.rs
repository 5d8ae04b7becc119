// 该文件是 Linzhi （林芝） 项目的一部分。
// src/bin/detect.rs - 结节检测命令行程序
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

use anyhow::{Result, bail};
use clap::Parser;
use tracing::info;
use url::Url;

use linzhi::{
  FromUrl, FromUrlWithScheme,
  config::Config,
  coord::{CoordinateMapper, SpatialMetadataStore},
  detector::Detector,
  input::{InputError, ReplayDirectory, Sample, SkipSlices},
  model::{ReplayFrame, ReplayNetwork},
  output::CsvFileOutput,
  task::{ParallelTask, RunSummary, SequentialTask, Task},
};

/// Linzhi 检测参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 训练时保存的配置文件 (JSON)
  #[arg(long, value_name = "CONFIG")]
  pub config: PathBuf,
  /// 输入来源，例如 replay:///data/dumps
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出路径，例如 csv:///data/result.csv
  ///
  /// 缺省时写到配置文件旁，文件名取配置文件名去掉扩展名：
  /// cfg.json -> cfg_result.csv（--skip 时为 cfg_skip_result.csv）
  #[arg(long, value_name = "OUTPUT")]
  pub output: Option<Url>,
  /// 样本空间参数 (origin/spacing)，给出时输出物理坐标
  #[arg(long, value_name = "SPATIAL")]
  pub spatial: Option<PathBuf>,
  /// 覆盖配置中的每批区域数
  #[arg(long, value_name = "NUM_ROIS")]
  pub num_rois: Option<usize>,
  /// 每个序列只处理每第三张切片
  #[arg(long)]
  pub skip: bool,
  /// 工作线程数
  #[arg(long, value_name = "WORKERS", default_value = "1")]
  pub workers: NonZeroUsize,
  /// 最多处理的切片数，只能用于单线程运行
  #[arg(long, value_name = "SAMPLE_LIMIT")]
  pub sample_limit: Option<usize>,
}

/// `<config 去掉扩展名>_result.csv`，跳片时为 `<config 去掉扩展名>_skip_result.csv`
fn default_output(config: &Path, skip: bool) -> PathBuf {
  let stem = config
    .file_stem()
    .map(|s| s.to_string_lossy().into_owned())
    .unwrap_or_else(|| "config".to_string());
  let suffix = if skip { "_skip_result.csv" } else { "_result.csv" };
  config.with_file_name(format!("{stem}{suffix}"))
}

type Samples = Box<dyn Iterator<Item = Result<Sample<ReplayFrame>, InputError>> + Send>;

/// 所有输入与配置检查通过后才创建结果文件，避免覆盖已有结果
fn run(args: Args, interrupt: bool) -> Result<RunSummary> {
  if args.workers.get() > 1 && args.sample_limit.is_some() {
    bail!("--sample-limit 只能用于单线程运行 (--workers 1)");
  }

  let mut config = Config::load(&args.config)?;
  if let Some(num_rois) = args.num_rois {
    config = config.with_num_rois(num_rois)?;
  }

  let mapper = match &args.spatial {
    Some(path) => CoordinateMapper::physical(Arc::new(SpatialMetadataStore::load(path)?)),
    None => CoordinateMapper::pixel(),
  };

  if args.input.scheme() != ReplayDirectory::SCHEME {
    bail!(
      "不支持的输入来源 '{}': 命令行只能回放 {}:// 记录, 图像目录需要接入推理网络",
      args.input,
      ReplayDirectory::SCHEME
    );
  }
  let input = ReplayDirectory::from_url(&args.input)?.with_im_size(config.im_size);
  let input: Samples = if args.skip {
    Box::new(SkipSlices::every_third(input))
  } else {
    Box::new(input)
  };

  let detector = Detector::new(&config, mapper, ReplayNetwork)?;

  let output = match &args.output {
    Some(url) => CsvFileOutput::from_url(url)?,
    None => CsvFileOutput::create(default_output(&args.config, args.skip))?,
  };

  if args.workers.get() > 1 {
    ParallelTask::new(args.workers)
      .with_interrupt(interrupt)
      .run_task(input, detector, &output)
  } else {
    SequentialTask::default()
      .with_interrupt(interrupt)
      .with_sample_limit(args.sample_limit)
      .run_task(input, detector, &output)
  }
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("配置文件: {}", args.config.display());
  info!("输入来源: {}", args.input);

  let summary = run(args, true)?;

  info!(
    "共处理 {} 张切片, 写入 {} 条检测记录",
    summary.samples, summary.records
  );
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  const PRIOR: &str = "seriesuid,coordX,coordY,coordZ,probability\nold,1,2,3,0.9\n";

  struct Workspace {
    dir: tempfile::TempDir,
  }

  impl Workspace {
    fn new() -> Self {
      let dir = tempfile::tempdir().unwrap();
      std::fs::write(dir.path().join("cfg.json"), r#"{ "class_mapping": { "nodule": 0 } }"#)
        .unwrap();
      std::fs::write(dir.path().join("cfg_result.csv"), PRIOR).unwrap();
      std::fs::create_dir(dir.path().join("dumps")).unwrap();
      Self { dir }
    }

    fn args(&self, extra: &[&str]) -> Args {
      let config = self.dir.path().join("cfg.json");
      let mut argv = vec![
        "linzhi-detect".to_string(),
        "--config".to_string(),
        config.display().to_string(),
      ];
      argv.extend(extra.iter().map(|s| s.to_string()));
      Args::try_parse_from(argv).unwrap()
    }

    fn input(&self, name: &str) -> String {
      format!("replay://{}", self.dir.path().join(name).display())
    }

    fn prior_result(&self) -> String {
      std::fs::read_to_string(self.dir.path().join("cfg_result.csv")).unwrap()
    }
  }

  #[test]
  fn default_output_sits_next_to_the_config() {
    let config = Path::new("/data/run/cfg.json");
    assert_eq!(
      default_output(config, false),
      PathBuf::from("/data/run/cfg_result.csv")
    );
    assert_eq!(
      default_output(config, true),
      PathBuf::from("/data/run/cfg_skip_result.csv")
    );
  }

  #[test]
  fn missing_input_directory_keeps_previous_results() {
    let workspace = Workspace::new();
    let input = workspace.input("no_such_dir");
    let args = workspace.args(&["--input", &input]);

    assert!(run(args, false).is_err());
    assert_eq!(workspace.prior_result(), PRIOR);
  }

  #[test]
  fn unsupported_input_scheme_keeps_previous_results() {
    let workspace = Workspace::new();
    let args = workspace.args(&["--input", "image:///tmp/slices"]);

    assert!(run(args, false).is_err());
    assert_eq!(workspace.prior_result(), PRIOR);
  }

  #[test]
  fn sample_limit_requires_a_single_worker() {
    let workspace = Workspace::new();
    let input = workspace.input("dumps");
    let args = workspace.args(&["--input", &input, "--workers", "2", "--sample-limit", "3"]);

    let err = run(args, false).unwrap_err();
    assert!(err.to_string().contains("--sample-limit"));
    assert_eq!(workspace.prior_result(), PRIOR);
  }

  #[test]
  fn valid_run_replaces_the_default_output() {
    let workspace = Workspace::new();
    let input = workspace.input("dumps");
    let args = workspace.args(&["--input", &input]);

    let summary = run(args, false).unwrap();
    assert_eq!(summary, RunSummary::default());
    assert_eq!(
      workspace.prior_result(),
      "seriesuid,coordX,coordY,coordZ,probability\n"
    );
  }
}
