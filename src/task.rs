// 该文件是 Linzhi （林芝） 项目的一部分。
// src/task.rs - 检测任务循环
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
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use std::thread;

use anyhow::Context;
use tracing::{info, warn};

use crate::{
  detector::Detector,
  input::{InputError, Sample},
  model::Network,
  output::RecordSink,
};

pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<RunSummary, Self::Error>;
}

/// 一次运行的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
  pub samples: usize,
  pub records: usize,
}

fn install_interrupt() -> anyhow::Result<Arc<AtomicBool>> {
  let stop = Arc::new(AtomicBool::new(false));
  let flag = Arc::clone(&stop);

  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    flag.store(true, Ordering::SeqCst);
    thread::spawn(|| {
      thread::sleep(Duration::from_secs(30));
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })
  .context("无法设置 Ctrl-C 处理函数")?;

  Ok(stop)
}

/// 逐个样本处理
#[derive(Default, Debug)]
pub struct SequentialTask {
  interrupt: bool,
  sample_limit: Option<usize>,
}

impl SequentialTask {
  /// 收到 Ctrl-C 后在当前样本完成时退出
  pub fn with_interrupt(mut self, interrupt: bool) -> Self {
    self.interrupt = interrupt;
    self
  }

  pub fn with_sample_limit(mut self, sample_limit: Option<usize>) -> Self {
    self.sample_limit = sample_limit;
    self
  }
}

impl<I, N, O> Task<I, Detector<N>, O> for SequentialTask
where
  I: Iterator<Item = Result<Sample<N::Image>, InputError>>,
  N: Network,
  N::Error: std::error::Error + Send + Sync + 'static,
  O: RecordSink,
  O::Error: std::error::Error + Send + Sync + 'static,
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, detector: Detector<N>, output: O) -> Result<RunSummary, Self::Error> {
    info!("开始任务...");
    let stop = if self.interrupt {
      Some(install_interrupt()?)
    } else {
      None
    };

    let now = Instant::now();
    let mut summary = RunSummary::default();
    for sample in input {
      let sample = sample?;
      let detections = detector.detect(&sample)?;
      output.append(&detections)?;
      summary.samples += 1;
      summary.records += detections.len();

      if self.sample_limit.is_some_and(|n| summary.samples >= n) {
        info!("达到指定样本数 {}, 退出任务循环", summary.samples);
        break;
      }
      if stop.as_ref().is_some_and(|s| s.load(Ordering::SeqCst)) {
        warn!("中断信号接收，退出任务循环");
        break;
      }
    }
    output.finish()?;

    info!(
      "任务完成: {} 个样本, {} 条记录, 耗时 {:.2?}",
      summary.samples,
      summary.records,
      now.elapsed()
    );
    Ok(summary)
  }
}

/// 多个工作线程从共享的样本迭代器中取样本
///
/// 跨样本的记录顺序不确定，同一样本的记录保持连续。
/// 任一样本出错后其余线程在完成当前样本时退出，返回第一个错误。
#[derive(Debug)]
pub struct ParallelTask {
  workers: NonZeroUsize,
  interrupt: bool,
}

impl ParallelTask {
  pub fn new(workers: NonZeroUsize) -> Self {
    Self {
      workers,
      interrupt: false,
    }
  }

  pub fn with_interrupt(mut self, interrupt: bool) -> Self {
    self.interrupt = interrupt;
    self
  }
}

impl<I, N, O> Task<I, Detector<N>, O> for ParallelTask
where
  I: Iterator<Item = Result<Sample<N::Image>, InputError>> + Send,
  N: Network + Sync,
  N::Error: std::error::Error + Send + Sync + 'static,
  O: RecordSink + Sync,
  O::Error: std::error::Error + Send + Sync + 'static,
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, detector: Detector<N>, output: O) -> Result<RunSummary, Self::Error> {
    info!("开始任务... ({} 个工作线程)", self.workers);
    let stop = if self.interrupt {
      install_interrupt()?
    } else {
      Arc::new(AtomicBool::new(false))
    };

    let now = Instant::now();
    let input = Mutex::new(input);
    let samples = AtomicUsize::new(0);
    let records = AtomicUsize::new(0);

    let work = |worker: usize| -> anyhow::Result<()> {
      while !stop.load(Ordering::SeqCst) {
        let next = input.lock().unwrap_or_else(PoisonError::into_inner).next();
        let Some(sample) = next else {
          break;
        };

        let outcome = sample.map_err(anyhow::Error::from).and_then(|sample| {
          let detections = detector.detect(&sample)?;
          output.append(&detections)?;
          Ok(detections.len())
        });
        match outcome {
          Ok(count) => {
            samples.fetch_add(1, Ordering::SeqCst);
            records.fetch_add(count, Ordering::SeqCst);
          }
          Err(err) => {
            warn!("工作线程 {} 出错, 停止任务", worker);
            stop.store(true, Ordering::SeqCst);
            return Err(err);
          }
        }
      }
      Ok(())
    };

    thread::scope(|scope| {
      let work = &work;
      let handles: Vec<_> = (0..self.workers.get())
        .map(|worker| scope.spawn(move || work(worker)))
        .collect();
      handles
        .into_iter()
        .map(|handle| {
          handle
            .join()
            .unwrap_or_else(|_| Err(anyhow::anyhow!("工作线程异常退出")))
        })
        .collect::<anyhow::Result<()>>()
    })?;
    output.finish()?;

    let summary = RunSummary {
      samples: samples.into_inner(),
      records: records.into_inner(),
    };
    info!(
      "任务完成: {} 个样本, {} 条记录, 耗时 {:.2?}",
      summary.samples,
      summary.records,
      now.elapsed()
    );
    Ok(summary)
  }
}
