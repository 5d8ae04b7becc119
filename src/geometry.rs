// 该文件是 Linzhi （林芝） 项目的一部分。
// src/geometry.rs - 边界框与坐标类型
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

//! 检测流程中各个阶段的坐标类型。
//!
//! 边界框有两种表示：角点形式 [`CornerBox`]（x1, y1, x2, y2）与尺寸形式
//! [`SizeBox`]（x, y, w, h）。单位由类型参数标记：
//! - [`Grid`]：特征图网格坐标（RPN 与分类器的工作空间）
//! - [`Working`]：缩放后的工作分辨率像素坐标
//!
//! 原图分辨率使用整数像素框 [`PixelBox`]，物理空间使用 [`WorldPoint`]。

use std::fmt::Debug;
use std::marker::PhantomData;

/// 坐标单位标记
pub trait Unit: Debug + Clone + Copy + PartialEq {}

/// 特征图网格单位
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grid;

/// 工作分辨率像素单位
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Working;

impl Unit for Grid {}
impl Unit for Working {}

/// 角点形式边界框 [x1, y1, x2, y2]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CornerBox<U: Unit> {
  pub x1: f32,
  pub y1: f32,
  pub x2: f32,
  pub y2: f32,
  _unit: PhantomData<U>,
}

/// 尺寸形式边界框 [x, y, w, h]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizeBox<U: Unit> {
  pub x: f32,
  pub y: f32,
  pub w: f32,
  pub h: f32,
  _unit: PhantomData<U>,
}

impl<U: Unit> CornerBox<U> {
  pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
    Self {
      x1,
      y1,
      x2,
      y2,
      _unit: PhantomData,
    }
  }

  pub fn width(&self) -> f32 {
    (self.x2 - self.x1).max(0.0)
  }

  pub fn height(&self) -> f32 {
    (self.y2 - self.y1).max(0.0)
  }

  pub fn area(&self) -> f32 {
    self.width() * self.height()
  }

  /// 宽或高为零的退化框
  pub fn is_degenerate(&self) -> bool {
    self.x1 >= self.x2 || self.y1 >= self.y2
  }

  pub fn intersection(&self, other: &Self) -> f32 {
    let w = self.x2.min(other.x2) - self.x1.max(other.x1);
    let h = self.y2.min(other.y2) - self.y1.max(other.y1);
    w.max(0.0) * h.max(0.0)
  }

  /// 交并比
  ///
  /// 零面积框与任何框的交并比均为 0，完全相同的框除外（视为 1）。
  pub fn iou(&self, other: &Self) -> f32 {
    if self == other {
      return 1.0;
    }

    let intersection = self.intersection(other);
    let union = self.area() + other.area() - intersection;

    if union > 0.0 {
      intersection / union
    } else {
      0.0
    }
  }

  pub fn to_size(&self) -> SizeBox<U> {
    SizeBox::new(self.x1, self.y1, self.x2 - self.x1, self.y2 - self.y1)
  }

  pub fn as_array(&self) -> [f32; 4] {
    [self.x1, self.y1, self.x2, self.y2]
  }
}

impl<U: Unit> SizeBox<U> {
  pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
    Self {
      x,
      y,
      w,
      h,
      _unit: PhantomData,
    }
  }

  pub fn to_corner(&self) -> CornerBox<U> {
    CornerBox::new(self.x, self.y, self.x + self.w, self.y + self.h)
  }

  pub fn center(&self) -> (f32, f32) {
    (self.x + self.w / 2.0, self.y + self.h / 2.0)
  }

  pub fn is_finite(&self) -> bool {
    self.x.is_finite() && self.y.is_finite() && self.w.is_finite() && self.h.is_finite()
  }
}

impl SizeBox<Grid> {
  /// 按特征步长换算到工作分辨率的角点框
  pub fn to_working(&self, stride: f32) -> CornerBox<Working> {
    CornerBox::new(
      stride * self.x,
      stride * self.y,
      stride * (self.x + self.w),
      stride * (self.y + self.h),
    )
  }
}

/// 原图分辨率下的整数像素框
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelBox {
  pub x1: i32,
  pub y1: i32,
  pub x2: i32,
  pub y2: i32,
}

impl PixelBox {
  pub fn center(&self) -> (f64, f64) {
    (
      f64::from(self.x1 + self.x2) / 2.0,
      f64::from(self.y1 + self.y2) / 2.0,
    )
  }
}

/// 体素坐标，按 (z, y, x) 排列
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoxelPoint {
  pub z: f64,
  pub y: f64,
  pub x: f64,
}

/// 物理（世界）坐标，按 (z, y, x) 排列
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorldPoint {
  pub z: f64,
  pub y: f64,
  pub x: f64,
}
