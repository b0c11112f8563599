// 该文件是 Hongmo （虹膜考勤） 项目的一部分。
// src/model/normalizer.rs - 橡皮筋模型归一化
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

//! 把环形虹膜区域展开为固定尺寸的矩形条带。
//!
//! 约定（修改任何一条都会使既有模板失效）：
//! - 第 `j` 列角度 `θ_j = 2πj / angular_res`，覆盖一整圈，不含终点
//! - 第 `i` 行半径从瞳孔边界线性过渡到虹膜边界，两端都包含
//! - 采样点先裁剪到图像范围，再对四个最近像素做双线性插值
//! - 结果按最小值/最大值线性拉伸到 [0, 1]

use image::{GrayImage, RgbImage};
use ndarray::Array2;

use crate::{
  frame::to_gray,
  model::{IrisGeometry, NormalizeError, NormalizedIris},
};

const RESCALE_EPSILON: f32 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RubberSheetNormalizer {
  radial_res: usize,
  angular_res: usize,
}

impl RubberSheetNormalizer {
  pub fn new(radial_res: usize, angular_res: usize) -> Result<Self, NormalizeError> {
    if radial_res == 0 || angular_res == 0 {
      return Err(NormalizeError::InvalidResolution {
        radial: radial_res,
        angular: angular_res,
      });
    }
    Ok(Self {
      radial_res,
      angular_res,
    })
  }

  /// 输出形状 (radial_res, angular_res)
  pub fn shape(&self) -> (usize, usize) {
    (self.radial_res, self.angular_res)
  }

  pub fn normalize(
    &self,
    crop: &RgbImage,
    geometry: &IrisGeometry,
  ) -> Result<NormalizedIris, NormalizeError> {
    let (width, height) = crop.dimensions();
    if width == 0 || height == 0 {
      return Err(NormalizeError::EmptyCrop);
    }
    if geometry.pupil_radius == 0 || geometry.pupil_radius > geometry.iris_radius {
      return Err(NormalizeError::InvalidGeometry {
        pupil: geometry.pupil_radius,
        iris: geometry.iris_radius,
      });
    }

    let gray = to_gray(crop);
    let (cx, cy) = geometry.center;
    let pupil = geometry.pupil_radius as f32;
    let span = (geometry.iris_radius - geometry.pupil_radius) as f32;
    let x_max = (width - 1) as f32;
    let y_max = (height - 1) as f32;

    let angles: Vec<(f32, f32)> = (0..self.angular_res)
      .map(|j| {
        let theta = 2.0 * std::f32::consts::PI * j as f32 / self.angular_res as f32;
        (theta.cos(), theta.sin())
      })
      .collect();
    let radial_steps = (self.radial_res.max(2) - 1) as f32;

    let mut strip = Array2::from_shape_fn((self.radial_res, self.angular_res), |(i, j)| {
      let t = if self.radial_res == 1 {
        0.0
      } else {
        i as f32 / radial_steps
      };
      let r = pupil + t * span;
      let (cos, sin) = angles[j];
      let x = (cx + r * cos).clamp(0.0, x_max);
      let y = (cy + r * sin).clamp(0.0, y_max);
      bilinear(&gray, x, y)
    });

    let (low, high) = strip
      .iter()
      .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
        (lo.min(v), hi.max(v))
      });
    let scale = high - low + RESCALE_EPSILON;
    strip.mapv_inplace(|v| (v - low) / scale);

    Ok(NormalizedIris::new(strip))
  }
}

/// 双线性插值，坐标必须已在图像范围内；右/下邻居在边界处夹到最后一个像素
fn bilinear(gray: &GrayImage, x: f32, y: f32) -> f32 {
  let (width, height) = gray.dimensions();
  let x0 = x.floor() as u32;
  let y0 = y.floor() as u32;
  let x1 = (x0 + 1).min(width - 1);
  let y1 = (y0 + 1).min(height - 1);
  let fx = x - x0 as f32;
  let fy = y - y0 as f32;

  let ia = gray.get_pixel(x0, y0)[0] as f32;
  let ib = gray.get_pixel(x1, y0)[0] as f32;
  let ic = gray.get_pixel(x0, y1)[0] as f32;
  let id = gray.get_pixel(x1, y1)[0] as f32;

  (1.0 - fx) * (1.0 - fy) * ia + fx * (1.0 - fy) * ib + (1.0 - fx) * fy * ic + fx * fy * id
}
