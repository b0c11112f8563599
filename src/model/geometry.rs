// 该文件是 Hongmo （虹膜考勤） 项目的一部分。
// src/model/geometry.rs - 由掩码估计虹膜几何
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

use tracing::debug;

use crate::model::{IrisGeometry, IrisMask};

/// 由虹膜掩码估计瞳孔中心、瞳孔半径与虹膜半径
///
/// - 掩码为空：中心取裁剪图中心，虹膜半径为短边的 1/4，标记为 `fallback`
/// - 掩码非空：中心取掩码质心，虹膜半径取等面积圆半径
///
/// 两种情况下瞳孔半径都是虹膜半径乘以 `pupil_ratio`，且满足
/// `0 < pupil_radius <= iris_radius`。`pupil_ratio` 会影响所有嵌入的几何，
/// 修改后与既有模板不再可比。
pub fn estimate_geometry(mask: &IrisMask, pupil_ratio: f32) -> IrisGeometry {
  let (width, height) = mask.dimensions();

  let (mut sum_x, mut sum_y, mut count) = (0u64, 0u64, 0u64);
  for (x, y, pixel) in mask.enumerate_pixels() {
    if pixel[0] > 0 {
      sum_x += x as u64;
      sum_y += y as u64;
      count += 1;
    }
  }

  if count == 0 {
    let iris_radius = (width.min(height) / 4).max(1);
    let geometry = IrisGeometry {
      center: ((width / 2) as f32, (height / 2) as f32),
      pupil_radius: pupil_radius(iris_radius, pupil_ratio),
      iris_radius,
      fallback: true,
    };
    debug!("掩码为空，使用默认几何: {:?}", geometry);
    return geometry;
  }

  let cx = (sum_x as f64 / count as f64) as f32;
  let cy = (sum_y as f64 / count as f64) as f32;
  let iris_radius = ((count as f64 / std::f64::consts::PI).sqrt() as u32).max(1);

  IrisGeometry {
    center: (cx.floor(), cy.floor()),
    pupil_radius: pupil_radius(iris_radius, pupil_ratio),
    iris_radius,
    fallback: false,
  }
}

fn pupil_radius(iris_radius: u32, ratio: f32) -> u32 {
  ((iris_radius as f32 * ratio).floor() as u32).clamp(1, iris_radius)
}
