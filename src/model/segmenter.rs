// 该文件是 Hongmo （虹膜考勤） 项目的一部分。
// src/model/segmenter.rs - 虹膜分割（霍夫圆）
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

use std::{f32::consts::PI, ops::RangeInclusive};

use image::{
  GrayImage, Luma, RgbImage,
  imageops::{self, FilterType},
};
use imageproc::{
  drawing::draw_filled_circle_mut,
  edges::canny,
  filter::median_filter,
  gradients::{horizontal_sobel, vertical_sobel},
};
use ndarray::Array2;
use tracing::debug;

use crate::{
  frame::to_gray,
  model::{IrisMask, IrisSegmenter, SegmentError},
};

const MEDIAN_RADIUS: u32 = 2; // 5x5
const CANNY_LOW: f32 = 40.0;
const CANNY_HIGH: f32 = 100.0;
const MIN_SUPPORT: f32 = 0.35;
/// 投票前把裁剪图长边缩到该尺寸以内，累加器大小与输入分辨率无关
const WORK_MAX_SIDE: u32 = 160;
/// 边缘梯度方向与径向夹角余弦的下限
const MIN_ALIGNMENT: f32 = 0.9;
/// 圆周带宽（半宽，工作分辨率像素）
const RING_HALF_WIDTH: f32 = 1.5;

/// 霍夫圆虹膜分割器
///
/// 占位实现，分两步：
/// 1. 平滑后做 Canny 边缘，边缘点沿梯度方向为半径范围内的所有圆心投票，
///    取窗口票数最多的位置作为圆心初值；
/// 2. 在初值邻域内逐个圆心统计梯度沿径向的边缘点到圆心的距离，
///    支持度为落在圆周带内的点数除以周长，取支持度最高的圆。
///
/// 半径搜索范围为裁剪图短边的 1/6 到 1/2。大裁剪图先缩小到工作分辨率，
/// 支持度按周长归一化，与圆的尺度无关。
#[derive(Debug, Clone, Default)]
pub struct HoughIrisSegmenter;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Circle {
  cx: f32,
  cy: f32,
  radius: f32,
  support: f32,
}

#[derive(Debug, Clone, Copy)]
struct EdgePoint {
  x: f32,
  y: f32,
  ux: f32,
  uy: f32,
}

impl EdgePoint {
  /// 到圆心的距离；梯度不沿径向时返回 `None`
  fn radial_distance(&self, cx: f32, cy: f32) -> Option<f32> {
    let (dx, dy) = (self.x - cx, self.y - cy);
    let distance = dx.hypot(dy);
    if distance < 1.0 {
      return None;
    }
    ((dx * self.ux + dy * self.uy).abs() / distance >= MIN_ALIGNMENT).then_some(distance)
  }
}

impl HoughIrisSegmenter {
  fn radius_range(short_side: u32) -> RangeInclusive<u32> {
    let r_min = (short_side / 6).max(1);
    let r_max = (short_side / 2).max(r_min);
    r_min..=r_max
  }

  fn work_scale(width: u32, height: u32) -> f32 {
    let long_side = width.max(height);
    if long_side > WORK_MAX_SIDE {
      WORK_MAX_SIDE as f32 / long_side as f32
    } else {
      1.0
    }
  }

  fn edge_points(gray: &GrayImage) -> Vec<EdgePoint> {
    let smooth = median_filter(gray, MEDIAN_RADIUS, MEDIAN_RADIUS);
    let edges = canny(&smooth, CANNY_LOW, CANNY_HIGH);
    let gx = horizontal_sobel(&smooth);
    let gy = vertical_sobel(&smooth);

    edges
      .enumerate_pixels()
      .filter(|(_, _, edge)| edge[0] > 0)
      .filter_map(|(x, y, _)| {
        let dx = gx.get_pixel(x, y)[0] as f32;
        let dy = gy.get_pixel(x, y)[0] as f32;
        let magnitude = dx.hypot(dy);
        (magnitude > f32::EPSILON).then(|| EdgePoint {
          x: x as f32,
          y: y as f32,
          ux: dx / magnitude,
          uy: dy / magnitude,
        })
      })
      .collect()
  }

  /// 圆心投票，返回 `(2 * window + 1)` 见方窗口内票数最多的位置
  fn center_peak(
    points: &[EdgePoint],
    (width, height): (u32, u32),
    radii: &RangeInclusive<u32>,
    window: usize,
  ) -> Option<(usize, usize)> {
    let (w, h) = (width as usize, height as usize);
    let mut votes = Array2::<u32>::zeros((h, w));
    for p in points {
      for radius in radii.clone() {
        let r = radius as f32;
        // 梯度方向未知朝内还是朝外，两侧都投票
        for sign in [-1.0f32, 1.0] {
          let cx = (p.x + sign * r * p.ux).round();
          let cy = (p.y + sign * r * p.uy).round();
          if cx >= 0.0 && cy >= 0.0 && cx < width as f32 && cy < height as f32 {
            votes[[cy as usize, cx as usize]] += 1;
          }
        }
      }
    }

    let mut integral = Array2::<u64>::zeros((h + 1, w + 1));
    for y in 0..h {
      for x in 0..w {
        integral[[y + 1, x + 1]] =
          votes[[y, x]] as u64 + integral[[y, x + 1]] + integral[[y + 1, x]] - integral[[y, x]];
      }
    }

    let mut best: Option<((usize, usize), u64)> = None;
    for y in 0..h {
      for x in 0..w {
        let (x0, y0) = (x.saturating_sub(window), y.saturating_sub(window));
        let (x1, y1) = ((x + window + 1).min(w), (y + window + 1).min(h));
        let total =
          integral[[y1, x1]] + integral[[y0, x0]] - integral[[y0, x1]] - integral[[y1, x0]];
        if total > 0 && best.is_none_or(|(_, b)| total > b) {
          best = Some(((x, y), total));
        }
      }
    }
    best.map(|(center, _)| center)
  }

  /// 固定圆心下支持度最高的半径
  fn ring_fit(points: &[EdgePoint], cx: f32, cy: f32, radii: &RangeInclusive<u32>) -> Option<Circle> {
    let mut histogram = vec![0u32; *radii.end() as usize + 2];
    for distance in points.iter().filter_map(|p| p.radial_distance(cx, cy)) {
      let bin = distance.round() as usize;
      if bin < histogram.len() {
        histogram[bin] += 1;
      }
    }

    let mut best: Option<Circle> = None;
    for radius in radii.clone() {
      let r = radius as usize;
      let count = histogram[r - 1] + histogram[r] + histogram[r + 1];
      let support = count as f32 / (2.0 * PI * radius as f32);
      if best.is_none_or(|b| support > b.support) {
        best = Some(Circle {
          cx,
          cy,
          radius: radius as f32,
          support,
        });
      }
    }
    best
  }

  /// 圆周带内边缘点的平均距离
  fn refine_radius(points: &[EdgePoint], circle: &Circle) -> f32 {
    let (sum, count) = points
      .iter()
      .filter_map(|p| p.radial_distance(circle.cx, circle.cy))
      .filter(|d| (d - circle.radius).abs() <= RING_HALF_WIDTH)
      .fold((0.0f32, 0u32), |(sum, count), d| (sum + d, count + 1));
    if count == 0 {
      circle.radius
    } else {
      sum / count as f32
    }
  }

  fn best_circle(&self, gray: &GrayImage) -> Option<Circle> {
    let (width, height) = gray.dimensions();
    let scale = Self::work_scale(width, height);
    let work = if scale < 1.0 {
      let work_width = ((width as f32 * scale).round() as u32).max(1);
      let work_height = ((height as f32 * scale).round() as u32).max(1);
      imageops::resize(gray, work_width, work_height, FilterType::Triangle)
    } else {
      gray.clone()
    };
    let (work_width, work_height) = work.dimensions();

    let points = Self::edge_points(&work);
    if points.is_empty() {
      return None;
    }
    let radii = Self::radius_range(work_width.min(work_height));
    let window = (*radii.end() as usize / 16).max(1);
    let (px, py) = Self::center_peak(&points, (work_width, work_height), &radii, window)?;

    let mut best: Option<Circle> = None;
    for cy in py.saturating_sub(window)..=(py + window).min(work_height as usize - 1) {
      for cx in px.saturating_sub(window)..=(px + window).min(work_width as usize - 1) {
        if let Some(circle) = Self::ring_fit(&points, cx as f32, cy as f32, &radii)
          && best.is_none_or(|b| circle.support > b.support)
        {
          best = Some(circle);
        }
      }
    }

    let circle = best.filter(|c| c.support >= MIN_SUPPORT)?;
    let radius = Self::refine_radius(&points, &circle);
    // 工作分辨率像素中心映射回原图坐标
    Some(Circle {
      cx: (circle.cx + 0.5) / scale - 0.5,
      cy: (circle.cy + 0.5) / scale - 0.5,
      radius: radius / scale,
      support: circle.support,
    })
  }
}

impl IrisSegmenter for HoughIrisSegmenter {
  fn segment(&self, crop: &RgbImage) -> Result<IrisMask, SegmentError> {
    let (width, height) = crop.dimensions();
    if width == 0 || height == 0 {
      return Err(SegmentError::EmptyCrop(width, height));
    }

    let gray = to_gray(crop);
    let mut mask = GrayImage::new(width, height);
    match self.best_circle(&gray) {
      Some(circle) => {
        debug!(
          "虹膜圆: center=({:.1}, {:.1}), r={:.1}, support={:.2}",
          circle.cx, circle.cy, circle.radius, circle.support
        );
        draw_filled_circle_mut(
          &mut mask,
          (circle.cx.round() as i32, circle.cy.round() as i32),
          circle.radius.round() as i32,
          Luma([1u8]),
        );
      }
      None => debug!("未找到虹膜圆，返回空掩码"),
    }
    Ok(mask)
  }
}
