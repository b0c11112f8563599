// 该文件是 Hongmo （虹膜考勤） 项目的一部分。
// src/model/eye_detector.rs - 眼睛检测器
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

use std::collections::BTreeMap;

use image::{Luma, RgbImage, imageops};
use imageproc::{
  contrast::{ThresholdType, otsu_level, threshold},
  filter::gaussian_blur_f32,
  region_labelling::{Connectivity, connected_components},
};
use tracing::debug;

use crate::{
  frame::Frame,
  model::{EyeDetection, EyeDetector},
};

const DEFAULT_MIN_SIZE_RATIO: f32 = 0.05;
const DEFAULT_MAX_SIZE_RATIO: f32 = 0.6;
const DEFAULT_MIN_CONTRAST: u8 = 32;
const DEFAULT_BLUR_SIGMA: f32 = 1.5;
const DEFAULT_CROP_MARGIN: f32 = 0.5;
const MIN_ASPECT: f32 = 0.5;
const MAX_ASPECT: f32 = 2.0;

/// 暗区域眼睛检测器
///
/// 占位实现：虹膜与瞳孔在眼部区域中显著偏暗，用 Otsu 阈值分离暗区域，
/// 按连通域取候选框。可以替换为任何实现了 [`EyeDetector`] 的模型。
#[derive(Debug, Clone)]
pub struct DarkRegionEyeDetector {
  min_size_ratio: f32,
  max_size_ratio: f32,
  min_contrast: u8,
  blur_sigma: f32,
  crop_margin: f32,
}

impl Default for DarkRegionEyeDetector {
  fn default() -> Self {
    DarkRegionEyeDetectorBuilder::default().build()
  }
}

impl DarkRegionEyeDetector {
  pub fn builder() -> DarkRegionEyeDetectorBuilder {
    DarkRegionEyeDetectorBuilder::default()
  }
}

pub struct DarkRegionEyeDetectorBuilder {
  min_size_ratio: f32,
  max_size_ratio: f32,
  min_contrast: u8,
  blur_sigma: f32,
  crop_margin: f32,
}

impl Default for DarkRegionEyeDetectorBuilder {
  fn default() -> Self {
    Self {
      min_size_ratio: DEFAULT_MIN_SIZE_RATIO,
      max_size_ratio: DEFAULT_MAX_SIZE_RATIO,
      min_contrast: DEFAULT_MIN_CONTRAST,
      blur_sigma: DEFAULT_BLUR_SIGMA,
      crop_margin: DEFAULT_CROP_MARGIN,
    }
  }
}

impl DarkRegionEyeDetectorBuilder {
  /// 候选框最短边相对帧短边的下限
  pub fn min_size_ratio(mut self, ratio: f32) -> Self {
    self.min_size_ratio = ratio.max(0.0);
    self
  }

  /// 候选框边长相对帧对应边的上限
  pub fn max_size_ratio(mut self, ratio: f32) -> Self {
    self.max_size_ratio = ratio;
    self
  }

  pub fn min_contrast(mut self, contrast: u8) -> Self {
    self.min_contrast = contrast;
    self
  }

  pub fn blur_sigma(mut self, sigma: f32) -> Self {
    self.blur_sigma = sigma;
    self
  }

  /// 裁剪时在连通域外框每侧扩展的比例
  pub fn crop_margin(mut self, margin: f32) -> Self {
    self.crop_margin = margin.max(0.0);
    self
  }

  pub fn build(self) -> DarkRegionEyeDetector {
    DarkRegionEyeDetector {
      min_size_ratio: self.min_size_ratio,
      max_size_ratio: self.max_size_ratio,
      min_contrast: self.min_contrast,
      blur_sigma: self.blur_sigma,
      crop_margin: self.crop_margin,
    }
  }
}

#[derive(Debug, Clone, Copy)]
struct Region {
  x_min: u32,
  y_min: u32,
  x_max: u32,
  y_max: u32,
  area: u32,
}

impl Region {
  fn new(x: u32, y: u32) -> Self {
    Self {
      x_min: x,
      y_min: y,
      x_max: x,
      y_max: y,
      area: 0,
    }
  }

  fn extend(&mut self, x: u32, y: u32) {
    self.x_min = self.x_min.min(x);
    self.y_min = self.y_min.min(y);
    self.x_max = self.x_max.max(x);
    self.y_max = self.y_max.max(y);
    self.area += 1;
  }

  fn width(&self) -> u32 {
    self.x_max - self.x_min + 1
  }

  fn height(&self) -> u32 {
    self.y_max - self.y_min + 1
  }
}

impl EyeDetector for DarkRegionEyeDetector {
  fn detect(&self, frame: &Frame) -> Vec<EyeDetection> {
    let (width, height) = frame.image.dimensions();
    if width == 0 || height == 0 {
      return Vec::new();
    }

    let gray = gaussian_blur_f32(&frame.to_gray(), self.blur_sigma);
    let (low, high) = gray
      .pixels()
      .fold((u8::MAX, u8::MIN), |(lo, hi), p| (lo.min(p[0]), hi.max(p[0])));
    if high.saturating_sub(low) < self.min_contrast {
      debug!("帧 {} 对比度不足 ({}..{})，跳过检测", frame.index, low, high);
      return Vec::new();
    }

    let level = otsu_level(&gray);
    let dark = threshold(&gray, level, ThresholdType::BinaryInverted);
    let labels = connected_components(&dark, Connectivity::Eight, Luma([0u8]));

    // 按标签有序聚合，保证输出顺序确定
    let mut regions: BTreeMap<u32, Region> = BTreeMap::new();
    for (x, y, label) in labels.enumerate_pixels() {
      let label = label[0];
      if label == 0 {
        continue;
      }
      regions
        .entry(label)
        .or_insert_with(|| Region::new(x, y))
        .extend(x, y);
    }

    let min_side = (width.min(height) as f32 * self.min_size_ratio).floor() as u32;
    let max_width = width as f32 * self.max_size_ratio;
    let max_height = height as f32 * self.max_size_ratio;

    let detections: Vec<EyeDetection> = regions
      .values()
      .filter(|r| r.width() >= min_side.max(1) && r.height() >= min_side.max(1))
      .filter(|r| (r.width() as f32) <= max_width && (r.height() as f32) <= max_height)
      .filter(|r| {
        let aspect = r.width() as f32 / r.height() as f32;
        (MIN_ASPECT..=MAX_ASPECT).contains(&aspect)
      })
      .map(|r| {
        let ellipse_area = std::f32::consts::PI / 4.0 * (r.width() * r.height()) as f32;
        let confidence = (r.area as f32 / ellipse_area).clamp(0.0, 1.0);
        let bbox = self.crop_box(r, width, height);
        EyeDetection {
          crop: crop(&frame.image, bbox),
          bbox,
          confidence,
        }
      })
      .collect();

    debug!("帧 {} 检测到 {} 个眼睛候选", frame.index, detections.len());
    detections
  }
}

impl DarkRegionEyeDetector {
  fn crop_box(&self, region: &Region, width: u32, height: u32) -> [u32; 4] {
    let margin_x = (region.width() as f32 * self.crop_margin).round() as u32;
    let margin_y = (region.height() as f32 * self.crop_margin).round() as u32;
    [
      region.x_min.saturating_sub(margin_x),
      region.y_min.saturating_sub(margin_y),
      (region.x_max + 1 + margin_x).min(width),
      (region.y_max + 1 + margin_y).min(height),
    ]
  }
}

fn crop(image: &RgbImage, bbox: [u32; 4]) -> RgbImage {
  imageops::crop_imm(image, bbox[0], bbox[1], bbox[2] - bbox[0], bbox[3] - bbox[1]).to_image()
}

/// 固定区域检测器
///
/// 适用于眼部特写摄像头：每帧输出一个固定区域（默认为整帧），置信度 1.0。
#[derive(Debug, Clone, Default)]
pub struct FixedRegionDetector {
  region: Option<[u32; 4]>,
}

impl FixedRegionDetector {
  pub fn whole_frame() -> Self {
    Self { region: None }
  }

  pub fn with_region(region: [u32; 4]) -> Self {
    Self {
      region: Some(region),
    }
  }
}

impl EyeDetector for FixedRegionDetector {
  fn detect(&self, frame: &Frame) -> Vec<EyeDetection> {
    let (width, height) = frame.image.dimensions();
    let [x0, y0, x1, y1] = self.region.unwrap_or([0, 0, width, height]);
    let bbox = [x0.min(width), y0.min(height), x1.min(width), y1.min(height)];
    if bbox[2] <= bbox[0] || bbox[3] <= bbox[1] {
      return Vec::new();
    }
    vec![EyeDetection {
      crop: crop(&frame.image, bbox),
      bbox,
      confidence: 1.0,
    }]
  }
}
