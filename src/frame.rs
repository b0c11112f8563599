// 该文件是 Hongmo （虹膜考勤） 项目的一部分。
// src/frame.rs - 视频帧定义
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

use image::{GrayImage, RgbImage, imageops};

/// 帧数据
#[derive(Debug, Clone)]
pub struct Frame {
  /// 帧在源序列中的序号（从 0 开始）
  pub index: u64,
  /// 时间戳（毫秒），未知时为 0
  pub timestamp_ms: u64,
  /// RGB 图像数据
  pub image: RgbImage,
}

impl Frame {
  pub fn new(index: u64, image: RgbImage) -> Self {
    Self {
      index,
      timestamp_ms: 0,
      image,
    }
  }

  pub fn with_timestamp(mut self, timestamp_ms: u64) -> Self {
    self.timestamp_ms = timestamp_ms;
    self
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }

  pub fn to_gray(&self) -> GrayImage {
    to_gray(&self.image)
  }
}

/// 转换为灰度图，所有阶段统一使用该转换以保证嵌入可比
pub fn to_gray(image: &RgbImage) -> GrayImage {
  imageops::grayscale(image)
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  #[test]
  fn gray_conversion_keeps_dimensions() {
    let image = RgbImage::from_pixel(7, 5, Rgb([10, 20, 30]));
    let frame = Frame::new(3, image).with_timestamp(120);
    let gray = frame.to_gray();
    assert_eq!(gray.dimensions(), (7, 5));
    assert_eq!(frame.index, 3);
    assert_eq!(frame.timestamp_ms, 120);
  }

  #[test]
  fn gray_of_neutral_pixel_is_identity() {
    let image = RgbImage::from_pixel(2, 2, Rgb([128, 128, 128]));
    let gray = to_gray(&image);
    assert!(gray.pixels().all(|p| p[0] == 128));
  }
}
