// 该文件是 Hongmo （虹膜考勤） 项目的一部分。
// tests/common/mod.rs - 集成测试公共工具
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

#![allow(dead_code)]

use std::path::Path;

use hongmo::{config::PipelineConfig, input::VideoRef};
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_filled_circle_mut;

pub const WIDTH: u32 = 160;
pub const HEIGHT: u32 = 120;

/// 浅色背景上一只居中的合成眼睛：虹膜盘半径 20，瞳孔半径 8
pub fn eye_image() -> RgbImage {
  let mut image = RgbImage::from_pixel(WIDTH, HEIGHT, Rgb([200, 200, 200]));
  draw_filled_circle_mut(&mut image, (80, 60), 20, Rgb([70, 70, 70]));
  draw_filled_circle_mut(&mut image, (80, 60), 8, Rgb([15, 15, 15]));
  image
}

/// 均匀背景，检测器因对比度不足不会产出任何眼睛
pub fn blank_image() -> RgbImage {
  RgbImage::from_pixel(WIDTH, HEIGHT, Rgb([200, 200, 200]))
}

/// 把帧写成按序号命名的 PNG 目录，并返回对应的视频引用
pub fn write_video(directory: &Path, frames: &[RgbImage]) -> VideoRef {
  std::fs::create_dir_all(directory).unwrap();
  for (index, frame) in frames.iter().enumerate() {
    frame
      .save(directory.join(format!("frame_{:05}.png", index)))
      .unwrap();
  }
  VideoRef::parse(directory.to_str().unwrap()).unwrap()
}

/// 只在 `eye_frames` 给出的位置放眼睛的视频
pub fn video_with_eyes_at(directory: &Path, length: usize, eye_frames: &[usize]) -> VideoRef {
  let frames: Vec<RgbImage> = (0..length)
    .map(|i| {
      if eye_frames.contains(&i) {
        eye_image()
      } else {
        blank_image()
      }
    })
    .collect();
  write_video(directory, &frames)
}

/// 缩小归一化与嵌入尺寸的配置，其余保持默认
pub fn test_config() -> PipelineConfig {
  PipelineConfig {
    radial_res: 16,
    angular_res: 128,
    embedding_dim: 64,
    ..Default::default()
  }
}
