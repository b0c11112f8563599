// 该文件是 Hongmo （虹膜考勤） 项目的一部分。
// src/input/image_sequence.rs - 图片序列输入
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

use std::path::PathBuf;

use image::ImageReader;
use tracing::{error, warn};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::Frame, input::InputError};

const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "webp"];

/// 图片目录输入，按文件名排序，每张图片为一帧
///
/// 图片在迭代时才解码；解码失败的图片会被跳过并记录警告，
/// 帧序号仍按实际产出的帧连续计数。
pub struct ImageSequenceInput {
  files: std::vec::IntoIter<PathBuf>,
  frame_index: u64,
}

impl FromUrlWithScheme for ImageSequenceInput {
  const SCHEME: &'static str = "frames";
}

impl FromUrl for ImageSequenceInput {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(InputError::SourceUnavailable(format!("不支持的视频源: {}", url)));
    }

    let path = urlencoding::decode(url.path())
      .map_err(|e| InputError::SourceUnavailable(format!("{}: {}", url, e)))?
      .into_owned();
    Self::open(PathBuf::from(path))
  }
}

impl ImageSequenceInput {
  pub fn open(directory: PathBuf) -> Result<Self, InputError> {
    let entries = std::fs::read_dir(&directory)
      .map_err(|e| InputError::SourceUnavailable(format!("{}: {}", directory.display(), e)))?;

    let mut files: Vec<PathBuf> = entries
      .filter_map(|entry| entry.ok().map(|e| e.path()))
      .filter(|path| {
        path
          .extension()
          .and_then(|ext| ext.to_str())
          .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
          .unwrap_or(false)
      })
      .collect();
    files.sort();

    if files.is_empty() {
      return Err(InputError::SourceUnavailable(format!(
        "目录中没有图片: {}",
        directory.display()
      )));
    }

    Ok(Self {
      files: files.into_iter(),
      frame_index: 0,
    })
  }
}

impl Iterator for ImageSequenceInput {
  type Item = Frame;

  fn next(&mut self) -> Option<Self::Item> {
    for path in self.files.by_ref() {
      let decoded = ImageReader::open(&path)
        .map_err(image::ImageError::IoError)
        .and_then(|reader| reader.decode());
      match decoded {
        Ok(image) => {
          let frame = Frame::new(self.frame_index, image.to_rgb8());
          self.frame_index += 1;
          return Some(frame);
        }
        Err(e) => warn!("跳过无法解码的图片 {}: {}", path.display(), e),
      }
    }
    None
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::{Rgb, RgbImage};

  #[test]
  fn reads_images_in_name_order() {
    let dir = tempfile::tempdir().unwrap();
    for (name, value) in [("002.png", 20u8), ("000.png", 0), ("001.png", 10)] {
      RgbImage::from_pixel(4, 3, Rgb([value; 3]))
        .save(dir.path().join(name))
        .unwrap();
    }
    std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

    let input = ImageSequenceInput::open(dir.path().to_path_buf()).unwrap();
    let values: Vec<(u64, u8)> = input.map(|f| (f.index, f.image.get_pixel(0, 0)[0])).collect();
    assert_eq!(values, vec![(0, 0), (1, 10), (2, 20)]);
  }

  #[test]
  fn missing_directory_is_unavailable() {
    let result = ImageSequenceInput::open(PathBuf::from("/nonexistent/frames"));
    assert!(matches!(result, Err(InputError::SourceUnavailable(_))));
  }

  #[test]
  fn empty_directory_is_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let result = ImageSequenceInput::open(dir.path().to_path_buf());
    assert!(matches!(result, Err(InputError::SourceUnavailable(_))));
  }
}
