// 该文件是 Hongmo （虹膜考勤） 项目的一部分。
// src/output/directory_record.rs - 按日期目录记录识别证据
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

use std::{
  fs::OpenOptions,
  io::Write,
  path::{Path, PathBuf},
};

use chrono::{DateTime, Datelike, Utc};
use image::RgbImage;
use thiserror::Error;
use tracing::debug;

use crate::{
  FromUrl, FromUrlWithScheme,
  output::{Evidence, Render},
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 把每次被接受的识别写入 `<dir>/YYYY/MM/DD/`
///
/// 眼部裁剪图保存为 `HH-MM-SS-<人员>-<帧>-<x0>x<y0>.png`，边界框左上角区分同一帧中的多只眼睛，
/// 同名 `.txt` 记录分数与边界框。
/// URL 形如 `folder:///var/lib/hongmo/evidence`。
#[derive(Debug, Clone)]
pub struct DirectoryRecordOutput {
  directory: PathBuf,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }
    let path = urlencoding::decode(uri.path())
      .map(|p| p.into_owned())
      .unwrap_or_else(|_| uri.path().to_string());
    Ok(Self::new(path))
  }
}

impl DirectoryRecordOutput {
  pub fn new(directory: impl AsRef<Path>) -> Self {
    Self {
      directory: directory.as_ref().to_path_buf(),
    }
  }

  fn record_path(
    &self,
    now: DateTime<Utc>,
    evidence: &Evidence,
  ) -> Result<PathBuf, DirectoryRecordOutputError> {
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    Ok(directory.join(format!(
      "{}-{}-{:06}-{}x{}.png",
      now.format("%H-%M-%S"),
      evidence.person_id,
      evidence.frame_idx,
      evidence.bbox[0],
      evidence.bbox[1]
    )))
  }
}

impl Render<RgbImage, Evidence> for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, crop: &RgbImage, evidence: &Evidence) -> Result<(), Self::Error> {
    let now = Utc::now();
    let path = self.record_path(now, evidence)?;
    crop.save(&path)?;

    let [x0, y0, x1, y1] = evidence.bbox;
    let mut record = OpenOptions::new()
      .create(true)
      .append(true)
      .open(path.with_extension("txt"))?;
    writeln!(
      record,
      "{} camera={} person={} frame={} score={:.4} bbox={},{},{},{}",
      now.to_rfc3339(),
      evidence.camera_id,
      evidence.person_id,
      evidence.frame_idx,
      evidence.score,
      x0,
      y0,
      x1,
      y1
    )?;

    debug!("识别证据已保存: {}", path.display());
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;
  use url::Url;

  fn evidence() -> Evidence {
    Evidence {
      person_id: 3,
      camera_id: "gate-2".to_string(),
      frame_idx: 25,
      score: 0.8765,
      bbox: [4, 5, 44, 45],
    }
  }

  fn files_with_extension(root: &Path, extension: &str) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
      for entry in std::fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
          pending.push(path);
        } else if path.extension().is_some_and(|e| e == extension) {
          found.push(path);
        }
      }
    }
    found
  }

  #[test]
  fn wrong_scheme_is_rejected() {
    let url = Url::parse("file:///tmp/evidence").unwrap();
    assert!(DirectoryRecordOutput::from_url(&url).is_err());
  }

  #[test]
  fn writes_crop_and_record_under_dated_directory() {
    let dir = tempfile::tempdir().unwrap();
    let url = Url::from_directory_path(dir.path()).unwrap();
    let url = Url::parse(&url.as_str().replacen("file://", "folder://", 1)).unwrap();
    let output = DirectoryRecordOutput::from_url(&url).unwrap();

    let crop = RgbImage::from_pixel(40, 40, Rgb([10, 20, 30]));
    output.render_result(&crop, &evidence()).unwrap();

    let images = files_with_extension(dir.path(), "png");
    assert_eq!(images.len(), 1);
    let name = images[0].file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.ends_with("-3-000025-4x5.png"), "{}", name);
    assert_eq!(images[0].parent().unwrap().parent().unwrap().parent().unwrap().parent(), Some(dir.path()));
    assert_eq!(image::open(&images[0]).unwrap().to_rgb8(), crop);

    let records = files_with_extension(dir.path(), "txt");
    let line = std::fs::read_to_string(&records[0]).unwrap();
    assert!(line.contains("camera=gate-2"));
    assert!(line.contains("score=0.8765"));
    assert!(line.contains("bbox=4,5,44,45"));
  }

  #[test]
  fn both_eyes_of_one_frame_are_kept() {
    let dir = tempfile::tempdir().unwrap();
    let output = DirectoryRecordOutput::new(dir.path());
    let left = evidence();
    let right = Evidence {
      bbox: [90, 5, 130, 45],
      ..evidence()
    };

    output
      .render_result(&RgbImage::from_pixel(40, 40, Rgb([1, 1, 1])), &left)
      .unwrap();
    output
      .render_result(&RgbImage::from_pixel(40, 40, Rgb([2, 2, 2])), &right)
      .unwrap();

    assert_eq!(files_with_extension(dir.path(), "png").len(), 2);
    assert_eq!(files_with_extension(dir.path(), "txt").len(), 2);
  }
}
