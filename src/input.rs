// 该文件是 Hongmo （虹膜考勤） 项目的一部分。
// src/input.rs - 视频输入与抽帧
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

use std::path::Path;

use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::{FromUrl, frame::Frame};

#[cfg(feature = "read_image_file")]
mod image_sequence;
#[cfg(feature = "read_image_file")]
pub use self::image_sequence::ImageSequenceInput;

#[cfg(feature = "gstreamer_input")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_input::{GStreamerInput, GStreamerInputError, GStreamerInputPipelineBuilder};

#[derive(Error, Debug)]
pub enum InputError {
  /// 视频源无法打开或解码，对整个运行是致命错误
  #[error("视频源不可用: {0}")]
  SourceUnavailable(String),
  #[error("抽帧步长必须大于等于 1")]
  InvalidStride,
}

#[cfg(feature = "gstreamer_input")]
impl From<GStreamerInputError> for InputError {
  fn from(err: GStreamerInputError) -> Self {
    InputError::SourceUnavailable(err.to_string())
  }
}

/// 视频源引用
///
/// 支持的形式：
/// - `gst://file/<path>` - GStreamer 能解码的任意视频文件
/// - `frames://<dir>` - 按文件名排序的图片目录，每张图片一帧
/// - 普通文件系统路径，目录按 `frames://` 处理，文件按 `gst://file` 处理
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoRef {
  url: Url,
}

impl VideoRef {
  pub fn parse(source: &str) -> Result<Self, InputError> {
    if let Ok(url) = Url::parse(source)
      && url.scheme().len() > 1
    {
      return Ok(Self { url });
    }

    let path = Path::new(source);
    let absolute = if path.is_absolute() {
      path.to_path_buf()
    } else {
      std::env::current_dir()
        .map_err(|e| InputError::SourceUnavailable(format!("{}: {}", source, e)))?
        .join(path)
    };
    let scheme = if absolute.is_dir() { "frames" } else { "gst" };
    let host = if absolute.is_dir() { "" } else { "file" };
    let url = Url::parse(&format!("{}://{}{}", scheme, host, absolute.display()))
      .map_err(|e| InputError::SourceUnavailable(format!("{}: {}", source, e)))?;
    Ok(Self { url })
  }

  pub fn url(&self) -> &Url {
    &self.url
  }

  /// 用于事件记录的来源标识
  pub fn identifier(&self) -> String {
    self.url.to_string()
  }
}

impl std::fmt::Display for VideoRef {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.url)
  }
}

pub enum InputWrapper {
  #[cfg(feature = "gstreamer_input")]
  GStreamerInput(GStreamerInput),
  #[cfg(feature = "read_image_file")]
  ImageSequence(ImageSequenceInput),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "gstreamer_input")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == GStreamerInputPipelineBuilder::SCHEME {
        let input = GStreamerInputPipelineBuilder::from_url(url)?.build()?;
        return Ok(InputWrapper::GStreamerInput(input));
      }
    }
    #[cfg(feature = "read_image_file")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == ImageSequenceInput::SCHEME {
        let input = ImageSequenceInput::from_url(url)?;
        return Ok(InputWrapper::ImageSequence(input));
      }
    }
    Err(InputError::SourceUnavailable(format!("不支持的视频源: {}", url)))
  }
}

impl Iterator for InputWrapper {
  type Item = Frame;

  fn next(&mut self) -> Option<Self::Item> {
    match self {
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamerInput(input) => input.next(),
      #[cfg(feature = "read_image_file")]
      InputWrapper::ImageSequence(input) => input.next(),
    }
  }
}

/// 打开视频源
pub fn open_video(video: &VideoRef) -> Result<InputWrapper, InputError> {
  debug!("打开视频源: {}", video);
  InputWrapper::from_url(video.url())
}

/// 按固定步长抽帧
#[derive(Debug, Clone, Copy)]
pub struct FrameSampler {
  stride: u64,
}

impl FrameSampler {
  pub fn new(stride: u64) -> Result<Self, InputError> {
    if stride == 0 {
      return Err(InputError::InvalidStride);
    }
    Ok(Self { stride })
  }

  pub fn stride(&self) -> u64 {
    self.stride
  }

  /// 包装一个帧源，得到惰性、单次遍历的 `(index, Frame)` 序列
  ///
  /// 序号按帧源产出顺序重新计数，只产出序号为步长整数倍的帧。
  /// 序列被耗尽或被提前丢弃时，帧源随之被释放。
  pub fn sample<S>(&self, source: S) -> Sampled<S::IntoIter>
  where
    S: IntoIterator<Item = Frame>,
  {
    Sampled {
      source: source.into_iter(),
      stride: self.stride,
      position: 0,
    }
  }
}

pub struct Sampled<S> {
  source: S,
  stride: u64,
  position: u64,
}

impl<S: Iterator<Item = Frame>> Iterator for Sampled<S> {
  type Item = (u64, Frame);

  fn next(&mut self) -> Option<Self::Item> {
    loop {
      let mut frame = self.source.next()?;
      let index = self.position;
      self.position += 1;
      if index % self.stride == 0 {
        frame.index = index;
        return Some((index, frame));
      }
    }
  }
}
