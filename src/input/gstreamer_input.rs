// 该文件是 Hongmo （虹膜考勤） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 视频解码输入
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

//! # GStreamer 视频输入模块
//!
//! 通过 GStreamer 解码视频文件或摄像头流，逐帧产出 RGB 图像。
//!
//! ## URL 格式
//!
//! - `gst://file/<path>` - 视频文件，`decodebin` 支持的任意封装与编码
//! - `gst://camera/<device>?width=640&height=480&fps=15` - V4L2 摄像头
//!
//! ## 系统依赖
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev
//! ```
//!
//! ## 资源释放
//!
//! 管道在 `GStreamerInput` 被丢弃时切换到 `Null` 状态，无论迭代是读到
//! 流末尾还是被调用方提前放弃。

use std::collections::HashMap;
use std::path::Path;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::RgbImage;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::Frame};

/// 等待管道进入播放状态的最长时间
const PREROLL_TIMEOUT_SECS: u64 = 10;

/// GStreamer 输入错误类型
#[derive(Error, Debug)]
pub enum GStreamerInputError {
  /// URI scheme 不匹配（期望 "gst://"）
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  /// 视频文件不存在
  #[error("File not found: {0}")]
  FileNotFound(String),
  /// GStreamer 库错误
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  /// 无法获取 appsink 元素
  #[error("Failed to get appsink element")]
  AppSinkNotFound,
  /// 无法转换元素为 appsink
  #[error("Failed to convert element to appsink")]
  AppSinkConversionFailed,
  /// 无法从 caps 获取视频信息
  #[error("Failed to get video info from caps")]
  VideoInfoError,
  /// 不支持的视频格式
  #[error("Unsupported video format")]
  UnsupportedFormat,
  /// 管道错误
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  /// 缓冲区大小不匹配
  #[error("Buffer size mismatch: expected {expected} bytes, got {actual} bytes")]
  BufferSizeMismatch { expected: usize, actual: usize },
  /// 状态改变错误
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
}

pub enum GStreamerInputBuilderItem {
  FileSource(String),
  CameraSource {
    camera: String,
    width: u32,
    height: u32,
    fps: u32,
  },
  TargetFormat {
    format: String,
  },
}

impl GStreamerInputBuilderItem {
  fn to_pipeline(&self) -> String {
    match self {
      GStreamerInputBuilderItem::FileSource(path) => {
        format!("filesrc location=\"{}\" ! decodebin", path)
      }
      GStreamerInputBuilderItem::CameraSource {
        camera,
        width,
        height,
        fps,
      } => format!(
        "v4l2src device={} ! video/x-raw,width={},height={},framerate={}/1",
        camera, width, height, fps
      ),
      GStreamerInputBuilderItem::TargetFormat { format } => {
        format!("videoconvert ! video/x-raw,format={}", format)
      }
    }
  }
}

/// GStreamer 输入管道构建器
pub struct GStreamerInputPipelineBuilder {
  items: Vec<GStreamerInputBuilderItem>,
  /// 文件输入不允许丢帧，摄像头输入只保留最新帧
  live: bool,
}

impl FromUrlWithScheme for GStreamerInputPipelineBuilder {
  const SCHEME: &'static str = "gst";
}

impl GStreamerInputPipelineBuilder {
  fn build_camera_pipeline(path: &str, query: &HashMap<String, String>) -> Self {
    let parse = |key: &str, default: u32| {
      query
        .get(key)
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(default)
    };

    let items = vec![GStreamerInputBuilderItem::CameraSource {
      camera: path.to_string(),
      width: parse("width", 640),
      height: parse("height", 480),
      fps: parse("fps", 15),
    }];

    GStreamerInputPipelineBuilder { items, live: true }
  }

  fn build_file_pipeline(path: &str) -> Result<Self, GStreamerInputError> {
    if !Path::new(path).is_file() {
      return Err(GStreamerInputError::FileNotFound(path.to_string()));
    }
    let items = vec![GStreamerInputBuilderItem::FileSource(path.to_string())];
    Ok(GStreamerInputPipelineBuilder { items, live: false })
  }

  pub fn build(self) -> Result<GStreamerInput, GStreamerInputError> {
    gst::init()?;

    let basic_pipeline = self
      .items
      .iter()
      .map(GStreamerInputBuilderItem::to_pipeline)
      .collect::<Vec<String>>()
      .join(" ! ");
    let sink = if self.live {
      "appsink max-buffers=2 drop=true name=sink"
    } else {
      "appsink sync=false max-buffers=4 drop=false name=sink"
    };
    let full_pipeline = format!("{} ! {}", basic_pipeline, sink);

    info!("GStreamer pipeline description: {}", full_pipeline);

    let pipeline = gst::parse::launch(&full_pipeline)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerInputError::PipelineError("Failed to create pipeline".to_string()))?;

    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerInputError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerInputError::AppSinkConversionFailed)?;

    // 此后管道由 GStreamerInput 持有，任何失败路径都会经 Drop 释放
    let input = GStreamerInput {
      pipeline,
      appsink,
      frame_index: 0,
    };
    input.pipeline.set_state(gst::State::Playing)?;
    input.wait_preroll()?;

    Ok(input)
  }
}

impl FromUrl for GStreamerInputPipelineBuilder {
  type Error = GStreamerInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(GStreamerInputError::SchemeMismatch);
    }

    let query: HashMap<String, String> = url
      .query_pairs()
      .map(|(k, v)| (String::from(k), String::from(v)))
      .collect();
    let path = urlencoding::decode(url.path())
      .map_err(|e| GStreamerInputError::PipelineError(format!("Invalid path: {}", e)))?
      .into_owned();

    let mut builder = match url.host_str() {
      Some("camera") => Self::build_camera_pipeline(&path, &query),
      Some("file") => Self::build_file_pipeline(&path)?,
      _ => {
        return Err(GStreamerInputError::SchemeMismatch);
      }
    };

    builder.items.push(GStreamerInputBuilderItem::TargetFormat {
      format: "RGB".to_string(),
    });

    Ok(builder)
  }
}

/// GStreamer 视频输入
///
/// 持有独占的解码游标，按解码顺序产出帧。
pub struct GStreamerInput {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  frame_index: u64,
}

impl Drop for GStreamerInput {
  fn drop(&mut self) {
    debug!("Releasing GStreamer pipeline after {} frames", self.frame_index);
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer pipeline: {}", e);
    }
  }
}

impl GStreamerInput {
  /// 等待管道预滚动完成，把打不开或无法解码的源转为错误
  fn wait_preroll(&self) -> Result<(), GStreamerInputError> {
    let (result, _, _) = self
      .pipeline
      .state(gst::ClockTime::from_seconds(PREROLL_TIMEOUT_SECS));
    if result.is_ok() {
      return Ok(());
    }

    let detail = self
      .pipeline
      .bus()
      .and_then(|bus| bus.pop_filtered(&[gst::MessageType::Error]))
      .and_then(|msg| match msg.view() {
        gst::MessageView::Error(err) => Some(err.error().to_string()),
        _ => None,
      })
      .unwrap_or_else(|| "pipeline failed to preroll".to_string());
    Err(GStreamerInputError::PipelineError(detail))
  }

  fn pull_sample(&self) -> Option<gst::Sample> {
    // 流结束时 appsink 返回错误，这是正常的迭代终点
    if self.appsink.is_eos() {
      return None;
    }
    self
      .appsink
      .pull_sample()
      .map_err(|e| {
        debug!("No more samples: {}", e);
        e
      })
      .ok()
  }
}

impl Iterator for GStreamerInput {
  type Item = Frame;

  fn next(&mut self) -> Option<Self::Item> {
    let sample = self.pull_sample()?;
    match convert_sample_to_frame(sample, self.frame_index) {
      Ok(frame) => {
        self.frame_index += 1;
        Some(frame)
      }
      Err(e) => {
        error!("Failed to fetch sample: {}", e);
        None
      }
    }
  }
}

fn convert_sample_to_frame(sample: gst::Sample, index: u64) -> Result<Frame, GStreamerInputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerInputError::PipelineError("No buffer in sample".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerInputError::PipelineError("No caps in sample".to_string()))?;

  let video_info =
    gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;
  if video_info.format() != gst_video::VideoFormat::Rgb {
    return Err(GStreamerInputError::UnsupportedFormat);
  }

  let width = video_info.width() as usize;
  let height = video_info.height() as usize;
  let stride = video_info.stride()[0] as usize;

  let map = buffer.map_readable().map_err(|e| {
    GStreamerInputError::PipelineError(format!("Failed to map buffer for reading: {}", e))
  })?;
  let data = map.as_slice();

  let expected_size = stride * (height.saturating_sub(1)) + width * 3;
  if data.len() < expected_size {
    return Err(GStreamerInputError::BufferSizeMismatch {
      expected: expected_size,
      actual: data.len(),
    });
  }

  // 行首按 stride 对齐，逐行拷贝去掉填充
  let mut pixels = Vec::with_capacity(width * height * 3);
  for row in 0..height {
    let start = row * stride;
    pixels.extend_from_slice(&data[start..start + width * 3]);
  }

  let image = RgbImage::from_raw(width as u32, height as u32, pixels).ok_or_else(|| {
    GStreamerInputError::PipelineError("Failed to build RGB image from buffer".to_string())
  })?;
  let timestamp_ms = buffer.pts().map_or(0, |pts| pts.mseconds());

  Ok(Frame::new(index, image).with_timestamp(timestamp_ms))
}
