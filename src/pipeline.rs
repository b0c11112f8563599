// 该文件是 Hongmo （虹膜考勤） 项目的一部分。
// src/pipeline.rs - 单帧虹膜识别流水线
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

use std::sync::Arc;

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  config::{ConfigError, PipelineConfig},
  frame::Frame,
  model::{
    DarkRegionEyeDetector, EncodeError, Embedding, HoughIrisSegmenter, MlpEncoder, ModelContext,
    NormalizeError, RubberSheetNormalizer, SegmentError, estimate_geometry,
  },
};

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("配置错误: {0}")]
  ConfigError(#[from] ConfigError),
  #[error("归一化器错误: {0}")]
  NormalizeError(#[from] NormalizeError),
}

/// 单只眼睛处理失败，调用方记录后跳过该眼
#[derive(Error, Debug)]
pub enum EyeError {
  #[error("分割失败: {0}")]
  Segment(#[from] SegmentError),
  #[error("归一化失败: {0}")]
  Normalize(#[from] NormalizeError),
  #[error("编码失败: {0}")]
  Encode(#[from] EncodeError),
}

/// 一只眼睛的嵌入及其检测信息
#[derive(Debug, Clone)]
pub struct EyeEmbedding {
  pub embedding: Embedding,
  pub bbox: [u32; 4],
  pub confidence: f32,
  pub crop: RgbImage,
}

/// 检测 → 分割 → 几何估计 → 归一化 → 编码
///
/// 模型组件只读共享，克隆代价很低，可在多次运行之间复用。
#[derive(Clone)]
pub struct IrisPipeline {
  models: ModelContext,
  normalizer: RubberSheetNormalizer,
  pupil_ratio: f32,
}

impl IrisPipeline {
  pub fn new(models: ModelContext, normalizer: RubberSheetNormalizer, pupil_ratio: f32) -> Self {
    Self {
      models,
      normalizer,
      pupil_ratio,
    }
  }

  /// 按配置组装默认组件：暗区眼睛检测、霍夫圆分割、MLP 编码器
  pub fn from_config(config: &PipelineConfig) -> Result<Self, PipelineError> {
    config.validate()?;

    let detector = DarkRegionEyeDetector::builder()
      .min_size_ratio(config.min_size_ratio)
      .build();
    let encoder = MlpEncoder::load_or_default(
      config.encoder_weights.as_deref(),
      config.embedding_dim,
      config.encoder_seed,
    );
    if encoder.is_default() {
      warn!("编码器使用未训练的默认参数，识别结果仅用于调试，不具备生物特征意义");
    }
    info!(
      "流水线已就绪: 归一化 {}x{}, 嵌入维度 {}, pupil_ratio {}",
      config.radial_res, config.angular_res, config.embedding_dim, config.pupil_ratio
    );

    let models = ModelContext::new(
      Arc::new(detector),
      Arc::new(HoughIrisSegmenter::default()),
      Arc::new(encoder),
    );
    let normalizer = RubberSheetNormalizer::new(config.radial_res, config.angular_res)?;
    Ok(Self::new(models, normalizer, config.pupil_ratio))
  }

  pub fn models(&self) -> &ModelContext {
    &self.models
  }

  pub fn embedding_dim(&self) -> usize {
    self.models.encoder.dimension()
  }

  /// 处理单只眼睛的裁剪图
  pub fn process_eye(&self, crop: &RgbImage) -> Result<Embedding, EyeError> {
    let mask = self.models.segmenter.segment(crop)?;
    let geometry = estimate_geometry(&mask, self.pupil_ratio);
    if geometry.fallback {
      debug!(
        "掩码为空，使用默认几何: center={:?}, iris={}",
        geometry.center, geometry.iris_radius
      );
    }
    let strip = self.normalizer.normalize(crop, &geometry)?;
    Ok(self.models.encoder.encode(&strip)?)
  }

  /// 处理一帧中检测到的全部眼睛，失败的眼睛记录后跳过
  pub fn process_frame(&self, frame: &Frame) -> Vec<EyeEmbedding> {
    let detections = self.models.detector.detect(frame);
    debug!("帧 {} 检测到 {} 只眼睛", frame.index, detections.len());

    detections
      .into_iter()
      .filter_map(|detection| match self.process_eye(&detection.crop) {
        Ok(embedding) => Some(EyeEmbedding {
          embedding,
          bbox: detection.bbox,
          confidence: detection.confidence,
          crop: detection.crop,
        }),
        Err(e) => {
          warn!("帧 {} 眼睛 {:?} 处理失败: {}", frame.index, detection.bbox, e);
          None
        }
      })
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{EyeDetection, EyeDetector, FixedRegionDetector};
  use approx::assert_abs_diff_eq;
  use image::Rgb;
  use imageproc::drawing::draw_filled_circle_mut;

  fn small_config() -> PipelineConfig {
    PipelineConfig {
      radial_res: 16,
      angular_res: 64,
      embedding_dim: 32,
      ..Default::default()
    }
  }

  fn eye_frame(index: u64) -> Frame {
    let mut image = RgbImage::from_pixel(160, 120, Rgb([200, 200, 200]));
    draw_filled_circle_mut(&mut image, (80, 60), 20, Rgb([70, 70, 70]));
    draw_filled_circle_mut(&mut image, (80, 60), 8, Rgb([15, 15, 15]));
    Frame::new(index, image)
  }

  struct EmptyCropDetector;

  impl EyeDetector for EmptyCropDetector {
    fn detect(&self, _frame: &Frame) -> Vec<EyeDetection> {
      vec![EyeDetection {
        crop: RgbImage::new(0, 0),
        bbox: [0, 0, 0, 0],
        confidence: 1.0,
      }]
    }
  }

  #[test]
  fn invalid_config_is_rejected() {
    let config = PipelineConfig {
      radial_res: 0,
      ..Default::default()
    };
    assert!(IrisPipeline::from_config(&config).is_err());
  }

  #[test]
  fn eye_frame_yields_unit_embedding() {
    let pipeline = IrisPipeline::from_config(&small_config()).unwrap();
    let eyes = pipeline.process_frame(&eye_frame(0));
    assert_eq!(eyes.len(), 1);
    assert_eq!(eyes[0].embedding.dimension(), 32);
    assert_abs_diff_eq!(eyes[0].embedding.norm(), 1.0, epsilon = 1e-5);
  }

  #[test]
  fn blank_frame_yields_nothing() {
    let pipeline = IrisPipeline::from_config(&small_config()).unwrap();
    let blank = Frame::new(0, RgbImage::from_pixel(160, 120, Rgb([200, 200, 200])));
    assert!(pipeline.process_frame(&blank).is_empty());
  }

  #[test]
  fn same_frame_same_embedding() {
    let pipeline = IrisPipeline::from_config(&small_config()).unwrap();
    let a = pipeline.process_frame(&eye_frame(0));
    let b = pipeline.clone().process_frame(&eye_frame(1));
    assert_eq!(a[0].embedding, b[0].embedding);
  }

  #[test]
  fn failing_eye_is_skipped() {
    let base = IrisPipeline::from_config(&small_config()).unwrap();
    let models = ModelContext::new(
      Arc::new(EmptyCropDetector),
      base.models().segmenter.clone(),
      base.models().encoder.clone(),
    );
    let pipeline = IrisPipeline::new(models, RubberSheetNormalizer::new(8, 16).unwrap(), 0.5);
    assert!(pipeline.process_frame(&eye_frame(0)).is_empty());
  }

  #[test]
  fn iris_is_segmented_at_camera_resolution() {
    let pipeline = IrisPipeline::from_config(&small_config()).unwrap();
    let mut image = RgbImage::from_pixel(640, 480, Rgb([200, 200, 200]));
    draw_filled_circle_mut(&mut image, (320, 240), 60, Rgb([70, 70, 70]));
    draw_filled_circle_mut(&mut image, (320, 240), 24, Rgb([15, 15, 15]));
    let frame = Frame::new(0, image);

    let detections = pipeline.models().detector.detect(&frame);
    assert_eq!(detections.len(), 1);
    let mask = pipeline
      .models()
      .segmenter
      .segment(&detections[0].crop)
      .unwrap();
    let geometry = estimate_geometry(&mask, 0.5);
    assert!(!geometry.fallback);
    assert!(
      (geometry.iris_radius as i32 - 60).abs() <= 6,
      "iris radius {}",
      geometry.iris_radius
    );

    let eyes = pipeline.process_frame(&frame);
    assert_eq!(eyes.len(), 1);
    assert_abs_diff_eq!(eyes[0].embedding.norm(), 1.0, epsilon = 1e-5);
  }

  #[test]
  fn whole_frame_detector_still_produces_embedding() {
    let base = IrisPipeline::from_config(&small_config()).unwrap();
    let models = ModelContext::new(
      Arc::new(FixedRegionDetector::whole_frame()),
      base.models().segmenter.clone(),
      base.models().encoder.clone(),
    );
    let pipeline = IrisPipeline::new(models, RubberSheetNormalizer::new(8, 16).unwrap(), 0.5);
    let flat = Frame::new(0, RgbImage::from_pixel(40, 30, Rgb([90, 90, 90])));
    let eyes = pipeline.process_frame(&flat);
    assert_eq!(eyes.len(), 1);
    assert_abs_diff_eq!(eyes[0].embedding.norm(), 1.0, epsilon = 1e-5);
  }
}
