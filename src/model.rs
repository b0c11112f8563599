// 该文件是 Hongmo （虹膜考勤） 项目的一部分。
// src/model.rs - 模型组件接口与数据类型
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

use image::{GrayImage, RgbImage};
use ndarray::Array2;
use thiserror::Error;

use crate::frame::Frame;

mod encoder;
mod eye_detector;
mod geometry;
mod normalizer;
mod segmenter;

pub use self::encoder::{DEFAULT_SEED, EncoderWeights, MlpEncoder, ParameterSource};
pub use self::eye_detector::{DarkRegionEyeDetector, DarkRegionEyeDetectorBuilder, FixedRegionDetector};
pub use self::geometry::estimate_geometry;
pub use self::normalizer::RubberSheetNormalizer;
pub use self::segmenter::HoughIrisSegmenter;

/// 一次眼睛检测结果
#[derive(Debug, Clone)]
pub struct EyeDetection {
  /// 眼部裁剪图
  pub crop: RgbImage,
  /// 源帧坐标下的边界框 [x_min, y_min, x_max, y_max]，右下角不含
  pub bbox: [u32; 4],
  /// 置信度 [0, 1]，仅作为质量信号
  pub confidence: f32,
}

/// 虹膜掩码，与眼部裁剪图同尺寸，像素值 1 表示虹膜
///
/// 找不到合理的虹膜圆时掩码全零，这是合法输出。
pub type IrisMask = GrayImage;

/// 虹膜几何参数，坐标均为眼部裁剪图像素坐标
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IrisGeometry {
  pub center: (f32, f32),
  pub pupil_radius: u32,
  pub iris_radius: u32,
  /// 掩码为空时按裁剪图尺寸推出的低置信度几何
  pub fallback: bool,
}

/// 归一化虹膜条带，形状为 (radial_res, angular_res)，取值 [0, 1]
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedIris(Array2<f32>);

impl NormalizedIris {
  pub fn new(strip: Array2<f32>) -> Self {
    Self(strip)
  }

  pub fn shape(&self) -> (usize, usize) {
    self.0.dim()
  }

  pub fn view(&self) -> ndarray::ArrayView2<'_, f32> {
    self.0.view()
  }

  pub fn into_inner(self) -> Array2<f32> {
    self.0
  }
}

/// 虹膜嵌入向量
///
/// 编码器产出时为单位长度；注册模板是多个嵌入的均值，不再归一化。
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding(Vec<f32>);

impl Embedding {
  pub fn new(values: Vec<f32>) -> Self {
    Self(values)
  }

  pub fn as_slice(&self) -> &[f32] {
    &self.0
  }

  pub fn dimension(&self) -> usize {
    self.0.len()
  }

  pub fn norm(&self) -> f32 {
    self.0.iter().map(|v| v * v).sum::<f32>().sqrt()
  }

  pub fn into_inner(self) -> Vec<f32> {
    self.0
  }

  /// 逐元素均值；输入为空或维度不一致时返回 `None`
  pub fn mean(embeddings: &[Embedding]) -> Option<Embedding> {
    let first = embeddings.first()?;
    let dimension = first.dimension();
    if embeddings.iter().any(|e| e.dimension() != dimension) {
      return None;
    }

    let mut sum = vec![0.0f64; dimension];
    for embedding in embeddings {
      for (acc, value) in sum.iter_mut().zip(embedding.as_slice()) {
        *acc += *value as f64;
      }
    }
    let count = embeddings.len() as f64;
    Some(Embedding(sum.into_iter().map(|v| (v / count) as f32).collect()))
  }
}

#[derive(Error, Debug)]
pub enum SegmentError {
  #[error("眼部裁剪图为空: {0}x{1}")]
  EmptyCrop(u32, u32),
}

#[derive(Error, Debug)]
pub enum NormalizeError {
  #[error("归一化分辨率必须大于 0: {radial}x{angular}")]
  InvalidResolution { radial: usize, angular: usize },
  #[error("眼部裁剪图为空")]
  EmptyCrop,
  #[error("几何参数无效: pupil={pupil}, iris={iris}")]
  InvalidGeometry { pupil: u32, iris: u32 },
}

#[derive(Error, Debug)]
pub enum EncodeError {
  #[error("归一化条带为空")]
  EmptyInput,
  #[error("编码器参数无效: {0}")]
  InvalidParameters(String),
}

/// 眼睛检测器
///
/// 检测在帧之间无状态，对相同输入必须产出相同结果。
pub trait EyeDetector: Send + Sync {
  fn detect(&self, frame: &Frame) -> Vec<EyeDetection>;
}

/// 虹膜分割器
pub trait IrisSegmenter: Send + Sync {
  fn segment(&self, crop: &RgbImage) -> Result<IrisMask, SegmentError>;
}

/// 嵌入编码器
///
/// 对相同输入与相同参数必须确定，输出固定维度的单位向量。
pub trait Encoder: Send + Sync {
  fn dimension(&self) -> usize;
  fn encode(&self, iris: &NormalizedIris) -> Result<Embedding, EncodeError>;
}

/// 只读模型上下文，加载一次后在多个流水线实例之间共享
#[derive(Clone)]
pub struct ModelContext {
  pub detector: Arc<dyn EyeDetector>,
  pub segmenter: Arc<dyn IrisSegmenter>,
  pub encoder: Arc<dyn Encoder>,
}

impl ModelContext {
  pub fn new(
    detector: Arc<dyn EyeDetector>,
    segmenter: Arc<dyn IrisSegmenter>,
    encoder: Arc<dyn Encoder>,
  ) -> Self {
    Self {
      detector,
      segmenter,
      encoder,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn mean_is_element_wise_and_not_renormalized() {
    let a = Embedding::new(vec![1.0, 0.0]);
    let b = Embedding::new(vec![0.0, 1.0]);
    let mean = Embedding::mean(&[a, b]).unwrap();
    assert_eq!(mean.as_slice(), &[0.5, 0.5]);
    assert!((mean.norm() - 0.5f32.sqrt()).abs() < 1e-6);
  }

  #[test]
  fn mean_of_nothing_is_none() {
    assert!(Embedding::mean(&[]).is_none());
  }

  #[test]
  fn mean_rejects_mixed_dimensions() {
    let a = Embedding::new(vec![1.0, 0.0]);
    let b = Embedding::new(vec![1.0]);
    assert!(Embedding::mean(&[a, b]).is_none());
  }
}
