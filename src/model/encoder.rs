// 该文件是 Hongmo （虹膜考勤） 项目的一部分。
// src/model/encoder.rs - 虹膜嵌入编码器
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
  fs::File,
  io::BufReader,
  path::{Path, PathBuf},
};

use ndarray::{Array1, Array2, ArrayView2};
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::model::{EncodeError, Embedding, Encoder, NormalizedIris};

const POOL_ROWS: usize = 8;
const POOL_COLS: usize = 32;
const HIDDEN_DIM: usize = 512;
const NORM_EPSILON: f32 = 1e-8;
pub const DEFAULT_SEED: u64 = 0x1815_2026;

/// 序列化的编码器参数
///
/// 矩阵按行主序展开：`w1` 为 `hidden_dim × (pool_rows * pool_cols)`，
/// `w2` 为 `embedding_dim × hidden_dim`。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderWeights {
  pub embedding_dim: usize,
  pub hidden_dim: usize,
  pub pool_rows: usize,
  pub pool_cols: usize,
  pub w1: Vec<f32>,
  pub b1: Vec<f32>,
  pub w2: Vec<f32>,
  pub b2: Vec<f32>,
}

/// 编码器参数来源
///
/// 默认参数未经训练，嵌入在生物特征意义上不可信，只保证流水线可以端到端运行。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParameterSource {
  Loaded(PathBuf),
  /// 调用方直接提供的参数
  Provided,
  Default { seed: u64 },
}

#[derive(Error, Debug)]
enum WeightsLoadError {
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("JSON 解析错误: {0}")]
  Json(#[from] serde_json::Error),
  #[error("{0}")]
  Shape(#[from] EncodeError),
}

/// 两层全连接编码器
///
/// 条带先自适应平均池化到 8x32 网格，再经 ReLU 隐层与输出层，
/// 最后除以 `‖v‖ + 1e-8` 得到单位向量。
#[derive(Debug, Clone)]
pub struct MlpEncoder {
  pool: (usize, usize),
  w1: Array2<f32>,
  b1: Array1<f32>,
  w2: Array2<f32>,
  b2: Array1<f32>,
  source: ParameterSource,
}

impl MlpEncoder {
  /// 由种子确定地生成未经训练的参数（fan-in 均匀初始化）
  pub fn with_default_parameters(embedding_dim: usize, seed: u64) -> Self {
    let features = POOL_ROWS * POOL_COLS;
    let mut rng = StdRng::seed_from_u64(seed);
    let mut uniform = |rows: usize, cols: usize, fan_in: usize| {
      let bound = 1.0 / (fan_in as f32).sqrt();
      Array2::from_shape_simple_fn((rows, cols), || rng.gen_range(-bound..bound))
    };

    let w1 = uniform(HIDDEN_DIM, features, features);
    let b1 = uniform(1, HIDDEN_DIM, features).row(0).to_owned();
    let w2 = uniform(embedding_dim, HIDDEN_DIM, HIDDEN_DIM);
    let b2 = uniform(1, embedding_dim, HIDDEN_DIM).row(0).to_owned();

    Self {
      pool: (POOL_ROWS, POOL_COLS),
      w1,
      b1,
      w2,
      b2,
      source: ParameterSource::Default { seed },
    }
  }

  pub fn from_weights(weights: EncoderWeights) -> Result<Self, EncodeError> {
    let features = weights.pool_rows * weights.pool_cols;
    if features == 0 || weights.hidden_dim == 0 || weights.embedding_dim == 0 {
      return Err(EncodeError::InvalidParameters("维度不能为 0".to_string()));
    }
    let shape_error = |name: &str, e: ndarray::ShapeError| {
      EncodeError::InvalidParameters(format!("{} 形状不匹配: {}", name, e))
    };

    let w1 = Array2::from_shape_vec((weights.hidden_dim, features), weights.w1)
      .map_err(|e| shape_error("w1", e))?;
    let w2 = Array2::from_shape_vec((weights.embedding_dim, weights.hidden_dim), weights.w2)
      .map_err(|e| shape_error("w2", e))?;
    if weights.b1.len() != weights.hidden_dim || weights.b2.len() != weights.embedding_dim {
      return Err(EncodeError::InvalidParameters("偏置长度不匹配".to_string()));
    }

    Ok(Self {
      pool: (weights.pool_rows, weights.pool_cols),
      w1,
      b1: Array1::from(weights.b1),
      w2,
      b2: Array1::from(weights.b2),
      source: ParameterSource::Provided,
    })
  }

  /// 尽力加载参数文件，失败时退回默认参数而不是报错
  pub fn load_or_default(path: Option<&Path>, embedding_dim: usize, seed: u64) -> Self {
    let Some(path) = path else {
      warn!("未指定编码器参数，使用未训练的默认参数 (seed={:#x})", seed);
      return Self::with_default_parameters(embedding_dim, seed);
    };

    match Self::load(path) {
      Ok(encoder) if encoder.dimension() == embedding_dim => {
        info!("编码器参数加载完成: {}", path.display());
        encoder
      }
      Ok(encoder) => {
        warn!(
          "编码器参数维度 {} 与配置 {} 不符，使用未训练的默认参数",
          encoder.dimension(),
          embedding_dim
        );
        Self::with_default_parameters(embedding_dim, seed)
      }
      Err(e) => {
        warn!(
          "无法加载编码器参数 {}: {}，使用未训练的默认参数",
          path.display(),
          e
        );
        Self::with_default_parameters(embedding_dim, seed)
      }
    }
  }

  fn load(path: &Path) -> Result<Self, WeightsLoadError> {
    let reader = BufReader::new(File::open(path)?);
    let weights: EncoderWeights = serde_json::from_reader(reader)?;
    let mut encoder = Self::from_weights(weights)?;
    encoder.source = ParameterSource::Loaded(path.to_path_buf());
    Ok(encoder)
  }

  pub fn parameters(&self) -> &ParameterSource {
    &self.source
  }

  pub fn is_default(&self) -> bool {
    matches!(self.source, ParameterSource::Default { .. })
  }

  pub fn to_weights(&self) -> EncoderWeights {
    EncoderWeights {
      embedding_dim: self.w2.nrows(),
      hidden_dim: self.w1.nrows(),
      pool_rows: self.pool.0,
      pool_cols: self.pool.1,
      w1: self.w1.iter().copied().collect(),
      b1: self.b1.to_vec(),
      w2: self.w2.iter().copied().collect(),
      b2: self.b2.to_vec(),
    }
  }
}

/// 自适应平均池化，区间划分与 PyTorch `AdaptiveAvgPool2d` 一致
fn adaptive_avg_pool(input: ArrayView2<f32>, rows: usize, cols: usize) -> Array1<f32> {
  let (height, width) = input.dim();
  let mut pooled = Array1::zeros(rows * cols);
  for p in 0..rows {
    let y0 = p * height / rows;
    let y1 = ((p + 1) * height).div_ceil(rows);
    for q in 0..cols {
      let x0 = q * width / cols;
      let x1 = ((q + 1) * width).div_ceil(cols);
      let cell = input.slice(ndarray::s![y0..y1, x0..x1]);
      pooled[p * cols + q] = cell.sum() / cell.len() as f32;
    }
  }
  pooled
}

impl Encoder for MlpEncoder {
  fn dimension(&self) -> usize {
    self.w2.nrows()
  }

  fn encode(&self, iris: &NormalizedIris) -> Result<Embedding, EncodeError> {
    let (height, width) = iris.shape();
    if height == 0 || width == 0 {
      return Err(EncodeError::EmptyInput);
    }

    let features = adaptive_avg_pool(iris.view(), self.pool.0, self.pool.1);
    let hidden = (self.w1.dot(&features) + &self.b1).mapv(|v| v.max(0.0));
    let output = self.w2.dot(&hidden) + &self.b2;

    let norm = output.dot(&output).sqrt();
    debug!("嵌入模长（归一化前）: {:.4}", norm);
    let values = output.mapv(|v| v / (norm + NORM_EPSILON)).to_vec();
    Ok(Embedding::new(values))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use approx::assert_abs_diff_eq;

  fn strip(rows: usize, cols: usize, f: impl Fn(usize, usize) -> f32) -> NormalizedIris {
    NormalizedIris::new(Array2::from_shape_fn((rows, cols), |(i, j)| f(i, j)))
  }

  #[test]
  fn output_is_unit_norm() {
    let encoder = MlpEncoder::with_default_parameters(256, DEFAULT_SEED);
    let input = strip(64, 512, |i, j| ((i * 31 + j * 7) % 97) as f32 / 96.0);
    let embedding = encoder.encode(&input).unwrap();
    assert_eq!(embedding.dimension(), 256);
    assert_abs_diff_eq!(embedding.norm(), 1.0, epsilon = 1e-5);
  }

  #[test]
  fn all_zero_input_is_still_unit_norm() {
    let encoder = MlpEncoder::with_default_parameters(128, DEFAULT_SEED);
    let embedding = encoder.encode(&strip(64, 512, |_, _| 0.0)).unwrap();
    assert_abs_diff_eq!(embedding.norm(), 1.0, epsilon = 1e-5);
  }

  #[test]
  fn small_strips_are_pooled_adaptively() {
    let encoder = MlpEncoder::with_default_parameters(32, DEFAULT_SEED);
    let embedding = encoder.encode(&strip(3, 5, |i, j| (i + j) as f32 / 6.0)).unwrap();
    assert_eq!(embedding.dimension(), 32);
    assert_abs_diff_eq!(embedding.norm(), 1.0, epsilon = 1e-5);
  }

  #[test]
  fn same_seed_same_embedding() {
    let input = strip(16, 64, |i, j| ((i * j) % 5) as f32 / 4.0);
    let a = MlpEncoder::with_default_parameters(64, 7).encode(&input).unwrap();
    let b = MlpEncoder::with_default_parameters(64, 7).encode(&input).unwrap();
    assert_eq!(a, b);
  }

  #[test]
  fn missing_weights_fall_back_to_defaults() {
    let encoder = MlpEncoder::load_or_default(Some(Path::new("/no/such/weights.json")), 64, 3);
    assert!(encoder.is_default());
    assert_eq!(encoder.dimension(), 64);
    assert_eq!(encoder.parameters(), &ParameterSource::Default { seed: 3 });
  }

  #[test]
  fn weights_round_trip_through_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("weights.json");
    let original = MlpEncoder::with_default_parameters(16, 11);
    std::fs::write(&path, serde_json::to_vec(&original.to_weights()).unwrap()).unwrap();

    let loaded = MlpEncoder::load_or_default(Some(&path), 16, 0);
    assert_eq!(loaded.parameters(), &ParameterSource::Loaded(path.clone()));

    let input = strip(8, 32, |i, j| (i as f32 - j as f32).abs() / 32.0);
    assert_eq!(original.encode(&input).unwrap(), loaded.encode(&input).unwrap());
  }

  #[test]
  fn dimension_mismatch_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("weights.json");
    let weights = MlpEncoder::with_default_parameters(16, 11).to_weights();
    std::fs::write(&path, serde_json::to_vec(&weights).unwrap()).unwrap();

    let encoder = MlpEncoder::load_or_default(Some(&path), 32, 5);
    assert!(encoder.is_default());
    assert_eq!(encoder.dimension(), 32);
  }

  #[test]
  fn malformed_weights_are_rejected() {
    let mut weights = MlpEncoder::with_default_parameters(8, 1).to_weights();
    weights.w2.pop();
    assert!(MlpEncoder::from_weights(weights).is_err());
  }

  #[test]
  fn adaptive_pool_averages_cells() {
    let input = Array2::from_shape_fn((4, 4), |(i, _)| i as f32);
    let pooled = adaptive_avg_pool(input.view(), 2, 1);
    assert_eq!(pooled.to_vec(), vec![0.5, 2.5]);
  }
}
