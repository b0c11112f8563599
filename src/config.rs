// 该文件是 Hongmo （虹膜考勤） 项目的一部分。
// src/config.rs - 流水线运行配置
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

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
  matcher::DEFAULT_THRESHOLD,
  model::DEFAULT_SEED,
  task::{ATTENDANCE_STRIDE, ENROLL_STRIDE},
};

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("配置解析错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("配置项 {field} 无效: {reason}")]
  Invalid { field: &'static str, reason: String },
}

/// 流水线运行配置
///
/// 所有字段都有默认值，JSON 文件中只需写出要覆盖的项。
/// `radial_res`、`angular_res`、`embedding_dim`、`pupil_ratio` 与编码器参数
/// 决定嵌入的含义，修改其中任何一项后既有模板不再可比。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
  pub enroll_stride: usize,
  pub attendance_stride: usize,
  pub match_threshold: f32,
  pub radial_res: usize,
  pub angular_res: usize,
  pub embedding_dim: usize,
  pub min_size_ratio: f32,
  pub pupil_ratio: f32,
  pub encoder_weights: Option<PathBuf>,
  pub encoder_seed: u64,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      enroll_stride: ENROLL_STRIDE as usize,
      attendance_stride: ATTENDANCE_STRIDE as usize,
      match_threshold: DEFAULT_THRESHOLD,
      radial_res: 64,
      angular_res: 512,
      embedding_dim: 256,
      min_size_ratio: 0.05,
      pupil_ratio: 0.5,
      encoder_weights: None,
      encoder_seed: DEFAULT_SEED,
    }
  }
}

impl PipelineConfig {
  /// 指定文件时从文件加载，否则使用默认配置
  pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
    match path {
      Some(path) => Self::from_json_file(path),
      None => Ok(Self::default()),
    }
  }

  pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let reader = BufReader::new(File::open(path.as_ref())?);
    let config: Self = serde_json::from_reader(reader)?;
    config.validate()?;
    Ok(config)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    let positive = [
      ("enroll_stride", self.enroll_stride),
      ("attendance_stride", self.attendance_stride),
      ("radial_res", self.radial_res),
      ("angular_res", self.angular_res),
      ("embedding_dim", self.embedding_dim),
    ];
    for (field, value) in positive {
      if value == 0 {
        return Err(ConfigError::Invalid {
          field,
          reason: "必须大于 0".to_string(),
        });
      }
    }

    // 尺寸过滤下限为 0 表示不过滤
    if !(0.0..=1.0).contains(&self.min_size_ratio) {
      return Err(ConfigError::Invalid {
        field: "min_size_ratio",
        reason: format!("{} 不在 [0, 1] 内", self.min_size_ratio),
      });
    }
    if !(self.pupil_ratio > 0.0 && self.pupil_ratio <= 1.0) {
      return Err(ConfigError::Invalid {
        field: "pupil_ratio",
        reason: format!("{} 不在 (0, 1] 内", self.pupil_ratio),
      });
    }

    if !(-1.0..=1.0).contains(&self.match_threshold) {
      return Err(ConfigError::Invalid {
        field: "match_threshold",
        reason: format!("{} 不在 [-1, 1] 内", self.match_threshold),
      });
    }

    Ok(())
  }
}
