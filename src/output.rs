// 该文件是 Hongmo （虹膜考勤） 项目的一部分。
// src/output.rs - 识别证据输出
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

use image::RgbImage;
use thiserror::Error;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, store::PersonId};

mod directory_record;

pub use self::directory_record::{DirectoryRecordOutput, DirectoryRecordOutputError};

pub trait Render<Frame, Output> {
  type Error;
  fn render_result(&self, frame: &Frame, result: &Output) -> Result<(), Self::Error>;
}

/// 一次被接受的识别，附带可供复核的信息
#[derive(Debug, Clone, PartialEq)]
pub struct Evidence {
  pub person_id: PersonId,
  pub camera_id: String,
  pub frame_idx: u64,
  pub score: f32,
  pub bbox: [u32; 4],
}

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("目录记录输出错误: {0}")]
  DirectoryRecordOutputError(#[from] DirectoryRecordOutputError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

pub enum OutputWrapper {
  DirectoryRecordOutput(DirectoryRecordOutput),
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      DirectoryRecordOutput::SCHEME => {
        let output = DirectoryRecordOutput::from_url(url)?;
        Ok(OutputWrapper::DirectoryRecordOutput(output))
      }
      scheme => Err(OutputError::SchemeMismatch(scheme.to_string())),
    }
  }
}

impl Render<RgbImage, Evidence> for OutputWrapper {
  type Error = OutputError;

  fn render_result(&self, crop: &RgbImage, evidence: &Evidence) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::DirectoryRecordOutput(output) => output
        .render_result(crop, evidence)
        .map_err(OutputError::from),
    }
  }
}
