// 该文件是 Hongmo （虹膜考勤） 项目的一部分。
// src/task.rs - 注册与考勤任务
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

use chrono::Utc;
use image::RgbImage;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  frame::Frame,
  input::{FrameSampler, InputError},
  matcher::Matcher,
  model::Embedding,
  output::{Evidence, Render},
  pipeline::IrisPipeline,
  store::{AttendanceEvent, Template},
};

pub const ENROLL_STRIDE: u64 = 3;
pub const ATTENDANCE_STRIDE: u64 = 5;

#[derive(Error, Debug)]
pub enum TaskError {
  #[error("视频中未提取到任何虹膜嵌入")]
  NoSignalExtracted,
  #[error("输入错误: {0}")]
  InputError(#[from] InputError),
}

pub trait Task<I> {
  type Output;
  type Error;
  fn run_task(self, input: I, pipeline: &IrisPipeline) -> Result<Self::Output, Self::Error>;
}

/// 注册结果：所有采样帧中全部眼睛嵌入的均值
#[derive(Debug, Clone)]
pub struct EnrollmentOutcome {
  /// 逐元素均值，不再归一化
  pub embedding: Embedding,
  /// 参与平均的眼睛检测置信度均值
  pub quality_score: f32,
  pub eye_count: usize,
  pub frames_sampled: usize,
}

#[derive(Debug, Clone)]
pub struct EnrollmentTask {
  sampler: FrameSampler,
}

impl EnrollmentTask {
  pub fn new(stride: u64) -> Result<Self, TaskError> {
    Ok(Self {
      sampler: FrameSampler::new(stride)?,
    })
  }
}

impl<I: IntoIterator<Item = Frame>> Task<I> for EnrollmentTask {
  type Output = EnrollmentOutcome;
  type Error = TaskError;

  fn run_task(self, input: I, pipeline: &IrisPipeline) -> Result<Self::Output, Self::Error> {
    info!("开始注册任务 (stride={})...", self.sampler.stride());
    let mut embeddings = Vec::new();
    let mut confidence_sum = 0.0f64;
    let mut frames_sampled = 0usize;

    for (index, frame) in self.sampler.sample(input) {
      frames_sampled += 1;
      let eyes = pipeline.process_frame(&frame);
      debug!("注册帧 {}: {} 只眼睛", index, eyes.len());
      for eye in eyes {
        confidence_sum += eye.confidence as f64;
        embeddings.push(eye.embedding);
      }
    }

    let embedding = Embedding::mean(&embeddings).ok_or(TaskError::NoSignalExtracted)?;
    let eye_count = embeddings.len();
    let quality_score = (confidence_sum / eye_count as f64) as f32;
    info!(
      "注册任务完成: 采样 {} 帧, {} 只眼睛, 质量 {:.3}",
      frames_sampled, eye_count, quality_score
    );

    Ok(EnrollmentOutcome {
      embedding,
      quality_score,
      eye_count,
      frames_sampled,
    })
  }
}

/// 考勤任务
///
/// 模板在任务构造时确定，运行期间不会看到新注册的模板。
pub struct AttendanceTask<'a, O> {
  sampler: FrameSampler,
  matcher: Matcher,
  templates: &'a [Template],
  camera_id: String,
  video_path: String,
  recorder: Option<&'a O>,
}

impl<'a, O> AttendanceTask<'a, O> {
  pub fn new(
    stride: u64,
    matcher: Matcher,
    templates: &'a [Template],
    camera_id: impl Into<String>,
    video_path: impl Into<String>,
  ) -> Result<Self, TaskError> {
    Ok(Self {
      sampler: FrameSampler::new(stride)?,
      matcher,
      templates,
      camera_id: camera_id.into(),
      video_path: video_path.into(),
      recorder: None,
    })
  }

  /// 为每次被接受的识别保存证据，保存失败只记录日志
  pub fn with_recorder(mut self, recorder: Option<&'a O>) -> Self {
    self.recorder = recorder;
    self
  }
}

impl<'a, I, O> Task<I> for AttendanceTask<'a, O>
where
  I: IntoIterator<Item = Frame>,
  O: Render<RgbImage, Evidence>,
  O::Error: std::fmt::Display,
{
  type Output = Vec<AttendanceEvent>;
  type Error = TaskError;

  fn run_task(self, input: I, pipeline: &IrisPipeline) -> Result<Self::Output, Self::Error> {
    info!(
      "开始考勤任务: camera={}, 模板 {} 个, stride={}",
      self.camera_id,
      self.templates.len(),
      self.sampler.stride()
    );
    let mut events = Vec::new();

    for (index, frame) in self.sampler.sample(input) {
      for eye in pipeline.process_frame(&frame) {
        let result = self.matcher.match_embedding(&eye.embedding, self.templates);
        let Some(person_id) = result.person_id else {
          debug!("帧 {} 未匹配 (最高分 {:.4})", index, result.score);
          continue;
        };

        info!("帧 {} 识别到人员 {} (分数 {:.4})", index, person_id, result.score);
        if let Some(recorder) = self.recorder {
          let evidence = Evidence {
            person_id,
            camera_id: self.camera_id.clone(),
            frame_idx: index,
            score: result.score,
            bbox: eye.bbox,
          };
          if let Err(e) = recorder.render_result(&eye.crop, &evidence) {
            warn!("帧 {} 识别证据保存失败: {}", index, e);
          }
        }

        events.push(AttendanceEvent {
          person_id,
          camera_id: self.camera_id.clone(),
          video_path: self.video_path.clone(),
          timestamp: Utc::now(),
          score: result.score,
          frame_idx: index,
        });
      }
    }

    info!("考勤任务完成: {} 条事件", events.len());
    Ok(events)
  }
}
