// 该文件是 Hongmo （虹膜考勤） 项目的一部分。
// src/service.rs - 虹膜考勤服务接口
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

use thiserror::Error;
use tracing::info;

use crate::{
  config::PipelineConfig,
  frame::Frame,
  input::{InputError, VideoRef, open_video},
  matcher::Matcher,
  output::OutputWrapper,
  pipeline::{IrisPipeline, PipelineError},
  store::{
    AttendanceEvent, EventStore, EyeSide, NewPerson, NewTemplate, PersonId, PersonSummary,
    StoreError, TemplateId, TemplateStore,
  },
  task::{AttendanceTask, EnrollmentTask, Task, TaskError},
};

pub const MAX_RECENT_EVENTS: usize = 200;

#[derive(Error, Debug)]
pub enum CoreError {
  #[error("输入错误: {0}")]
  InputError(#[from] InputError),
  #[error("任务错误: {0}")]
  TaskError(#[from] TaskError),
  #[error("存储错误: {0}")]
  StoreError(#[from] StoreError),
  #[error("流水线错误: {0}")]
  PipelineError(#[from] PipelineError),
}

/// 注册与考勤的调用入口
///
/// 注册先在内存中完成全部计算，成功后才一次性写入人员与模板；
/// 考勤每次运行只读取一次模板，事件在运行结束后批量写入。
pub struct IrisAttendance<S> {
  pipeline: IrisPipeline,
  matcher: Matcher,
  store: S,
  enroll_stride: u64,
  attendance_stride: u64,
  recorder: Option<OutputWrapper>,
}

impl<S: TemplateStore + EventStore> IrisAttendance<S> {
  pub fn new(config: &PipelineConfig, store: S) -> Result<Self, CoreError> {
    let pipeline = IrisPipeline::from_config(config)?;
    Ok(Self::with_pipeline(pipeline, config, store))
  }

  /// 使用已组装好的流水线，配置只提供步长与阈值
  pub fn with_pipeline(pipeline: IrisPipeline, config: &PipelineConfig, store: S) -> Self {
    Self {
      pipeline,
      matcher: Matcher::new(config.match_threshold),
      store,
      enroll_stride: config.enroll_stride as u64,
      attendance_stride: config.attendance_stride as u64,
      recorder: None,
    }
  }

  pub fn with_recorder(mut self, recorder: OutputWrapper) -> Self {
    self.recorder = Some(recorder);
    self
  }

  pub fn store(&self) -> &S {
    &self.store
  }

  pub fn pipeline(&self) -> &IrisPipeline {
    &self.pipeline
  }

  pub fn enroll(&self, person: NewPerson, video: &VideoRef) -> Result<PersonId, CoreError> {
    info!("注册 {} ({})，视频: {}", person.name, person.employee_code, video);
    let frames = open_video(video)?;
    self.enroll_frames(person, frames)
  }

  /// 从任意帧源注册
  pub fn enroll_frames<I>(&self, person: NewPerson, frames: I) -> Result<PersonId, CoreError>
  where
    I: IntoIterator<Item = Frame>,
  {
    let outcome = EnrollmentTask::new(self.enroll_stride)?.run_task(frames, &self.pipeline)?;
    let template = NewTemplate {
      embedding: outcome.embedding,
      eye_side: EyeSide::Unknown,
      quality_score: outcome.quality_score,
    };
    let (person_id, template_id) = self.store.insert_enrollment(person, template)?;
    info!("注册完成: 人员 {}, 模板 {}", person_id, template_id);
    Ok(person_id)
  }

  /// 返回写入的事件数
  pub fn process_attendance(&self, camera_id: &str, video: &VideoRef) -> Result<usize, CoreError> {
    info!("处理考勤视频: {} (camera={})", video, camera_id);
    let frames = open_video(video)?;
    self.process_attendance_frames(camera_id, &video.identifier(), frames)
  }

  /// 从任意帧源处理考勤，`video_path` 写入事件用于溯源
  pub fn process_attendance_frames<I>(
    &self,
    camera_id: &str,
    video_path: &str,
    frames: I,
  ) -> Result<usize, CoreError>
  where
    I: IntoIterator<Item = Frame>,
  {
    let templates = self.store.load_templates()?;
    let events = AttendanceTask::new(
      self.attendance_stride,
      self.matcher.clone(),
      &templates,
      camera_id,
      video_path,
    )?
    .with_recorder(self.recorder.as_ref())
    .run_task(frames, &self.pipeline)?;

    self.store.append_events(&events)?;
    Ok(events.len())
  }

  pub fn list_templates(&self) -> Result<Vec<TemplateId>, CoreError> {
    Ok(self.store.list_template_ids()?)
  }

  pub fn list_persons(&self) -> Result<Vec<PersonSummary>, CoreError> {
    Ok(self.store.list_persons()?)
  }

  /// 最新事件，`limit` 被限制在 [1, 200]
  pub fn recent_events(&self, limit: usize) -> Result<Vec<AttendanceEvent>, CoreError> {
    Ok(
      self
        .store
        .recent_events(limit.clamp(1, MAX_RECENT_EVENTS))?,
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::MemoryStore;
  use chrono::Utc;

  fn service() -> IrisAttendance<MemoryStore> {
    let config = PipelineConfig {
      radial_res: 8,
      angular_res: 32,
      embedding_dim: 16,
      ..Default::default()
    };
    IrisAttendance::new(&config, MemoryStore::new()).unwrap()
  }

  #[test]
  fn missing_video_writes_nothing() {
    let service = service();
    let video = VideoRef::parse("frames:///no/such/directory").unwrap();
    let result = service.enroll(
      NewPerson {
        name: "张三".to_string(),
        employee_code: "E1".to_string(),
        department: None,
      },
      &video,
    );
    assert!(matches!(
      result,
      Err(CoreError::InputError(InputError::SourceUnavailable(_)))
    ));
    assert!(service.list_persons().unwrap().is_empty());
  }

  #[test]
  fn recent_events_limit_is_clamped() {
    let service = service();
    let events: Vec<AttendanceEvent> = (0..250)
      .map(|i| AttendanceEvent {
        person_id: 1,
        camera_id: "c".to_string(),
        video_path: "v".to_string(),
        timestamp: Utc::now(),
        score: 0.9,
        frame_idx: i,
      })
      .collect();
    service.store().append_events(&events).unwrap();

    assert_eq!(service.recent_events(0).unwrap().len(), 1);
    assert_eq!(service.recent_events(1000).unwrap().len(), MAX_RECENT_EVENTS);
    assert_eq!(service.recent_events(3).unwrap().len(), 3);
  }
}
