// 该文件是 Hongmo （虹膜考勤） 项目的一部分。
// src/store.rs - 模板与考勤事件存储
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

use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::Embedding;

mod json_store;

pub use self::json_store::JsonFileStore;

pub type PersonId = u64;
pub type TemplateId = u64;

#[derive(Error, Debug)]
pub enum StoreError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("员工编号已存在: {0}")]
  DuplicateEmployeeCode(String),
  #[error("嵌入字节长度 {0} 不是 4 的倍数")]
  CorruptEmbedding(usize),
  #[error("存储锁已损坏")]
  Poisoned,
}

/// 待注册人员
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPerson {
  pub name: String,
  pub employee_code: String,
  pub department: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
  pub id: PersonId,
  pub name: String,
  pub employee_code: String,
  pub department: Option<String>,
  pub created_at: DateTime<Utc>,
}

/// 人员及其模板数量
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonSummary {
  pub person: Person,
  pub template_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EyeSide {
  Left,
  Right,
  #[default]
  Unknown,
}

/// 待写入的模板
#[derive(Debug, Clone, PartialEq)]
pub struct NewTemplate {
  pub embedding: Embedding,
  pub eye_side: EyeSide,
  pub quality_score: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Template {
  pub id: TemplateId,
  pub person_id: PersonId,
  pub embedding: Embedding,
  pub eye_side: EyeSide,
  pub quality_score: f32,
  pub created_at: DateTime<Utc>,
}

/// 一次被接受的识别结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceEvent {
  pub person_id: PersonId,
  pub camera_id: String,
  pub video_path: String,
  pub timestamp: DateTime<Utc>,
  pub score: f32,
  pub frame_idx: u64,
}

/// 模板存储
///
/// `insert_enrollment` 必须原子地写入人员与模板，不允许出现没有模板的人员。
pub trait TemplateStore: Send + Sync {
  /// 按写入顺序返回全部模板
  fn load_templates(&self) -> Result<Vec<Template>, StoreError>;
  fn insert_enrollment(
    &self,
    person: NewPerson,
    template: NewTemplate,
  ) -> Result<(PersonId, TemplateId), StoreError>;
  fn list_template_ids(&self) -> Result<Vec<TemplateId>, StoreError>;
  fn list_persons(&self) -> Result<Vec<PersonSummary>, StoreError>;
}

pub trait EventStore: Send + Sync {
  /// 一次写入一批事件，要么全部成功要么全部不写
  fn append_events(&self, events: &[AttendanceEvent]) -> Result<(), StoreError>;
  /// 最新的 `limit` 条事件，按时间倒序
  fn recent_events(&self, limit: usize) -> Result<Vec<AttendanceEvent>, StoreError>;
}

/// 嵌入序列化为小端 f32 原始字节，长度为 `4 * dim`
pub fn embedding_to_bytes(embedding: &Embedding) -> Vec<u8> {
  embedding
    .as_slice()
    .iter()
    .flat_map(|v| v.to_le_bytes())
    .collect()
}

pub fn embedding_from_bytes(bytes: &[u8]) -> Result<Embedding, StoreError> {
  if bytes.len() % 4 != 0 {
    return Err(StoreError::CorruptEmbedding(bytes.len()));
  }
  let values = bytes
    .chunks_exact(4)
    .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
    .collect();
  Ok(Embedding::new(values))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TemplateRecord {
  id: TemplateId,
  person_id: PersonId,
  embedding: Vec<u8>,
  eye_side: EyeSide,
  quality_score: f32,
  created_at: DateTime<Utc>,
}

impl TemplateRecord {
  fn decode(&self) -> Result<Template, StoreError> {
    Ok(Template {
      id: self.id,
      person_id: self.person_id,
      embedding: embedding_from_bytes(&self.embedding)?,
      eye_side: self.eye_side,
      quality_score: self.quality_score,
      created_at: self.created_at,
    })
  }
}

/// 存储的全部表，内存存储与 JSON 文件存储共用
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Tables {
  next_person_id: PersonId,
  next_template_id: TemplateId,
  persons: Vec<Person>,
  templates: Vec<TemplateRecord>,
  events: Vec<AttendanceEvent>,
}

impl Tables {
  fn load_templates(&self) -> Result<Vec<Template>, StoreError> {
    self.templates.iter().map(TemplateRecord::decode).collect()
  }

  fn insert_enrollment(
    &mut self,
    person: NewPerson,
    template: NewTemplate,
  ) -> Result<(PersonId, TemplateId), StoreError> {
    if self
      .persons
      .iter()
      .any(|p| p.employee_code == person.employee_code)
    {
      return Err(StoreError::DuplicateEmployeeCode(person.employee_code));
    }

    let now = Utc::now();
    self.next_person_id += 1;
    self.next_template_id += 1;
    let person_id = self.next_person_id;
    let template_id = self.next_template_id;

    self.persons.push(Person {
      id: person_id,
      name: person.name,
      employee_code: person.employee_code,
      department: person.department,
      created_at: now,
    });
    self.templates.push(TemplateRecord {
      id: template_id,
      person_id,
      embedding: embedding_to_bytes(&template.embedding),
      eye_side: template.eye_side,
      quality_score: template.quality_score,
      created_at: now,
    });
    Ok((person_id, template_id))
  }

  fn list_template_ids(&self) -> Vec<TemplateId> {
    self.templates.iter().map(|t| t.id).collect()
  }

  /// 按注册时间由新到旧
  fn list_persons(&self) -> Vec<PersonSummary> {
    let mut persons: Vec<&Person> = self.persons.iter().rev().collect();
    persons.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    persons
      .into_iter()
      .map(|person| PersonSummary {
        person: person.clone(),
        template_count: self
          .templates
          .iter()
          .filter(|t| t.person_id == person.id)
          .count(),
      })
      .collect()
  }

  fn recent_events(&self, limit: usize) -> Vec<AttendanceEvent> {
    // 同一时间戳的事件以后写入者为新
    let mut events: Vec<&AttendanceEvent> = self.events.iter().rev().collect();
    events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    events.into_iter().take(limit).cloned().collect()
  }
}

/// 进程内存储，进程退出后数据丢失
#[derive(Debug, Default)]
pub struct MemoryStore {
  tables: RwLock<Tables>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

impl TemplateStore for MemoryStore {
  fn load_templates(&self) -> Result<Vec<Template>, StoreError> {
    self
      .tables
      .read()
      .map_err(|_| StoreError::Poisoned)?
      .load_templates()
  }

  fn insert_enrollment(
    &self,
    person: NewPerson,
    template: NewTemplate,
  ) -> Result<(PersonId, TemplateId), StoreError> {
    self
      .tables
      .write()
      .map_err(|_| StoreError::Poisoned)?
      .insert_enrollment(person, template)
  }

  fn list_template_ids(&self) -> Result<Vec<TemplateId>, StoreError> {
    Ok(
      self
        .tables
        .read()
        .map_err(|_| StoreError::Poisoned)?
        .list_template_ids(),
    )
  }

  fn list_persons(&self) -> Result<Vec<PersonSummary>, StoreError> {
    Ok(
      self
        .tables
        .read()
        .map_err(|_| StoreError::Poisoned)?
        .list_persons(),
    )
  }
}

impl EventStore for MemoryStore {
  fn append_events(&self, events: &[AttendanceEvent]) -> Result<(), StoreError> {
    self
      .tables
      .write()
      .map_err(|_| StoreError::Poisoned)?
      .events
      .extend_from_slice(events);
    Ok(())
  }

  fn recent_events(&self, limit: usize) -> Result<Vec<AttendanceEvent>, StoreError> {
    Ok(
      self
        .tables
        .read()
        .map_err(|_| StoreError::Poisoned)?
        .recent_events(limit),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::Duration;

  fn person(code: &str) -> NewPerson {
    NewPerson {
      name: format!("员工 {}", code),
      employee_code: code.to_string(),
      department: None,
    }
  }

  fn template(values: Vec<f32>) -> NewTemplate {
    NewTemplate {
      embedding: Embedding::new(values),
      eye_side: EyeSide::Unknown,
      quality_score: 0.9,
    }
  }

  fn event(person_id: PersonId, frame_idx: u64, timestamp: DateTime<Utc>) -> AttendanceEvent {
    AttendanceEvent {
      person_id,
      camera_id: "gate-1".to_string(),
      video_path: "frames:///tmp/clip".to_string(),
      timestamp,
      score: 0.9,
      frame_idx,
    }
  }

  #[test]
  fn embedding_bytes_are_little_endian_f32() {
    let embedding = Embedding::new(vec![1.0, -0.5, f32::MIN_POSITIVE]);
    let bytes = embedding_to_bytes(&embedding);
    assert_eq!(bytes.len(), 12);
    assert_eq!(&bytes[0..4], &1.0f32.to_le_bytes());
    assert_eq!(embedding_from_bytes(&bytes).unwrap(), embedding);
  }

  #[test]
  fn truncated_embedding_bytes_are_rejected() {
    assert!(matches!(
      embedding_from_bytes(&[0, 0, 128]),
      Err(StoreError::CorruptEmbedding(3))
    ));
  }

  #[test]
  fn enrollment_writes_person_and_template_together() {
    let store = MemoryStore::new();
    let (person_id, template_id) = store
      .insert_enrollment(person("E001"), template(vec![0.6, 0.8]))
      .unwrap();

    let templates = store.load_templates().unwrap();
    assert_eq!(templates.len(), 1);
    assert_eq!(templates[0].id, template_id);
    assert_eq!(templates[0].person_id, person_id);
    assert_eq!(templates[0].embedding.as_slice(), &[0.6, 0.8]);

    let persons = store.list_persons().unwrap();
    assert_eq!(persons.len(), 1);
    assert_eq!(persons[0].template_count, 1);
  }

  #[test]
  fn duplicate_employee_code_writes_nothing() {
    let store = MemoryStore::new();
    store
      .insert_enrollment(person("E001"), template(vec![1.0]))
      .unwrap();
    let result = store.insert_enrollment(person("E001"), template(vec![0.0]));
    assert!(matches!(result, Err(StoreError::DuplicateEmployeeCode(_))));
    assert_eq!(store.list_template_ids().unwrap().len(), 1);
    assert_eq!(store.list_persons().unwrap().len(), 1);
  }

  #[test]
  fn persons_are_listed_newest_first() {
    let store = MemoryStore::new();
    for code in ["A", "B", "C"] {
      store
        .insert_enrollment(person(code), template(vec![1.0]))
        .unwrap();
    }
    let codes: Vec<String> = store
      .list_persons()
      .unwrap()
      .into_iter()
      .map(|summary| summary.person.employee_code)
      .collect();
    assert_eq!(codes, vec!["C", "B", "A"]);
  }

  #[test]
  fn templates_keep_insertion_order() {
    let store = MemoryStore::new();
    for code in ["A", "B", "C"] {
      store
        .insert_enrollment(person(code), template(vec![1.0]))
        .unwrap();
    }
    let ids = store.list_template_ids().unwrap();
    let loaded: Vec<TemplateId> = store
      .load_templates()
      .unwrap()
      .iter()
      .map(|t| t.id)
      .collect();
    assert_eq!(ids, loaded);
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
  }

  #[test]
  fn recent_events_are_newest_first() {
    let store = MemoryStore::new();
    let t0 = Utc::now();
    store
      .append_events(&[
        event(1, 0, t0),
        event(1, 5, t0 + Duration::seconds(2)),
        event(2, 10, t0 + Duration::seconds(1)),
      ])
      .unwrap();

    let recent = store.recent_events(2).unwrap();
    let frames: Vec<u64> = recent.iter().map(|e| e.frame_idx).collect();
    assert_eq!(frames, vec![5, 10]);
  }

  #[test]
  fn same_timestamp_events_prefer_later_writes() {
    let store = MemoryStore::new();
    let t0 = Utc::now();
    store
      .append_events(&[event(1, 0, t0), event(1, 5, t0)])
      .unwrap();
    assert_eq!(store.recent_events(1).unwrap()[0].frame_idx, 5);
  }
}
