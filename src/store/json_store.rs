// 该文件是 Hongmo （虹膜考勤） 项目的一部分。
// src/store/json_store.rs - JSON 文件存储
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
  io::{BufReader, BufWriter, Write},
  path::{Path, PathBuf},
  sync::RwLock,
};

use tracing::{debug, info};

use crate::store::{
  AttendanceEvent, EventStore, NewPerson, NewTemplate, PersonId, PersonSummary, StoreError,
  Tables, Template, TemplateId, TemplateStore,
};

const STORE_FILE: &str = "hongmo.json";

/// 以单个 JSON 文件持久化的存储
///
/// 每次写操作先在副本上修改，写入临时文件后再整体替换，
/// 失败时磁盘与内存中的数据都保持原样。
#[derive(Debug)]
pub struct JsonFileStore {
  path: PathBuf,
  tables: RwLock<Tables>,
}

impl JsonFileStore {
  /// 打开目录下的存储文件，不存在时创建空存储
  pub fn open(directory: impl AsRef<Path>) -> Result<Self, StoreError> {
    let directory = directory.as_ref();
    std::fs::create_dir_all(directory)?;
    let path = directory.join(STORE_FILE);

    let tables = if path.exists() {
      let reader = BufReader::new(File::open(&path)?);
      let tables: Tables = serde_json::from_reader(reader)?;
      info!(
        "存储已加载: {} ({} 人, {} 模板, {} 事件)",
        path.display(),
        tables.persons.len(),
        tables.templates.len(),
        tables.events.len()
      );
      tables
    } else {
      info!("新建存储: {}", path.display());
      Tables::default()
    };

    Ok(Self {
      path,
      tables: RwLock::new(tables),
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  fn persist(&self, tables: &Tables) -> Result<(), StoreError> {
    let tmp = self.path.with_extension("json.tmp");
    {
      let mut writer = BufWriter::new(File::create(&tmp)?);
      serde_json::to_writer(&mut writer, tables)?;
      writer.flush()?;
    }
    std::fs::rename(&tmp, &self.path)?;
    debug!("存储已写入: {}", self.path.display());
    Ok(())
  }

  fn update<T>(
    &self,
    apply: impl FnOnce(&mut Tables) -> Result<T, StoreError>,
  ) -> Result<T, StoreError> {
    let mut guard = self.tables.write().map_err(|_| StoreError::Poisoned)?;
    let mut next = guard.clone();
    let value = apply(&mut next)?;
    self.persist(&next)?;
    *guard = next;
    Ok(value)
  }
}

impl TemplateStore for JsonFileStore {
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
    self.update(|tables| tables.insert_enrollment(person, template))
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

impl EventStore for JsonFileStore {
  fn append_events(&self, events: &[AttendanceEvent]) -> Result<(), StoreError> {
    if events.is_empty() {
      return Ok(());
    }
    self.update(|tables| {
      tables.events.extend_from_slice(events);
      Ok(())
    })
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
