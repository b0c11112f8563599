// 该文件是 Hongmo （虹膜考勤） 项目的一部分。
// src/bin/list_templates.rs - 查看已注册的模板、人员与事件
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

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use hongmo::{
  service::MAX_RECENT_EVENTS,
  store::{EventStore, JsonFileStore, TemplateStore},
};

/// 查看存储内容，不加载任何模型
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 存储目录
  #[arg(long, value_name = "DIR")]
  pub store: PathBuf,
  /// 同时列出人员及其模板数
  #[arg(long)]
  pub persons: bool,
  /// 同时列出最近的考勤事件（最多 200 条）
  #[arg(long, value_name = "COUNT")]
  pub events: Option<usize>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
    .init();

  let args = Args::parse();

  let store = JsonFileStore::open(&args.store)?;

  for id in store.list_template_ids()? {
    println!("{}", id);
  }

  if args.persons {
    println!();
    for summary in store.list_persons()? {
      let person = summary.person;
      println!(
        "{}\t{}\t{}\t{}\t{}",
        person.id,
        person.employee_code,
        person.name,
        person.department.as_deref().unwrap_or("-"),
        summary.template_count
      );
    }
  }

  if let Some(limit) = args.events {
    println!();
    for event in store.recent_events(limit.clamp(1, MAX_RECENT_EVENTS))? {
      println!(
        "{}\t{}\t{}\t{}\t{:.4}\t{}",
        event.timestamp.to_rfc3339(),
        event.person_id,
        event.camera_id,
        event.frame_idx,
        event.score,
        event.video_path
      );
    }
  }

  Ok(())
}
