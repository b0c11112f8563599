// 该文件是 Hongmo （虹膜考勤） 项目的一部分。
// src/bin/enroll_person.rs - 由注册视频登记人员
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
use tracing::info;
use tracing_subscriber::EnvFilter;

use hongmo::{
  config::PipelineConfig,
  input::VideoRef,
  service::IrisAttendance,
  store::{JsonFileStore, NewPerson},
};

/// 由注册视频登记人员并生成虹膜模板
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 姓名
  #[arg(long)]
  pub name: String,
  /// 员工编号，必须唯一
  #[arg(long, value_name = "CODE")]
  pub employee_code: String,
  /// 部门
  #[arg(long)]
  pub department: Option<String>,
  /// 注册视频
  /// 支持格式:
  /// - gst://file/<path>
  /// - frames://<dir>
  /// - 普通文件或目录路径
  #[arg(long, value_name = "SOURCE")]
  pub video: String,
  /// 存储目录
  #[arg(long, value_name = "DIR")]
  pub store: PathBuf,
  /// JSON 配置文件
  #[arg(long, value_name = "FILE")]
  pub config: Option<PathBuf>,
  /// 抽帧步长，覆盖配置文件
  #[arg(long)]
  pub stride: Option<usize>,
  /// 编码器参数文件，覆盖配置文件
  #[arg(long, value_name = "FILE")]
  pub weights: Option<PathBuf>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let args = Args::parse();

  let mut config = PipelineConfig::load(args.config.as_deref())?;
  if let Some(stride) = args.stride {
    config.enroll_stride = stride;
  }
  if let Some(weights) = args.weights {
    config.encoder_weights = Some(weights);
  }
  config.validate()?;

  info!("存储目录: {}", args.store.display());
  info!("注册视频: {}", args.video);

  let video = VideoRef::parse(&args.video)?;
  let store = JsonFileStore::open(&args.store)?;
  let service = IrisAttendance::new(&config, store)?;

  let person_id = service.enroll(
    NewPerson {
      name: args.name,
      employee_code: args.employee_code,
      department: args.department,
    },
    &video,
  )?;

  println!("{}", person_id);
  Ok(())
}
