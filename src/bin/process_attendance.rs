// 该文件是 Hongmo （虹膜考勤） 项目的一部分。
// src/bin/process_attendance.rs - 处理考勤视频
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
use url::Url;

use hongmo::{
  FromUrl, config::PipelineConfig, input::VideoRef, output::OutputWrapper,
  service::IrisAttendance, store::JsonFileStore,
};

/// 处理考勤视频并写入识别事件
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 摄像头标识
  #[arg(long, value_name = "ID")]
  pub camera_id: String,
  /// 考勤视频
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
  /// 匹配阈值 (-1.0 - 1.0)，覆盖配置文件
  #[arg(long, value_name = "THRESHOLD")]
  pub threshold: Option<f32>,
  /// 编码器参数文件，覆盖配置文件
  #[arg(long, value_name = "FILE")]
  pub weights: Option<PathBuf>,
  /// 识别证据输出，例如 folder:///var/lib/hongmo/evidence
  #[arg(long, value_name = "OUTPUT")]
  pub evidence: Option<Url>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let args = Args::parse();

  let mut config = PipelineConfig::load(args.config.as_deref())?;
  if let Some(stride) = args.stride {
    config.attendance_stride = stride;
  }
  if let Some(threshold) = args.threshold {
    config.match_threshold = threshold;
  }
  if let Some(weights) = args.weights {
    config.encoder_weights = Some(weights);
  }
  config.validate()?;

  info!("存储目录: {}", args.store.display());
  info!("考勤视频: {} (camera={})", args.video, args.camera_id);

  let video = VideoRef::parse(&args.video)?;
  let store = JsonFileStore::open(&args.store)?;
  let mut service = IrisAttendance::new(&config, store)?;
  if let Some(evidence) = &args.evidence {
    info!("识别证据输出: {}", evidence);
    service = service.with_recorder(OutputWrapper::from_url(evidence)?);
  }

  let count = service.process_attendance(&args.camera_id, &video)?;
  info!("写入 {} 条考勤事件", count);
  println!("{}", count);
  Ok(())
}
