// 该文件是 Hongmo （虹膜考勤） 项目的一部分。
// src/matcher.rs - 模板匹配
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

use std::sync::Arc;

use tracing::debug;

use crate::{
  model::Embedding,
  store::{PersonId, Template},
};

const COSINE_EPSILON: f32 = 1e-8;
pub const DEFAULT_THRESHOLD: f32 = 0.7;

/// 余弦相似度 `a·b / (‖a‖‖b‖ + 1e-8)`，零向量得到 0
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
  let (mut dot, mut norm_a, mut norm_b) = (0.0f32, 0.0f32, 0.0f32);
  for (x, y) in a.iter().zip(b) {
    dot += x * y;
    norm_a += x * x;
    norm_b += y * y;
  }
  dot / (norm_a.sqrt() * norm_b.sqrt() + COSINE_EPSILON)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchResult {
  /// 低于阈值或没有模板时为 `None`
  pub person_id: Option<PersonId>,
  /// 最高相似度，没有可比较的模板时为 -1.0
  pub score: f32,
}

impl MatchResult {
  pub fn is_accepted(&self) -> bool {
    self.person_id.is_some()
  }
}

/// 最近邻搜索策略
pub trait TemplateSearch: Send + Sync {
  /// 返回相似度最高的模板所属人员与分数，集合为空时返回 `None`
  fn best(&self, query: &Embedding, templates: &[Template]) -> Option<(PersonId, f32)>;
}

/// 线性扫描，相同分数保留先出现的模板
#[derive(Debug, Default, Clone, Copy)]
pub struct LinearScan;

impl TemplateSearch for LinearScan {
  fn best(&self, query: &Embedding, templates: &[Template]) -> Option<(PersonId, f32)> {
    let mut best: Option<(PersonId, f32)> = None;
    for template in templates {
      if template.embedding.dimension() != query.dimension() {
        debug!(
          "跳过维度不符的模板 {}: {} != {}",
          template.id,
          template.embedding.dimension(),
          query.dimension()
        );
        continue;
      }
      let score = cosine_similarity(query.as_slice(), template.embedding.as_slice());
      if best.is_none_or(|(_, s)| score > s) {
        best = Some((template.person_id, score));
      }
    }
    best
  }
}

/// 阈值匹配器，本身不会失败
#[derive(Clone)]
pub struct Matcher {
  threshold: f32,
  search: Arc<dyn TemplateSearch>,
}

impl Matcher {
  pub fn new(threshold: f32) -> Self {
    Self {
      threshold,
      search: Arc::new(LinearScan),
    }
  }

  pub fn with_search(mut self, search: Arc<dyn TemplateSearch>) -> Self {
    self.search = search;
    self
  }

  pub fn threshold(&self) -> f32 {
    self.threshold
  }

  /// 分数不低于阈值时接受，否则只报告分数
  pub fn match_embedding(&self, query: &Embedding, templates: &[Template]) -> MatchResult {
    match self.search.best(query, templates) {
      Some((person_id, score)) if score >= self.threshold => MatchResult {
        person_id: Some(person_id),
        score,
      },
      Some((_, score)) => MatchResult {
        person_id: None,
        score,
      },
      None => MatchResult {
        person_id: None,
        score: -1.0,
      },
    }
  }
}

impl Default for Matcher {
  fn default() -> Self {
    Self::new(DEFAULT_THRESHOLD)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::EyeSide;
  use approx::assert_abs_diff_eq;
  use chrono::Utc;

  fn template(id: u64, person_id: PersonId, values: Vec<f32>) -> Template {
    Template {
      id,
      person_id,
      embedding: Embedding::new(values),
      eye_side: EyeSide::Unknown,
      quality_score: 1.0,
      created_at: Utc::now(),
    }
  }

  #[test]
  fn cosine_of_identical_vectors_is_one() {
    let v = [0.3, -0.4, 0.5];
    assert_abs_diff_eq!(cosine_similarity(&v, &v), 1.0, epsilon = 1e-6);
    assert_abs_diff_eq!(cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]), -1.0, epsilon = 1e-6);
  }

  #[test]
  fn cosine_with_zero_vector_is_zero() {
    assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
  }

  #[test]
  fn exact_template_is_accepted() {
    let templates = vec![
      template(1, 10, vec![1.0, 0.0, 0.0]),
      template(2, 20, vec![0.0, 1.0, 0.0]),
    ];
    let result = Matcher::default().match_embedding(&Embedding::new(vec![0.0, 1.0, 0.0]), &templates);
    assert_eq!(result.person_id, Some(20));
    assert_abs_diff_eq!(result.score, 1.0, epsilon = 1e-6);
  }

  #[test]
  fn empty_collection_reports_minus_one() {
    let result = Matcher::default().match_embedding(&Embedding::new(vec![1.0]), &[]);
    assert_eq!(
      result,
      MatchResult {
        person_id: None,
        score: -1.0
      }
    );
  }

  #[test]
  fn below_threshold_keeps_best_score() {
    let templates = vec![template(1, 10, vec![1.0, 1.0])];
    let result = Matcher::new(0.9).match_embedding(&Embedding::new(vec![1.0, 0.0]), &templates);
    assert!(!result.is_accepted());
    assert_abs_diff_eq!(result.score, std::f32::consts::FRAC_1_SQRT_2, epsilon = 1e-5);
  }

  #[test]
  fn threshold_is_inclusive() {
    let templates = vec![template(1, 10, vec![1.0, 0.0])];
    let query = Embedding::new(vec![1.0, 0.0]);
    let score = Matcher::new(-1.0).match_embedding(&query, &templates).score;
    assert!(Matcher::new(score).match_embedding(&query, &templates).is_accepted());
  }

  #[test]
  fn ties_keep_first_template() {
    let templates = vec![
      template(1, 10, vec![1.0, 0.0]),
      template(2, 20, vec![2.0, 0.0]),
    ];
    let result = Matcher::default().match_embedding(&Embedding::new(vec![1.0, 0.0]), &templates);
    assert_eq!(result.person_id, Some(10));
  }

  #[test]
  fn mismatched_dimensions_are_skipped() {
    let templates = vec![
      template(1, 10, vec![1.0, 0.0, 0.0]),
      template(2, 20, vec![0.5, 0.5]),
    ];
    let result = Matcher::default().match_embedding(&Embedding::new(vec![1.0, 1.0]), &templates);
    assert_eq!(result.person_id, Some(20));
  }

  #[test]
  fn custom_search_is_used() {
    struct Always(PersonId);
    impl TemplateSearch for Always {
      fn best(&self, _: &Embedding, _: &[Template]) -> Option<(PersonId, f32)> {
        Some((self.0, 0.99))
      }
    }
    let matcher = Matcher::default().with_search(Arc::new(Always(7)));
    let result = matcher.match_embedding(&Embedding::new(vec![1.0]), &[]);
    assert_eq!(result.person_id, Some(7));
  }
}
