use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Output of one epic analysis run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
  pub epic_key: String,
  pub total_issues: usize,
  /// Keys are lowercased issue type names.
  #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
  pub issues_by_type: IndexMap<String, Vec<String>>,
  #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
  pub issues_by_status: IndexMap<String, usize>,
  /// Link type name -> occurrence count.
  #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
  pub relationship_types: IndexMap<String, usize>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub stories: Vec<HierarchyNode>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub tasks: Vec<HierarchyNode>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub bugs: Vec<HierarchyNode>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub direct_issues: Vec<HierarchyNode>,
  #[serde(default)]
  pub metrics: AnalysisMetrics,
  #[serde(default)]
  pub completeness: CompletenessReport,
}

/// One node of the epic hierarchy tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HierarchyNode {
  pub issue_key: String,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub summary: String,
  #[serde(rename = "type")]
  pub issue_type: String,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub status: String,
  /// Depth below the epic; direct children are level 0.
  pub level: usize,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub parent_key: Option<String>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub subtasks: Vec<HierarchyNode>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisMetrics {
  pub api_calls: usize,
  pub cache_hits: usize,
  pub cache_misses: usize,
  /// Phase name -> elapsed milliseconds.
  #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
  pub phase_durations_ms: IndexMap<String, u64>,
}

/// Issues referenced during discovery but never resolved,
/// plus the repairs that would complete the graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletenessReport {
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub unresolved: Vec<UnresolvedRef>,
  /// Back-edges ignored while building the hierarchy,
  /// as (from, to) key pairs.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub cycles: Vec<(String, String)>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnresolvedRef {
  /// The issue holding the reference.
  pub source: String,
  /// The key that failed to resolve.
  pub target: String,
  /// Which relationship carried it, eg `subtask`, `epic_link`.
  pub kind: String,
}
