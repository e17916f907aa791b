use std::collections::HashSet;

use indexmap::IndexMap;
use ticketry_client::entities::analysis::HierarchyNode;
use ticketry_client::entities::issue::Issue;

/// Builds the hierarchy trees over one discovered issue set.
/// The remote does not guarantee an acyclic parent graph, so the
/// walk keeps a visited set and ignores back-edges, recording
/// them for the completeness report.
pub struct HierarchyBuilder<'a> {
  issues: &'a IndexMap<String, Issue>,
  visited: HashSet<String>,
  cycles: Vec<(String, String)>,
}

impl<'a> HierarchyBuilder<'a> {
  pub fn new(issues: &'a IndexMap<String, Issue>) -> Self {
    Self {
      issues,
      visited: HashSet::new(),
      cycles: Vec::new(),
    }
  }

  pub fn cycles(&self) -> &[(String, String)] {
    &self.cycles
  }

  /// Nodes for issues that are not a subtask of another
  /// discovered issue, subtask chains expanded to `max_depth`.
  /// Direct children sit at level 0.
  pub fn top_level_nodes(
    &mut self,
    max_depth: i32,
  ) -> Vec<HierarchyNode> {
    let top_level: Vec<&Issue> = self
      .issues
      .values()
      .filter(|issue| {
        issue
          .relationships()
          .parent_issue
          .as_ref()
          .is_none_or(|parent| !self.issues.contains_key(parent))
      })
      .collect();
    let mut nodes = Vec::with_capacity(top_level.len());
    for issue in top_level {
      if self.visited.contains(&issue.key) {
        continue;
      }
      nodes.push(self.build_node(issue, 0, max_depth));
    }
    nodes
  }

  fn build_node(
    &mut self,
    issue: &Issue,
    level: usize,
    max_depth: i32,
  ) -> HierarchyNode {
    self.visited.insert(issue.key.clone());
    let rel = issue.relationships();
    let mut node = HierarchyNode {
      issue_key: issue.key.clone(),
      summary: issue.summary.clone(),
      issue_type: issue.issuetype.to_lowercase(),
      status: issue.status.name.clone(),
      level,
      parent_key: rel.parent_issue.clone(),
      subtasks: Vec::new(),
    };
    if (level as i64) >= max_depth as i64 {
      return node;
    }
    for subtask in &rel.subtasks {
      if self.visited.contains(subtask) {
        self
          .cycles
          .push((issue.key.clone(), subtask.clone()));
        continue;
      }
      if let Some(subtask_issue) = self.issues.get(subtask) {
        node.subtasks.push(self.build_node(
          subtask_issue,
          level + 1,
          max_depth,
        ));
      }
    }
    node
  }
}
