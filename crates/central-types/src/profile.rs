//! Sampled call-tree profiles.

use serde::{Deserialize, Serialize};

/// One frame in a profile tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileNode {
    pub frame: String,
    pub sample_count: i64,
    #[serde(default)]
    pub children: Vec<ProfileNode>,
}

impl ProfileNode {
    pub fn new(frame: impl Into<String>, sample_count: i64) -> Self {
        Self {
            frame: frame.into(),
            sample_count,
            children: Vec::new(),
        }
    }

    pub fn with_children(mut self, children: Vec<ProfileNode>) -> Self {
        self.children = children;
        self
    }
}

/// A sampled profile: a forest of call-tree roots.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Profile {
    pub roots: Vec<ProfileNode>,
}

impl Profile {
    pub fn new(roots: Vec<ProfileNode>) -> Self {
        Self { roots }
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Sum of root sample counts.
    pub fn total_sample_count(&self) -> i64 {
        self.roots.iter().map(|r| r.sample_count).sum()
    }

    /// Merge another profile into this one, summing sample counts per
    /// matching frame and recursing into children.
    pub fn merge_from(&mut self, other: &Profile) {
        merge_nodes(&mut self.roots, &other.roots);
    }
}

fn merge_nodes(target: &mut Vec<ProfileNode>, source: &[ProfileNode]) {
    for node in source {
        match target.iter_mut().find(|t| t.frame == node.frame) {
            Some(existing) => {
                existing.sample_count += node.sample_count;
                merge_nodes(&mut existing.children, &node.children);
            }
            None => target.push(node.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_profile() -> Profile {
        Profile::new(vec![ProfileNode::new("main", 10).with_children(vec![
            ProfileNode::new("handle", 6),
            ProfileNode::new("idle", 4),
        ])])
    }

    #[test]
    fn test_merge_sums_matching_frames() {
        let mut profile = sample_profile();
        profile.merge_from(&sample_profile());

        assert_eq!(profile.roots.len(), 1);
        assert_eq!(profile.roots[0].sample_count, 20);
        assert_eq!(profile.roots[0].children[0].sample_count, 12);
    }

    #[test]
    fn test_merge_appends_new_frames() {
        let mut profile = sample_profile();
        let other = Profile::new(vec![ProfileNode::new("worker", 3)]);
        profile.merge_from(&other);

        assert_eq!(profile.roots.len(), 2);
        assert_eq!(profile.total_sample_count(), 13);
    }

    #[test]
    fn test_merge_into_empty() {
        let mut profile = Profile::default();
        profile.merge_from(&sample_profile());
        assert_eq!(profile.total_sample_count(), 10);
    }
}
