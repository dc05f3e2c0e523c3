use std::collections::HashSet;

/// Splits a message's labels into recognised statistic labels and member
/// short names. Both reference sets are fixed for the run.
#[derive(Debug, Clone, Default)]
pub struct LabelClassifier {
    stat_labels: HashSet<String>,
    member_labels: HashSet<String>,
}

/// Labels of one message that matter for counting, in the order they appeared
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classified {
    pub stats: Vec<String>,
    pub members: Vec<String>,
}

impl LabelClassifier {
    pub fn new<S, M>(stat_labels: S, member_labels: M) -> Self
    where
        S: IntoIterator,
        S::Item: Into<String>,
        M: IntoIterator,
        M::Item: Into<String>,
    {
        Self {
            stat_labels: stat_labels.into_iter().map(Into::into).collect(),
            member_labels: member_labels.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_stat(&self, label: &str) -> bool {
        self.stat_labels.contains(label)
    }

    pub fn is_member(&self, label: &str) -> bool {
        self.member_labels.contains(label)
    }

    pub fn classify(&self, labels: &[String]) -> Classified {
        let mut out = Classified::default();
        for label in labels {
            if self.is_stat(label) && !out.stats.contains(label) {
                out.stats.push(label.clone());
            }
            if self.is_member(label) && !out.members.contains(label) {
                out.members.push(label.clone());
            }
        }
        out
    }
}
