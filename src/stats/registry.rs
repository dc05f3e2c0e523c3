use std::cmp::Ordering;

use crate::sheet::CellValue;

#[derive(Debug, Clone, PartialEq)]
pub enum StatValue {
    Count(i64),
    /// Composite display value such as `"12(3)"`, or a date header
    Text(String),
    /// Spacer rows
    Blank,
}

impl StatValue {
    pub fn count(&self) -> i64 {
        match self {
            StatValue::Count(n) => *n,
            _ => 0,
        }
    }

    pub fn to_cell(&self) -> CellValue {
        match self {
            StatValue::Count(n) => CellValue::Number(*n as f64),
            StatValue::Text(s) => CellValue::text(s.clone()),
            StatValue::Blank => CellValue::blank(),
        }
    }
}

impl std::fmt::Display for StatValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatValue::Count(n) => write!(f, "{n}"),
            StatValue::Text(s) => write!(f, "{s}"),
            StatValue::Blank => Ok(()),
        }
    }
}

/// A named counter. Lower priority sorts first and wins label tie-breaks.
#[derive(Debug, Clone, PartialEq)]
pub struct Stat {
    /// Unique key in the registry
    pub key: String,
    /// Display name; empty for spacers
    pub name: String,
    pub value: StatValue,
    pub priority: f64,
    /// Position in the member stats vector, for stats read from the sheet header
    pub column: Option<usize>,
}

impl Stat {
    pub fn count(&self) -> i64 {
        self.value.count()
    }
}

fn by_priority(a: f64, b: f64) -> Ordering {
    a.total_cmp(&b)
}

/// Every stat of one run, in registration order
#[derive(Debug, Clone, Default)]
pub struct StatRegistry {
    stats: Vec<Stat>,
    next_priority: usize,
    header_len: usize,
}

impl StatRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from the sheet header: each label gets its column position as priority
    pub fn from_header<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut registry = Self::new();
        for label in labels {
            let label = label.into();
            if registry.contains(&label) {
                tracing::warn!(%label, "duplicate stat label in sheet header, keeping the first");
                continue;
            }
            let column = registry.next_priority;
            registry.register(label).column = Some(column);
        }
        registry.header_len = registry.stats.len();
        registry
    }

    /// Number of stats that came from the sheet header
    pub fn header_len(&self) -> usize {
        self.header_len
    }

    /// Add a zeroed stat at the next sequential priority. Returns the
    /// existing stat when the name is already registered.
    pub fn register(&mut self, name: impl Into<String>) -> &mut Stat {
        let name = name.into();
        if let Some(idx) = self.position(&name) {
            return &mut self.stats[idx];
        }
        let priority = self.next_priority as f64;
        self.next_priority += 1;
        self.push(Stat {
            key: name.clone(),
            name,
            value: StatValue::Count(0),
            priority,
            column: None,
        })
    }

    /// Insert or overwrite a stat at an explicit priority. An existing stat
    /// keeps its registration slot and sheet column.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        name: impl Into<String>,
        value: StatValue,
        priority: f64,
    ) -> &mut Stat {
        let key = key.into();
        let name = name.into();
        match self.position(&key) {
            Some(idx) => {
                let stat = &mut self.stats[idx];
                stat.name = name;
                stat.value = value;
                stat.priority = priority;
                stat
            }
            None => self.push(Stat {
                key,
                name,
                value,
                priority,
                column: None,
            }),
        }
    }

    /// Make sure a counter exists at `priority` without touching its count
    pub fn place(&mut self, name: &str, priority: f64) -> &mut Stat {
        match self.position(name) {
            Some(idx) => {
                let stat = &mut self.stats[idx];
                stat.priority = priority;
                stat
            }
            None => self.insert(name, name, StatValue::Count(0), priority),
        }
    }

    /// A blank row at `priority`, used to separate report bands
    pub fn spacer(&mut self, key: &str, priority: f64) {
        self.insert(key, "", StatValue::Blank, priority);
    }

    fn push(&mut self, stat: Stat) -> &mut Stat {
        self.stats.push(stat);
        let last = self.stats.len() - 1;
        &mut self.stats[last]
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.stats.iter().position(|s| s.key == key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    pub fn get(&self, key: &str) -> Option<&Stat> {
        self.stats.iter().find(|s| s.key == key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Stat> {
        self.stats.iter_mut().find(|s| s.key == key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Stat> {
        self.position(key).map(|idx| self.stats.remove(idx))
    }

    /// Count of a stat; missing stats count as zero
    pub fn count(&self, key: &str) -> i64 {
        self.get(key).map(Stat::count).unwrap_or(0)
    }

    pub fn priority(&self, key: &str) -> Option<f64> {
        self.get(key).map(|s| s.priority)
    }

    /// Add `n` to a counter. Returns false when the stat does not exist.
    pub fn add(&mut self, key: &str, n: i64) -> bool {
        match self.get_mut(key) {
            Some(stat) => {
                stat.value = StatValue::Count(stat.count() + n);
                true
            }
            None => false,
        }
    }

    pub fn increment(&mut self, key: &str) -> bool {
        self.add(key, 1)
    }

    pub fn set_count(&mut self, key: &str, n: i64) -> bool {
        match self.get_mut(key) {
            Some(stat) => {
                stat.value = StatValue::Count(n);
                true
            }
            None => false,
        }
    }

    /// Fold `sources` (and an existing `into`) into one counter named `into`.
    /// The result takes the slot, priority and column of the first source
    /// present. Returns false when no source is registered.
    pub fn merge(&mut self, into: &str, sources: &[String]) -> bool {
        let Some(first) = sources.iter().find_map(|s| self.position(s)) else {
            return false;
        };

        let mut total = 0;
        let mut absorbed: Vec<String> = Vec::new();
        for key in sources.iter().map(String::as_str).chain(std::iter::once(into)) {
            if absorbed.iter().any(|k| k == key) {
                continue;
            }
            if let Some(stat) = self.get(key) {
                total += stat.count();
                absorbed.push(key.to_string());
            }
        }

        let first_key = self.stats[first].key.clone();
        self.stats.retain(|s| s.key == first_key || !absorbed.contains(&s.key));
        if let Some(stat) = self.get_mut(&first_key) {
            stat.key = into.to_string();
            stat.name = into.to_string();
            stat.value = StatValue::Count(total);
        }
        true
    }

    /// Labels read from the sheet header, in column order
    pub fn header_labels(&self) -> Vec<String> {
        let mut header: Vec<&Stat> = self.stats.iter().filter(|s| s.column.is_some()).collect();
        header.sort_by_key(|s| s.column);
        header.into_iter().map(|s| s.key.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.stats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Stat> {
        self.stats.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.stats.iter().map(|s| s.key.as_str())
    }

    /// Stable sort of labels by priority. Labels of equal priority keep
    /// their order; unregistered labels go last.
    pub fn sort_labels(&self, labels: &[String]) -> Vec<String> {
        let mut sorted = labels.to_vec();
        sorted.sort_by(|a, b| match (self.priority(a), self.priority(b)) {
            (Some(x), Some(y)) => by_priority(x, y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        });
        sorted
    }

    /// Every stat in report order
    pub fn sorted(&self) -> Vec<&Stat> {
        let mut sorted: Vec<&Stat> = self.stats.iter().collect();
        sorted.sort_by(|a, b| by_priority(a.priority, b.priority));
        sorted
    }
}
