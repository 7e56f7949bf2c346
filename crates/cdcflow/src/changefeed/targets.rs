use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::catalog::{QualifiedName, TableId};
use crate::changefeed::sink::SinkKind;
use crate::errors::ChangefeedError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetTable {
    pub table_id: TableId,
    /// Name at the time the table was added. Rendering prefers a freshly
    /// resolved name when one is available.
    pub display_name: QualifiedName,
}

/// How topic names are derived from tables for message-bus sinks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicNaming {
    pub prefix: Option<String>,
    pub full_table_name: bool,
}

impl TopicNaming {
    pub fn topic_for(&self, name: &QualifiedName) -> String {
        let base = if self.full_table_name {
            name.to_string()
        } else {
            name.table.clone()
        };
        match &self.prefix {
            Some(prefix) => format!("{prefix}{base}"),
            None => base,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedTargets {
    /// `{a.b.c,d.e.f}`, sorted by name.
    pub full_table_names: String,
    /// Sorted, comma-joined topic names. Empty for sinks without topics.
    pub topics: String,
    /// Sorted qualified names, as used by the statement renderer.
    pub names: Vec<String>,
}

/// The tables a changefeed tracks, keyed by stable table id. This is a plain
/// collection: it can become empty, callers decide whether that is allowed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<TargetTable>", into = "Vec<TargetTable>")]
pub struct TargetSet {
    tables: BTreeMap<TableId, TargetTable>,
}

impl TargetSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the table was already tracked. The display name is
    /// refreshed either way.
    pub fn add(&mut self, table_id: TableId, display_name: QualifiedName) -> bool {
        self.tables
            .insert(
                table_id,
                TargetTable {
                    table_id,
                    display_name,
                },
            )
            .is_none()
    }

    pub fn remove(&mut self, table_id: TableId) -> Result<TargetTable, ChangefeedError> {
        self.tables
            .remove(&table_id)
            .ok_or_else(|| ChangefeedError::NotFound(format!("target table {table_id}")))
    }

    pub fn contains(&self, table_id: TableId) -> bool {
        self.tables.contains_key(&table_id)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = TableId> + '_ {
        self.tables.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TargetTable> {
        self.tables.values()
    }

    /// Renders with the names recorded in the set.
    pub fn render(&self, sink: SinkKind, naming: &TopicNaming) -> RenderedTargets {
        self.render_with(sink, naming, |_| None)
    }

    /// Renders with names from `resolve`, falling back to the recorded name
    /// for tables the resolver does not know.
    pub fn render_with<F>(&self, sink: SinkKind, naming: &TopicNaming, resolve: F) -> RenderedTargets
    where
        F: Fn(TableId) -> Option<QualifiedName>,
    {
        let mut resolved: Vec<QualifiedName> = self
            .tables
            .values()
            .map(|t| resolve(t.table_id).unwrap_or_else(|| t.display_name.clone()))
            .collect();
        resolved.sort_by_key(|n| n.to_string());

        let names: Vec<String> = resolved.iter().map(|n| n.to_string()).collect();
        let full_table_names = format!("{{{}}}", names.join(","));

        let topics = if sink.is_topic_bearing() {
            resolved
                .iter()
                .map(|n| naming.topic_for(n))
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect::<Vec<_>>()
                .join(",")
        } else {
            String::new()
        };

        RenderedTargets {
            full_table_names,
            topics,
            names,
        }
    }
}

impl From<Vec<TargetTable>> for TargetSet {
    fn from(tables: Vec<TargetTable>) -> Self {
        Self {
            tables: tables.into_iter().map(|t| (t.table_id, t)).collect(),
        }
    }
}

impl From<TargetSet> for Vec<TargetTable> {
    fn from(set: TargetSet) -> Self {
        set.tables.into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(table: &str) -> QualifiedName {
        QualifiedName::new("db", "schema", table)
    }

    #[test]
    fn render_is_sorted_regardless_of_insertion_order() {
        let mut a = TargetSet::new();
        a.add(TableId(1), name("foo"));
        a.add(TableId(2), name("bar"));

        let mut b = TargetSet::new();
        b.add(TableId(2), name("bar"));
        b.add(TableId(1), name("foo"));

        for set in [a, b] {
            let r = set.render(SinkKind::Kafka, &TopicNaming::default());
            assert_eq!(r.full_table_names, "{db.schema.bar,db.schema.foo}");
            assert_eq!(r.topics, "bar,foo");
        }
    }

    #[test]
    fn non_topic_sinks_have_no_topics() {
        let mut set = TargetSet::new();
        set.add(TableId(1), name("foo"));
        let r = set.render(SinkKind::Webhook, &TopicNaming::default());
        assert_eq!(r.full_table_names, "{db.schema.foo}");
        assert_eq!(r.topics, "");
    }

    #[test]
    fn topic_prefix_and_full_names() {
        let mut set = TargetSet::new();
        set.add(TableId(1), name("foo"));
        let naming = TopicNaming {
            prefix: Some("cdc_".into()),
            full_table_name: true,
        };
        assert_eq!(
            set.render(SinkKind::PubSub, &naming).topics,
            "cdc_db.schema.foo"
        );
    }

    #[test]
    fn resolver_overrides_recorded_names() {
        let mut set = TargetSet::new();
        set.add(TableId(1), name("foo"));
        set.add(TableId(2), name("bar"));
        let r = set.render_with(SinkKind::Kafka, &TopicNaming::default(), |id| {
            (id == TableId(1)).then(|| name("zed"))
        });
        assert_eq!(r.full_table_names, "{db.schema.bar,db.schema.zed}");
        assert_eq!(r.topics, "bar,zed");
    }

    #[test]
    fn remove_missing_is_not_found_and_set_may_empty() {
        let mut set = TargetSet::new();
        set.add(TableId(1), name("foo"));
        assert!(!set.add(TableId(1), name("foo")));
        assert!(matches!(
            set.remove(TableId(9)),
            Err(ChangefeedError::NotFound(_))
        ));
        set.remove(TableId(1)).unwrap();
        assert!(set.is_empty());
        assert_eq!(set.render(SinkKind::Kafka, &TopicNaming::default()).full_table_names, "{}");
    }
}
