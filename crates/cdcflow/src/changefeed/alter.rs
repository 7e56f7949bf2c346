use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::catalog::{Catalog, TableId, TableRef};
use crate::changefeed::descriptor::ChangefeedDescriptor;
use crate::changefeed::options;
use crate::changefeed::sink::SinkAddress;
use crate::errors::ChangefeedError;

/// `ALTER CHANGEFEED <id> ADD ... DROP ... SET ... UNSET ...` as it arrives
/// from a client. All parts may be combined.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlterChangefeed {
    #[serde(default)]
    pub add: Vec<String>,
    #[serde(default)]
    pub drop: Vec<String>,
    /// `null` values set flag options; the key `sink` replaces the sink URI.
    #[serde(default)]
    pub set: BTreeMap<String, Option<String>>,
    #[serde(default)]
    pub unset: Vec<String>,
}

impl AlterChangefeed {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.drop.is_empty() && self.set.is_empty() && self.unset.is_empty()
    }
}

/// A fully resolved and validated alteration, ready for
/// [`ChangefeedDescriptor::apply_alteration`].
#[derive(Debug, Clone, Default)]
pub struct AlterationDelta {
    pub add: Vec<TableRef>,
    pub drop: Vec<TableId>,
    pub set_options: Vec<(String, Option<String>)>,
    pub unset_options: Vec<String>,
    pub sink: Option<SinkAddress>,
}

const SINK_KEY: &str = "sink";

/// Resolves names and validates every part of the request against the
/// current descriptor. Nothing is mutated here.
pub async fn plan_alteration(
    request: &AlterChangefeed,
    current: &ChangefeedDescriptor,
    catalog: &dyn Catalog,
) -> Result<AlterationDelta, ChangefeedError> {
    if request.is_empty() {
        return Err(ChangefeedError::invalid_option(
            "alter",
            "no alterations specified",
        ));
    }

    let mut delta = AlterationDelta::default();

    for name in &request.drop {
        let table = catalog
            .resolve(name)
            .await?
            .ok_or_else(|| ChangefeedError::table_not_found(name))?;
        if !current.targets().contains(table.id) {
            return Err(ChangefeedError::NotFound(format!(
                "target table {} in changefeed {}",
                table.name,
                current.job_id()
            )));
        }
        if !delta.drop.contains(&table.id) {
            delta.drop.push(table.id);
        }
    }

    for name in &request.add {
        let table = catalog
            .resolve(name)
            .await?
            .ok_or_else(|| ChangefeedError::table_not_found(name))?;
        if delta.drop.contains(&table.id) {
            return Err(ChangefeedError::invalid_option(
                "add",
                format!("{} is both added and dropped", table.name),
            ));
        }
        if !delta.add.iter().any(|t| t.id == table.id) {
            delta.add.push(table);
        }
    }

    let remaining: HashSet<TableId> = current
        .targets()
        .ids()
        .filter(|id| !delta.drop.contains(id))
        .chain(delta.add.iter().map(|t| t.id))
        .collect();
    if remaining.is_empty() {
        return Err(ChangefeedError::EmptyTargetSet(current.job_id()));
    }

    for (name, value) in &request.set {
        if name.trim().eq_ignore_ascii_case(SINK_KEY) {
            let uri = value
                .as_deref()
                .ok_or_else(|| ChangefeedError::InvalidSink("sink requires a URI".into()))?;
            delta.sink = Some(SinkAddress::parse(uri)?);
            continue;
        }
        let (name, value) = options::normalize_option(name, value.as_deref())?;
        if !options::is_alterable(&name) {
            return Err(ChangefeedError::invalid_option(name, "cannot be altered"));
        }
        delta.set_options.push((name, value));
    }

    for name in &request.unset {
        let name = name.trim().to_lowercase();
        if name == SINK_KEY {
            return Err(ChangefeedError::InvalidSink("sink cannot be unset".into()));
        }
        if !options::is_known_option(&name) {
            return Err(ChangefeedError::invalid_option(name, "unknown option"));
        }
        if !options::is_alterable(&name) {
            return Err(ChangefeedError::invalid_option(name, "cannot be altered"));
        }
        if delta.set_options.iter().any(|(n, _)| *n == name) {
            return Err(ChangefeedError::invalid_option(name, "both set and unset"));
        }
        delta.unset_options.push(name);
    }

    Ok(delta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MemoryCatalog;
    use crate::changefeed::options::OptionBag;
    use crate::jobs::model::{JobId, JobStatus};

    async fn setup() -> (MemoryCatalog, ChangefeedDescriptor) {
        let catalog = MemoryCatalog::new("d");
        catalog.create_table("foo").unwrap();
        catalog.create_table("bar").unwrap();
        let foo = catalog.resolve("foo").await.unwrap().unwrap();
        let feed = ChangefeedDescriptor::new(
            JobId(1),
            vec!["foo".into()],
            vec![foo],
            SinkAddress::parse("kafka://does.not.matter/").unwrap(),
            OptionBag::new(),
        )
        .unwrap();
        (catalog, feed)
    }

    #[tokio::test]
    async fn drop_sole_target_is_rejected_before_apply() {
        let (catalog, feed) = setup().await;
        let req = AlterChangefeed {
            drop: vec!["foo".into()],
            ..Default::default()
        };
        assert!(matches!(
            plan_alteration(&req, &feed, &catalog).await,
            Err(ChangefeedError::EmptyTargetSet(JobId(1)))
        ));
    }

    #[tokio::test]
    async fn add_and_drop_in_one_call() {
        let (catalog, mut feed) = setup().await;
        let req = AlterChangefeed {
            add: vec!["bar".into()],
            drop: vec!["foo".into()],
            ..Default::default()
        };
        let delta = plan_alteration(&req, &feed, &catalog).await.unwrap();
        feed.apply_alteration(JobStatus::Paused, &delta).unwrap();
        assert_eq!(feed.render_targets(|_| None).full_table_names, "{d.public.bar}");
    }

    #[tokio::test]
    async fn unknown_tables_and_non_targets_are_not_found() {
        let (catalog, feed) = setup().await;
        for req in [
            AlterChangefeed {
                add: vec!["nope".into()],
                ..Default::default()
            },
            AlterChangefeed {
                drop: vec!["bar".into()],
                ..Default::default()
            },
        ] {
            assert!(matches!(
                plan_alteration(&req, &feed, &catalog).await,
                Err(ChangefeedError::NotFound(_))
            ));
        }
    }

    #[tokio::test]
    async fn option_rules() {
        let (catalog, feed) = setup().await;

        let mut set = BTreeMap::new();
        set.insert("cursor".to_string(), Some("123".to_string()));
        let req = AlterChangefeed {
            set,
            ..Default::default()
        };
        assert!(plan_alteration(&req, &feed, &catalog).await.is_err());

        let req = AlterChangefeed {
            unset: vec!["sink".into()],
            ..Default::default()
        };
        assert!(matches!(
            plan_alteration(&req, &feed, &catalog).await,
            Err(ChangefeedError::InvalidSink(_))
        ));

        let mut set = BTreeMap::new();
        set.insert("sink".to_string(), Some("kafka://other:9092".to_string()));
        set.insert("Resolved".to_string(), None);
        let req = AlterChangefeed {
            set,
            ..Default::default()
        };
        let delta = plan_alteration(&req, &feed, &catalog).await.unwrap();
        assert_eq!(delta.set_options, vec![("resolved".to_string(), None)]);
        assert_eq!(delta.sink.unwrap().expose(), "kafka://other:9092");

        assert!(plan_alteration(&AlterChangefeed::default(), &feed, &catalog)
            .await
            .is_err());
    }
}
