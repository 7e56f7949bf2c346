use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::changefeed::sink::SinkKind;
use crate::changefeed::targets::TopicNaming;
use crate::errors::ChangefeedError;

/// Option name -> value. `None` is a flag given without a value.
pub type OptionBag = BTreeMap<String, Option<String>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    #[default]
    Json,
    Avro,
    Csv,
    Parquet,
}

impl Format {
    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Json => "json",
            Format::Avro => "avro",
            Format::Csv => "csv",
            Format::Parquet => "parquet",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "json" => Some(Format::Json),
            "avro" | "experimental_avro" => Some(Format::Avro),
            "csv" => Some(Format::Csv),
            "parquet" => Some(Format::Parquet),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum OptionKind {
    Flag,
    Value,
    Duration,
    /// Flag, or a duration value (`resolved`, `resolved = '5s'`).
    FlagOrDuration,
    Enum(&'static [&'static str]),
    Uri,
    Json,
}

struct OptionSpec {
    name: &'static str,
    kind: OptionKind,
    alterable: bool,
}

const fn opt(name: &'static str, kind: OptionKind) -> OptionSpec {
    OptionSpec {
        name,
        kind,
        alterable: true,
    }
}

const FORMATS: &[&str] = &["json", "avro", "experimental_avro", "csv", "parquet"];

const OPTIONS: &[OptionSpec] = &[
    opt("avro_schema_prefix", OptionKind::Value),
    opt("compression", OptionKind::Enum(&["gzip", "zstd"])),
    opt("confluent_schema_registry", OptionKind::Uri),
    OptionSpec {
        name: "cursor",
        kind: OptionKind::Value,
        alterable: false,
    },
    opt("diff", OptionKind::Flag),
    opt("end_time", OptionKind::Value),
    opt(
        "envelope",
        OptionKind::Enum(&["key_only", "row", "wrapped", "bare", "enriched"]),
    ),
    opt("format", OptionKind::Enum(FORMATS)),
    opt("full_table_name", OptionKind::Flag),
    opt("initial_scan", OptionKind::Enum(&["yes", "no", "only"])),
    opt("kafka_sink_config", OptionKind::Json),
    opt("key_in_value", OptionKind::Flag),
    opt("min_checkpoint_frequency", OptionKind::Duration),
    opt("mvcc_timestamp", OptionKind::Flag),
    opt("no_initial_scan", OptionKind::Flag),
    opt("on_error", OptionKind::Enum(&["fail", "pause"])),
    opt("protect_data_from_gc_on_pause", OptionKind::Flag),
    opt("resolved", OptionKind::FlagOrDuration),
    opt(
        "schema_change_events",
        OptionKind::Enum(&["default", "column_changes"]),
    ),
    opt(
        "schema_change_policy",
        OptionKind::Enum(&["backfill", "nobackfill", "stop", "ignore"]),
    ),
    opt("split_column_families", OptionKind::Flag),
    opt("topic_in_value", OptionKind::Flag),
    opt("topic_prefix", OptionKind::Value),
    opt("updated", OptionKind::Flag),
    opt("virtual_columns", OptionKind::Enum(&["omitted", "null"])),
    opt("webhook_auth_header", OptionKind::Value),
    opt("webhook_client_cert", OptionKind::Value),
    opt("webhook_client_key", OptionKind::Value),
    opt("webhook_sink_config", OptionKind::Json),
];

fn find_option(name: &str) -> Option<&'static OptionSpec> {
    OPTIONS.iter().find(|o| o.name == name)
}

pub fn is_known_option(name: &str) -> bool {
    find_option(&name.trim().to_lowercase()).is_some()
}

pub fn is_alterable(name: &str) -> bool {
    find_option(&name.trim().to_lowercase()).is_some_and(|o| o.alterable)
}

pub fn known_option_names() -> impl Iterator<Item = &'static str> {
    OPTIONS.iter().map(|o| o.name)
}

/// `500ms`, `5s`, `10m`, `1h`; a bare integer is seconds.
pub fn parse_duration(value: &str) -> Option<Duration> {
    let v = value.trim().to_lowercase();
    let split = v.find(|c: char| !c.is_ascii_digit()).unwrap_or(v.len());
    let (digits, unit) = v.split_at(split);
    let n: u64 = digits.parse().ok()?;
    match unit.trim() {
        "ms" => Some(Duration::from_millis(n)),
        "" | "s" => Some(Duration::from_secs(n)),
        "m" => Some(Duration::from_secs(n.checked_mul(60)?)),
        "h" => Some(Duration::from_secs(n.checked_mul(3600)?)),
        _ => None,
    }
}

/// Validates a single option and returns its normalized name and value.
pub fn normalize_option(
    name: &str,
    value: Option<&str>,
) -> Result<(String, Option<String>), ChangefeedError> {
    let name = name.trim().to_lowercase();
    let Some(def) = find_option(&name) else {
        return Err(ChangefeedError::invalid_option(name, "unknown option"));
    };
    let value = value.map(str::trim).filter(|v| !v.is_empty());

    let value = match (def.kind, value) {
        (OptionKind::Flag, None) | (OptionKind::FlagOrDuration, None) => None,
        (OptionKind::Flag, Some(_)) => {
            return Err(ChangefeedError::invalid_option(name, "takes no value"));
        }
        (_, None) => {
            return Err(ChangefeedError::invalid_option(name, "requires a value"));
        }
        (OptionKind::Value, Some(v)) => Some(v.to_string()),
        (OptionKind::Duration, Some(v)) | (OptionKind::FlagOrDuration, Some(v)) => {
            if parse_duration(v).is_none() {
                return Err(ChangefeedError::invalid_option(
                    name,
                    format!("{v:?} is not a duration"),
                ));
            }
            Some(v.to_string())
        }
        (OptionKind::Enum(allowed), Some(v)) => {
            let lower = v.to_lowercase();
            if !allowed.contains(&lower.as_str()) {
                return Err(ChangefeedError::invalid_option(
                    name,
                    format!("must be one of {}", allowed.join(", ")),
                ));
            }
            Some(lower)
        }
        (OptionKind::Uri, Some(v)) => {
            if url::Url::parse(v).is_err() {
                return Err(ChangefeedError::invalid_option(name, "is not a valid URI"));
            }
            Some(v.to_string())
        }
        (OptionKind::Json, Some(v)) => {
            if serde_json::from_str::<serde_json::Value>(v).is_err() {
                return Err(ChangefeedError::invalid_option(name, "is not valid JSON"));
            }
            Some(v.to_string())
        }
    };

    Ok((name, value))
}

pub fn normalize_options<'a, I>(raw: I) -> Result<OptionBag, ChangefeedError>
where
    I: IntoIterator<Item = (&'a str, Option<&'a str>)>,
{
    let mut bag = OptionBag::new();
    for (name, value) in raw {
        let (name, value) = normalize_option(name, value)?;
        bag.insert(name, value);
    }
    Ok(bag)
}

pub fn format_of(bag: &OptionBag) -> Format {
    bag.get("format")
        .and_then(|v| v.as_deref())
        .and_then(Format::from_str)
        .unwrap_or_default()
}

pub fn topic_naming(bag: &OptionBag) -> TopicNaming {
    TopicNaming {
        prefix: bag.get("topic_prefix").cloned().flatten(),
        full_table_name: bag.contains_key("full_table_name"),
    }
}

/// Cross-option rules checked after every change to the bag.
pub fn validate_compatibility(bag: &OptionBag, sink: SinkKind) -> Result<(), ChangefeedError> {
    let format = format_of(bag);
    let initial_scan = bag.get("initial_scan").cloned().flatten();

    if bag.contains_key("no_initial_scan") && initial_scan.is_some() {
        return Err(ChangefeedError::invalid_option(
            "no_initial_scan",
            "cannot be combined with initial_scan",
        ));
    }
    if format == Format::Csv && initial_scan.as_deref() != Some("only") {
        return Err(ChangefeedError::invalid_option(
            "format",
            "csv requires initial_scan = 'only'",
        ));
    }
    if format == Format::Parquet && sink != SinkKind::CloudStorage {
        return Err(ChangefeedError::invalid_option(
            "format",
            "parquet is only supported by cloud storage sinks",
        ));
    }
    if format == Format::Avro && !bag.contains_key("confluent_schema_registry") {
        return Err(ChangefeedError::invalid_option(
            "format",
            "avro requires confluent_schema_registry",
        ));
    }
    if bag.contains_key("webhook_auth_header") && sink != SinkKind::Webhook {
        return Err(ChangefeedError::invalid_option(
            "webhook_auth_header",
            "only applies to webhook sinks",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changefeed::redact::{classify_option, OptionClass};

    #[test]
    fn every_known_option_has_a_redaction_class() {
        for name in known_option_names() {
            assert_ne!(
                classify_option(name),
                OptionClass::Unknown,
                "{name} would be redacted as unknown"
            );
        }
    }

    #[test]
    fn durations() {
        assert_eq!(parse_duration("5s"), Some(Duration::from_secs(5)));
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("10m"), Some(Duration::from_secs(600)));
        assert_eq!(parse_duration("2"), Some(Duration::from_secs(2)));
        assert_eq!(parse_duration("soon"), None);
        assert_eq!(parse_duration("5 parsecs"), None);
    }

    #[test]
    fn normalizes_names_and_checks_kinds() {
        assert_eq!(
            normalize_option(" Resolved ", Some("5s")).unwrap(),
            ("resolved".to_string(), Some("5s".to_string()))
        );
        assert_eq!(
            normalize_option("resolved", None).unwrap(),
            ("resolved".to_string(), None)
        );
        assert_eq!(
            normalize_option("format", Some("JSON")).unwrap().1.as_deref(),
            Some("json")
        );
        assert!(normalize_option("diff", Some("yes")).is_err());
        assert!(normalize_option("topic_prefix", None).is_err());
        assert!(normalize_option("format", Some("xml")).is_err());
        assert!(normalize_option("confluent_schema_registry", Some("nope")).is_err());
        assert!(normalize_option("kafka_sink_config", Some("{\"Flush\": {}}")).is_ok());
        assert!(matches!(
            normalize_option("mystery", Some("x")),
            Err(ChangefeedError::InvalidOption { .. })
        ));
    }

    #[test]
    fn format_defaults_to_json() {
        let bag = OptionBag::new();
        assert_eq!(format_of(&bag), Format::Json);
        let bag = normalize_options([("format", Some("avro"))]).unwrap();
        assert_eq!(format_of(&bag), Format::Avro);
    }

    #[test]
    fn compatibility_rules() {
        let csv = normalize_options([("format", Some("csv"))]).unwrap();
        assert!(validate_compatibility(&csv, SinkKind::CloudStorage).is_err());

        let csv_only =
            normalize_options([("format", Some("csv")), ("initial_scan", Some("only"))]).unwrap();
        assert!(validate_compatibility(&csv_only, SinkKind::CloudStorage).is_ok());

        let parquet = normalize_options([("format", Some("parquet"))]).unwrap();
        assert!(validate_compatibility(&parquet, SinkKind::Kafka).is_err());
        assert!(validate_compatibility(&parquet, SinkKind::CloudStorage).is_ok());

        let header = normalize_options([("webhook_auth_header", Some("Basic x"))]).unwrap();
        assert!(validate_compatibility(&header, SinkKind::Webhook).is_ok());
        assert!(validate_compatibility(&header, SinkKind::Kafka).is_err());

        let both = normalize_options([("no_initial_scan", None), ("initial_scan", Some("yes"))])
            .unwrap();
        assert!(validate_compatibility(&both, SinkKind::Kafka).is_err());
    }

    #[test]
    fn cursor_is_not_alterable() {
        assert!(!is_alterable("cursor"));
        assert!(is_alterable("resolved"));
        assert!(!is_alterable("mystery"));
    }
}
