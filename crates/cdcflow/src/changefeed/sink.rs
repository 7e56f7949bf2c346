use serde::{Deserialize, Serialize};
use std::fmt;

use crate::changefeed::redact::redact_sink_uri;
use crate::errors::ChangefeedError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    Kafka,
    PubSub,
    Webhook,
    CloudStorage,
    Http,
    Null,
    Unknown,
}

impl SinkKind {
    pub fn from_scheme(scheme: &str) -> Self {
        match scheme.to_lowercase().as_str() {
            "kafka" => SinkKind::Kafka,
            "gcpubsub" => SinkKind::PubSub,
            "webhook-https" => SinkKind::Webhook,
            "s3" | "gs" | "azure" | "azure-storage" | "nodelocal" | "userfile"
            | "experimental-s3" | "experimental-gs" | "experimental-azure"
            | "experimental-nodelocal" => SinkKind::CloudStorage,
            "http" | "https" | "experimental-http" | "experimental-https" => SinkKind::Http,
            "null" => SinkKind::Null,
            _ => SinkKind::Unknown,
        }
    }

    /// Message-bus sinks route each table to its own topic.
    pub fn is_topic_bearing(&self) -> bool {
        matches!(self, SinkKind::Kafka | SinkKind::PubSub)
    }
}

/// A parsed sink URI. The text is kept exactly as given; `Debug` and
/// `Display` only ever show the redacted form.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SinkAddress {
    raw: String,
    scheme: String,
    host: Option<String>,
}

impl SinkAddress {
    pub fn parse(uri: &str) -> Result<Self, ChangefeedError> {
        let uri = uri.trim();
        if uri.is_empty() {
            return Err(ChangefeedError::InvalidSink("sink URI is empty".into()));
        }
        let parsed = url::Url::parse(uri)
            .map_err(|e| ChangefeedError::InvalidSink(format!("{e}: {}", redact_sink_uri(uri))))?;

        Ok(Self {
            raw: uri.to_string(),
            scheme: parsed.scheme().to_string(),
            host: parsed.host_str().filter(|h| !h.is_empty()).map(str::to_string),
        })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn kind(&self) -> SinkKind {
        SinkKind::from_scheme(&self.scheme)
    }

    /// Unredacted text. Only for handing to the delivery pipeline.
    pub fn expose(&self) -> &str {
        &self.raw
    }

    pub fn redacted(&self) -> String {
        redact_sink_uri(&self.raw)
    }
}

impl TryFrom<String> for SinkAddress {
    type Error = ChangefeedError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        SinkAddress::parse(&value)
    }
}

impl From<SinkAddress> for String {
    fn from(value: SinkAddress) -> Self {
        value.raw
    }
}

impl fmt::Debug for SinkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SinkAddress").field(&self.redacted()).finish()
    }
}

impl fmt::Display for SinkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_scheme() {
        let kafka = SinkAddress::parse("kafka://does.not.matter/").unwrap();
        assert_eq!(kafka.kind(), SinkKind::Kafka);
        assert!(kafka.kind().is_topic_bearing());
        assert_eq!(kafka.host(), Some("does.not.matter"));

        let webhook = SinkAddress::parse("webhook-https://fake-http-sink:8081").unwrap();
        assert_eq!(webhook.kind(), SinkKind::Webhook);
        assert!(!webhook.kind().is_topic_bearing());

        let s3 = SinkAddress::parse("experimental-s3://bucket/path?AWS_ACCESS_KEY_ID=1").unwrap();
        assert_eq!(s3.kind(), SinkKind::CloudStorage);
        assert_eq!(SinkKind::from_scheme("carrier-pigeon"), SinkKind::Unknown);
    }

    #[test]
    fn raw_text_is_preserved() {
        let uri = "webhook-https://fake-http-sink:8081";
        assert_eq!(SinkAddress::parse(uri).unwrap().expose(), uri);
    }

    #[test]
    fn debug_and_display_never_show_secrets() {
        let s3 = SinkAddress::parse("s3://bucket/p?AWS_SECRET_ACCESS_KEY=456").unwrap();
        assert!(!format!("{s3:?}").contains("456"));
        assert!(!s3.to_string().contains("456"));
    }

    #[test]
    fn secrets_hidden_in_a_fragment_are_not_shown() {
        let sink = SinkAddress::parse("s3://b/p#?AWS_SECRET_ACCESS_KEY=456").unwrap();
        assert_eq!(sink.redacted(), "s3://b/p#redacted");
        assert!(!format!("{sink:?}").contains("456"));
    }

    #[test]
    fn garbage_is_rejected_without_echoing_secrets() {
        let err = SinkAddress::parse("not a uri?password=hunter2").unwrap_err();
        assert!(matches!(err, ChangefeedError::InvalidSink(_)));
        assert!(!err.to_string().contains("hunter2"));
        assert!(SinkAddress::parse("   ").is_err());
    }

    #[test]
    fn serde_uses_raw_text() {
        let s3 = SinkAddress::parse("s3://bucket/p?AWS_SECRET_ACCESS_KEY=456").unwrap();
        let json = serde_json::to_string(&s3).unwrap();
        assert_eq!(json, "\"s3://bucket/p?AWS_SECRET_ACCESS_KEY=456\"");
        let back: SinkAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s3);
    }
}
