use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::catalog::{QualifiedName, TableId};
use crate::changefeed::descriptor::ChangefeedDescriptor;
use crate::changefeed::options::Format;
use crate::changefeed::redact::redact_message;
use crate::jobs::model::{JobId, JobStatus};

/// Consistent copy of one job's state, taken under the job's lock.
#[derive(Debug, Clone)]
pub struct JobSnapshot {
    pub descriptor: ChangefeedDescriptor,
    pub status: JobStatus,
    pub error: Option<String>,
    pub high_water: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// One row of `SHOW CHANGEFEED JOB(S)`. Recomputed on every query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntrospectionRow {
    pub job_id: JobId,
    pub description: String,
    pub status: JobStatus,
    pub error: Option<String>,
    pub sink_uri: String,
    pub full_table_names: String,
    pub topics: String,
    pub format: Format,
    pub high_water_timestamp: Option<DateTime<Utc>>,
    pub created: DateTime<Utc>,
}

/// Builds a row from a snapshot. `resolve` supplies current table names;
/// tables it does not know keep the name recorded in the descriptor.
pub fn build_row<F>(snapshot: &JobSnapshot, resolve: F) -> IntrospectionRow
where
    F: Fn(TableId) -> Option<QualifiedName>,
{
    let descriptor = &snapshot.descriptor;
    let rendered = descriptor.render_targets(resolve);

    IntrospectionRow {
        job_id: descriptor.job_id(),
        description: descriptor.render_description(),
        status: snapshot.status,
        error: snapshot.error.as_deref().map(redact_message),
        sink_uri: descriptor.sink().redacted(),
        full_table_names: rendered.full_table_names,
        topics: rendered.topics,
        format: descriptor.format(),
        high_water_timestamp: snapshot.high_water,
        created: snapshot.created_at,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    #[default]
    SinkUri,
    JobId,
    Status,
    Created,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RowOrder {
    pub key: SortKey,
    pub descending: bool,
}

/// Orders rows by the caller's key; ties fall back to job id ascending.
pub fn sort_rows(rows: &mut [IntrospectionRow], order: RowOrder) {
    rows.sort_by(|a, b| {
        let primary = match order.key {
            SortKey::SinkUri => a.sink_uri.cmp(&b.sink_uri),
            SortKey::JobId => a.job_id.cmp(&b.job_id),
            SortKey::Status => a.status.as_str().cmp(b.status.as_str()),
            SortKey::Created => a.created.cmp(&b.created),
        };
        let primary = if order.descending {
            primary.reverse()
        } else {
            primary
        };
        match primary {
            Ordering::Equal => a.job_id.cmp(&b.job_id),
            other => other,
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TableRef;
    use crate::changefeed::options::normalize_options;
    use crate::changefeed::sink::SinkAddress;

    fn snapshot(id: i64, sink: &str, tables: &[&str]) -> JobSnapshot {
        let refs: Vec<TableRef> = tables
            .iter()
            .enumerate()
            .map(|(i, t)| TableRef {
                id: TableId(i as u32 + 1),
                name: QualifiedName::new("defaultdb", "public", t),
            })
            .collect();
        let options = if sink.starts_with("webhook") {
            normalize_options([("webhook_auth_header", Some("Basic Zm9v"))]).unwrap()
        } else {
            Default::default()
        };
        JobSnapshot {
            descriptor: ChangefeedDescriptor::new(
                JobId(id),
                tables.iter().map(|t| t.to_string()).collect(),
                refs,
                SinkAddress::parse(sink).unwrap(),
                options,
            )
            .unwrap(),
            status: JobStatus::Running,
            error: None,
            high_water: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn row_is_redacted_and_rendered() {
        let snap = snapshot(
            2,
            "experimental-s3://fake-bucket-name/fake/path?AWS_ACCESS_KEY_ID=123&AWS_SECRET_ACCESS_KEY=456",
            &["foo", "bar"],
        );
        let row = build_row(&snap, |_| None);
        assert_eq!(
            row.sink_uri,
            "experimental-s3://fake-bucket-name/fake/path?AWS_ACCESS_KEY_ID=123&AWS_SECRET_ACCESS_KEY=redacted"
        );
        assert_eq!(row.full_table_names, "{defaultdb.public.bar,defaultdb.public.foo}");
        assert_eq!(row.topics, "");
        assert_eq!(row.format, Format::Json);
        assert!(!row.description.contains("456"));
    }

    #[test]
    fn webhook_row() {
        let row = build_row(&snapshot(1, "webhook-https://fake-http-sink:8081", &["foo"]), |_| None);
        assert_eq!(row.sink_uri, "webhook-https://fake-http-sink:8081");
        assert_eq!(
            row.description,
            "CREATE CHANGEFEED FOR TABLE foo INTO 'webhook-https://fake-http-sink:8081' WITH webhook_auth_header = 'redacted'"
        );
    }

    #[test]
    fn errors_are_scrubbed() {
        let mut snap = snapshot(1, "kafka://k:9092", &["foo"]);
        snap.error = Some("dial kafka://u:pw@k:9092 failed".into());
        let row = build_row(&snap, |_| None);
        assert_eq!(row.error.as_deref(), Some("dial kafka://u:redacted@k:9092 failed"));
    }

    #[test]
    fn sorting_by_sink_then_id() {
        let mut rows = vec![
            build_row(&snapshot(1, "webhook-https://fake-http-sink:8081", &["foo"]), |_| None),
            build_row(&snapshot(3, "kafka://b", &["foo"]), |_| None),
            build_row(&snapshot(2, "kafka://b", &["foo"]), |_| None),
        ];
        sort_rows(&mut rows, RowOrder::default());
        let ids: Vec<i64> = rows.iter().map(|r| r.job_id.0).collect();
        assert_eq!(ids, vec![2, 3, 1]);

        sort_rows(
            &mut rows,
            RowOrder {
                key: SortKey::JobId,
                descending: true,
            },
        );
        let ids: Vec<i64> = rows.iter().map(|r| r.job_id.0).collect();
        assert_eq!(ids, vec![3, 2, 1]);
    }
}
