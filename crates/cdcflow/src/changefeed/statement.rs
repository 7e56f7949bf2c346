use serde::{Deserialize, Serialize};

use crate::changefeed::options::OptionBag;

/// Table list of the statement that created the changefeed, as the user
/// wrote it. Once targets are altered the list is replaced with the fully
/// qualified names of the current target set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementTemplate {
    pub targets: Vec<String>,
}

fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Renders `CREATE CHANGEFEED FOR TABLE ... INTO '...' [WITH ...]`.
/// Values are written verbatim; callers redact the result.
pub fn render_create(targets: &[String], sink_uri: &str, options: &OptionBag) -> String {
    let mut sql = format!(
        "CREATE CHANGEFEED FOR TABLE {} INTO {}",
        targets.join(", "),
        quote(sink_uri)
    );

    if !options.is_empty() {
        let rendered: Vec<String> = options
            .iter()
            .map(|(name, value)| match value {
                Some(v) => format!("{name} = {}", quote(v)),
                None => name.clone(),
            })
            .collect();
        sql.push_str(" WITH ");
        sql.push_str(&rendered.join(", "));
    }

    sql
}
