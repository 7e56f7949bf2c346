//! Credential scrubbing for sink addresses and changefeed statements.
//!
//! Nothing in here returns an error. Whenever a value cannot be classified it
//! is replaced by [`REDACTED`], so an unexpected input can only over-redact.

use url::form_urlencoded;

pub const REDACTED: &str = "redacted";

/// Query parameter names whose values are credentials, matched without case.
const SENSITIVE_URI_PARAMS: &[&str] = &[
    "AWS_SECRET_ACCESS_KEY",
    "AWS_SESSION_TOKEN",
    "AZURE_ACCOUNT_KEY",
    "AZURE_CLIENT_SECRET",
    "AZURE_CLIENT_KEY",
    "CREDENTIALS",
    "BEARER_TOKEN",
    "sasl_password",
    "sasl_client_secret",
    "sasl_oauth_token",
    "client_key",
    "shared_access_key",
    "api_key",
    "api_secret",
    "client_secret",
    "sasl_oauth_client_secret",
    "access_token",
    "private_key",
    "auth_header",
    "password",
    "secret",
    "token",
];

/// Options whose values are printed as-is.
const PUBLIC_OPTIONS: &[&str] = &[
    "avro_schema_prefix",
    "compression",
    "cursor",
    "diff",
    "end_time",
    "envelope",
    "format",
    "full_table_name",
    "initial_scan",
    "kafka_sink_config",
    "key_in_value",
    "min_checkpoint_frequency",
    "mvcc_timestamp",
    "no_initial_scan",
    "on_error",
    "protect_data_from_gc_on_pause",
    "resolved",
    "schema_change_events",
    "schema_change_policy",
    "split_column_families",
    "topic_in_value",
    "topic_prefix",
    "updated",
    "virtual_columns",
    "webhook_client_cert",
    "webhook_sink_config",
];

/// Options that carry a URI; only the credential parts are scrubbed.
const URI_OPTIONS: &[&str] = &["confluent_schema_registry", "sink"];

/// Options whose whole value is a secret.
const SENSITIVE_OPTIONS: &[&str] = &["webhook_auth_header", "webhook_client_key"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionClass {
    Public,
    Uri,
    Sensitive,
    /// Not in any list. Treated like `Sensitive`.
    Unknown,
}

pub fn classify_option(name: &str) -> OptionClass {
    let name = name.trim().to_lowercase();
    if SENSITIVE_OPTIONS.contains(&name.as_str()) {
        OptionClass::Sensitive
    } else if URI_OPTIONS.contains(&name.as_str()) {
        OptionClass::Uri
    } else if PUBLIC_OPTIONS.contains(&name.as_str()) {
        OptionClass::Public
    } else {
        OptionClass::Unknown
    }
}

pub fn is_sensitive_param(name: &str) -> bool {
    let name = name.trim();
    SENSITIVE_URI_PARAMS
        .iter()
        .any(|p| p.eq_ignore_ascii_case(name))
}

/// Redacts one option value according to [`classify_option`].
pub fn redact_option_value(name: &str, value: &str) -> String {
    match classify_option(name) {
        OptionClass::Public => value.to_string(),
        OptionClass::Uri => redact_sink_uri(value),
        OptionClass::Sensitive | OptionClass::Unknown => REDACTED.to_string(),
    }
}

/// Replaces the userinfo password and every sensitive query parameter value
/// with [`REDACTED`]. A non-empty fragment is never classified and is
/// replaced whole. Everything else is kept byte-for-byte, so an address
/// without secrets comes back unchanged.
pub fn redact_sink_uri(uri: &str) -> String {
    let (before_fragment, fragment) = match uri.find('#') {
        Some(i) => (&uri[..i], Some(&uri[i..])),
        None => (uri, None),
    };
    let (base, query) = match before_fragment.find('?') {
        Some(i) => (&before_fragment[..i], Some(&before_fragment[i + 1..])),
        None => (before_fragment, None),
    };

    let mut out = redact_userinfo(base);
    if let Some(query) = query {
        out.push('?');
        out.push_str(&redact_query(query));
    }
    match fragment {
        Some("#") => out.push('#'),
        Some(_) => {
            out.push('#');
            out.push_str(REDACTED);
        }
        None => {}
    }
    out
}

fn redact_userinfo(base: &str) -> String {
    let Some(scheme_end) = base.find("://") else {
        return base.to_string();
    };
    let authority_start = scheme_end + 3;
    let rest = &base[authority_start..];
    let authority_end = rest.find('/').unwrap_or(rest.len());
    let authority = &rest[..authority_end];

    let Some(at) = authority.rfind('@') else {
        return base.to_string();
    };
    let userinfo = &authority[..at];
    let Some(colon) = userinfo.find(':') else {
        return base.to_string();
    };

    let mut out = String::with_capacity(base.len());
    out.push_str(&base[..authority_start]);
    out.push_str(&userinfo[..=colon]);
    out.push_str(REDACTED);
    out.push_str(&authority[at..]);
    out.push_str(&rest[authority_end..]);
    out
}

fn redact_query(query: &str) -> String {
    query
        .split('&')
        .map(|pair| {
            let Some(eq) = pair.find('=') else {
                return pair.to_string();
            };
            let raw_key = &pair[..eq];
            match decode_key(raw_key) {
                Some(key) if !is_sensitive_param(&key) => pair.to_string(),
                // sensitive, or a key we could not decode cleanly
                _ => format!("{raw_key}={REDACTED}"),
            }
        })
        .collect::<Vec<_>>()
        .join("&")
}

fn decode_key(raw: &str) -> Option<String> {
    let pair = format!("{raw}=");
    let (key, _) = form_urlencoded::parse(pair.as_bytes()).next()?;
    if key.contains('\u{FFFD}') {
        return None;
    }
    Some(key.into_owned())
}

/// Scrubs free text such as task error messages: every whitespace-separated
/// word that contains `://` is treated as a URI.
pub fn redact_message(message: &str) -> String {
    let mut out = String::with_capacity(message.len());
    let mut word = String::new();
    for c in message.chars() {
        if c.is_whitespace() {
            out.push_str(&redact_word(&word));
            word.clear();
            out.push(c);
        } else {
            word.push(c);
        }
    }
    out.push_str(&redact_word(&word));
    out
}

fn redact_word(word: &str) -> String {
    if word.contains("://") {
        redact_sink_uri(word)
    } else {
        word.to_string()
    }
}

/// Scrubs a rendered `CREATE CHANGEFEED` / `ALTER CHANGEFEED` statement.
///
/// String literals are rewritten in place:
/// - the value of a `WITH <option> = '<value>'` clause goes through
///   [`redact_option_value`];
/// - the `INTO '<uri>'` literal and any other literal containing `://` go
///   through [`redact_sink_uri`];
/// - an unterminated literal is replaced by `'redacted'`.
pub fn redact_statement(statement: &str) -> String {
    let mut out = String::with_capacity(statement.len());
    let mut segment = String::new();
    let mut in_with = false;
    let mut chars = statement.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\'' {
            segment.push(c);
            continue;
        }

        // read a literal, '' is an escaped quote
        let mut literal = String::new();
        let mut terminated = false;
        while let Some(c) = chars.next() {
            if c == '\'' {
                if chars.peek() == Some(&'\'') {
                    chars.next();
                    literal.push('\'');
                } else {
                    terminated = true;
                    break;
                }
            } else {
                literal.push(c);
            }
        }

        if contains_keyword(&segment, "WITH") {
            in_with = true;
        }
        out.push_str(&segment);

        if !terminated {
            out.push('\'');
            out.push_str(REDACTED);
            out.push('\'');
            return out;
        }

        let redacted = match option_name_before(&segment) {
            Some(name) if in_with => redact_option_value(&name, &literal),
            _ if ends_with_keyword(&segment, "INTO") || literal.contains("://") => {
                redact_sink_uri(&literal)
            }
            _ => literal,
        };
        segment.clear();

        out.push('\'');
        out.push_str(&redacted.replace('\'', "''"));
        out.push('\'');
    }

    out.push_str(&segment);
    out
}

/// `"..., webhook_auth_header = "` -> `Some("webhook_auth_header")`
fn option_name_before(segment: &str) -> Option<String> {
    let before_eq = segment.trim_end().strip_suffix('=')?.trim_end();
    let start = before_eq
        .rfind(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .map(|i| i + 1)
        .unwrap_or(0);
    let name = &before_eq[start..];
    (!name.is_empty()).then(|| name.to_string())
}

fn words(segment: &str) -> impl Iterator<Item = &str> {
    segment
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
}

fn contains_keyword(segment: &str, keyword: &str) -> bool {
    words(segment).any(|w| w.eq_ignore_ascii_case(keyword))
}

fn ends_with_keyword(segment: &str, keyword: &str) -> bool {
    words(segment)
        .last()
        .is_some_and(|w| w.eq_ignore_ascii_case(keyword))
}
