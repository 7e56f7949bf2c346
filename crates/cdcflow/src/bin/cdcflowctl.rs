use cdcflow::api::models::{CommandResponse, CreateResponse, ErrorBody};
use cdcflow::changefeed::alter::AlterChangefeed;
use cdcflow::changefeed::view::IntrospectionRow;
use cdcflow::jobs::registry::CreateChangefeed;
use serde::de::DeserializeOwned;
use std::env;

const USAGE: &str = "cdcflowctl <command>\n\
    Commands:\n\
    - list [--order-by sink_uri|job_id|status|created] [--desc]\n\
    - show <job_id>\n\
    - create <sink_uri> <table>... [--with name[=value]]...\n\
    - pause <job_id>\n\
    - resume <job_id>\n\
    - cancel <job_id>\n\
    - alter <job_id> [--add table] [--drop table] [--set name[=value]] [--unset name]\n\
    \n\
    Talks to the admin API at CDCFLOW_ADMIN_URL (default http://127.0.0.1:8088).\n";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprint!("{USAGE}");
        std::process::exit(2);
    }

    dotenvy::dotenv().ok();
    let base = env::var("CDCFLOW_ADMIN_URL").unwrap_or_else(|_| "http://127.0.0.1:8088".to_string());
    let admin = Admin {
        http: reqwest::Client::new(),
        base: base.trim_end_matches('/').to_string(),
    };

    match args[1].as_str() {
        "list" => {
            let mut query = Vec::new();
            let mut rest = args[2..].iter();
            while let Some(arg) = rest.next() {
                match arg.as_str() {
                    "--order-by" => {
                        let key = rest
                            .next()
                            .ok_or_else(|| anyhow::anyhow!("--order-by needs a value"))?;
                        query.push(("order_by", key.clone()));
                    }
                    "--desc" => query.push(("desc", "true".to_string())),
                    other => anyhow::bail!("unexpected argument {other:?}"),
                }
            }
            let rows: Vec<IntrospectionRow> = admin.get("/changefeeds", &query).await?;
            print_rows(&rows);
        }
        "show" => {
            let id = job_id(&args, "show")?;
            let rows: Vec<IntrospectionRow> = admin.get(&format!("/changefeeds/{id}"), &[]).await?;
            print_rows(&rows);
        }
        "create" => {
            let request = parse_create(&args[2..])?;
            let created: CreateResponse = admin.post("/changefeeds", &request).await?;
            println!("created changefeed {}", created.job_id);
        }
        cmd @ ("pause" | "resume" | "cancel") => {
            let id = job_id(&args, cmd)?;
            let res: CommandResponse = admin
                .post(&format!("/changefeeds/{id}/{cmd}"), &serde_json::json!({}))
                .await?;
            println!("job {} is {}", res.job_id, res.status);
        }
        "alter" => {
            let id = job_id(&args, "alter")?;
            let request = parse_alter(&args[3..])?;
            let res: CommandResponse = admin
                .post(&format!("/changefeeds/{id}/alter"), &request)
                .await?;
            println!("altered job {} (status {})", res.job_id, res.status);
        }
        other => {
            eprintln!("Unknown command: {other}");
            std::process::exit(2);
        }
    }

    Ok(())
}

struct Admin {
    http: reqwest::Client,
    base: String,
}

impl Admin {
    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> anyhow::Result<T> {
        let res = self
            .http
            .get(format!("{}{path}", self.base))
            .query(query)
            .send()
            .await?;
        decode(res).await
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> anyhow::Result<T>
    where
        B: serde::Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let res = self
            .http
            .post(format!("{}{path}", self.base))
            .json(body)
            .send()
            .await?;
        decode(res).await
    }
}

async fn decode<T: DeserializeOwned>(res: reqwest::Response) -> anyhow::Result<T> {
    let status = res.status();
    if status.is_success() {
        return Ok(res.json().await?);
    }
    let text = res.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => anyhow::bail!("{} ({status}): {}", body.code, body.error),
        Err(_) => anyhow::bail!("admin api returned {status}: {text}"),
    }
}

fn job_id(args: &[String], cmd: &str) -> anyhow::Result<i64> {
    let raw = args
        .get(2)
        .ok_or_else(|| anyhow::anyhow!("usage: cdcflowctl {cmd} <job_id>"))?;
    raw.parse()
        .map_err(|_| anyhow::anyhow!("job id must be an integer, got {raw:?}"))
}

fn split_option(raw: &str) -> (String, Option<String>) {
    match raw.split_once('=') {
        Some((k, v)) => (k.trim().to_string(), Some(v.to_string())),
        None => (raw.trim().to_string(), None),
    }
}

fn parse_create(args: &[String]) -> anyhow::Result<CreateChangefeed> {
    let mut rest = args.iter();
    let sink_uri = rest
        .next()
        .ok_or_else(|| anyhow::anyhow!("usage: cdcflowctl create <sink_uri> <table>..."))?
        .clone();

    let mut request = CreateChangefeed {
        targets: Vec::new(),
        sink_uri,
        options: Default::default(),
    };
    while let Some(arg) = rest.next() {
        if arg == "--with" {
            let raw = rest
                .next()
                .ok_or_else(|| anyhow::anyhow!("--with needs name[=value]"))?;
            let (k, v) = split_option(raw);
            request.options.insert(k, v);
        } else {
            request.targets.push(arg.clone());
        }
    }
    Ok(request)
}

fn parse_alter(args: &[String]) -> anyhow::Result<AlterChangefeed> {
    let mut request = AlterChangefeed::default();
    let mut rest = args.iter();
    while let Some(flag) = rest.next() {
        let value = rest
            .next()
            .ok_or_else(|| anyhow::anyhow!("{flag} needs a value"))?;
        match flag.as_str() {
            "--add" => request.add.push(value.clone()),
            "--drop" => request.drop.push(value.clone()),
            "--set" => {
                let (k, v) = split_option(value);
                request.set.insert(k, v);
            }
            "--unset" => request.unset.push(value.clone()),
            other => anyhow::bail!("unexpected argument {other:?}"),
        }
    }
    if request.is_empty() {
        anyhow::bail!("alter needs at least one of --add, --drop, --set, --unset");
    }
    Ok(request)
}

fn print_rows(rows: &[IntrospectionRow]) {
    if rows.is_empty() {
        println!("(no changefeeds)");
        return;
    }
    println!("job_id\tstatus\tsink_uri\tfull_table_names\ttopics\tformat\tdescription");
    for r in rows {
        println!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}",
            r.job_id,
            r.status,
            r.sink_uri,
            r.full_table_names,
            r.topics,
            r.format.as_str(),
            r.description
        );
        if let Some(err) = &r.error {
            println!("\terror: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn alter_flags_combine() {
        let req = parse_alter(&strings(&[
            "--drop", "foo", "--add", "baz", "--set", "resolved=5s", "--set", "diff", "--unset",
            "updated",
        ]))
        .unwrap();
        assert_eq!(req.drop, vec!["foo"]);
        assert_eq!(req.add, vec!["baz"]);
        assert_eq!(req.set.get("resolved"), Some(&Some("5s".to_string())));
        assert_eq!(req.set.get("diff"), Some(&None));
        assert_eq!(req.unset, vec!["updated"]);

        assert!(parse_alter(&[]).is_err());
        assert!(parse_alter(&strings(&["--add"])).is_err());
    }

    #[test]
    fn create_collects_tables_and_options() {
        let req = parse_create(&strings(&[
            "kafka://broker:9092",
            "foo",
            "bar",
            "--with",
            "resolved",
        ]))
        .unwrap();
        assert_eq!(req.sink_uri, "kafka://broker:9092");
        assert_eq!(req.targets, vec!["foo", "bar"]);
        assert_eq!(req.options.get("resolved"), Some(&None));
    }
}
