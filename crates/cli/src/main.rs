use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{json, Value as Json};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing::{debug, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use walkdir::WalkDir;

use stackcheck_cfn::{self as cfn, FileSnapshotSource, RetryPolicy, StackOutputs};
use stackcheck_core::load_path;
use stackcheck_policy::{aggregate_with, PolicyConfig, Report, Severity};

const TEMPLATE_EXTENSIONS: [&str; 4] = ["json", "yaml", "yml", "template"];

#[derive(Parser, Debug)]
#[command(author, version, about = "stackcheck: compliance checks for CloudFormation templates")]
struct Cli {
    /// Policy config (YAML or JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Report format
    #[arg(long, value_enum, default_value_t = Format::Text, global = true)]
    format: Format,

    /// Template parameter value, overriding the config (repeatable)
    #[arg(short = 'p', long = "parameter", value_name = "KEY=VALUE", global = true)]
    parameters: Vec<String>,

    /// Lowest severity that fails, overriding the config
    #[arg(long, global = true)]
    fail_on: Option<Severity>,

    /// Debug logging on stderr
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Check template files, or directories of them
    Validate {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Check a deployed stack's live state against its template
    Reconcile {
        #[arg(long)]
        template: PathBuf,
        /// Live snapshot exported as JSON
        #[arg(long)]
        snapshot: PathBuf,
        /// Stack outputs as JSON
        #[arg(long)]
        outputs: Option<PathBuf>,
        #[arg(long, default_value_t = 3)]
        attempts: u32,
        /// Per-attempt timeout in seconds
        #[arg(long, default_value_t = 30)]
        timeout: u64,
    },
    /// List the rules and whether the config enables them
    Rules,
}

fn parse_parameter(raw: &str) -> Result<(String, Json)> {
    match raw.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), Json::String(v.to_string()))),
        _ => bail!("parameter '{raw}' must look like KEY=VALUE"),
    }
}

fn load_config(cli: &Cli) -> Result<PolicyConfig> {
    let mut config = match &cli.config {
        Some(path) => PolicyConfig::from_path(path)?,
        None => PolicyConfig::default(),
    };
    for raw in &cli.parameters {
        let (k, v) = parse_parameter(raw)?;
        config.set_parameter(k, v);
    }
    if let Some(fail_on) = cli.fail_on {
        config.fail_on = fail_on;
    }
    Ok(config)
}

/// Template files under `paths`, directories walked recursively, in a stable
/// order.
fn template_files(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for path in paths {
        if path.is_dir() {
            for entry in WalkDir::new(path).sort_by_file_name() {
                let entry = entry.with_context(|| format!("walking {}", path.display()))?;
                let ext = entry.path().extension().and_then(|e| e.to_str()).unwrap_or_default();
                if entry.file_type().is_file() && TEMPLATE_EXTENSIONS.contains(&ext) {
                    out.push(entry.into_path());
                }
            }
        } else {
            out.push(path.clone());
        }
    }
    if out.is_empty() {
        bail!("no template files found");
    }
    Ok(out)
}

fn check_file(path: &Path, config: &PolicyConfig) -> Result<Report> {
    let source = path.display().to_string();
    Ok(match load_path(path) {
        Ok(template) => {
            let findings = config.engine()?.evaluate(&template);
            aggregate_with(findings, config.fail_on).with_source(source)
        }
        Err(e) => {
            debug!(path = %source, error = %e, "template failed to load");
            Report::load_failure(source, &e, config.fail_on)
        }
    })
}

fn print_reports(reports: &[Report], format: Format) -> Result<()> {
    match format {
        Format::Text => reports.iter().for_each(|r| print!("{}", r.render_text())),
        Format::Json if reports.len() == 1 => println!("{}", reports[0].render_json()?),
        Format::Json => println!("{}", serde_json::to_string_pretty(reports)?),
    }
    Ok(())
}

fn exit_code(reports: &[Report]) -> u8 {
    reports.iter().map(|r| r.exit_code()).max().unwrap_or(0).clamp(0, 255) as u8
}

async fn run(cli: Cli) -> Result<u8> {
    let config = load_config(&cli)?;
    match &cli.cmd {
        Cmd::Validate { paths } => {
            let reports = template_files(paths)?
                .iter()
                .map(|p| check_file(p, &config))
                .collect::<Result<Vec<_>>>()?;
            print_reports(&reports, cli.format)?;
            Ok(exit_code(&reports))
        }
        Cmd::Reconcile { template, snapshot, outputs, attempts, timeout } => {
            let source = template.display().to_string();
            let expected = match load_path(template) {
                Ok(t) => t,
                Err(e) => {
                    let report = Report::load_failure(source, &e, config.fail_on);
                    print_reports(std::slice::from_ref(&report), cli.format)?;
                    return Ok(exit_code(&[report]));
                }
            };
            let outputs = match outputs {
                Some(path) => {
                    let text = std::fs::read_to_string(path)
                        .with_context(|| format!("Failed to read outputs: {}", path.display()))?;
                    let value: Json = serde_json::from_str(&text)
                        .with_context(|| format!("Failed to parse outputs: {}", path.display()))?;
                    StackOutputs::from_json(&value)?
                }
                None => StackOutputs::default(),
            };
            let retry =
                RetryPolicy { attempts: *attempts, timeout: Duration::from_secs(*timeout), ..RetryPolicy::default() };
            let report = cfn::reconcile_stack(
                &FileSnapshotSource::new(snapshot),
                &outputs,
                &expected,
                &config.engine()?,
                &retry,
                config.fail_on,
            )
            .await?
            .with_source(source);
            print_reports(std::slice::from_ref(&report), cli.format)?;
            Ok(exit_code(&[report]))
        }
        Cmd::Rules => {
            let rules = config.rule_set()?;
            let rows: Vec<Json> = stackcheck_policy::rules::all()?
                .iter()
                .map(|r| {
                    let active = rules.iter().find(|a| a.rule().id() == r.id());
                    json!({
                        "id": r.id(),
                        "enabled": active.is_some(),
                        "severity": active.and_then(|a| a.severity()).unwrap_or_else(|| r.default_severity()),
                        "description": r.description(),
                    })
                })
                .collect();
            match cli.format {
                Format::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
                Format::Text => {
                    for row in &rows {
                        println!(
                            "{:<22} {:<8} {:<8} {}",
                            row["id"].as_str().unwrap_or_default(),
                            row["severity"].as_str().unwrap_or_default(),
                            if row["enabled"] == Json::Bool(true) { "enabled" } else { "disabled" },
                            row["description"].as_str().unwrap_or_default(),
                        );
                    }
                }
            }
            Ok(0)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let level = if cli.verbose { Level::DEBUG } else { Level::WARN };
    tracing_subscriber::fmt()
        .json()
        .with_span_events(FmtSpan::CLOSE)
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(2)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn parameters_need_a_key() {
        assert_eq!(parse_parameter("Stage=prod=1").unwrap(), ("Stage".to_string(), json!("prod=1")));
        assert_eq!(parse_parameter("Empty=").unwrap().1, json!(""));
        assert!(parse_parameter("=x").is_err());
        assert!(parse_parameter("novalue").is_err());
    }

    #[test]
    fn directories_are_walked_for_templates() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        for name in ["b.yaml", "a.json", "nested/c.template", "notes.md"] {
            fs::write(dir.path().join(name), "Resources: {}").unwrap();
        }
        let files = template_files(&[dir.path().to_path_buf()]).unwrap();
        let names: Vec<_> =
            files.iter().map(|p| p.strip_prefix(dir.path()).unwrap().to_string_lossy().into_owned()).collect();
        assert_eq!(names, ["a.json", "b.yaml", "nested/c.template"]);

        let empty = tempfile::tempdir().unwrap();
        assert!(template_files(&[empty.path().to_path_buf()]).is_err());
    }

    #[tokio::test]
    async fn validate_exit_codes() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.yaml");
        fs::write(
            &good,
            r#"
Resources:
  Topic:
    Type: AWS::SNS::Topic
    Properties:
      KmsMasterKeyId: alias/aws/sns
      Tags:
        - { Key: Environment, Value: dev }
        - { Key: Project, Value: p }
"#,
        )
        .unwrap();
        let bad = dir.path().join("bad.yaml");
        fs::write(&bad, "Description: no resources\n").unwrap();

        let cli = Cli::try_parse_from(["stackcheck", "validate", good.to_str().unwrap()]).unwrap();
        assert_eq!(run(cli).await.unwrap(), 0);
        let cli = Cli::try_parse_from(["stackcheck", "--format", "json", "validate", bad.to_str().unwrap()]).unwrap();
        assert_eq!(run(cli).await.unwrap(), 2);
        let cli = Cli::try_parse_from(["stackcheck", "validate", good.to_str().unwrap(), "--fail-on", "info"]).unwrap();
        assert_eq!(run(cli).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn reconcile_reads_snapshot_files() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("stack.json");
        fs::write(
            &template,
            json!({ "Resources": { "Web": {
                "Type": "AWS::EC2::SecurityGroup", "Properties": { "GroupDescription": "web" }
            }}})
            .to_string(),
        )
        .unwrap();
        let snapshot = dir.path().join("live.json");
        fs::write(
            &snapshot,
            json!({ "resources": { "Web": { "type": "AWS::EC2::SecurityGroup", "properties": {
                "GroupDescription": "web",
                "SecurityGroupIngress": [{ "IpProtocol": "-1", "CidrIp": "0.0.0.0/0" }]
            }}}})
            .to_string(),
        )
        .unwrap();
        let cli = Cli::try_parse_from([
            "stackcheck",
            "reconcile",
            "--template",
            template.to_str().unwrap(),
            "--snapshot",
            snapshot.to_str().unwrap(),
        ])
        .unwrap();
        assert_eq!(run(cli).await.unwrap(), 1);
    }

    #[test]
    fn rules_listing_runs() {
        let cli = Cli::try_parse_from(["stackcheck", "--format", "json", "rules"]).unwrap();
        let rt = tokio::runtime::Runtime::new().unwrap();
        assert_eq!(rt.block_on(run(cli)).unwrap(), 0);
    }
}
