use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use skillhub_core::{Caller, SkillHubCore};
use skillhub_ratelimit::Scope;
use skillhub_types::{CancelToken, RepoId};

#[derive(Parser, Debug)]
#[command(name = "skillhub", version)]
#[command(about = "Operator CLI for the SkillHub federation core")]
struct Cli {
    /// TOML config file (`[proxy]`, `[proxy_sync]`, `[rate_limit]`). Falls
    /// back to built-in defaults if omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Repository manifest (`[[repository]]` / `[[membership]]` tables).
    /// Omit for an empty, repository-less store.
    #[arg(long, global = true)]
    manifest: Option<PathBuf>,

    /// Root directory the blob store writes content-addressed blobs
    /// under.
    #[arg(long, default_value = ".skillhub/blobs", global = true)]
    blob_dir: PathBuf,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Resolve `(repo, slug, version|tag)` and write the artifact to
    /// disk.
    Download {
        #[arg(long)]
        repo: i64,
        slug: String,
        #[arg(long, conflicts_with = "tag")]
        version: Option<String>,
        #[arg(long)]
        tag: Option<String>,
        #[arg(long)]
        out: PathBuf,
    },
    /// Resolve an artifact and print one file from inside its archive to
    /// stdout.
    Cat {
        #[arg(long)]
        repo: i64,
        slug: String,
        #[arg(long, conflicts_with = "tag")]
        version: Option<String>,
        #[arg(long)]
        tag: Option<String>,
        path: String,
    },
    /// Publish a local archive to a hosted repository.
    Publish {
        #[arg(long)]
        repo: i64,
        slug: String,
        version: String,
        archive: PathBuf,
        #[arg(long, default_value = "cli")]
        created_by: String,
        /// `tag=value` pairs (repeatable); `latest` is implied if absent.
        #[arg(long = "tag", value_parser = parse_tag)]
        tags: Vec<(String, String)>,
    },
    /// Check whether a request from `--subject`/`--ip` would be admitted
    /// under the configured rate limits, without doing any resolver work.
    Admit {
        #[arg(long, value_enum)]
        scope: ScopeArg,
        #[arg(long)]
        subject: Option<String>,
        #[arg(long, default_value = "127.0.0.1")]
        ip: String,
    },
    #[command(subcommand)]
    Sync(SyncCommands),
}

#[derive(Subcommand, Debug)]
enum SyncCommands {
    /// Run exactly one sync pass on the calling thread and print the
    /// resulting summary.
    Run {
        #[arg(long)]
        page_size: Option<u32>,
    },
    /// Fire a background sync pass (single-flight guarded) and return
    /// immediately.
    Trigger,
    /// Print the manual trigger's last-known status.
    Status,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum ScopeArg {
    Read,
    Write,
}

impl From<ScopeArg> for Scope {
    fn from(value: ScopeArg) -> Self {
        match value {
            ScopeArg::Read => Scope::Read,
            ScopeArg::Write => Scope::Write,
        }
    }
}

fn parse_tag(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected `tag=value`, got `{raw}`"))?;
    Ok((key.to_string(), value.to_string()))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let core = SkillHubCore::bootstrap_from_paths(
        cli.config.as_deref(),
        cli.manifest.as_deref(),
        &cli.blob_dir,
    )
    .context("bootstrap skillhub core")?;

    match cli.cmd {
        Commands::Download { repo, slug, version, tag, out } => {
            let artifact = core
                .download_artifact_to_file(RepoId(repo), &slug, version.as_deref(), tag.as_deref(), &out)
                .with_context(|| format!("download {slug}"))?;
            println!("{}@{} -> {}", artifact.package_slug, artifact.version, out.display());
            println!("digest: {}", artifact.digest);
            println!("size:   {} bytes", artifact.size_bytes);
        }
        Commands::Cat { repo, slug, version, tag, path } => {
            let bytes = core
                .read_skill_file(RepoId(repo), &slug, version.as_deref(), tag.as_deref(), &path)
                .with_context(|| format!("read {path} from {slug}"))?;
            use std::io::Write as _;
            std::io::stdout().write_all(&bytes)?;
        }
        Commands::Publish { repo, slug, version, archive, created_by, tags } => {
            let mut file = std::fs::File::open(&archive)
                .with_context(|| format!("open {}", archive.display()))?;
            let mut tag_map = std::collections::BTreeMap::new();
            tag_map.insert("latest".to_string(), version.clone());
            for (key, value) in tags {
                tag_map.insert(key, value);
            }
            let artifact = core
                .publish_artifact(RepoId(repo), &slug, &created_by, &version, &mut file, tag_map)
                .with_context(|| format!("publish {slug}@{version}"))?;
            println!("published {}@{} (digest {})", artifact.package_slug, artifact.version, artifact.digest);
        }
        Commands::Admit { scope, subject, ip } => {
            let caller = Caller { subject: subject.as_deref(), client_ip: &ip };
            let now = skillhub_ratelimit::RateLimiter::now_epoch_secs();
            let decision = core.check_admission(now, scope.into(), &caller);
            print_decision(&decision);
            if !decision.allowed {
                bail!("request would be rate limited");
            }
        }
        Commands::Sync(sync_cmd) => run_sync(&core, sync_cmd)?,
    }

    Ok(())
}

fn run_sync(core: &SkillHubCore, cmd: SyncCommands) -> Result<()> {
    match cmd {
        SyncCommands::Run { page_size: _ } => {
            let cancel = CancelToken::process_root();
            let summary = core.run_sync_once(&cancel).context("sync pass")?;
            print_summary(&summary);
        }
        SyncCommands::Trigger => {
            if core.trigger_sync() {
                println!("sync started");
            } else {
                println!("sync already running");
            }
        }
        SyncCommands::Status => {
            let status = core.sync_status();
            println!("running: {}", status.running);
            if let Some(summary) = &status.last_result {
                print_summary(summary);
            }
            if let Some(err) = &status.last_error {
                println!("last_error: {err}");
            }
        }
    }
    Ok(())
}

fn print_summary(summary: &skillhub_core::SummarySnapshot) {
    println!(
        "skills={} versions={} cached={} failed={} skipped={}",
        summary.skills, summary.versions, summary.cached, summary.failed, summary.skipped
    );
}

fn print_decision(decision: &skillhub_ratelimit::Decision) {
    println!("allowed:   {}", decision.allowed);
    println!("limit:     {}", decision.limit);
    println!("remaining: {}", decision.remaining);
    println!("reset_in:  {}s", decision.reset_in);
    if let Some(retry_after) = decision.retry_after() {
        println!("retry_after: {retry_after}s");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_tag_splits_on_first_equals() {
        assert_eq!(
            parse_tag("stable=1.2.3").unwrap(),
            ("stable".to_string(), "1.2.3".to_string())
        );
        assert_eq!(
            parse_tag("k=v=extra").unwrap(),
            ("k".to_string(), "v=extra".to_string())
        );
        assert!(parse_tag("no-equals-sign").is_err());
    }

    #[test]
    fn cli_parses_download_subcommand() {
        let cli = Cli::parse_from([
            "skillhub",
            "download",
            "--repo",
            "1",
            "demo",
            "--tag",
            "latest",
            "--out",
            "out.zip",
        ]);
        match cli.cmd {
            Commands::Download { repo, slug, tag, out, version, .. } => {
                assert_eq!(repo, 1);
                assert_eq!(slug, "demo");
                assert_eq!(tag.as_deref(), Some("latest"));
                assert_eq!(version, None);
                assert_eq!(out, PathBuf::from("out.zip"));
            }
            other => panic!("unexpected subcommand: {other:?}"),
        }
    }

    #[test]
    fn cli_rejects_version_and_tag_together() {
        let result = Cli::try_parse_from([
            "skillhub",
            "download",
            "--repo",
            "1",
            "demo",
            "--version",
            "1.0.0",
            "--tag",
            "latest",
            "--out",
            "out.zip",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn end_to_end_publish_then_download_round_trips_through_the_cli_bootstrap() {
        let dir = tempfile::tempdir().unwrap();
        let manifest_path = dir.path().join("repos.toml");
        std::fs::write(
            &manifest_path,
            r#"
            [[repository]]
            id = 1
            name = "local"
            type = "hosted"
            "#,
        )
        .unwrap();

        let core = SkillHubCore::bootstrap_from_paths(
            None,
            Some(&manifest_path),
            dir.path().join("blobs"),
        )
        .unwrap();

        let zip_bytes = {
            use std::io::Write as _;
            let mut buf = Vec::new();
            let mut writer = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            writer
                .start_file("skill.md", zip::write::SimpleFileOptions::default())
                .unwrap();
            writer.write_all(b"hello").unwrap();
            writer.finish().unwrap();
            buf
        };
        core.publish_artifact(
            RepoId(1),
            "demo",
            "cli-test",
            "1.0.0",
            &mut std::io::Cursor::new(zip_bytes),
            std::collections::BTreeMap::from([("latest".to_string(), "1.0.0".to_string())]),
        )
        .unwrap();

        let dest = dir.path().join("out.zip");
        let artifact = core
            .download_artifact_to_file(RepoId(1), "demo", None, Some("latest"), &dest)
            .unwrap();
        assert_eq!(artifact.version, "1.0.0");
        assert!(dest.exists());
    }
}
