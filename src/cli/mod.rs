use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use crate::cluster::ClusterAggregator;
use crate::config::{parse_peer_list, Overrides, Settings};
use crate::logs::{DirectoryCollector, FileBody, FileContent, LogQuery};

#[derive(Parser, Debug)]
#[command(
    name = "loggerator",
    version,
    about = "Serve the most recent lines of log files over HTTP"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Config file (default: ~/.config/loggerator/default.toml, if present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory whose files are served
    #[arg(long, env = "LOG_DIR", global = true)]
    pub log_dir: Option<String>,

    /// Comma-separated peer addresses for cluster requests
    #[arg(long, env = "PEERS", global = true)]
    pub peers: Option<String>,

    /// Per-peer timeout in milliseconds
    #[arg(long, global = true)]
    pub peer_timeout_ms: Option<u64>,

    /// Max files read (or peers queried) at once per request
    #[arg(long, global = true)]
    pub max_concurrency: Option<usize>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP server (default)
    Serve {
        /// Bind address
        #[arg(short = 'H', long)]
        host: Option<String>,

        /// Port number
        #[arg(short, long, env = "PORT")]
        port: Option<u16>,
    },

    /// Print the newest lines of every file in the log directory
    Tail {
        #[command(flatten)]
        query: QueryArgs,

        /// Output as JSON (same shape as GET /logs)
        #[arg(long)]
        json: bool,
    },

    /// Query every peer once and print the merged JSON
    Cluster {
        #[command(flatten)]
        query: QueryArgs,
    },
}

#[derive(Args, Debug, Default)]
pub struct QueryArgs {
    /// Lines per file (-1 for all)
    #[arg(short = 'n', long, allow_hyphen_values = true)]
    pub lines: Option<String>,

    /// Comma-separated extensions to skip, e.g. .gz,.tmp
    #[arg(short, long)]
    pub exclude: Option<String>,

    /// Only return lines containing this text
    #[arg(short, long)]
    pub search: Option<String>,
}

impl QueryArgs {
    fn to_query(&self, default_lines: usize) -> LogQuery {
        LogQuery::from_params(
            self.lines.as_deref(),
            self.exclude.as_deref(),
            self.search.as_deref(),
            default_lines,
        )
    }
}

impl Cli {
    fn overrides(&self) -> Overrides {
        let (host, port) = match &self.command {
            Some(Commands::Serve { host, port }) => (host.clone(), *port),
            _ => (None, None),
        };

        Overrides {
            host,
            port,
            // An empty LOG_DIR means "use the default"
            log_dir: self.log_dir.clone().filter(|d| !d.trim().is_empty()),
            peers: self.peers.as_deref().map(parse_peer_list),
            peer_timeout_ms: self.peer_timeout_ms,
            max_concurrency: self.max_concurrency,
        }
    }
}

pub async fn run(cli: Cli) -> Result<()> {
    let settings = Settings::resolve(cli.config.as_deref(), &cli.overrides())?;

    match cli.command {
        None | Some(Commands::Serve { .. }) => {
            crate::web::start_web_server(&settings).await?;
        }
        Some(Commands::Tail { query, json }) => {
            let collector = DirectoryCollector::new(
                settings.log_dir(),
                settings.line_reader(),
                settings.limits.max_concurrency,
            )
            .with_timeout(settings.request_timeout());

            let files = collector
                .collect(&query.to_query(settings.logs.default_lines))
                .await?;

            let mut out = std::io::stdout().lock();
            if json {
                serde_json::to_writer_pretty(&mut out, &files)?;
                writeln!(out)?;
            } else {
                print_files(&mut out, &files)?;
            }
        }
        Some(Commands::Cluster { query }) => {
            let aggregator = ClusterAggregator::new(
                &settings.cluster.peers,
                settings.peer_timeout(),
                settings.limits.max_concurrency,
            )
            .context("Failed to build peer HTTP client")?
            .with_deadline(settings.request_timeout());

            if aggregator.peers().is_empty() {
                tracing::warn!("No peers configured (set PEERS or [cluster] peers)");
            }

            let hosts = aggregator
                .aggregate(&query.to_query(settings.logs.default_lines))
                .await;

            let mut out = std::io::stdout().lock();
            serde_json::to_writer_pretty(&mut out, &hosts)?;
            writeln!(out)?;
        }
    }

    Ok(())
}

/// `tail`-style listing: a header per file followed by its lines, newest first
fn print_files(out: &mut impl Write, files: &[FileContent]) -> Result<()> {
    for (i, file) in files.iter().enumerate() {
        if i > 0 {
            writeln!(out)?;
        }
        writeln!(
            out,
            "==> {} ({} bytes, modified {}) <==",
            file.name,
            file.size_bytes,
            file.modified.format("%Y-%m-%d %H:%M:%S UTC")
        )?;
        match &file.body {
            FileBody::Error(reason) => writeln!(out, "error: {}", reason)?,
            _ => {
                for line in file.lines() {
                    writeln!(out, "{}", line)?;
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_cli_parses_tail_with_unbounded_lines() {
        let cli = Cli::try_parse_from([
            "loggerator",
            "tail",
            "-n",
            "-1",
            "--exclude",
            ".gz",
            "--search",
            "ERROR",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Tail { query, json }) => {
                assert!(!json);
                let query = query.to_query(20);
                assert_eq!(query.limit, crate::logs::LineLimit::All);
                assert_eq!(query.excluded, vec![".gz"]);
                assert_eq!(query.search(), Some("ERROR"));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_serve_flags_become_overrides() {
        let cli = Cli::try_parse_from([
            "loggerator",
            "serve",
            "--port",
            "9090",
            "--log-dir",
            "/srv/logs",
            "--peers",
            "a:1, b:2",
        ])
        .unwrap();
        let overrides = cli.overrides();
        assert_eq!(overrides.port, Some(9090));
        assert_eq!(overrides.log_dir.as_deref(), Some("/srv/logs"));
        assert_eq!(overrides.peers, Some(vec!["a:1".to_string(), "b:2".to_string()]));
    }

    #[test]
    fn test_empty_log_dir_is_ignored() {
        let cli = Cli::try_parse_from(["loggerator", "serve", "--log-dir", ""]).unwrap();
        assert_eq!(cli.overrides().log_dir, None);
    }

    #[test]
    fn test_print_files() {
        let modified = Utc.with_ymd_and_hms(2024, 12, 16, 10, 0, 0).unwrap();
        let files = vec![
            FileContent {
                name: "/var/log/app.log".into(),
                size_bytes: 20,
                modified,
                body: FileBody::Text(vec!["second".into(), "first".into()]),
            },
            FileContent {
                name: "/var/log/secret.log".into(),
                size_bytes: 0,
                modified,
                body: FileBody::Error("permission denied".into()),
            },
        ];

        let mut out = Vec::new();
        print_files(&mut out, &files).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "==> /var/log/app.log (20 bytes, modified 2024-12-16 10:00:00 UTC) <==\n\
             second\n\
             first\n\
             \n\
             ==> /var/log/secret.log (0 bytes, modified 2024-12-16 10:00:00 UTC) <==\n\
             error: permission denied\n"
        );
    }
}
