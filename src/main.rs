use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde_json::{json, Value};
use std::path::PathBuf;

use vetrina::api::{BatchRequest, RequestOptions};
use vetrina::cache::{CacheResult, CacheType};
use vetrina::config::Config;
use vetrina::{logging, AppContext};

#[derive(Parser, Debug)]
#[command(name = "vetrina")]
#[command(about = "Cached client for the vetrine marketplace API")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/vetrina/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// GET a path, optionally through the cache
  Get {
    path: String,
    /// Query parameter as name=value (repeatable)
    #[arg(short, long = "query", value_parser = parse_pair)]
    query: Vec<(String, String)>,
    /// Cache category, e.g. vetrine_list or search_results
    #[arg(long)]
    cache: Option<String>,
    /// Do not send the stored token
    #[arg(long)]
    no_auth: bool,
  },
  /// POST a JSON body to a path
  Post {
    path: String,
    /// JSON body (default: null)
    #[arg(short, long)]
    body: Option<String>,
  },
  /// DELETE a path
  Delete { path: String },
  /// GET several paths concurrently
  Batch { paths: Vec<String> },
  /// Remove every cached key containing PATTERN
  Invalidate { pattern: String },
  /// Evict expired entries from every tier
  Sweep,
  /// Show entry counts per tier
  Stats,
  /// Empty every tier
  Clear,
}

fn parse_pair(raw: &str) -> std::result::Result<(String, String), String> {
  raw
    .split_once('=')
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .ok_or_else(|| format!("expected name=value, got '{}'", raw))
}

fn print_json(value: &Value) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

fn describe(result: CacheResult<Value>) -> Value {
  json!({
    "source": result.source,
    "cached_at": result.cached_at.map(|t| t.to_rfc3339()),
    "data": result.data,
  })
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(&config.logging)?;

  let ctx = AppContext::build(config)?;

  match args.command {
    Command::Get {
      path,
      query,
      cache,
      no_auth,
    } => {
      let mut options = query
        .into_iter()
        .fold(RequestOptions::new(), |options, (k, v)| options.query(k, v));
      if let Some(cache_type) = cache.as_deref().and_then(CacheType::parse) {
        options = options.cached(cache_type);
      }
      if no_auth {
        options = options.skip_auth();
      }
      let result = ctx.api.fetch(&path, options).await?;
      print_json(&describe(result))?;
    }
    Command::Post { path, body } => {
      let body = match body {
        Some(raw) => serde_json::from_str(&raw).map_err(|e| eyre!("Invalid JSON body: {}", e))?,
        None => Value::Null,
      };
      let data = ctx.api.post(&path, body, RequestOptions::new()).await?;
      print_json(&data)?;
    }
    Command::Delete { path } => {
      let data = ctx.api.delete(&path, RequestOptions::new()).await?;
      print_json(&data)?;
    }
    Command::Batch { paths } => {
      let requests = paths
        .iter()
        .map(|path| BatchRequest::get(path.as_str(), RequestOptions::new()))
        .collect();
      let results = ctx.api.batch(requests).await;
      let report: Vec<Value> = paths
        .iter()
        .zip(results)
        .map(|(path, result)| match result {
          Ok(data) => json!({ "path": path, "ok": true, "data": data }),
          Err(e) => json!({ "path": path, "ok": false, "error": e.to_string() }),
        })
        .collect();
      print_json(&Value::Array(report))?;
    }
    Command::Invalidate { pattern } => {
      let removed = ctx.cache.invalidate(&pattern);
      print_json(&json!({ "removed": removed }))?;
    }
    Command::Sweep => {
      let removed = ctx.cache.sweep();
      print_json(&json!({ "removed": removed }))?;
    }
    Command::Stats => {
      print_json(&serde_json::to_value(ctx.cache.stats())?)?;
    }
    Command::Clear => {
      ctx.cache.clear();
      print_json(&json!({ "cleared": true }))?;
    }
  }

  Ok(())
}
