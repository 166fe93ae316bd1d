//! kqlcache - record and replay Kusto query results
//!
//! Runs KQL queries against a cluster's REST endpoint, recording responses
//! into cache folders and replaying them on later runs.

use std::error::Error;
use std::process::ExitCode;

use clap::Parser;

use kqlcache::cli::{CacheCommand, Cli, Command, QueryArgs};
use kqlcache::logging::init_logging;
use kqlcache::query::KustoClient;
use kqlcache::{resolve_pseudo_uri, CachedQueryRunner, ResponseSource, ResultCache};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let cache = match cli.cache_root {
        Some(root) => ResultCache::with_root(root),
        None => ResultCache::new()
            .ok_or("cannot determine a cache root; set --cache-root or KQLCACHE_ROOT")?,
    };

    match cli.command {
        Command::Query(args) => run_query(&args, cache).await,
        Command::Cache(command) => run_cache_command(command, &cache),
    }
}

/// Runs one query and prints the response as JSON on stdout
async fn run_query(args: &QueryArgs, cache: ResultCache) -> Result<(), Box<dyn Error>> {
    let request = args.to_request()?;
    let settings = args.settings();

    let mut client = KustoClient::new().with_endpoint_version(args.endpoint.into());
    if let Some(token) = &args.token {
        client = client.with_token(token);
    }

    let runner = CachedQueryRunner::new(client, cache);
    let outcome = runner.run(&request, &settings).await?;

    if let ResponseSource::Cache { folder } = &outcome.source {
        eprintln!("(replayed from cache '{}')", folder);
    }
    println!("{}", serde_json::to_string_pretty(&outcome.response)?);
    Ok(())
}

fn run_cache_command(command: CacheCommand, cache: &ResultCache) -> Result<(), Box<dyn Error>> {
    match command {
        CacheCommand::Create { name } => {
            let created = cache.create_or_attach(&name)?;
            let folder = cache.folder(&name)?;
            let verb = if created { "created" } else { "attached" };
            println!("cache '{}' {} at {}", name, verb, folder.path.display());
        }
        CacheCommand::Remove { name } => {
            if !cache.remove(&name)? {
                return Err(format!("cache '{}' wasn't found", name).into());
            }
            println!("cache '{}' removed", name);
        }
        CacheCommand::List => {
            for name in cache.list()? {
                println!("{}", name);
            }
        }
        CacheCommand::Show { uri } => {
            let uri = resolve_pseudo_uri(&uri)?;
            let folder = cache.folder(&uri.folder)?;
            for loaded in cache.entries(&folder, uri.selector.as_deref())? {
                let entry = &loaded.entry;
                println!(
                    "{}\t{}@{}\t{}\t{}",
                    loaded.file_name(),
                    entry.database,
                    entry.cluster,
                    entry.cached_at.to_rfc3339(),
                    entry.query
                );
            }
        }
    }
    Ok(())
}
