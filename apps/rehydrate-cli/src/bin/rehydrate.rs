use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use rehydrate_cli::{build_store, default_embedder, init_tracing, load_corpus, load_snapshot};
use rehydrate_core::config::{RehydrateOptions, RequestOverrides};
use rehydrate_embed::counter_from_path;
use rehydrate_engine::Rehydrator;

const USAGE: &str = "Usage:\n  rehydrate query <corpus.jsonl> <role> \"<query>\" [key=value ...]\n  rehydrate config";

fn parse_args() -> (String, Vec<String>) {
    let mut args: Vec<String> = env::args().skip(1).collect();
    if args.is_empty() { eprintln!("{}", USAGE); std::process::exit(1); }
    let cmd = args.remove(0);
    (cmd, args)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let options = RehydrateOptions::load().map_err(|e| { eprintln!("Error loading config: {}", e); e })?;
    let (cmd, args) = parse_args();
    match cmd.as_str() {
        "config" => {
            println!("{}", serde_json::to_string_pretty(&options.validate()?)?);
        }
        "query" => {
            let [corpus, role, query, rest @ ..] = args.as_slice() else {
                eprintln!("{}", USAGE);
                std::process::exit(1)
            };
            let overrides = RequestOverrides::from_pairs(rest.iter().map(|p| RequestOverrides::parse_pair(p)).collect::<Result<Vec<_>, _>>()?)?;

            let chunks = load_corpus(&PathBuf::from(corpus))?;
            let snapshot_path = env::var_os("REHYDRATE_SNAPSHOT").map(PathBuf::from);
            let snapshot = load_snapshot(snapshot_path.as_deref(), &chunks)?;
            let embedder = default_embedder();
            let store = build_store(chunks, embedder.clone()).await?;
            let counter = counter_from_path(options.tokenizer_path().as_deref())?;

            let engine = Rehydrator::builder(Arc::new(store)).embedder(embedder).token_counter(counter).snapshot(snapshot).options(options).build()?;
            let bundle = engine.rehydrate(role, query, &overrides).await?;
            if bundle.degraded {
                tracing::warn!(reason = bundle.degraded_reason.as_deref().unwrap_or(""), "bundle is degraded");
            }
            println!("{}", serde_json::to_string_pretty(&bundle)?);
        }
        _ => { eprintln!("Unknown command: {}\n{}", cmd, USAGE); std::process::exit(1); }
    }
    Ok(())
}
