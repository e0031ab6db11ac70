// ABOUTME: Entry point for the berth CLI application.
// ABOUTME: Parses arguments and dispatches to appropriate command handlers.

mod cli;

use berth::app::{self, Selector};
use berth::context::HostContext;
use berth::deploy;
use berth::error::Result;
use berth::repo::HttpProbe;
use berth::report::align_columns;
use berth::tx::{Transaction, store};
use clap::Parser;
use cli::{AppCommands, Cli, Commands, SelectorArgs, TxCommands};
use std::collections::BTreeMap;
use std::env;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing subscriber based on verbose flag
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    match run(cli).await {
        Ok(rc) => std::process::exit(rc),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<i32> {
    let ctx = match &cli.config {
        Some(path) => HostContext::load(path)?,
        None => {
            let cwd = env::current_dir().expect("Failed to get current directory");
            HostContext::discover(&cwd)?
        }
    };

    match cli.command {
        Commands::App { command } => run_app(&ctx, command).await,
        Commands::Tx { command } => run_tx(&ctx, command).await,
    }
}

fn selector(args: &SelectorArgs) -> Selector {
    Selector {
        regex: args.app_regex.clone(),
        all: args.all,
        bootstart: args.bootstart,
    }
}

async fn run_app(ctx: &HostContext, command: AppCommands) -> Result<i32> {
    match command {
        AppCommands::Ls {
            selector: args,
            details,
            json,
        } => {
            app::ops::ls(ctx, &selector(&args), details, json)?;
            Ok(0)
        }
        AppCommands::Status {
            selector: args,
            json,
        } => {
            app::ops::status(ctx, &selector(&args), json)?;
            Ok(0)
        }
        AppCommands::Start {
            selector: args,
            iknow,
        } => app::ops::start(ctx, &selector(&args), iknow).await,
        AppCommands::Stop {
            selector: args,
            iknow,
        } => app::ops::stop(ctx, &selector(&args), iknow).await,
        AppCommands::Restart {
            selector: args,
            iknow,
        } => app::ops::restart(ctx, &selector(&args), iknow).await,
        AppCommands::Check {
            selector: args,
            details,
        } => {
            let probe = HttpProbe::new(&ctx.probe)?;
            app::ops::check(ctx, &selector(&args), &probe, details).await
        }
        AppCommands::Rm { name } => {
            deploy::rm_app(ctx, &name)?;
            Ok(0)
        }
    }
}

async fn run_tx(ctx: &HostContext, command: TxCommands) -> Result<i32> {
    match command {
        TxCommands::Ls { app_regex, json } => {
            let summaries = store::summaries(ctx, &app_regex)?;
            if json {
                let map: BTreeMap<&str, &store::TxSummary> =
                    summaries.iter().map(|s| (s.id.as_str(), s)).collect();
                println!("{}", serde_json::to_string_pretty(&map)?);
            } else {
                let mut rows = vec![
                    ["ID", "APP", "VERSION", "TYPE", "TIME", "SIZE"]
                        .map(String::from)
                        .to_vec(),
                ];
                for s in &summaries {
                    rows.push(vec![
                        s.id.clone(),
                        s.app_name.clone(),
                        s.app_version.clone(),
                        s.tx_type.clone(),
                        s.create_time.clone(),
                        s.size.to_string(),
                    ]);
                }
                for line in align_columns(&rows) {
                    println!("{line}");
                }
            }
            Ok(0)
        }
        TxCommands::Info { txid, json } => {
            match Transaction::load(ctx, &txid) {
                Ok(tx) => {
                    if json {
                        let map = BTreeMap::from([(txid.as_str(), tx.meta())]);
                        println!("{}", serde_json::to_string_pretty(&map)?);
                    } else {
                        println!("{}:", tx.id());
                        for (key, value) in tx.meta() {
                            println!("    {key} : {value}");
                        }
                    }
                }
                // an unloadable transaction is reported, not fatal
                Err(e) => {
                    if json {
                        let map = BTreeMap::from([(txid.as_str(), e.to_string())]);
                        println!("{}", serde_json::to_string_pretty(&map)?);
                    } else {
                        println!("{txid} ({e})");
                    }
                }
            }
            Ok(0)
        }
        TxCommands::Deploy {
            appname_or_txid,
            iknow,
        } => deploy::deploy(ctx, &appname_or_txid, iknow).await,
        TxCommands::Rm { specifiers } => {
            deploy::rm_transactions(ctx, &specifiers)?;
            Ok(0)
        }
        TxCommands::Diff { txid_1, txid_2 } => {
            for line in deploy::diff(ctx, &txid_1, txid_2.as_deref())? {
                println!("{line}");
            }
            Ok(0)
        }
    }
}
