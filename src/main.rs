use std::env;

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use todo_tracker::cli::Cli;
use todo_tracker::cmd::*;
use todo_tracker::config::Config;

/// Log to stderr. `TODO_LOG` takes an `EnvFilter` directive; `DEBUG` turns on
/// debug output for this crate; `TODO_LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let fallback = if env::var_os("DEBUG").is_some() {
        "todo_tracker=debug,info"
    } else {
        "todo_tracker=info,warn"
    };
    let filter = EnvFilter::try_from_env("TODO_LOG").unwrap_or_else(|_| EnvFilter::new(fallback));
    let registry = tracing_subscriber::registry().with(filter);

    match env::var("TODO_LOG_FORMAT").as_deref() {
        Ok("json") => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        _ => registry
            .with(fmt::layer().compact().with_target(false).with_writer(std::io::stderr))
            .init(),
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let open = || -> anyhow::Result<App> {
        let config = Config::resolve(cli.config.as_deref(), cli.data_dir.as_deref())?;
        tracing::debug!(data_dir = %config.data_dir.display(), key = %config.storage_key, "opening store");
        Ok(App::open(config))
    };

    match cli.command {
        Commands::Completions { shell } => {
            cmd_completions(shell);
            Ok(())
        }
        Commands::Add {
            text,
            priority,
            category,
            due,
            tags,
        } => cmd_add(&open()?, text, priority, category, due, tags),
        Commands::List {
            filter,
            search,
            tags,
            sort,
            limit,
            json,
        } => cmd_list(&open()?, filter, search, tags, sort, limit, json),
        Commands::Edit {
            id,
            text,
            priority,
            category,
            clear_category,
            due,
            clear_due,
            add_tags,
            rm_tags,
        } => cmd_edit(
            &open()?,
            id,
            text,
            priority,
            category,
            clear_category,
            due,
            clear_due,
            add_tags,
            rm_tags,
        ),
        Commands::Toggle { id } => cmd_toggle(&open()?, id),
        Commands::Priority { id, level } => cmd_priority(&open()?, id, level),
        Commands::Delete { id } => cmd_delete(&open()?, id),
        Commands::Clear { all, yes } => cmd_clear(&open()?, all, yes),
        Commands::Stats { json } => cmd_stats(&open()?, json),
        Commands::Tags => cmd_tags(&open()?),
        Commands::Calendar { month, date } => cmd_calendar(&open()?, month, date),
        Commands::Export { format, output_dir } => cmd_export(&open()?, format, output_dir),
        Commands::Import {
            input,
            yes,
            no_backup,
        } => cmd_import(&open()?, input, yes, no_backup).await,
        Commands::Watch => cmd_watch(&open()?).await,
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
