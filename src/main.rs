mod admission;
mod bus;
mod classify;
mod context;
mod db;
mod dedup;
mod discovery;
mod doctor;
mod embedding;
mod hook;
mod models;
mod observations;
mod pretool;
mod privacy;
mod registry;
mod research;
mod router;
mod session;
mod setup;
mod summary;
mod topic;
mod view;

use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.iter().any(|a| a == "--help" || a == "-h")
        || args.first().map(|s| s.as_str()) == Some("help")
    {
        print_help();
        return Ok(());
    }

    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("laminark {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    match args.first().map(|s| s.as_str()) {
        // The hook path must exit 0 on every outcome: the host treats a
        // non-zero exit as a hook failure and a stray stdout byte as a
        // protocol error.
        Some("hook") => {
            if let Err(e) = hook::run().await {
                eprintln!("[laminark] hook error: {e}");
            }
            Ok(())
        }
        Some("setup") => setup::run().await,
        Some("doctor") => {
            doctor::run().await;
            Ok(())
        }
        Some("view") => {
            let store = db::Store::open(&models::db_path())?;
            view::recent(&store, &view::parse_view_args(&args[1..]))
        }
        Some("search") => {
            let Some(query) = args.get(1).filter(|a| !a.starts_with("--")) else {
                eprintln!("usage: laminark search <query>");
                std::process::exit(1);
            };
            let store = db::Store::open(&models::db_path())?;
            view::search(&store, query, &view::parse_view_args(&args[2..])).await
        }
        Some("sessions") => {
            let store = db::Store::open(&models::db_path())?;
            view::sessions(&store, &view::parse_view_args(&args[1..]))
        }
        Some("stats") => {
            let store = db::Store::open(&models::db_path())?;
            view::stats(&store, &view::parse_view_args(&args[1..]))
        }
        Some("forget") => {
            let Some(id) = args.get(1) else {
                eprintln!("usage: laminark forget <observation-id>");
                std::process::exit(1);
            };
            let store = db::Store::open(&models::db_path())?;
            view::forget(&store, id)
        }
        Some(other) => {
            eprintln!("laminark: unknown command '{other}'\n");
            eprintln!("Run 'laminark help' for usage.");
            std::process::exit(1);
        }
        None => {
            if atty::is(atty::Stream::Stdin) {
                eprintln!("laminark: no command given and stdin is a terminal.");
                eprintln!("Did you mean 'laminark help'?");
                std::process::exit(1);
            }
            // Piped stdin with no subcommand: behave as the hook, so a bare
            // `laminark` line in a hook config still works.
            if let Err(e) = hook::run().await {
                eprintln!("[laminark] hook error: {e}");
            }
            Ok(())
        }
    }
}

fn print_help() {
    println!("laminark — passive memory layer for AI coding assistants\n");
    println!("Usage: laminark <command>\n");
    println!("Commands:");
    println!("  hook      Process one hook event from stdin (wired by setup)");
    println!("  setup     Register hook commands in ~/.claude/settings.json");
    println!("  doctor    Check database, hooks, and configuration health");
    println!("  view      List recent observations for the current project");
    println!("  search    Search observations (keyword, hybrid when embeddings on)");
    println!("  sessions  List sessions and stashed topics");
    println!("  stats     Tool usage and pipeline counters");
    println!("  forget    Soft-delete one observation by id prefix");
    println!("  help      Show this help\n");
    println!("Environment:");
    println!("  LAMINARK_DB         Database path (default ~/.laminark/laminark.db)");
    println!("  LAMINARK_EMBED_URL  Embedding service endpoint (optional)");
    println!("  LAMINARK_DEBUG      Verbose stderr diagnostics");
}
