//! Memoria CLI
//!
//! Command-line interface for the local-first knowledge memory engine.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use colored::Colorize;

use memoria_core::{
    AddInput, CancellationToken, Engine, EngineError, Filters, ResetLayer, ResetScope, SortOrder,
};

/// Memoria - local-first knowledge memory engine
#[derive(Parser)]
#[command(name = "memoria")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "CLI for the Memoria knowledge memory engine")]
struct Cli {
    /// Data directory override (otherwise SLM_HOME, then the platform default)
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Insert a note
    #[command(alias = "remember")]
    Add {
        content: String,
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,
        #[arg(long)]
        project: Option<String>,
        #[arg(long)]
        importance: Option<i32>,
        #[arg(long)]
        parent: Option<i64>,
        #[arg(long)]
        category: Option<String>,
    },

    /// Ranked hybrid search
    #[command(alias = "recall")]
    Search {
        query: String,
        #[arg(long, default_value_t = 10)]
        limit: i64,
        #[arg(long, default_value_t = 0.0)]
        min_score: f64,
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,
        #[arg(long)]
        project: Option<String>,
        /// Show full content instead of a truncated preview
        #[arg(long)]
        full: bool,
    },

    /// Scroll notes in the active profile
    #[command(alias = "recent")]
    List {
        #[arg(long, default_value_t = 20)]
        limit: i64,
        #[arg(long, default_value = "recent")]
        sort: String,
    },

    /// Fetch one note in full
    Get { id: i64 },

    /// Counts, profile, DB size, last build/backup timestamps
    Status,

    /// Rebuild the similarity graph for the active profile
    BuildGraph {
        /// Rebuild even if the corpus has not changed since the last build
        #[arg(long)]
        force: bool,
    },

    /// Cluster count, depth, edge density
    GraphStats,

    /// Members and summary of one cluster
    Cluster { id: i64 },

    /// Graph neighbors of a note
    Related {
        #[arg(value_name = "memory-id")]
        memory_id: i64,
    },

    /// Identity pattern management
    #[command(subcommand)]
    Patterns(PatternsCommand),

    /// Profile management
    #[command(subcommand)]
    Profile(ProfileCommand),

    /// Snapshot the database
    Backup {
        #[arg(long)]
        path: Option<PathBuf>,
    },

    /// Clear memories / everything / selected layers
    Reset {
        #[command(subcommand)]
        scope: ResetCommand,
    },
}

#[derive(Subcommand)]
enum PatternsCommand {
    /// Identity patterns at or above a confidence threshold
    List {
        #[arg(default_value_t = 0.5)]
        threshold: f64,
    },
    /// Recompute patterns from the current corpus
    Update,
    /// Pin a correction onto a learned pattern
    Correct { id: i64, value: String },
    /// Structured, prompt-ready context block
    Context {
        #[arg(default_value_t = 0.5)]
        threshold: f64,
    },
}

#[derive(Subcommand)]
enum ProfileCommand {
    List,
    Create {
        name: String,
        #[arg(long)]
        description: Option<String>,
    },
    Switch { name: String },
    Delete { name: String },
    Current,
}

#[derive(Subcommand)]
enum ResetCommand {
    Soft {
        #[arg(long)]
        confirm: bool,
    },
    Hard {
        #[arg(long)]
        confirm: bool,
    },
    Layer {
        /// `graph` or `patterns`
        layer: String,
        #[arg(long)]
        confirm: bool,
    },
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // clap's own usage/help errors; exit 1 per the usage exit code (§6).
            let _ = err.print();
            return ExitCode::from(1);
        }
    };

    let engine = match Engine::open(cli.home.clone()) {
        Ok(engine) => engine,
        Err(err) => return fail(&err),
    };

    match run(&engine, cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => fail(&err),
    }
}

fn fail(err: &EngineError) -> ExitCode {
    eprintln!("{} {}", "error:".red().bold(), err);
    ExitCode::from(err.exit_code() as u8)
}

fn run(engine: &Engine, command: Commands) -> Result<(), EngineError> {
    match command {
        Commands::Add { content, tags, project, importance, parent, category } => {
            run_add(engine, content, tags, project, importance, parent, category)
        }
        Commands::Search { query, limit, min_score, tags, project, full } => {
            run_search(engine, query, limit, min_score, tags, project, full)
        }
        Commands::List { limit, sort } => run_list(engine, limit, sort),
        Commands::Get { id } => run_get(engine, id),
        Commands::Status => run_status(engine),
        Commands::BuildGraph { force: _ } => run_build_graph(engine),
        Commands::GraphStats => run_graph_stats(engine),
        Commands::Cluster { id } => run_cluster(engine, id),
        Commands::Related { memory_id } => run_related(engine, memory_id),
        Commands::Patterns(cmd) => run_patterns(engine, cmd),
        Commands::Profile(cmd) => run_profile(engine, cmd),
        Commands::Backup { path } => run_backup(engine, path),
        Commands::Reset { scope } => run_reset(engine, scope),
    }
}

fn parse_sort(sort: &str) -> Result<SortOrder, EngineError> {
    match sort {
        "recent" => Ok(SortOrder::Recent),
        "accessed" => Ok(SortOrder::Accessed),
        "importance" => Ok(SortOrder::Importance),
        other => Err(EngineError::Validation(format!("unknown sort order {other:?}"))),
    }
}

fn run_add(
    engine: &Engine,
    content: String,
    tags: Vec<String>,
    project: Option<String>,
    importance: Option<i32>,
    parent: Option<i64>,
    category: Option<String>,
) -> Result<(), EngineError> {
    let note = engine.add(AddInput {
        content,
        tags,
        project_name: project,
        project_path: None,
        importance,
        category,
        parent_id: parent,
        memory_type: None,
    })?;
    println!("{}", note.id);
    Ok(())
}

fn run_search(
    engine: &Engine,
    query: String,
    limit: i64,
    min_score: f64,
    tags: Vec<String>,
    project: Option<String>,
    full: bool,
) -> Result<(), EngineError> {
    let filters = Filters { tags, project, category: None, min_importance: None };
    let hits = engine.search(&query, limit, min_score, filters)?;
    if hits.is_empty() {
        println!("{}", "No matches.".dimmed());
        return Ok(());
    }
    for hit in hits {
        let preview = preview(&hit.note.content, full);
        println!(
            "{} {:>6.3}  {}",
            format!("#{}", hit.note.id).cyan().bold(),
            hit.score,
            preview
        );
    }
    Ok(())
}

fn run_list(engine: &Engine, limit: i64, sort: String) -> Result<(), EngineError> {
    let sort = parse_sort(&sort)?;
    let notes = engine.list(sort, limit, 0)?;
    if notes.is_empty() {
        println!("{}", "No notes yet.".dimmed());
        return Ok(());
    }
    for note in notes {
        println!(
            "{} {}  {}",
            format!("#{}", note.id).cyan().bold(),
            note.created_at.format("%Y-%m-%d %H:%M"),
            preview(&note.content, false)
        );
    }
    Ok(())
}

fn run_get(engine: &Engine, id: i64) -> Result<(), EngineError> {
    let note = engine.get(id)?;
    println!("{}: {}", "id".white().bold(), note.id);
    println!("{}: {}", "tier".white().bold(), note.tier.as_str());
    if !note.tags.is_empty() {
        println!("{}: {}", "tags".white().bold(), note.tags.join(", "));
    }
    if let Some(project) = &note.project_name {
        println!("{}: {}", "project".white().bold(), project);
    }
    if let Some(category) = &note.category {
        println!("{}: {}", "category".white().bold(), category);
    }
    println!("{}: {}", "importance".white().bold(), note.importance);
    println!("{}: {}", "created".white().bold(), note.created_at.to_rfc3339());
    println!();
    println!("{}", note.content);
    Ok(())
}

fn run_status(engine: &Engine) -> Result<(), EngineError> {
    let status = engine.status()?;
    println!("{}", "=== Memoria Status ===".cyan().bold());
    println!("{}: {}", "Profile".white().bold(), status.active_profile);
    println!("{}: {}", "Total Notes".white().bold(), status.storage.total_notes);
    println!(
        "{}: {:.1} KiB",
        "Database Size".white().bold(),
        status.storage.db_size_bytes as f64 / 1024.0
    );
    match status.storage.last_backup {
        Some(ts) => println!("{}: {}", "Last Backup".white().bold(), ts.to_rfc3339()),
        None => println!("{}: {}", "Last Backup".white().bold(), "never".dimmed()),
    }
    match status.last_graph_build {
        Some(ts) => println!("{}: {}", "Last Graph Build".white().bold(), ts.to_rfc3339()),
        None => println!("{}: {}", "Last Graph Build".white().bold(), "never".dimmed()),
    }
    Ok(())
}

fn run_build_graph(engine: &Engine) -> Result<(), EngineError> {
    let stats = engine.build_graph(&CancellationToken::new())?;
    println!(
        "{} {} nodes, {} edges, {} clusters (depth {})",
        "Graph rebuilt:".green().bold(),
        stats.node_count,
        stats.edge_count,
        stats.cluster_count,
        stats.max_depth
    );
    if !stats.used_community_detection {
        println!(
            "{}",
            "note: fell back to connected-components clustering".yellow()
        );
    }
    Ok(())
}

fn run_graph_stats(engine: &Engine) -> Result<(), EngineError> {
    let stats = engine.graph_stats()?;
    println!("{}: {}", "Nodes".white().bold(), stats.node_count);
    println!("{}: {}", "Edges".white().bold(), stats.edge_count);
    println!("{}: {}", "Clusters".white().bold(), stats.cluster_count);
    println!("{}: {}", "Max Depth".white().bold(), stats.max_depth);
    println!("{}: {:.4}", "Edge Density".white().bold(), stats.edge_density);
    Ok(())
}

fn run_cluster(engine: &Engine, id: i64) -> Result<(), EngineError> {
    let (cluster, members) = engine.cluster(id)?;
    println!("{}: {}", "Cluster".white().bold(), cluster.cluster_name);
    println!("{}: {}", "Description".white().bold(), cluster.description);
    println!("{}: {}", "Members".white().bold(), cluster.memory_count);
    println!("{}: {:.2}", "Avg Importance".white().bold(), cluster.avg_importance);
    if !cluster.top_entities.is_empty() {
        println!("{}: {}", "Top Entities".white().bold(), cluster.top_entities.join(", "));
    }
    println!();
    println!("{}", cluster.summary);
    println!();
    println!(
        "{}: {}",
        "Member ids".white().bold(),
        members.iter().map(i64::to_string).collect::<Vec<_>>().join(", ")
    );
    Ok(())
}

fn run_related(engine: &Engine, memory_id: i64) -> Result<(), EngineError> {
    let edges = engine.related(memory_id)?;
    if edges.is_empty() {
        println!("{}", "No graph neighbors.".dimmed());
        return Ok(());
    }
    for edge in edges {
        let other = if edge.source_memory_id == memory_id {
            edge.target_memory_id
        } else {
            edge.source_memory_id
        };
        println!(
            "{} {:>6.3}  {}",
            format!("#{other}").cyan().bold(),
            edge.similarity,
            edge.relationship_type
        );
    }
    Ok(())
}

fn run_patterns(engine: &Engine, cmd: PatternsCommand) -> Result<(), EngineError> {
    match cmd {
        PatternsCommand::List { threshold } => {
            let context = engine.get_identity_context(threshold)?;
            if context.patterns.is_empty() {
                println!("{}", "No patterns above threshold.".dimmed());
                return Ok(());
            }
            for pattern in context.patterns {
                let pin = if pattern.pinned { " [pinned]".yellow().to_string() } else { String::new() };
                println!(
                    "{}: {} ({:.2} confidence, seen {}x){pin}",
                    pattern.pattern_type.cyan(),
                    pattern.pattern_value.bold(),
                    pattern.confidence,
                    pattern.frequency
                );
            }
            Ok(())
        }
        PatternsCommand::Update => {
            let patterns = engine.learn_patterns()?;
            println!("{} {} patterns learned", "Patterns updated:".green().bold(), patterns.len());
            Ok(())
        }
        PatternsCommand::Correct { id, value } => {
            let pattern = engine.correct_pattern(id, &value)?;
            println!(
                "{} {} -> {}",
                "Pinned:".green().bold(),
                pattern.pattern_type,
                pattern.pattern_value
            );
            Ok(())
        }
        PatternsCommand::Context { threshold } => {
            let context = engine.get_identity_context(threshold)?;
            for line in context.summary_lines {
                println!("{line}");
            }
            Ok(())
        }
    }
}

fn run_profile(engine: &Engine, cmd: ProfileCommand) -> Result<(), EngineError> {
    match cmd {
        ProfileCommand::List => {
            let profiles = engine.list_profiles()?;
            for summary in profiles {
                let marker = if summary.info.active { "*".green().bold().to_string() } else { " ".to_string() };
                println!("{marker} {}", summary.info.name.bold());
            }
            Ok(())
        }
        ProfileCommand::Create { name, description } => {
            let info = engine.create_profile(&name, description.as_deref())?;
            println!("{} {}", "Created profile:".green().bold(), info.name);
            Ok(())
        }
        ProfileCommand::Switch { name } => {
            engine.switch_profile(&name)?;
            println!("{} {}", "Switched to:".green().bold(), name);
            Ok(())
        }
        ProfileCommand::Delete { name } => {
            engine.delete_profile(&name)?;
            println!("{} {}", "Deleted profile:".green().bold(), name);
            Ok(())
        }
        ProfileCommand::Current => {
            println!("{}", engine.current_profile()?);
            Ok(())
        }
    }
}

fn run_backup(engine: &Engine, path: Option<PathBuf>) -> Result<(), EngineError> {
    let target = engine.backup(path)?;
    println!("{} {}", "Backup written:".green().bold(), target.display());
    Ok(())
}

fn run_reset(engine: &Engine, scope: ResetCommand) -> Result<(), EngineError> {
    let (confirm, resolved) = match scope {
        ResetCommand::Soft { confirm } => (confirm, ResetScope::Soft),
        ResetCommand::Hard { confirm } => (confirm, ResetScope::Hard),
        ResetCommand::Layer { layer, confirm } => {
            let layer = match layer.as_str() {
                "graph" => ResetLayer::Graph,
                "patterns" => ResetLayer::Patterns,
                other => {
                    return Err(EngineError::Validation(format!("unknown reset layer {other:?}")))
                }
            };
            (confirm, ResetScope::Layer(layer))
        }
    };
    if !confirm {
        println!(
            "{}",
            "Refusing to reset without --confirm. This always snapshots first but still clears data."
                .yellow()
        );
        return Ok(());
    }
    let report = engine.reset(resolved)?;
    println!(
        "{} {} notes cleared, graph cleared: {}, patterns cleared: {}",
        "Reset complete:".green().bold(),
        report.notes_cleared,
        report.graph_cleared,
        report.patterns_cleared
    );
    Ok(())
}

fn preview(content: &str, full: bool) -> String {
    if full || content.chars().count() <= 80 {
        content.to_string()
    } else {
        let truncated: String = content.chars().take(80).collect();
        format!("{truncated}...")
    }
}
