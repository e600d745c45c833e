mod commands;
mod logging;
mod progress;

use anyhow::{bail, Context};
use clap::{CommandFactory, Parser};
use colored::*;
use commands::{Cli, Commands};
use dotenv::dotenv;
use glob::{MatchOptions, Pattern};
use nullout_core::config::load_configuration;
use nullout_core::{
    ConfirmationToken, Engine, FindingId, PlanStatus, ProgressReporter, ScanReport, SilentReporter,
};
use progress::CliReporter;
use serde::Serialize;
use serde_json::json;
use std::process;
use tracing::{error, info};

const SELECT_MATCH: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

fn main() {
    dotenv().ok();

    let guard = logging::init_logger();

    if let Err(err) = run(Cli::parse()) {
        error!("Error: {:#}", err);
        drop(guard);
        process::exit(1);
    }
}

fn run(args: Cli) -> anyhow::Result<()> {
    let Some(command) = args.command else {
        let _ = Cli::command().print_long_help();
        return Ok(());
    };

    let config = load_configuration().context("Error loading configuration")?;
    if let Commands::PrintConfig = command {
        println!("Configuration: {:?}", config);
        return Ok(());
    }

    let engine = Engine::from_config(&config).context("Error validating configuration")?;
    let reporter: Box<dyn ProgressReporter> = if args.json {
        Box::new(SilentReporter)
    } else {
        Box::new(CliReporter::new())
    };

    match command {
        Commands::Roots => run_roots(&engine, args.json),
        Commands::Scan { root } => run_scan(&engine, &root, reporter.as_ref(), args.json),
        Commands::Plan { root, select } => {
            run_plan(&engine, &root, &select, reporter.as_ref(), args.json)
        }
        Commands::Delete { tokens } => run_delete(&engine, &tokens, args.json),
        Commands::WhoIsUsing {
            root,
            relative_path,
        } => run_who_is_using(&engine, &root, &relative_path, args.json),
        Commands::Info => run_info(&engine, args.json),
        Commands::PrintConfig => Ok(()),
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run_roots(engine: &Engine, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(engine.list_roots());
    }
    for root in engine.list_roots() {
        println!(
            "{}  {}  {}  [reparse: {}]",
            root.id.cyan(),
            root.display_name.bold(),
            root.canonical_path,
            root.reparse_policy
        );
    }
    Ok(())
}

fn print_report(report: &ScanReport) {
    for finding in &report.findings {
        let tags: Vec<&str> = finding.hazards.iter().map(|tag| tag.code()).collect();
        println!(
            "{}  {}  {}",
            finding.id.to_string().dimmed(),
            tags.join(",").red(),
            finding.relative_path
        );
    }
    for issue in &report.issues {
        println!(
            "{}  {}  {}",
            issue.kind.code().yellow(),
            issue.path,
            issue.message
        );
    }
    info!(
        "{} visited, {} flagged, {} reparse points skipped, {} issues",
        report.stats.visited,
        format!("{}", report.stats.flagged).red(),
        report.stats.skipped_reparse_points,
        format!("{}", report.stats.issues).yellow(),
    );
}

fn run_scan(
    engine: &Engine,
    root: &str,
    reporter: &dyn ProgressReporter,
    json: bool,
) -> anyhow::Result<()> {
    let report = engine.scan(root, reporter)?;
    if json {
        return print_json(&report);
    }
    print_report(&report);
    Ok(())
}

fn selected_findings(report: &ScanReport, select: &[String]) -> anyhow::Result<Vec<FindingId>> {
    let patterns = select
        .iter()
        .map(|glob| Pattern::new(glob).with_context(|| format!("invalid --select '{glob}'")))
        .collect::<anyhow::Result<Vec<_>>>()?;

    Ok(report
        .findings
        .iter()
        .filter(|finding| {
            let candidate = finding.relative_path.replace('\\', "/");
            patterns.is_empty()
                || patterns
                    .iter()
                    .any(|p| p.matches_with(&candidate, SELECT_MATCH))
        })
        .map(|finding| finding.id)
        .collect())
}

fn run_plan(
    engine: &Engine,
    root: &str,
    select: &[String],
    reporter: &dyn ProgressReporter,
    json: bool,
) -> anyhow::Result<()> {
    let report = engine.scan(root, reporter)?;
    let ids = selected_findings(&report, select)?;
    let plan = engine.plan(&ids, reporter);
    if json {
        return print_json(&plan);
    }

    for item in &plan.items {
        let path = item
            .finding
            .as_ref()
            .map(|f| f.relative_path.as_str())
            .unwrap_or("?");
        match &item.status {
            PlanStatus::Ready { token, .. } => {
                println!("{}  {}", "READY".green(), path);
                println!("    {}", token);
            }
            PlanStatus::Failed { error, message } => {
                println!("{}  {}  {}", error.code().red(), path, message);
            }
        }
    }
    println!(
        "Tokens expire at {}",
        plan.expires_at.to_rfc3339().yellow()
    );
    Ok(())
}

fn run_delete(engine: &Engine, tokens: &[String], json: bool) -> anyhow::Result<()> {
    let mut outcomes = Vec::with_capacity(tokens.len());
    let mut failed = 0;

    for raw in tokens {
        let token: ConfirmationToken = raw.parse()?;
        match engine.delete(&token) {
            Ok(receipt) => {
                if !json {
                    println!("{}  {}", "✓".green(), receipt.relative_path);
                }
                outcomes.push(json!({ "ok": true, "receipt": receipt }));
            }
            Err(err) => {
                failed += 1;
                let next_steps = engine.next_steps(&token, &err);
                if !json {
                    println!("{}  {}  {}", "✗".red(), err.kind().code().red(), err);
                    for step in &next_steps {
                        println!(
                            "    {} nullout who-is-using {} \"{}\"  ({})",
                            "try:".yellow(),
                            step.root,
                            step.relative_path,
                            step.reason
                        );
                    }
                }
                outcomes.push(json!({
                    "ok": false,
                    "error": { "code": err.kind(), "message": err.to_string() },
                    "nextSteps": next_steps,
                }));
            }
        }
    }

    if json {
        print_json(&outcomes)?;
    }
    if failed > 0 {
        bail!("{} of {} deletions failed", failed, tokens.len());
    }
    Ok(())
}

fn run_who_is_using(
    engine: &Engine,
    root: &str,
    relative_path: &str,
    json: bool,
) -> anyhow::Result<()> {
    let users = engine.who_is_using_path(root, relative_path)?;
    if json {
        return print_json(&users);
    }
    if users.is_empty() {
        println!("No processes reported for {}", relative_path);
    }
    for user in &users {
        println!(
            "{}  {}",
            format!("{:>8}", user.process_id).cyan(),
            user.process_name
        );
    }
    Ok(())
}

fn run_info(engine: &Engine, json: bool) -> anyhow::Result<()> {
    let server = engine.server_info();
    if json {
        return print_json(&server);
    }
    println!("{} {} ({})", server.name.bold(), server.version, server.platform);
    println!("  reparse policy:      {}", server.reparse_policy);
    println!("  delete strategy:     {}", server.delete_strategy);
    println!("  token TTL:           {}s", server.token_ttl_secs);
    println!("  long path threshold: {}", server.long_path_threshold);
    println!("  roots:               {}", server.roots.len());
    Ok(())
}
