//! Fold a stats mbox into threads and print how each one classified,
//! without counting anything or touching the sheets.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use support_stats::config::Config;
use support_stats::confirm::{Confirmer, CountMode};
use support_stats::mail::{
    Folded, LabelClassifier, MailSource, MboxSource, Normalizer, ThreadBook, ThreadRules,
};
use support_stats::pipeline::open_store;
use support_stats::stats::Roster;

#[derive(Parser)]
#[command(name = "thread_report", about = "Show how each thread of an mbox classifies")]
struct Cli {
    mbox: PathBuf,

    /// Count internal threads instead of skipping them
    #[arg(short, long)]
    all: bool,

    /// Read labels from the test workbook
    #[arg(short, long)]
    test: bool,

    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("loading config")?;
    let normalizer = Normalizer::new(&config.org);

    let store = open_store(&config, cli.test).context("opening workbook")?;
    let (roster, registry) =
        Roster::load(&store, config.sheets_for(cli.test), normalizer.offset())?;
    let classifier = LabelClassifier::new(registry.header_labels(), roster.member_names());
    let rules = ThreadRules::new(&config.org, classifier);

    let mode = if cli.all { CountMode::CountAll } else { CountMode::CountNone };
    let mut confirmer = Confirmer::unattended(mode);

    println!("Scanning...");
    let raw = MboxSource::open(&cli.mbox)?.messages()?;
    let mut book = ThreadBook::new();
    let mut ignored = 0;
    for record in &raw {
        if book.fold(&normalizer.normalize(record), &rules, &mut confirmer)? == Folded::Ignored {
            ignored += 1;
        }
    }

    println!("Total messages: {}", raw.len());
    println!("  Ignored (spam or ideas box): {}", ignored);
    println!("Threads: {}", book.len());

    let counted = book.threads().iter().filter(|t| t.good).count();
    let open = book.threads().iter().filter(|t| t.good && !t.closed).count();
    let non_pings = book.threads().iter().filter(|t| t.good && t.non_ping()).count();
    println!("  Counted: {}", counted);
    println!("  Non-pings: {}", non_pings);
    println!("  Open: {}", open);

    println!("\nBy most recent member contact:");
    for thread in book.by_recent_contact() {
        let subject: String = thread.subject.chars().take(50).collect();
        let mut flags = Vec::new();
        if !thread.good {
            flags.push("not counted");
        }
        if !thread.closed {
            flags.push("open");
        }
        if thread.web_form {
            flags.push("web form");
        }
        println!(
            "  {:>20} {:4} msgs  {:<40} {} [{}]",
            thread.id,
            thread.message_count,
            thread.kind(),
            subject,
            flags.join(", ")
        );
    }
    Ok(())
}
