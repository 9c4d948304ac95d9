//! lid-migrate: one-time resolver of anonymized @lid JIDs in a WhatsApp
//! bridge message store.
//!
//! Loads the LID-to-phone-number mapping from the whatsmeow database, then
//! rewrites every mapped @lid reference in the bridge's messages database:
//! chat jids (renaming in place, or merging when the target chat already
//! exists) and message senders (suffixed and bare forms). All rewrites run
//! inside a single transaction committed at the end of the run.

use std::path::PathBuf;

use clap::Parser;

use lid_migrate::logging;
use lid_migrate::mapping::{self, LID_SUFFIX};
use lid_migrate::mlog;
use lid_migrate::reconcile::{reconcile, ChatOutcome, ReconcileReport};
use lid_migrate::store::{MessageStore, StoreError};

/// One-time migration for a WhatsApp bridge: resolves @lid JIDs in the
/// bridge's messages.db using the whatsmeow lid map from whatsapp.db.
#[derive(Parser, Debug)]
#[command(name = "lid-migrate", version, about)]
struct Cli {
    /// Directory holding whatsapp.db and messages.db
    #[arg(long, short = 's', default_value = "store")]
    store_dir: PathBuf,
}

struct Config {
    whatsmeow_db: PathBuf,
    messages_db: PathBuf,
}

impl Config {
    fn from_cli(cli: Cli) -> Self {
        Self {
            whatsmeow_db: cli.store_dir.join("whatsapp.db"),
            messages_db: cli.store_dir.join("messages.db"),
        }
    }
}

fn main() {
    logging::init();
    if let Err(error) = run() {
        eprintln!("error: {error}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), StoreError> {
    let config = Config::from_cli(Cli::parse());

    // Both stores must exist before any database handle is opened.
    for path in [&config.whatsmeow_db, &config.messages_db] {
        if !path.exists() {
            return Err(StoreError::NotFound(path.display().to_string()));
        }
    }

    mlog!("authoritative store: {}", config.whatsmeow_db.display());
    let lid_map = mapping::load_lid_map(&config.whatsmeow_db)?;
    println!("Loaded {} LID→phone mappings", lid_map.len());

    mlog!("message store: {}", config.messages_db.display());
    let store = MessageStore::open(&config.messages_db)?;
    let report = reconcile(&store, &lid_map)?;
    print_report(&report);
    Ok(())
}

fn print_report(report: &ReconcileReport) {
    println!("\nChats with {LID_SUFFIX} JID: {}", report.chats_found);
    for outcome in &report.outcomes {
        match outcome {
            ChatOutcome::Merged {
                old_jid,
                new_jid,
                duplicates_removed,
                messages_moved,
            } => println!(
                "  MERGED: {} → {} ({duplicates_removed} dupes removed, {messages_moved} moved)",
                logging::jid(old_jid),
                logging::jid(new_jid),
            ),
            ChatOutcome::Renamed { old_jid, new_jid } => println!(
                "  RENAMED: {} → {}",
                logging::jid(old_jid),
                logging::jid(new_jid),
            ),
            ChatOutcome::NoMapping { jid } => {
                println!("  NO MAPPING: {}", logging::jid(jid));
            }
        }
    }
    println!(
        "Chats updated: {}/{}",
        report.chats_updated(),
        report.chats_found
    );

    println!(
        "\nDistinct senders with full {LID_SUFFIX} JID: {}",
        report.suffixed_senders_found
    );
    println!(
        "Full {LID_SUFFIX} senders updated: {}/{}",
        report.suffixed_senders_updated, report.suffixed_senders_found
    );
    println!("Bare LID user senders updated: {}", report.bare_senders_updated);

    println!(
        "\nMigration complete. Total: {} chats, {} sender values updated.",
        report.chats_updated(),
        report.senders_updated()
    );
}
