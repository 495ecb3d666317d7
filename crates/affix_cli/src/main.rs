use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use affix_core::codec;
use affix_core::core_api::{Engine, LootConfig, RuntimeConfig, Session};
use affix_core::host::{FormId, IdentityResolver};
use affix_core::slot::ItemType;
use affix_core::token::{format_instance_key, make_affix_token, make_instance_key};
use affix_render::{
    FieldSelection, JsonStyle, TextRenderOptions, TextStyle, format_token, render_json_selected,
    render_preview_json, render_text_with_options,
};
use clap::{Parser, Subcommand};
use serde_json::{Map as JsonMap, Value as JsonValue};
use tracing::{debug, info};

/// Form id the command line uses for the player container.
const PLAYER: FormId = 0x14;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about,
    args_conflicts_with_subcommands = true,
    subcommand_negates_reqs = true
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
    #[arg(value_name = "STREAM", required = true)]
    path: Option<PathBuf>,
    /// Runtime config document with loot settings and the affix catalog.
    #[arg(long, value_name = "config.json")]
    catalog: Option<PathBuf>,
    #[arg(long)]
    json: bool,
    #[arg(long)]
    slots: bool,
    #[arg(long)]
    runtime: bool,
    #[arg(long)]
    evaluated: bool,
    #[arg(long)]
    crafting: bool,
    #[arg(long)]
    bags: bool,
    #[arg(long)]
    layout: bool,
    /// Remove affix tokens the catalog does not define.
    #[arg(long = "strip-unknown", requires = "catalog")]
    strip_unknown: bool,
    /// Write the loaded state back out in the current record layout.
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the token of an affix id.
    Token {
        id: String,
        #[arg(long)]
        json: bool,
    },
    /// Print the deterministic roll for one instance.
    Preview {
        #[arg(long, value_name = "config.json")]
        catalog: PathBuf,
        #[arg(long, value_parser = parse_form_id)]
        base: FormId,
        #[arg(long)]
        unique: u16,
        #[arg(long = "item-type", value_parser = parse_item_type)]
        item_type: ItemType,
        #[arg(long, value_parser = parse_salt)]
        salt: Option<u64>,
        #[arg(long)]
        json: bool,
        #[arg(short, long)]
        verbose: bool,
    },
}

impl Cli {
    fn field_selection(&self) -> FieldSelection {
        FieldSelection {
            slots: self.slots,
            runtime: self.runtime,
            evaluated: self.evaluated,
            crafting: self.crafting,
            bags: self.bags,
            layout: self.layout,
        }
    }
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Some(Command::Token { ref id, json }) => run_token(id, json),
        Some(Command::Preview {
            ref catalog,
            base,
            unique,
            item_type,
            salt,
            json,
            verbose,
        }) => {
            setup_tracing(verbose);
            run_preview(catalog, base, unique, item_type, salt, json);
        }
        None => {
            setup_tracing(cli.verbose);
            run_inspect(&cli);
        }
    }
}

fn setup_tracing(verbose: bool) {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(if verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::WARN
        })
        .with_target(false)
        .init();
}

fn load_engine(path: Option<&Path>) -> Engine {
    let Some(path) = path else {
        return Engine::new(LootConfig::default());
    };
    let text = fs::read_to_string(path).unwrap_or_else(|e| {
        eprintln!("Error reading {}: {e}", path.display());
        process::exit(1);
    });
    let config: RuntimeConfig = serde_json::from_str(&text).unwrap_or_else(|e| {
        eprintln!("Error parsing runtime config: {}", path.display());
        eprintln!("  {}", e);
        process::exit(1);
    });
    debug!(
        affixes = config.affixes.len(),
        runewords = config.runewords.len(),
        "runtime config parsed"
    );
    Engine::from_runtime_config(config)
}

fn run_inspect(cli: &Cli) {
    let Some(path) = cli.path.as_deref() else {
        eprintln!("a record stream path is required");
        process::exit(2);
    };

    let engine = load_engine(cli.catalog.as_deref());
    let mut session = engine
        .open_path(path, &IdentityResolver, PLAYER)
        .unwrap_or_else(|e| {
            eprintln!("Error loading record stream: {}", path.display());
            eprintln!("  {}", e);
            process::exit(1);
        });

    if cli.strip_unknown {
        let removed = session.strip_unknown_affixes().unwrap_or_else(|e| {
            eprintln!("Error removing unknown affixes: {e}");
            process::exit(1);
        });
        info!(removed, "unknown affix tokens removed");
    }

    if let Some(out_path) = &cli.output {
        write_stream(&session, out_path);
    }

    let mut fields = cli.field_selection();
    if cli.json {
        if !fields.is_any_selected() {
            fields = FieldSelection {
                slots: true,
                runtime: true,
                evaluated: true,
                crafting: true,
                bags: true,
                layout: true,
            };
        }
        print_json(&render_json_selected(&session, &fields, JsonStyle::CanonicalV1));
    } else {
        let options = TextRenderOptions {
            verbose: cli.verbose || fields.runtime || fields.bags,
        };
        print!(
            "{}",
            render_text_with_options(&session, TextStyle::Ledger, options)
        );
    }

    if session.last_load_report().is_some_and(|r| r.is_corrupted()) {
        process::exit(3);
    }
}

fn write_stream(session: &Session, out_path: &Path) {
    let bytes = codec::save_stream(session.store(), session.bags());
    fs::write(out_path, &bytes).unwrap_or_else(|e| {
        eprintln!("Error writing {}: {e}", out_path.display());
        process::exit(1);
    });
    info!(path = %out_path.display(), bytes = bytes.len(), "record stream written");
}

fn run_token(id: &str, json: bool) {
    let id = id.trim();
    if id.is_empty() {
        eprintln!("affix id must not be empty");
        process::exit(2);
    }
    let token = make_affix_token(id);
    if json {
        let mut m = JsonMap::new();
        m.insert("id".to_string(), JsonValue::String(id.to_string()));
        m.insert("token".to_string(), JsonValue::String(format_token(token)));
        print_json(&JsonValue::Object(m));
    } else {
        println!("{}", format_token(token));
    }
}

fn run_preview(
    catalog: &Path,
    base: FormId,
    unique: u16,
    item_type: ItemType,
    salt: Option<u64>,
    json: bool,
) {
    if base == 0 || unique == 0 {
        eprintln!("--base and --unique must be non-zero");
        process::exit(2);
    }
    let engine = load_engine(Some(catalog));
    let session = engine.open_session(PLAYER);
    let key = make_instance_key(base, unique);
    let slots = session.preview(key, item_type, salt).unwrap_or_else(|e| {
        eprintln!("Error previewing {}: {e}", format_instance_key(key));
        process::exit(1);
    });

    if json {
        print_json(&render_preview_json(&session, key, &slots));
        return;
    }
    println!("{} ({})", format_instance_key(key), item_type);
    if slots.is_empty() {
        println!("  (no affixes)");
    }
    let catalog = session.catalog();
    for token in slots.iter() {
        let name = catalog
            .and_then(|c| c.by_token(token))
            .map_or_else(|| format_token(token), |a| a.id.clone());
        println!("  {name}");
    }
}

fn print_json(value: &JsonValue) {
    let text = serde_json::to_string_pretty(value).unwrap_or_else(|e| {
        eprintln!("Error rendering JSON output: {e}");
        process::exit(1);
    });
    println!("{text}");
}

fn parse_hex(value: &str) -> Result<u64, String> {
    let digits = value
        .trim()
        .trim_start_matches("0x")
        .trim_start_matches("0X");
    u64::from_str_radix(digits, 16).map_err(|e| format!("invalid hex value '{value}': {e}"))
}

fn parse_form_id(value: &str) -> Result<FormId, String> {
    let raw = parse_hex(value)?;
    FormId::try_from(raw).map_err(|_| format!("form id '{value}' does not fit in 32 bits"))
}

fn parse_salt(value: &str) -> Result<u64, String> {
    parse_hex(value)
}

fn parse_item_type(value: &str) -> Result<ItemType, String> {
    ItemType::parse(value).ok_or_else(|| format!("expected weapon or armor, got '{value}'"))
}
