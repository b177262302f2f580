use clap::{Parser, Subcommand};
use std::path::PathBuf;
use ulog::csv::{export_all, CsvOptions, ExportOutcome};
use ulog::metadata::level_name;
use ulog::{ReaderOptions, TextDecoding, ULog};

#[derive(Parser)]
#[command(name = "ulog", about = "Decode, inspect and rewrite ULog flight logs")]
struct Cli {
    /// Log decoder diagnostics at debug level (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Fail records with invalid UTF-8 instead of substituting U+FFFD
    #[arg(long, global = true)]
    strict_text: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show header, flags, info entries and message statistics
    Info {
        input: PathBuf,
        /// Emit a JSON summary instead of text
        #[arg(long)]
        json: bool,
        /// Read only the definitions section
        #[arg(long)]
        header_only: bool,
    },
    /// Export every message to <prefix>_<name>_<multi>.csv
    Csv {
        input: PathBuf,
        /// Output prefix; defaults to the input path without extension
        #[arg(short, long)]
        output: Option<String>,
        /// Only these messages (repeatable)
        #[arg(short, long)]
        messages: Vec<String>,
        #[arg(short, long, default_value = ",")]
        delimiter: char,
        /// Window start, seconds of log time
        #[arg(long)]
        start: Option<u64>,
        /// Window end, seconds of log time (exclusive)
        #[arg(long)]
        end: Option<u64>,
    },
    /// Decode and re-encode a log
    Rewrite {
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Print logged text messages
    Messages {
        input: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut opts = ReaderOptions {
        text: if cli.strict_text { TextDecoding::Strict } else { TextDecoding::Lenient },
        ..ReaderOptions::default()
    };

    match cli.command {

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { input, json, header_only } => {
            opts.header_only = header_only;
            let log = ULog::open(&input, &opts)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&log.summary())?);
                return Ok(());
            }

            println!("── ULog ─────────────────────────────────────────────────");
            println!("  Path           {}", input.display());
            println!("  Version        {}", log.version());
            println!("  Start          {} us", log.start_timestamp());
            println!("  Last sample    {} us", log.last_timestamp);
            println!("  Compat flags   {}", hex::encode(log.flags.compat_flags));
            println!("  Incompat flags {}", hex::encode(log.flags.incompat_flags));
            println!("  Corrupt        {}", log.file_corrupt);
            if !log.recovery.is_clean() {
                println!("  Damage         {}", log.recovery.summary());
            }
            if let Some(v) = log.version_info_str("ver_sw_release") {
                println!("  Software       {v}");
            }
            println!("  Info ({}):", log.metadata.info.len());
            for (key, v) in &log.metadata.info {
                println!("    {:<28} {}", key, serde_json::to_string(&v.value)?);
            }
            println!("  Parameters     {}", log.metadata.initial_parameters.len());
            println!("  Dropouts       {}", log.metadata.dropouts.len());
            println!("{:<40} {:>5} {:>6} {:>9}", "Message", "Multi", "Id", "Samples");
            for ds in &log.datasets {
                println!("{:<40} {:>5} {:>6} {:>9}", ds.message_name, ds.multi_id, ds.msg_id, ds.len());
            }
        }

        // ── Csv ──────────────────────────────────────────────────────────────
        Commands::Csv { input, output, messages, delimiter, start, end } => {
            if !messages.is_empty() {
                opts.message_filter = Some(messages);
            }
            let log = ULog::open(&input, &opts)?;
            let prefix = output.unwrap_or_else(|| input.with_extension("").to_string_lossy().into_owned());
            let csv_opts = CsvOptions { delimiter, start_s: start, end_s: end };
            for outcome in export_all(&log.datasets, &prefix, &csv_opts)? {
                match outcome {
                    ExportOutcome::Written { path, rows } => println!("  wrote    {} ({rows} rows)", path.display()),
                    ExportOutcome::Skipped { path, reason } => println!("  skipped  {} ({reason})", path.display()),
                }
            }
        }

        // ── Rewrite ──────────────────────────────────────────────────────────
        Commands::Rewrite { input, output } => {
            let log = ULog::open(&input, &opts)?;
            if log.file_corrupt {
                eprintln!("warning: input is damaged ({}); output holds what was recovered",
                          log.recovery.summary());
            }
            log.write_file(&output)?;
            println!("Rewritten → {}", output.display());
        }

        // ── Messages ─────────────────────────────────────────────────────────
        Commands::Messages { input } => {
            let log = ULog::open(&input, &opts)?;
            for m in &log.metadata.logged_messages {
                println!("{:>14.6} {:<9} {}", m.timestamp as f64 / 1e6, m.level_name(), m.message);
            }
            for m in log.metadata.iter_tagged_messages() {
                println!("{:>14.6} {:<9} [{}] {}", m.timestamp as f64 / 1e6, level_name(m.level), m.tag, m.message);
            }
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}
