use std::io::{self, Write};
use std::path::PathBuf;

use clap::Parser;
use serde::Serialize;

use kernelci_reports::config::deadline_horizon;
use kernelci_reports::extract::EmailExtractor;
use kernelci_reports::models::NewReportRequest;

#[derive(Parser, Debug)]
#[command(
    name = "parse-report",
    about = "Show the report request extracted from announcement emails"
)]
struct Args {
    /// Raw RFC 5322 message files. Files are only read, never deleted.
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Hours added to the message date when no deadline header is present.
    #[arg(long, default_value_t = 48)]
    default_deadline_hours: i64,
}

#[derive(Serialize)]
struct Extraction<'a> {
    file: String,
    request: Option<&'a NewReportRequest>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .format_timestamp(None)
        .init();

    let args = Args::parse();
    let horizon = deadline_horizon("--default-deadline-hours", args.default_deadline_hours)?;
    let extractor = EmailExtractor::new(horizon);
    let mut stdout = io::stdout().lock();
    let mut failures = 0;

    for path in &args.files {
        let raw = match std::fs::read(path) {
            Ok(raw) => raw,
            Err(err) => {
                writeln!(io::stderr(), "error: {}: {}", path.display(), err)?;
                failures += 1;
                continue;
            }
        };

        let request = extractor.extract(&raw);
        let extraction = Extraction {
            file: path.display().to_string(),
            request: request.as_ref(),
        };
        writeln!(stdout, "{}", serde_json::to_string_pretty(&extraction)?)?;
    }

    if failures > 0 {
        std::process::exit(1);
    }
    Ok(())
}
