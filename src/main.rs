//! src/main.rs

use anyhow::Result;
use std::{ env, path::{ Path, PathBuf }, sync::Arc };

mod logger;
use logger::Logger;

use crate::logger::LogLevel;

mod decode;
mod dsp;
mod integrity;
mod params;
mod phases;
mod pipeline;
mod report;

// runners for each --mode live in src/mods/
mod mods;

pub const DEFAULT_WORKING_SR: u32 = 22_050;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Analyze,
    Verify,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReportFormat {
    Json,
    Markdown,
}

impl ReportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ReportFormat::Json => "json",
            ReportFormat::Markdown => "md",
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub mode: Mode,
    pub inputs: Vec<PathBuf>,
    pub output_dir: PathBuf,
    pub formats: Vec<ReportFormat>,
    pub summary_csv: Option<PathBuf>,
    pub report_path: Option<PathBuf>,
    pub params_path: Option<PathBuf>,
    pub working_sr: u32,
    pub jobs: usize,
    // None writes the default analyst into custody records
    pub analyst_id: Option<String>,

    // None disables the file sink
    pub log_path: Option<PathBuf>,
    pub log_level: LogLevel,
    pub quiet: bool,

    pub pipeline_version: String,
}

impl Default for Config {
    fn default() -> Self {
        let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let jobs = std::thread
            ::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            mode: Mode::Analyze,
            inputs: Vec::new(),
            output_dir: cwd.join("reports"),
            formats: vec![ReportFormat::Json, ReportFormat::Markdown],
            summary_csv: None,
            report_path: None,
            params_path: None,
            working_sr: DEFAULT_WORKING_SR,
            jobs,
            analyst_id: None,
            log_path: Some(cwd.join("Analysis.log")),
            log_level: LogLevel::Info,
            quiet: false,
            pipeline_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

fn print_usage(cfg: &Config) {
    println!("Usage: voice-coherence [OPTIONS]\n");
    println!("Modes:");
    println!("  --mode analyze        (default) Analyze audio files and write signed reports");
    println!("  --mode verify         Re-check the hash of a saved JSON report\n");

    println!("Analyze options:");
    println!("  -i, --input <PATH>            Audio file to analyze (repeatable)");
    println!(
        "  -o, --output-dir <DIR>        Directory for reports (default: {})",
        cfg.output_dir.display()
    );
    println!("  --formats <LIST>              Comma list of json, md (default: json,md)");
    println!("  --summary-csv <PATH>          Append one summary row per file to this CSV");
    println!("  --params <PATH>               JSON file overriding analysis thresholds");
    println!(
        "  --working-sr <HZ>             Analysis sample rate (default: {})",
        cfg.working_sr
    );
    println!("  -j, --jobs <N>                Files analyzed in parallel (default: {})", cfg.jobs);
    println!("  --analyst-id <TEXT>           Analyst named in custody records (default: AUTOMATED)");
    println!(
        "  --pipeline-version <TEXT>     Version string written into the verification block (default: {})",
        cfg.pipeline_version
    );
    println!();

    println!("Verify options:");
    println!("  --report <PATH>               Saved JSON report to check");
    println!("  -i, --input <PATH>            Optional: the audio file, to re-check its hashes\n");

    println!("Logging:");
    println!(
        "  --log-path <PATH|none>        Log file (default: {})",
        cfg.log_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "none".into())
    );
    println!(
        "  --log-level <LEVEL>           Log level: debug, info, warning, error (default: info)"
    );
    println!("  -q, --quiet                   Do not echo log lines to stderr");
    println!("  -h, --help                    Show this help");
}

fn parse_formats(list: &str) -> std::result::Result<Vec<ReportFormat>, String> {
    let mut formats = Vec::new();
    for item in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let f = match item.to_lowercase().as_str() {
            "json" => ReportFormat::Json,
            "md" | "markdown" => ReportFormat::Markdown,
            other => {
                return Err(format!("Unknown report format: {}. Valid options: json, md", other));
            }
        };
        if !formats.contains(&f) {
            formats.push(f);
        }
    }
    if formats.is_empty() {
        return Err("--formats needs at least one of json, md".to_string());
    }
    Ok(formats)
}

fn parse_arguments() -> std::result::Result<Config, String> {
    let args: Vec<String> = env::args().skip(1).collect();
    parse_argument_list(&args)
}

fn flag_value<'a>(args: &'a [String], i: usize, flag: &str) -> std::result::Result<&'a str, String> {
    args.get(i + 1)
        .map(String::as_str)
        .ok_or_else(|| format!("Missing value for {}", flag))
}

fn parse_argument_list(args: &[String]) -> std::result::Result<Config, String> {
    let mut config = Config::default();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--mode" => {
                match flag_value(args, i, "--mode")?.to_lowercase().as_str() {
                    "analyze" | "analyse" => {
                        config.mode = Mode::Analyze;
                    }
                    "verify" => {
                        config.mode = Mode::Verify;
                    }
                    other => {
                        return Err(format!("Unknown mode: {}", other));
                    }
                }
                i += 2;
            }
            "-i" | "--input" => {
                config.inputs.push(PathBuf::from(flag_value(args, i, "--input")?));
                i += 2;
            }
            "-o" | "--output-dir" => {
                config.output_dir = PathBuf::from(flag_value(args, i, "--output-dir")?);
                i += 2;
            }
            "--formats" => {
                config.formats = parse_formats(flag_value(args, i, "--formats")?)?;
                i += 2;
            }
            "--summary-csv" => {
                config.summary_csv = Some(PathBuf::from(flag_value(args, i, "--summary-csv")?));
                i += 2;
            }
            "--report" => {
                config.report_path = Some(PathBuf::from(flag_value(args, i, "--report")?));
                i += 2;
            }
            "--params" => {
                config.params_path = Some(PathBuf::from(flag_value(args, i, "--params")?));
                i += 2;
            }
            "--working-sr" => {
                let v: u32 = flag_value(args, i, "--working-sr")?
                    .parse()
                    .map_err(|_| "Invalid working-sr value".to_string())?;
                if v < 8_000 {
                    return Err("--working-sr must be at least 8000".to_string());
                }
                config.working_sr = v;
                i += 2;
            }
            "-j" | "--jobs" => {
                let v: usize = flag_value(args, i, "--jobs")?
                    .parse()
                    .map_err(|_| "Invalid jobs value".to_string())?;
                config.jobs = v.max(1);
                i += 2;
            }
            "--log-path" => {
                let v = flag_value(args, i, "--log-path")?;
                config.log_path = if v.eq_ignore_ascii_case("none") {
                    None
                } else {
                    Some(PathBuf::from(v))
                };
                i += 2;
            }
            "--log-level" => {
                let v = flag_value(args, i, "--log-level")?;
                config.log_level = LogLevel::parse(v).ok_or_else(||
                    format!("Invalid log level: {}. Valid options: debug, info, warning, error", v)
                )?;
                i += 2;
            }
            "-q" | "--quiet" => {
                config.quiet = true;
                i += 1;
            }
            "--analyst-id" => {
                config.analyst_id = Some(flag_value(args, i, "--analyst-id")?.to_string());
                i += 2;
            }
            "--pipeline-version" => {
                config.pipeline_version = flag_value(args, i, "--pipeline-version")?.to_string();
                i += 2;
            }
            "-h" | "--help" => {
                print_usage(&config);
                std::process::exit(0);
            }
            other => {
                return Err(format!("Unknown argument: {}", other));
            }
        }
    }

    match config.mode {
        Mode::Analyze if config.inputs.is_empty() => {
            return Err("--mode analyze needs at least one --input".to_string());
        }
        Mode::Verify if config.report_path.is_none() => {
            return Err("--mode verify needs --report".to_string());
        }
        Mode::Verify if config.inputs.len() > 1 => {
            return Err("--mode verify takes at most one --input".to_string());
        }
        _ => {}
    }
    Ok(config)
}

fn main() -> Result<()> {
    let cli = match parse_arguments() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {}\n", e);
            print_usage(&Config::default());
            std::process::exit(2);
        }
    };

    let logger = Arc::new(
        Logger::new(cli.log_path.as_deref().map(Path::new), !cli.quiet, cli.log_level)?
    );

    match cli.mode {
        Mode::Analyze => mods::analyze::run_analyze(&cli, logger),
        Mode::Verify => mods::verify::run_verify(&cli, logger),
    }
}
