use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;

use acses_pilot::cli::{AssignIdsArgs, CheckArgs, Cli, Commands, RunArgs, StatusArgs};
use acses_pilot::config::{self, AppConfig};
use acses_pilot::error::AppError;
use acses_pilot::ingestion::{
    assign_sample_ids, load_codebook, load_samples, load_template, resolve_dataset_path,
};
use acses_pilot::paths::AppPaths;
use acses_pilot::services::{
    CheckItem, GeminiGenerator, HaltReason, PilotRunner, PreflightReport, RemoteCallExecutor,
    ResultLedger, RunConfig, RunReport, api_key_from_env, check_connectivity, check_inputs,
    normalize_model_id,
};
use acses_pilot::shutdown::spawn_shutdown_watch;
use tokio::sync::watch;
use tracing_subscriber::{filter::LevelFilter, fmt};

/// Exit status after Ctrl+C / SIGTERM (128 + SIGINT).
const EXIT_INTERRUPTED: i32 = 130;
/// Exit status when the quota breaker tripped; rerun later to resume.
const EXIT_QUOTA: i32 = 75;

const RESUME_HINT: &str = "rerun the same command to resume from the first incomplete run";

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let log_level = determine_log_level(&cli);
    init_tracing(log_level);

    match run(cli).await {
        Ok(code) if code != 0 => process::exit(code),
        Ok(_) => {}
        Err(err) => {
            eprintln!("error: {err}");
            process::exit(1);
        }
    }
}

fn init_tracing(level: LevelFilter) {
    let subscriber = fmt().with_max_level(level).with_target(false).finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        tracing::warn!("Tracing subscriber already set; skipping re-initialization.");
    }
}

fn determine_log_level(cli: &Cli) -> LevelFilter {
    match cli.command {
        Some(Commands::Run(_)) | Some(Commands::AssignIds(_)) => match cli.verbose {
            0 => LevelFilter::INFO,
            1 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        },
        Some(Commands::Models) | Some(Commands::Status(_)) | Some(Commands::Check(_)) | None => {
            match cli.verbose {
                0 => LevelFilter::WARN,
                1 => LevelFilter::INFO,
                2 => LevelFilter::DEBUG,
                _ => LevelFilter::TRACE,
            }
        }
    }
}

async fn run(cli: Cli) -> Result<i32, AppError> {
    match cli.command {
        Some(Commands::Run(args)) => run_pilot(args).await,
        Some(Commands::Models) => {
            run_models()?;
            Ok(0)
        }
        Some(Commands::Status(args)) => {
            run_status(args).await?;
            Ok(0)
        }
        Some(Commands::AssignIds(args)) => {
            run_assign_ids(args)?;
            Ok(0)
        }
        Some(Commands::Check(args)) => run_check(args).await,
        None => {
            Cli::print_help();
            Ok(0)
        }
    }
}

async fn run_pilot(args: RunArgs) -> Result<i32, AppError> {
    let mut cfg = config::load()?;
    apply_run_overrides(&mut cfg, &args);
    let cfg = cfg.validate()?;

    let paths = cfg.app_paths()?;
    let dataset_path = resolve_input(&paths.input_dir(), &cfg.pilot.dataset);
    let dataset_name = file_name(&dataset_path);
    let models = selected_models(&cfg, &args);
    let ledgers: Vec<PathBuf> = models
        .iter()
        .map(|model| paths.results_path(model, &dataset_name))
        .collect();
    let inputs = PilotInputs {
        dataset: dataset_path,
        codebook: args.codebook.clone().unwrap_or_else(|| paths.codebook_path()),
        template: args.template.clone().unwrap_or_else(|| paths.template_path()),
    };

    match execute_pilot(&cfg, &paths, &inputs, &models).await {
        Ok(code) => Ok(code),
        Err(err) => {
            print_failure_summary(&err, &ledgers);
            Err(err)
        }
    }
}

struct PilotInputs {
    dataset: PathBuf,
    codebook: PathBuf,
    template: PathBuf,
}

/// Models named on the command line, else the configured one; normalized and
/// deduplicated in order.
fn selected_models(cfg: &AppConfig, args: &RunArgs) -> Vec<String> {
    let raw: Vec<&str> = if args.models.is_empty() {
        vec![cfg.pilot.model.as_str()]
    } else {
        args.models.iter().map(String::as_str).collect()
    };
    let mut models: Vec<String> = Vec::with_capacity(raw.len());
    for model in raw.into_iter().filter(|m| !m.trim().is_empty()) {
        let model = normalize_model_id(model);
        if !models.contains(&model) {
            models.push(model);
        }
    }
    models
}

async fn execute_pilot(
    cfg: &AppConfig,
    paths: &AppPaths,
    inputs: &PilotInputs,
    models: &[String],
) -> Result<i32, AppError> {
    let dataset = load_samples(&inputs.dataset)?;
    let dataset_name = file_name(&dataset.path);
    let codebook = load_codebook(&inputs.codebook)?;
    let template = load_template(&inputs.template)?;
    let api_key = api_key_from_env()?;
    paths.ensure_results_dir()?;

    let registry = cfg.model_registry();
    let shutdown = spawn_shutdown_watch();
    let mut reports = Vec::with_capacity(models.len());
    for (position, model) in models.iter().enumerate() {
        if position > 0 && cool_down(cfg.model_cooldown(), shutdown.clone()).await {
            tracing::warn!(event = "comparison_interrupted", next_model = %model, "interrupted during cool-down");
            return Ok(EXIT_INTERRUPTED);
        }

        let tier = registry.tier_for(model).clone();
        if !registry.is_known(model) {
            tracing::warn!(
                event = "unknown_model_tier",
                model = %model,
                rpm = tier.requests_per_minute,
                "model not in registry; using default tier"
            );
        }

        let generator = GeminiGenerator::new(
            api_key.clone(),
            model.clone(),
            &cfg.gemini.base_url,
            cfg.request_timeout(),
        )?
        .with_limiter(tier.limiter());
        let executor = RemoteCallExecutor::new(
            Arc::new(generator),
            cfg.generation_params(),
            cfg.retry_policy(),
            tier.delay(),
        );
        let ledger = ResultLedger::new(paths.results_path(model, &dataset_name));
        let run_config = RunConfig::builder()
            .n_runs(cfg.pilot.n_runs)
            .passes(cfg.pilot.passes)
            .pacing(tier.delay())
            .dataset_name(dataset_name.clone())
            .build();

        tracing::info!(
            event = "pilot_configured",
            model = %model,
            tier = %tier.description,
            rpm = tier.requests_per_minute,
            delay_ms = tier.delay().as_millis() as u64,
            temperature = cfg.pilot.temperature,
            dataset = %dataset.path.display(),
            samples = dataset.samples.len(),
            codebook_entries = codebook.len(),
            ledger = %ledger.path().display(),
            "pilot configured"
        );

        let runner = PilotRunner::new(executor, ledger, run_config).with_shutdown(shutdown.clone());
        let report = runner.run(&dataset.samples, &codebook, &template).await?;
        print_run_summary(&report);
        let interrupted = report.halt == Some(HaltReason::Interrupted);
        reports.push(report);
        if interrupted {
            break;
        }
    }

    if models.len() > 1 {
        print_comparison(&reports);
    }
    Ok(exit_code(&reports))
}

/// Sleep between models; `true` when shutdown was requested meanwhile.
async fn cool_down(pause: Duration, mut shutdown: watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return true;
    }
    tracing::info!(event = "model_cooldown", secs = pause.as_secs(), "cooling down before next model");
    tokio::select! {
        _ = tokio::time::sleep(pause) => false,
        changed = async { shutdown.wait_for(|stop| *stop).await.map(|_| ()) } => match changed {
            Ok(_) => true,
            Err(_) => {
                tokio::time::sleep(pause).await;
                false
            }
        },
    }
}

/// Interruption outranks a quota halt, which outranks completion.
fn exit_code(reports: &[RunReport]) -> i32 {
    let halted = |reason: HaltReason| reports.iter().any(|report| report.halt == Some(reason));
    if halted(HaltReason::Interrupted) {
        EXIT_INTERRUPTED
    } else if halted(HaltReason::QuotaExhausted) {
        EXIT_QUOTA
    } else {
        0
    }
}

fn apply_run_overrides(cfg: &mut AppConfig, args: &RunArgs) {
    if let Some(model) = &args.model {
        cfg.pilot.model = model.clone();
    }
    if let Some(dataset) = &args.dataset {
        cfg.pilot.dataset = dataset.clone();
    }
    if let Some(runs) = args.runs {
        cfg.pilot.n_runs = runs;
    }
    if let Some(temperature) = args.temperature {
        cfg.pilot.temperature = temperature;
    }
    if let Some(passes) = args.passes {
        cfg.pilot.passes = passes;
    }
    if let Some(max_retries) = args.max_retries {
        cfg.pilot.max_retries = max_retries;
    }
    if let Some(secs) = args.cooldown_secs {
        cfg.pilot.model_cooldown_secs = secs;
    }
    if let Some(root) = &args.project_root {
        cfg.paths.project_root = Some(root.clone());
    }
    if let Some(dir) = &args.output_dir {
        cfg.paths.output_dir = Some(dir.clone());
    }
}

fn print_run_summary(report: &RunReport) {
    println!();
    match report.halt {
        None if report.is_complete() => println!("pilot run complete"),
        None => println!("pilot run finished with outstanding runs"),
        Some(HaltReason::QuotaExhausted) => println!("pilot run halted: API quota exhausted"),
        Some(HaltReason::Interrupted) => println!("pilot run interrupted"),
    }
    println!("  model:              {}", report.model_name);
    println!(
        "  samples processed:  {} of {} ({} skipped, no codebook entry)",
        report.samples_processed, report.samples_total, report.samples_skipped
    );
    println!(
        "  new results:        {} ({} ok, {} failed)",
        report.new_records(),
        report.new_successes,
        report.new_failures
    );
    if report.append_failures > 0 {
        println!("  unsaved results:    {}", report.append_failures);
    }
    println!("  total results:      {}", report.total_records);
    println!(
        "  completed runs:     {}/{}",
        report.completed_runs, report.expected_runs
    );
    println!("  success rate:       {:.1}%", report.success_rate * 100.0);
    println!("  ledger:             {}", report.ledger_path.display());
    if !report.is_complete() {
        println!("  {RESUME_HINT}");
    }
}

fn print_failure_summary(err: &AppError, ledgers: &[PathBuf]) {
    println!();
    print!("{}", failure_summary(err, ledgers));
}

fn failure_summary(err: &AppError, ledgers: &[PathBuf]) -> String {
    let mut out = format!("pilot run failed: {err}\n");
    for ledger in ledgers {
        out.push_str(&format!("  ledger:             {}\n", ledger.display()));
    }
    out.push_str(&format!("  results already written are kept; {RESUME_HINT}\n"));
    out
}

fn print_comparison(reports: &[RunReport]) {
    println!();
    println!("model comparison");
    println!(
        "  {:<40} {:>11} {:>7} {:>7} {:>8}  status",
        "model", "completed", "ok", "failed", "success"
    );
    for report in reports {
        let status = match report.halt {
            None if report.is_complete() => "complete",
            None => "outstanding",
            Some(HaltReason::QuotaExhausted) => "quota exhausted",
            Some(HaltReason::Interrupted) => "interrupted",
        };
        println!(
            "  {:<40} {:>11} {:>7} {:>7} {:>7.1}%  {status}",
            report.model_name,
            format!("{}/{}", report.completed_runs, report.expected_runs),
            report.new_successes,
            report.new_failures,
            report.success_rate * 100.0
        );
    }
}

fn run_models() -> Result<(), AppError> {
    let cfg = config::load()?;
    let registry = cfg.model_registry();
    let default_model = normalize_model_id(&cfg.pilot.model);
    println!("{:<40} {:>5} {:>9}  description", "model", "rpm", "delay");
    for tier in registry.tiers() {
        let marker = if tier.id == default_model { "*" } else { " " };
        println!(
            "{marker}{:<39} {:>5} {:>8.1}s  {}",
            tier.id,
            tier.requests_per_minute,
            tier.delay().as_secs_f64(),
            tier.description
        );
    }
    if !registry.is_known(&default_model) {
        let tier = registry.tier_for(&default_model);
        println!(
            "*{:<39} {:>5} {:>8.1}s  {}",
            default_model,
            tier.requests_per_minute,
            tier.delay().as_secs_f64(),
            tier.description
        );
    }
    Ok(())
}

async fn run_status(args: StatusArgs) -> Result<(), AppError> {
    let cfg = config::load()?;
    let path = match args.ledger {
        Some(path) => path,
        None => {
            let paths = cfg.app_paths()?;
            let model = normalize_model_id(args.model.as_deref().unwrap_or(&cfg.pilot.model));
            let dataset = args.dataset.as_deref().unwrap_or(&cfg.pilot.dataset);
            let resolved = resolve_input(&paths.input_dir(), dataset);
            paths.results_path(&model, &file_name(&resolved))
        }
    };
    if !path.is_file() {
        return Err(AppError::MissingLedger(path));
    }

    let stats = ResultLedger::new(&path).stats().await?;
    println!("ledger: {}", path.display());
    println!("  lines:            {}", stats.total_lines);
    println!("  valid records:    {}", stats.valid_records);
    println!("  invalid lines:    {}", stats.invalid_lines);
    println!("  empty lines:      {}", stats.empty_lines);
    println!("  successful:       {}", stats.successes);
    println!("  failed:           {}", stats.failures);
    println!("  unique samples:   {}", stats.unique_samples);
    match args.runs {
        Some(runs) => println!(
            "  completed runs:   {} (target {} per sample)",
            stats.completed_pairs, runs
        ),
        None => println!("  completed runs:   {}", stats.completed_pairs),
    }
    println!("  success rate:     {:.1}%", stats.success_rate() * 100.0);
    for (line, message) in &stats.parse_errors {
        println!("  line {line}: {message}");
    }
    Ok(())
}

async fn run_check(args: CheckArgs) -> Result<i32, AppError> {
    let mut cfg = config::load()?;
    if let Some(model) = args.model {
        cfg.pilot.model = model;
    }
    if let Some(dataset) = args.dataset {
        cfg.pilot.dataset = dataset;
    }
    if let Some(root) = args.project_root {
        cfg.paths.project_root = Some(root);
    }
    let paths = cfg.app_paths()?;
    let dataset = resolve_input(&paths.input_dir(), &cfg.pilot.dataset);

    let mut report = PreflightReport::default();
    report.extend(check_inputs(&dataset, &paths.codebook_path(), &paths.template_path()));
    match api_key_from_env() {
        Ok(_) if args.offline => {
            report.push(CheckItem::pass("api key", "found in environment"));
            report.push(CheckItem::warn("api", "skipped (--offline)"));
        }
        Ok(api_key) => {
            report.push(CheckItem::pass("api key", "found in environment"));
            let model = normalize_model_id(&cfg.pilot.model);
            let generator =
                GeminiGenerator::new(api_key, model, &cfg.gemini.base_url, cfg.request_timeout())?;
            report.push(check_connectivity(&generator, &cfg.generation_params()).await);
        }
        Err(err) => report.push(CheckItem::fail("api key", err.to_string())),
    }

    for item in &report.items {
        println!("[{:<4}] {:<9} {}", item.status, item.name, item.detail);
    }
    if report.passed() {
        println!("setup looks ready");
        Ok(0)
    } else {
        println!("setup has failing checks");
        Ok(1)
    }
}

fn run_assign_ids(args: AssignIdsArgs) -> Result<(), AppError> {
    let cfg = config::load()?;
    let paths = cfg.app_paths()?;
    let direct = PathBuf::from(&args.dataset);
    let input = if direct.is_file() {
        direct
    } else {
        paths.input_dir().join(&args.dataset)
    };
    let report = assign_sample_ids(&input, args.force)?;
    println!("wrote {} rows to {}", report.rows, report.output.display());
    Ok(())
}

/// A dataset argument that names an existing file is used as-is; otherwise it
/// is resolved under the input directory.
fn resolve_input(input_dir: &Path, dataset: &str) -> PathBuf {
    let direct = Path::new(dataset);
    if direct.is_file() && direct.components().count() > 1 {
        return direct.to_path_buf();
    }
    resolve_dataset_path(input_dir, dataset)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
