mod calculator;
mod case;
mod cli;
mod config;
mod design;
mod display;
mod error;
mod installer;
mod io;
mod logging;
mod model;
mod prelude;
mod scheduler;
mod table;
mod template;
mod value;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use clap::Parser;

use calculator::pool::CalculatorPool;
use calculator::CalculatorSpec;
use case::runner::CancellationToken;
use cli::{Cli, Commands, OutputFormat};
use config::RunConfig;
use display::SpinnerContainer;
use error::Error;
use model::Model;
use prelude::*;
use value::VarValue;

const GITHUB_ORG: &str = "Funz";
const GITHUB_PREFIX: &str = "fz-";

fn main() -> miette::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.resolve_log_level());
    let config = RunConfig::from_env();
    let project_root = std::env::current_dir().into_diagnostic()?;
    let cancel = scheduler::install_interrupt_handler()?;

    if let Err(err) = dispatch(&cli, &config, &project_root, &cancel) {
        tracing::error!("{err:?}");
        std::process::exit(1);
    }
    Ok(())
}

fn dispatch(cli: &Cli, config: &RunConfig, project_root: &Path, cancel: &CancellationToken) -> AppResult<()> {
    match &cli.command {
        Commands::Input(args) => run_input(args, project_root),
        Commands::Compile(args) => run_compile(args, project_root),
        Commands::Output(args) => run_output(args, project_root, cli.format),
        Commands::Run(args) => run_run(args, project_root, config, cancel, cli.format, cli.no_animate),
        Commands::Design(args) => run_design_cmd(args, project_root, config, cancel, cli.no_animate),
        Commands::List(args) => run_list(args),
        Commands::Install(args) => run_install(args),
        Commands::Uninstall(args) => run_uninstall(args),
    }
}

fn run_input(args: &cli::InputArgs, project_root: &Path) -> AppResult<()> {
    let model = Model::resolve(&args.model, project_root)?;
    let names = case::prepare::discover(Path::new(&args.input), &model)?;
    for name in names {
        println!("{name}");
    }
    Ok(())
}

fn parse_variable_assignment(json: &str) -> AppResult<Vec<(String, VarValue)>> {
    let value: serde_json::Value = serde_json::from_str(json).into_diagnostic().wrap_err("parsing -v/--variables")?;
    let serde_json::Value::Object(map) = value else {
        bail!("-v/--variables must be a JSON object mapping variable name to scalar or list");
    };

    map.into_iter()
        .map(|(name, v)| {
            VarValue::from_json(&v)
                .map(|parsed| (name.clone(), parsed))
                .ok_or_else(|| miette!("variable '{name}' has an unsupported value shape"))
        })
        .collect()
}

fn run_compile(args: &cli::CompileArgs, project_root: &Path) -> AppResult<()> {
    let model = Model::resolve(&args.model, project_root)?;
    let assignment = parse_variable_assignment(&args.variables)?;
    let results_dir = resolve_results_dir(args.output.as_deref(), project_root);

    let guard = case::guard::ensure_unique(&results_dir)?;
    let cases = case::prepare::enumerate_cases(&assignment, &guard.path);

    for case in &cases {
        std::fs::create_dir_all(&case.case_dir).into_diagnostic()?;
        case::prepare::materialize_case(Path::new(&args.input), case, &model)?;
        case::hash::create_hash_file(&case.case_dir)?;
    }

    println!("compiled {} case(s) under {}", cases.len(), guard.path.display());
    Ok(())
}

fn run_output(args: &cli::OutputArgs, project_root: &Path, format: OutputFormat) -> AppResult<()> {
    let _ = project_root;
    let model = Model::resolve(&args.model, project_root)?;
    let dirs = discover_case_dirs(&args.output)?;

    let promoted = table::promote_directory_names(&dirs);
    let mut records = Vec::with_capacity(dirs.len());

    for (index, dir) in dirs.iter().enumerate() {
        let bindings = match &promoted {
            Some(rows) => rows[index]
                .iter()
                .map(|(k, v)| (k.clone(), value_from_promoted(v)))
                .collect(),
            None => Vec::new(),
        };

        let outputs = parse_outputs_for_display(&model, dir)?;
        records.push(case::runner::CaseResultRecord {
            index,
            path: dir.clone(),
            bindings,
            calculator: None,
            status: case::CaseStatus::Done,
            error: None,
            command: None,
            outputs,
        });
    }

    render_and_print(&table::assemble(&records), format);
    Ok(())
}

fn value_from_promoted(raw: &str) -> value::ScalarValue {
    match table::cast_promoted_value(raw) {
        serde_json::Value::Number(n) if n.is_i64() => value::ScalarValue::Int(n.as_i64().unwrap()),
        serde_json::Value::Number(n) => value::ScalarValue::Float(n.as_f64().unwrap_or_default()),
        serde_json::Value::Bool(b) => value::ScalarValue::Bool(b),
        other => value::ScalarValue::Str(other.as_str().map(str::to_owned).unwrap_or_else(|| raw.to_owned())),
    }
}

fn discover_case_dirs(spec: &str) -> AppResult<Vec<PathBuf>> {
    let direct = Path::new(spec);
    if direct.is_dir() {
        return Ok(vec![direct.to_path_buf()]);
    }

    let mut dirs: Vec<PathBuf> = glob::glob(spec)
        .into_diagnostic()
        .wrap_err("evaluating -o/--output glob")?
        .filter_map(Result::ok)
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();
    Ok(dirs)
}

fn parse_outputs_for_display(
    model: &Model,
    case_dir: &Path,
) -> AppResult<std::collections::HashMap<String, serde_json::Value>> {
    let mut outputs = std::collections::HashMap::new();
    for (name, command) in model.output_commands() {
        let result = std::process::Command::new("sh").arg("-c").arg(&command).current_dir(case_dir).output();
        let Ok(output) = result else { continue };
        let stdout = String::from_utf8_lossy(&output.stdout);
        if let Some(value) = template::cast_output(&stdout) {
            outputs.insert(name, value);
        }
    }
    Ok(outputs)
}

fn resolve_results_dir(requested: Option<&str>, project_root: &Path) -> PathBuf {
    match requested {
        Some(dir) => PathBuf::from(dir),
        None => project_root.join("results"),
    }
}

fn build_pool(calculators: &[String], project_root: &Path, model_id: Option<&str>) -> AppResult<Arc<CalculatorPool>> {
    let uris: Vec<String> = if calculators.is_empty() {
        vec!["sh://".to_owned()]
    } else {
        calculators.to_vec()
    };

    let specs: Vec<CalculatorSpec> = uris
        .iter()
        .map(|spec| CalculatorSpec::resolve(spec, project_root, model_id))
        .collect::<AppResult<Vec<_>>>()?;

    Ok(Arc::new(CalculatorPool::new(specs)?))
}

fn run_run(
    args: &cli::RunArgs,
    project_root: &Path,
    config: &RunConfig,
    cancel: &CancellationToken,
    format: OutputFormat,
    no_animate: bool,
) -> AppResult<()> {
    if args.ttl_minutes > 0 {
        if let Some(table) = memoized_run_table(args)? {
            render_and_print(&table, format);
            return Ok(());
        }
    }

    let model = Model::resolve(&args.model, project_root)?;
    let assignment = parse_variable_assignment(&args.variables)?;
    let results_dir = resolve_results_dir(args.results_dir.as_deref(), project_root);

    let guard = case::guard::ensure_unique(&results_dir)?;
    let mut calculator_uris = args.calculators.clone();
    case::guard::rewrite_self_cache_uris(&mut calculator_uris, &guard);

    let pool = build_pool(&calculator_uris, project_root, model.id().as_deref())?;
    let cases = case::prepare::enumerate_cases(&assignment, &guard.path);

    for case in &cases {
        std::fs::create_dir_all(&case.case_dir).into_diagnostic()?;
        case::prepare::materialize_case(Path::new(&args.input), case, &model)?;
        case::hash::create_hash_file(&case.case_dir)?;
    }

    let spinner = Arc::new(Mutex::new(SpinnerContainer::new().create_spinner_unless_no_terminal_or(no_animate)));
    let callbacks = scheduler::Callbacks {
        on_start: None,
        on_case_start: None,
        on_case_complete: None,
        on_progress: Some(progress_callback(spinner.clone())),
        on_complete: None,
    };

    let records = scheduler::run_all(cases, &model, pool, config, cancel, &callbacks);
    spinner
        .lock()
        .expect("spinner mutex poisoned")
        .stop_with_message(&format!("{} case(s) complete", records.len()));

    let table = table::assemble(&records);
    if args.ttl_minutes > 0 {
        store_memoized_run_table(args, &table)?;
    }
    render_and_print(&table, format);
    Ok(())
}

/// Hashes `args` the same way the teacher hashes its CLI invocation
/// (`create_args_signature`/`generate_cache_filename`) to key a memoized
/// result table under `~/.fz/cache/run_<hash>.json`.
fn run_args_cache_path(args: &cli::RunArgs) -> AppResult<PathBuf> {
    let serialized = serde_json::to_string(args).into_diagnostic().wrap_err("serializing run arguments")?;

    use std::hash::Hasher;
    let mut hasher = twox_hash::XxHash64::default();
    hasher.write(serialized.as_bytes());
    let signature = format!("{:x}", hasher.finish());

    let dir = dirs::cache_dir().ok_or_else(|| miette!("could not find a cache directory"))?.join("fz");
    Ok(dir.join(format!("run_{signature}.json")))
}

fn memoized_run_table(args: &cli::RunArgs) -> AppResult<Option<table::ResultTable>> {
    let path = run_args_cache_path(args)?;
    let now = &jiff::Zoned::now().in_tz("UTC").into_diagnostic()?.timestamp();
    match io::cache::try_retrieve_cache(&path, &args.ttl_minutes, now) {
        Ok(Some(body)) => Ok(serde_json::from_str(&body).ok()),
        Ok(None) => Ok(None),
        Err(err) => {
            tracing::warn!("run-table cache lookup failed: {err}");
            Ok(None)
        }
    }
}

fn store_memoized_run_table(args: &cli::RunArgs, table: &table::ResultTable) -> AppResult<()> {
    let path = run_args_cache_path(args)?;
    let now = &jiff::Zoned::now().in_tz("UTC").into_diagnostic()?.timestamp();
    let body = serde_json::to_string(table).into_diagnostic().wrap_err("serializing result table for cache")?;
    if let Err(err) = io::cache::try_write_cache(&path, &body, &args.ttl_minutes, now) {
        tracing::warn!("run-table cache write failed: {err}");
    }
    Ok(())
}

/// Builds a progress callback over a shared spinner. The scheduler only
/// ever invokes callbacks from the case that spawned it (never from the
/// worker threads themselves), but the `Send + Sync` bound on `Callbacks`
/// still applies to the closure type, hence the `Arc<Mutex<..>>` wrapper.
fn progress_callback(spinner: Arc<Mutex<SpinnerContainer>>) -> Box<dyn Fn(usize, usize, Option<f64>) + Send + Sync> {
    Box::new(move |completed, total, eta| {
        let message = match eta {
            Some(secs) => format!("{completed}/{total} cases (eta {secs:.0}s)"),
            None => format!("{completed}/{total} cases"),
        };
        if let Ok(mut guard) = spinner.lock() {
            guard.update_text(message);
        }
    })
}

fn run_design_cmd(
    args: &cli::DesignArgs,
    project_root: &Path,
    config: &RunConfig,
    cancel: &CancellationToken,
    no_animate: bool,
) -> AppResult<()> {
    let model = Model::resolve(&args.model, project_root)?;
    let ranges: serde_json::Value =
        serde_json::from_str(&args.ranges).into_diagnostic().wrap_err("parsing -v/--ranges")?;
    let serde_json::Value::Object(ranges_map) = ranges else {
        bail!("-v/--ranges must be a JSON object mapping variable name to [min, max]");
    };

    let mut input_vars = BTreeMap::new();
    for (name, bounds) in ranges_map {
        let serde_json::Value::Array(pair) = bounds else {
            bail!("range for '{name}' must be a [min, max] array");
        };
        let (Some(min), Some(max)) =
            (pair.first().and_then(|v| v.as_f64()), pair.get(1).and_then(|v| v.as_f64()))
        else {
            bail!("range for '{name}' must contain two numbers");
        };
        input_vars.insert(name, (min, max));
    }

    let output_vars: Vec<String> = model.output_commands().into_iter().map(|(name, _)| name).collect();

    let options = match &args.options {
        Some(spec) => io::aliases::resolve_json_or_path_or_alias(spec, project_root, "algorithms")?
            .unwrap_or(serde_json::Value::Null),
        None => serde_json::Value::Null,
    };

    let mut algorithm: Box<dyn design::Algorithm> = match args.algorithm.as_str() {
        "random" | "randomsampling" => Box::new(design::RandomSamplingAlgorithm::from_options(&options)),
        other => return Err(Error::UnknownAlgorithm(other.to_owned()).into()),
    };

    let results_dir = resolve_results_dir(args.results_dir.as_deref(), project_root);
    let guard = case::guard::ensure_unique(&results_dir)?;
    let pool = build_pool(&args.calculators, project_root, model.id().as_deref())?;

    let spinner = Arc::new(Mutex::new(SpinnerContainer::new().create_spinner_unless_no_terminal_or(no_animate)));
    let callbacks = scheduler::Callbacks {
        on_start: None,
        on_case_start: None,
        on_case_complete: None,
        on_progress: Some(progress_callback(spinner.clone())),
        on_complete: None,
    };

    let analysis = design::run_design(
        input_vars,
        output_vars,
        &model,
        &args.expression,
        algorithm.as_mut(),
        pool,
        &guard.path,
        Path::new(&args.input),
        config,
        cancel,
        &callbacks,
    )?;

    spinner
        .lock()
        .expect("spinner mutex poisoned")
        .stop_with_message("design loop complete");
    println!("{}", analysis.text);
    println!("{}", serde_json::to_string_pretty(&analysis.data).into_diagnostic()?);
    if let Some(html) = &analysis.html {
        println!("{html}");
    }
    Ok(())
}

fn run_list(args: &cli::ListArgs) -> AppResult<()> {
    let no_filters = args.models.is_none() && args.calculators.is_none() && args.algorithms.is_none();
    let kinds: Vec<(&str, Option<&str>)> = [
        ("models", args.models.as_deref()),
        ("calculators", args.calculators.as_deref()),
        ("algorithms", args.algorithms.as_deref()),
    ]
    .into_iter()
    .filter(|(_, pattern)| pattern.is_some() || no_filters)
    .collect();

    for (kind, pattern) in kinds {
        println!("{kind}:");
        let installed = installer::list_installed(kind)?;
        for (name, (descriptor, global)) in installed {
            if let Some(pattern) = pattern {
                if !glob_match_simple(pattern, &name) {
                    continue;
                }
            }
            let scope = if global { "global" } else { "local" };
            if args.check {
                match validate_descriptor(kind, &descriptor) {
                    Ok(()) => println!("  {name} ({scope}) - ok"),
                    Err(err) => println!("  {name} ({scope}) - invalid: {err}"),
                }
            } else {
                println!("  {name} ({scope})");
            }
        }
    }

    Ok(())
}

fn glob_match_simple(pattern: &str, name: &str) -> bool {
    glob::Pattern::new(pattern).map(|p| p.matches(name)).unwrap_or(true)
}

fn validate_descriptor(kind: &str, descriptor: &serde_json::Value) -> AppResult<()> {
    if kind == "models" {
        let model = Model::from_value(descriptor.clone())?;
        model.var_delim()?;
        model.formula_delim()?;
    }
    Ok(())
}

fn run_install(args: &cli::InstallArgs) -> AppResult<()> {
    let (src, kind, global) = match &args.kind {
        cli::PluginKind::Model { src, global } => (src, "models", *global),
        cli::PluginKind::Algorithm { src, global } => (src, "algorithms", *global),
    };

    let outcome = installer::install(src, kind, global, GITHUB_ORG, GITHUB_PREFIX)?;
    println!("installed '{}' to {}", outcome.name, outcome.install_path.display());
    for file in &outcome.installed_files {
        println!("  + {file}");
    }
    Ok(())
}

fn run_uninstall(args: &cli::UninstallArgs) -> AppResult<()> {
    let (name, kind, global) = match &args.kind {
        cli::UninstallKind::Model { name, global } => (name, "models", *global),
        cli::UninstallKind::Algorithm { name, global } => (name, "algorithms", *global),
    };

    if installer::uninstall(name, kind, global)? {
        println!("uninstalled '{name}'");
        Ok(())
    } else {
        Err(Error::NotInstalled(name.clone()).into())
    }
}

fn render_and_print(table: &table::ResultTable, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&table::render_json(table)).unwrap_or_default())
        }
        OutputFormat::Csv => {
            if let Ok(csv) = table::render_csv(table) {
                print!("{csv}");
            }
        }
        OutputFormat::Html => println!("{}", table::render_html(table)),
        OutputFormat::Markdown => print!("{}", table::render_markdown(table)),
        OutputFormat::Table => print!("{}", table::render_markdown(table)),
    }
}
