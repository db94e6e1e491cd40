use miette::Diagnostic;
use thiserror::Error;

// fz::parse    -> cli argument / uri parsing.
// fz::model    -> model descriptor resolution/validation.
// fz::calc     -> calculator resolution and execution.
// fz::case     -> case preparation, hashing, caching.
// fz::protocol -> funz wire protocol desync.

#[derive(Debug, Error, Diagnostic)]
pub enum Error {
    #[error("Model alias '{0}' not found under .fz/models/")]
    #[diagnostic(
        code(fz::model::alias_not_found),
        help("Check the name, or pass an inline JSON descriptor instead.")
    )]
    ModelAliasNotFound(String),

    #[error("Calculator alias '{0}' not found under .fz/calculators/")]
    #[diagnostic(
        code(fz::calc::alias_not_found),
        help("Run `fz list --calculators` to see what's registered.")
    )]
    CalculatorAliasNotFound(String),

    #[error("Unknown calculator scheme '{0}'")]
    #[diagnostic(
        code(fz::calc::unknown_scheme),
        help("Supported schemes: sh, ssh, slurm, funz, cache.")
    )]
    UnknownCalculatorScheme(String),

    #[error("Malformed calculator URI '{uri}': {reason}")]
    #[diagnostic(code(fz::parse::calculator_uri))]
    MalformedCalculatorUri { uri: String, reason: String },

    #[error("model.delim must be exactly two characters, got '{0}'")]
    #[diagnostic(
        code(fz::model::bad_delim),
        help("Use something like \"{{}}\" or \"()\".")
    )]
    InvalidDelimiter(String),

    #[error("No variable assignment given and input has no list-bound variables to sweep")]
    #[diagnostic(code(fz::case::no_variables), help("This is fine: it yields a single case."))]
    NoVariables,

    #[error("Input path '{0}' does not exist")]
    #[diagnostic(code(fz::case::input_missing))]
    InputPathMissing(String),

    #[error("Results directory '{0}' could not be created: {1}")]
    #[diagnostic(code(fz::case::results_dir))]
    ResultsDirUnavailable(String, String),

    #[error("No calculators available for this run")]
    #[diagnostic(
        code(fz::calc::empty_pool),
        help("Pass at least one calculator with -c, or a calculator alias.")
    )]
    NoCalculators,

    #[error("Unknown algorithm '{0}'")]
    #[diagnostic(
        code(fz::design::unknown_algorithm),
        help("Install one with `fz install algorithm <name>`, or use the built-in \"random\".")
    )]
    UnknownAlgorithm(String),

    #[error("Funz protocol desynchronized: expected {expected}, got '{got}'")]
    #[diagnostic(code(fz::protocol::desync))]
    FunzProtocolDesync { expected: String, got: String },

    #[error("Plugin source '{0}' could not be resolved to a GitHub archive or local file")]
    #[diagnostic(code(fz::installer::bad_source))]
    InvalidPluginSource(String),

    #[error("'{0}' is not installed")]
    #[diagnostic(code(fz::installer::not_installed))]
    NotInstalled(String),

    #[error("Invalid log level '{0}'")]
    #[diagnostic(
        code(fz::config::log_level),
        help("Valid levels: QUIET, ERROR, WARNING, INFO, DEBUG.")
    )]
    InvalidLogLevel(String),
}
