//! Pluggable formula evaluator, bridged to an external interpreter over a
//! line-delimited stdin/stdout protocol.
//!
//! This is the §9 redesign in SPEC_FULL.md §4.1: the original embeds a
//! Python interpreter in-process (`exec`/`eval` against a live `env` dict).
//! Here the interpreter runs out-of-process, one session per `compile`/`run`
//! invocation, reused across every context-line exec and formula eval within
//! that invocation so state (assigned names, imports) persists exactly like
//! the original's single `env` dict does across a whole template pass.

use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::prelude::*;
use crate::value::ScalarValue;

pub trait Evaluator {
    /// Executes a block of statements for side effects (assignments,
    /// imports, function defs) against the session's persistent namespace.
    /// A failure here is non-fatal to the caller: formula.rs logs a warning
    /// and leaves the offending context line's effects simply absent.
    fn exec_context(&mut self, code: &str) -> AppResult<()>;

    /// Evaluates a single expression against the session's namespace and
    /// returns its `str()`/stringified form.
    fn eval(&mut self, expr: &str) -> AppResult<String>;
}

#[derive(Serialize)]
struct Request<'a> {
    op: &'a str,
    code: &'a str,
}

#[derive(Deserialize)]
struct Response {
    ok: bool,
    #[serde(default)]
    result: String,
    #[serde(default)]
    error: String,
}

/// Drives an interpreter subprocess speaking one JSON request/response pair
/// per line. Used for both the Python and R backends; only the driver
/// script content differs.
pub struct SubprocessEvaluator {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    _driver_path: PathBuf,
}

impl SubprocessEvaluator {
    pub fn spawn_python() -> AppResult<Self> {
        Self::spawn("python3", PYTHON_DRIVER, "py")
    }

    pub fn spawn_r() -> AppResult<Self> {
        Self::spawn("Rscript", R_DRIVER, "R")
    }

    fn spawn(interpreter: &str, driver_source: &str, extension: &str) -> AppResult<Self> {
        let driver_path = std::env::temp_dir().join(format!("fz_driver_{}.{extension}", uuid::Uuid::new_v4()));
        std::fs::write(&driver_path, driver_source)
            .into_diagnostic()
            .wrap_err("writing interpreter driver script")?;

        let mut child = Command::new(interpreter)
            .arg(&driver_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .into_diagnostic()
            .wrap_err_with(|| format!("spawning {interpreter}"))?;

        let stdin = child.stdin.take().expect("piped stdin");
        let stdout = BufReader::new(child.stdout.take().expect("piped stdout"));

        Ok(SubprocessEvaluator {
            child,
            stdin,
            stdout,
            _driver_path: driver_path,
        })
    }

    /// Seeds the namespace with variable bindings for the current case,
    /// assigning each as a literal so formulas and context lines can
    /// reference `$var` transcribed values directly (see formula.rs, which
    /// also substitutes `$var` textually before sending a formula here,
    /// matching the original's belt-and-suspenders behavior).
    pub fn bind(&mut self, bindings: &[(String, ScalarValue)]) -> AppResult<()> {
        for (name, value) in bindings {
            let literal = match value {
                ScalarValue::Str(s) => format!("{name} = {s:?}"),
                other => format!("{name} = {other}"),
            };
            self.exec_context(&literal)?;
        }
        Ok(())
    }

    fn roundtrip(&mut self, op: &str, code: &str) -> AppResult<Response> {
        let request = json!(Request { op, code }).to_string();
        writeln!(self.stdin, "{request}").into_diagnostic().wrap_err("writing to interpreter driver")?;
        self.stdin.flush().into_diagnostic()?;

        let mut line = String::new();
        self.stdout
            .read_line(&mut line)
            .into_diagnostic()
            .wrap_err("reading from interpreter driver")?;

        serde_json::from_str(line.trim()).into_diagnostic().wrap_err("parsing interpreter driver response")
    }
}

impl Evaluator for SubprocessEvaluator {
    fn exec_context(&mut self, code: &str) -> AppResult<()> {
        let response = self.roundtrip("exec", code)?;
        if response.ok {
            Ok(())
        } else {
            bail!("interpreter error executing context: {}", response.error)
        }
    }

    fn eval(&mut self, expr: &str) -> AppResult<String> {
        let response = self.roundtrip("eval", expr)?;
        if response.ok {
            Ok(response.result)
        } else {
            bail!("interpreter error evaluating '{expr}': {}", response.error)
        }
    }
}

impl Drop for SubprocessEvaluator {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        let _ = std::fs::remove_file(&self._driver_path);
    }
}

const PYTHON_DRIVER: &str = r#"
import sys, json

env = {}

for line in sys.stdin:
    line = line.strip()
    if not line:
        continue
    try:
        req = json.loads(line)
        if req["op"] == "exec":
            exec(req["code"], env)
            print(json.dumps({"ok": True}))
        else:
            result = eval(req["code"], env)
            print(json.dumps({"ok": True, "result": str(result)}))
    except Exception as e:
        print(json.dumps({"ok": False, "error": str(e)}))
    sys.stdout.flush()
"#;

const R_DRIVER: &str = r#"
con <- file("stdin", "r")
env <- new.env()

while (TRUE) {
  line <- readLines(con, n = 1)
  if (length(line) == 0) break
  line <- trimws(line)
  if (nchar(line) == 0) next

  req <- tryCatch(jsonlite::fromJSON(line), error = function(e) NULL)
  if (is.null(req)) next

  result <- tryCatch({
    if (req$op == "exec") {
      eval(parse(text = req$code), envir = env)
      list(ok = TRUE)
    } else {
      value <- eval(parse(text = req$code), envir = env)
      list(ok = TRUE, result = paste(format(value), collapse = " "))
    }
  }, error = function(e) list(ok = FALSE, error = conditionMessage(e)))

  cat(jsonlite::toJSON(result, auto_unbox = TRUE), "\n", sep = "")
  flush(stdout())
}
"#;
