//! SC-030: CLI subcommands — compile, check, run, eval, validate.

use crate::cache::digest::fingerprint_file;
use crate::cache::loader::{LoadOutcome, Loader};
use crate::cache::store::{write_atomic, FileStore};
use crate::cache::trailer;
use crate::core::config::{self, LoadPolicy};
use crate::core::executable::{Executable, ExecutableKind};
use crate::core::header;
use crate::core::scope::{Scope, SimpleScope};
use crate::core::types::{Type, Value};
use crate::engine::{self, Registry};
use clap::Subcommand;
use std::path::{Path, PathBuf};

/// Name of the array constant `eval` exposes its arguments under.
pub const MAIN_ARGS: &str = "$MainArgs";

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compile a script and embed the compiled form in the file
    Compile {
        /// Script file
        file: PathBuf,

        /// Load policy file
        #[arg(short, long, default_value = "scriptcache.yaml")]
        config: PathBuf,
    },

    /// Report whether a script's compiled data is fresh
    Check {
        /// Script file
        file: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,

        /// Exit non-zero unless fresh
        #[arg(long)]
        strict: bool,
    },

    /// Load a script (recompiling if needed) and run it
    Run {
        /// Script file
        file: PathBuf,

        /// Arguments, read according to the script's signature
        args: Vec<String>,

        /// Load policy file
        #[arg(short, long, default_value = "scriptcache.yaml")]
        config: PathBuf,

        /// Do not write recompiled data back to the file
        #[arg(long)]
        no_write: bool,
    },

    /// Evaluate script text given on the command line
    Eval {
        /// Script text
        #[arg(short = 'c', long)]
        command: String,

        /// Engine for text without an engine marker
        #[arg(short, long, default_value = "RPN")]
        engine: String,

        /// Arguments, available to scripts as $MainArgs
        args: Vec<String>,
    },

    /// Validate a load policy file
    Validate {
        /// Path to scriptcache.yaml
        #[arg(short, long, default_value = "scriptcache.yaml")]
        file: PathBuf,
    },
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<(), String> {
    match cmd {
        Commands::Compile { file, config } => cmd_compile(&file, &config),
        Commands::Check { file, json, strict } => cmd_check(&file, json, strict),
        Commands::Run {
            file,
            args,
            config,
            no_write,
        } => cmd_run(&file, &args, &config, no_write),
        Commands::Eval {
            command,
            engine,
            args,
        } => cmd_eval(&command, &engine, &args),
        Commands::Validate { file } => cmd_validate(&file),
    }
}

fn load_policy(path: &Path) -> Result<LoadPolicy, String> {
    config::load_policy(Some(path)).map_err(|e| e.to_string())
}

fn registry_for(policy: &LoadPolicy) -> Result<Registry, String> {
    let mut registry = Registry::with_builtins();
    registry
        .set_default_engine(policy.default_engine.as_deref())
        .map_err(|e| e.to_string())?;
    Ok(registry)
}

fn read_script(file: &Path) -> Result<String, String> {
    std::fs::read_to_string(file).map_err(|e| format!("cannot read {}: {}", file.display(), e))
}

fn cmd_compile(file: &Path, config: &Path) -> Result<(), String> {
    let policy = load_policy(config)?;
    let registry = registry_for(&policy)?;
    let text = read_script(file)?;
    let name = file.display().to_string();

    let (executable, merged) = trailer::compile_to_text(&name, &text, &registry).map_err(|e| e.to_string())?;
    if merged == text {
        println!("Up to date: {}", name);
        return Ok(());
    }
    write_atomic(file, &merged).map_err(|e| e.to_string())?;

    println!(
        "Compiled {} ({} via {})",
        name,
        executable.kind(),
        executable.engine_name()
    );
    if !executable.engine().is_compiled_code_serializable() {
        println!("  {} does not store compiled code; source only", executable.engine_name());
    }
    Ok(())
}

fn cmd_check(file: &Path, json: bool, strict: bool) -> Result<(), String> {
    let text = read_script(file)?;
    let registry = Registry::with_builtins();
    let extraction = trailer::extract(&text, &registry);
    let hash = fingerprint_file(file)?;

    if json {
        let report = serde_json::json!({
            "file": file.display().to_string(),
            "validation": extraction.validation.to_string(),
            "fresh": extraction.validation.is_fresh(),
            "kind": extraction.executable.as_ref().map(|e| e.kind().to_string()),
            "engine": extraction.executable.as_ref().map(|e| e.engine_name().to_string()),
            "fingerprint": hash,
        });
        let out = serde_json::to_string_pretty(&report).map_err(|e| format!("JSON error: {}", e))?;
        println!("{}", out);
    } else {
        println!("{}: {}", file.display(), extraction.validation);
        if let Some(exec) = &extraction.executable {
            println!("  {} via {}", exec.kind(), exec.engine_name());
            if let Some(sig) = exec.signature() {
                println!("  signature: {}", sig);
            }
        }
        println!("  {}", hash);
    }

    if strict && !extraction.validation.is_fresh() {
        return Err(format!("{} is {}", file.display(), extraction.validation));
    }
    Ok(())
}

/// Read command-line arguments according to `executable`'s signature.
pub fn parse_args(executable: &Executable, raw: &[String]) -> Result<Vec<Value>, String> {
    let Some(sig) = executable.signature() else {
        if !raw.is_empty() {
            return Err("scripts take no arguments".to_string());
        }
        return Ok(Vec::new());
    };
    let n = sig.param_count();
    raw.iter()
        .enumerate()
        .map(|(i, text)| {
            // variable arity: surplus arguments take the trailing element type
            let declared = sig.param_type(if sig.is_var_args() { i.min(n - 1) } else { i });
            // otherwise surplus arguments are left for the arity check to reject
            let ty = declared.unwrap_or(&Type::Object);
            Value::from_text(text, ty).map_err(|e| e.to_string())
        })
        .collect()
}

fn print_result(value: &Value) {
    if !value.is_null() {
        println!("{}", value);
    }
}

fn cmd_run(file: &Path, args: &[String], config: &Path, no_write: bool) -> Result<(), String> {
    let mut policy = load_policy(config)?;
    if no_write {
        policy.write_back = false;
    }
    let loader = Loader::new(Registry::with_builtins(), policy).map_err(|e| e.to_string())?;
    let store = FileStore::new(file);
    let report = loader.load_with_report(&store).map_err(|e| e.to_string())?;

    if let LoadOutcome::Rebuilt(why) = &report.outcome {
        let note = if report.persisted {
            "refreshed"
        } else {
            "not written back"
        };
        eprintln!("{}: {} -> recompiled, {}", file.display(), why, note);
    }
    if let Some(err) = &report.persist_error {
        eprintln!("  warning: {}", err);
    }

    let values = parse_args(&report.executable, args)?;
    let result = report.executable.run(&values).map_err(|e| e.to_string())?;
    print_result(&result);
    Ok(())
}

fn cmd_eval(code: &str, engine_name: &str, args: &[String]) -> Result<(), String> {
    let mut registry = Registry::with_builtins();
    registry
        .set_default_engine(Some(engine_name))
        .map_err(|e| e.to_string())?;
    let engine = registry.engine_for_code(code).map_err(|e| e.to_string())?;

    let declared = header::parse_executable_info(None, code).map_err(|e| e.to_string())?;
    let code = match declared {
        Some(_) => code.to_string(),
        None => format!("// {{ script }}\n{}", code),
    };

    let main_args = Value::Array {
        element: Type::Text,
        items: args.iter().cloned().map(Value::Text).collect(),
    };
    let mut scope = SimpleScope::new();
    scope
        .new_constant(MAIN_ARGS, Type::array_of(Type::Text), main_args)
        .map_err(|e| e.to_string())?;

    let executable = engine::compile(&engine, Some("<eval>"), &code, Some(&scope)).map_err(|e| e.to_string())?;
    let values = match executable.kind() {
        ExecutableKind::Script => Vec::new(),
        _ => parse_args(&executable, args)?,
    };
    let result = executable.run_in(&mut scope, &values).map_err(|e| e.to_string())?;
    print_result(&result);
    Ok(())
}

fn cmd_validate(file: &Path) -> Result<(), String> {
    let policy = config::parse_policy_file(file).map_err(|e| e.to_string())?;
    let errors = config::validate_policy(&policy, &Registry::with_builtins());

    if errors.is_empty() {
        println!(
            "OK: {} (recompile: {}, write_back: {}, force_recompile: {})",
            file.display(),
            policy.recompile,
            policy.write_back,
            policy.force_recompile
        );
        Ok(())
    } else {
        for e in &errors {
            eprintln!("  ERROR: {}", e);
        }
        Err(format!("{} validation error(s)", errors.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::trailer::Validation;

    fn validation_of(file: &Path) -> Result<Validation, String> {
        let text = read_script(file)?;
        Ok(trailer::extract(&text, &Registry::with_builtins()).validation)
    }

    const DOUBLE: &str = "// @RPN:\n// { function (n:Integer):Integer }\nn 2 *\n";

    fn script(dir: &Path, name: &str, text: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn test_sc030_compile_embeds_trailer() {
        let dir = tempfile::tempdir().unwrap();
        let file = script(dir.path(), "double.rpn", DOUBLE);
        let config = dir.path().join("scriptcache.yaml");
        assert_eq!(validation_of(&file).unwrap(), Validation::NoTrailer);
        cmd_compile(&file, &config).unwrap();
        assert_eq!(validation_of(&file).unwrap(), Validation::Fresh);
        let once = std::fs::read_to_string(&file).unwrap();
        cmd_compile(&file, &config).unwrap();
        assert_eq!(std::fs::read_to_string(&file).unwrap(), once);
    }

    #[test]
    fn test_sc030_check_strict() {
        let dir = tempfile::tempdir().unwrap();
        let file = script(dir.path(), "double.rpn", DOUBLE);
        assert!(cmd_check(&file, false, false).is_ok());
        assert!(cmd_check(&file, true, true).is_err());
        cmd_compile(&file, &dir.path().join("none.yaml")).unwrap();
        assert!(cmd_check(&file, false, true).is_ok());
    }

    #[test]
    fn test_sc030_run_refreshes_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = script(dir.path(), "double.rpn", DOUBLE);
        let config = dir.path().join("scriptcache.yaml");
        cmd_run(&file, &["21".to_string()], &config, true).unwrap();
        assert_eq!(validation_of(&file).unwrap(), Validation::NoTrailer);
        cmd_run(&file, &["21".to_string()], &config, false).unwrap();
        assert_eq!(validation_of(&file).unwrap(), Validation::Fresh);
    }

    #[test]
    fn test_sc030_run_rejects_bad_argument() {
        let dir = tempfile::tempdir().unwrap();
        let file = script(dir.path(), "double.rpn", DOUBLE);
        let err = cmd_run(&file, &["x".to_string()], &dir.path().join("p.yaml"), true).unwrap_err();
        assert!(err.contains("Integer"));
    }

    #[test]
    fn test_sc030_parse_args_varargs() {
        let registry = Registry::with_builtins();
        let exec = registry
            .compile("v.rpn", "// @RPN:\n// { function (a:Integer, rest:Long...):Long }\nrest sum a +\n")
            .unwrap();
        let values = parse_args(&exec, &["1".into(), "2".into(), "3".into()]).unwrap();
        assert_eq!(values, vec![Value::Int(1), Value::Long(2), Value::Long(3)]);
        assert_eq!(exec.run(&values).unwrap(), Value::Long(6));
    }

    #[test]
    fn test_sc030_eval() {
        assert!(cmd_eval("1 2 +", "RPN", &[]).is_ok());
        assert!(cmd_eval("$MainArgs len", "RPN", &["a".into(), "b".into()]).is_ok());
        assert!(cmd_eval("1 2 +", "Lua", &[]).is_err());
        assert!(cmd_eval("1 0 /", "RPN", &[]).is_err());
    }

    #[test]
    fn test_sc030_validate() {
        let dir = tempfile::tempdir().unwrap();
        let good = script(dir.path(), "good.yaml", "recompile: true\ndefault_engine: RPN\n");
        assert!(cmd_validate(&good).is_ok());
        let bad = script(dir.path(), "bad.yaml", "recompile: false\nforce_recompile: true\n");
        assert!(cmd_validate(&bad).is_err());
        assert!(cmd_validate(&dir.path().join("missing.yaml")).is_err());
    }
}
