//! Build automation tasks for the sqlpool workspace.
//!
//! Run with `cargo xtask <command>`.
//!
//! ## Available Commands
//!
//! - `ci`: Run all CI checks (format, lint, test, doc)
//! - `fmt`: Check/apply code formatting
//! - `clippy`: Run clippy lints
//! - `test`: Run tests, optionally for one package or only proptests
//! - `doc`: Generate documentation
//! - `example`: Run the mock-driver walkthrough
//! - `coverage`: Run code coverage (requires cargo-llvm-cov)
//! - `clean`: Clean build artifacts

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use xshell::{Shell, cmd};

#[derive(Parser)]
#[command(name = "xtask", about = "Build automation for sqlpool")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run all checks (format, lint, test, doc)
    Ci,
    /// Run cargo fmt (--check by default, --fix to apply)
    Fmt {
        /// Apply formatting fixes
        #[arg(long)]
        fix: bool,
    },
    /// Run clippy on every target
    Clippy {
        /// Apply clippy suggestions
        #[arg(long)]
        fix: bool,
    },
    /// Run tests
    Test {
        /// Test a specific package
        #[arg(short, long)]
        package: Option<String>,
        /// Number of proptest cases per property
        #[arg(long)]
        proptest_cases: Option<u32>,
    },
    /// Generate documentation
    Doc {
        /// Open documentation in browser
        #[arg(long)]
        open: bool,
    },
    /// Run the connection pool walkthrough
    Example {
        /// Log filter passed through RUST_LOG
        #[arg(long, default_value = "sqlpool=debug")]
        log: String,
    },
    /// Run code coverage
    Coverage {
        /// Output format (html, lcov, json)
        #[arg(long, default_value = "html")]
        format: String,
    },
    /// Clean build artifacts
    Clean,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let sh = Shell::new()?;

    // Change to workspace root
    let workspace_root = workspace_root()?;
    sh.change_dir(&workspace_root);

    match cli.command {
        Command::Ci => {
            println!("Running CI checks...");
            fmt(&sh, false)?;
            clippy(&sh, false)?;
            test(&sh, None, None)?;
            doc(&sh, false)?;
            println!("\n✅ All CI checks passed!");
        }
        Command::Fmt { fix } => fmt(&sh, fix)?,
        Command::Clippy { fix } => clippy(&sh, fix)?,
        Command::Test {
            package,
            proptest_cases,
        } => test(&sh, package.as_deref(), proptest_cases)?,
        Command::Doc { open } => doc(&sh, open)?,
        Command::Example { log } => example(&sh, &log)?,
        Command::Coverage { format } => coverage(&sh, &format)?,
        Command::Clean => clean(&sh)?,
    }

    Ok(())
}

fn workspace_root() -> Result<PathBuf> {
    let output = std::process::Command::new("cargo")
        .args(["locate-project", "--workspace", "--message-format=plain"])
        .output()
        .context("failed to run cargo locate-project")?;

    let path = String::from_utf8(output.stdout)
        .context("invalid UTF-8 in cargo output")?
        .trim()
        .to_string();

    Ok(PathBuf::from(path)
        .parent()
        .context("failed to get workspace root")?
        .to_path_buf())
}

fn fmt(sh: &Shell, fix: bool) -> Result<()> {
    if fix {
        println!("Applying formatting...");
        cmd!(sh, "cargo fmt --all").run()?;
        println!("✅ Formatting applied.");
    } else {
        println!("Checking formatting...");
        cmd!(sh, "cargo fmt --all -- --check").run()?;
        println!("✅ Formatting check passed.");
    }
    Ok(())
}

fn clippy(sh: &Shell, fix: bool) -> Result<()> {
    if fix {
        println!("Applying clippy suggestions...");
        cmd!(sh, "cargo clippy --workspace --all-targets --fix --allow-dirty").run()?;
        println!("✅ Clippy suggestions applied.");
    } else {
        println!("Running clippy...");
        cmd!(sh, "cargo clippy --workspace --all-targets -- -D warnings").run()?;
        println!("✅ Clippy check passed.");
    }
    Ok(())
}

fn test(sh: &Shell, package: Option<&str>, proptest_cases: Option<u32>) -> Result<()> {
    println!("Running tests...");

    let mut args = vec!["test".to_string()];
    match package {
        Some(pkg) => {
            args.push("-p".into());
            args.push(pkg.into());
        }
        None => args.push("--workspace".into()),
    }

    let _cases = proptest_cases.map(|n| sh.push_env("PROPTEST_CASES", n.to_string()));
    cmd!(sh, "cargo {args...}").run()?;
    println!("✅ All tests passed.");
    Ok(())
}

fn doc(sh: &Shell, open: bool) -> Result<()> {
    println!("Generating documentation...");
    let _rustdoc = sh.push_env("RUSTDOCFLAGS", "-D warnings");
    if open {
        cmd!(sh, "cargo doc --workspace --no-deps --exclude xtask --open").run()?;
    } else {
        cmd!(sh, "cargo doc --workspace --no-deps --exclude xtask").run()?;
    }
    println!("✅ Documentation generated.");
    Ok(())
}

fn example(sh: &Shell, log: &str) -> Result<()> {
    println!("Running connection_pool example...");
    let _log = sh.push_env("RUST_LOG", log);
    cmd!(sh, "cargo run -p sqlpool-testing --example connection_pool").run()?;
    Ok(())
}

fn coverage(sh: &Shell, format: &str) -> Result<()> {
    if cmd!(sh, "cargo llvm-cov --version")
        .quiet()
        .ignore_stdout()
        .run()
        .is_err()
    {
        bail!("cargo-llvm-cov not found. Install with `cargo install cargo-llvm-cov`.");
    }

    println!("Running coverage ({format})...");
    match format {
        "html" => cmd!(sh, "cargo llvm-cov --workspace --exclude xtask --html").run()?,
        "lcov" => cmd!(
            sh,
            "cargo llvm-cov --workspace --exclude xtask --lcov --output-path lcov.info"
        )
        .run()?,
        "json" => cmd!(
            sh,
            "cargo llvm-cov --workspace --exclude xtask --json --output-path coverage.json"
        )
        .run()?,
        other => bail!("unknown coverage format: {other} (expected html, lcov or json)"),
    }
    println!("✅ Coverage report generated.");
    Ok(())
}

fn clean(sh: &Shell) -> Result<()> {
    println!("Cleaning build artifacts...");
    cmd!(sh, "cargo clean").run()?;
    println!("✅ Clean complete.");
    Ok(())
}
