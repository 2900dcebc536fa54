//! Build automation tasks for the dspool workspace.
//!
//! Run with `cargo xtask <command>`.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use xshell::{Shell, cmd};

#[derive(Parser)]
#[command(name = "xtask", about = "Build automation for dspool")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Clone, Copy)]
enum Command {
    /// Format, lint, feature matrix, tests and cargo-deny, in that order
    Ci,
    /// Fail if any file is not rustfmt-clean
    Fmt,
    /// Lint every target with warnings denied
    Clippy,
    /// Build the pool crate with and without the serde feature
    Features,
    /// Run the whole test suite
    Test,
    /// Run the pool invariant properties with more cases than the default
    Props {
        /// Cases per property
        #[arg(long, default_value_t = 2048)]
        cases: u32,
    },
    /// Check licenses and advisories
    Deny,
    /// Build the pool crate's API docs
    Doc,
    /// Remove the target directory
    Clean,
}

impl Command {
    /// Steps making up this command; `Ci` chains the checks it gates on.
    fn steps(self) -> Vec<Command> {
        match self {
            Command::Ci => vec![
                Command::Fmt,
                Command::Clippy,
                Command::Features,
                Command::Test,
                Command::Deny,
            ],
            other => vec![other],
        }
    }

    fn label(self) -> String {
        match self {
            Command::Ci => "ci".into(),
            Command::Fmt => "fmt".into(),
            Command::Clippy => "clippy".into(),
            Command::Features => "features".into(),
            Command::Test => "test".into(),
            Command::Props { cases } => format!("props ({cases} cases)"),
            Command::Deny => "deny".into(),
            Command::Doc => "doc".into(),
            Command::Clean => "clean".into(),
        }
    }

    fn run(self, sh: &Shell) -> Result<()> {
        match self {
            Command::Ci => bail!("ci is expanded into its steps before running"),
            Command::Fmt => cmd!(sh, "cargo fmt --all -- --check").run()?,
            Command::Clippy => cmd!(
                sh,
                "cargo clippy --workspace --all-features --all-targets -- -D warnings"
            )
            .run()?,
            Command::Features => {
                for features in [&["--no-default-features"][..], &["--features", "serde"][..]] {
                    cmd!(sh, "cargo check -p dspool {features...}").run()?;
                }
            }
            Command::Test => cmd!(sh, "cargo test --workspace --all-features").run()?,
            Command::Props { cases } => {
                let _env = sh.push_env("PROPTEST_CASES", cases.to_string());
                cmd!(sh, "cargo test -p dspool-testing --test invariants --release").run()?;
            }
            Command::Deny => cmd!(sh, "cargo deny check").run()?,
            Command::Doc => cmd!(sh, "cargo doc -p dspool --all-features --no-deps").run()?,
            Command::Clean => cmd!(sh, "cargo clean").run()?,
        }
        Ok(())
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let sh = Shell::new()?;
    sh.change_dir(workspace_root()?);

    let steps = cli.command.steps();
    let total = steps.len();
    for (n, step) in steps.into_iter().enumerate() {
        let label = step.label();
        println!("[{}/{total}] {label}", n + 1);
        step.run(&sh).with_context(|| format!("{label} failed"))?;
    }
    if total > 1 {
        println!("{} passed ({total} steps)", cli.command.label());
    }
    Ok(())
}

/// Directory holding the workspace `Cargo.toml`.
fn workspace_root() -> Result<PathBuf> {
    let output = std::process::Command::new(env!("CARGO"))
        .args(["locate-project", "--workspace", "--message-format=plain"])
        .output()
        .context("could not run cargo locate-project")?;
    let manifest = PathBuf::from(
        String::from_utf8(output.stdout)
            .context("cargo locate-project printed non-UTF-8")?
            .trim(),
    );
    manifest
        .parent()
        .map(PathBuf::from)
        .context("manifest path has no parent directory")
}
