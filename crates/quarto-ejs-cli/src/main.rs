//! quarto-ejs CLI - Main entry point

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "quarto-ejs")]
#[command(version)]
#[command(about = "Render EJS templates", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every command that compiles a template.
#[derive(Args, Debug, Clone, Default)]
pub struct EngineArgs {
    /// Engine configuration file (TOML)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Directory that template paths are read from
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub root: PathBuf,

    /// Base directory that relative template paths resolve against
    #[arg(long, value_name = "DIR")]
    pub base: Option<String>,

    /// Open delimiter
    #[arg(long, requires = "close")]
    pub open: Option<String>,

    /// Close delimiter
    #[arg(long, requires = "open")]
    pub close: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Render a template and print the result
    Render {
        /// Template path, relative to the base directory
        path: String,

        /// JSON file holding the template's input values
        #[arg(long, value_name = "FILE")]
        locals: Option<PathBuf>,

        /// Input value (KEY=VALUE); VALUE is parsed as JSON when possible
        #[arg(short = 's', long = "set", value_name = "KEY=VALUE")]
        set: Vec<String>,

        /// Report runtime errors without line context
        #[arg(long)]
        no_compile_debug: bool,

        /// Do not cache the template source
        #[arg(long)]
        no_cache: bool,

        /// Log the generated program
        #[arg(long)]
        debug: bool,

        #[command(flatten)]
        engine: EngineArgs,
    },

    /// Compile a template and print the generated program
    Compile {
        /// Template path, relative to the base directory
        path: String,

        /// Print the client (deferred-invocation) form as JSON
        #[arg(long)]
        client: bool,

        #[command(flatten)]
        engine: EngineArgs,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quarto_ejs=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Render {
            path,
            locals,
            set,
            no_compile_debug,
            no_cache,
            debug,
            engine,
        } => commands::render::execute(commands::render::RenderArgs {
            path,
            locals,
            set,
            compile_debug: !no_compile_debug,
            cache: !no_cache,
            debug,
            engine,
        }),
        Commands::Compile {
            path,
            client,
            engine,
        } => commands::compile::execute(commands::compile::CompileArgs {
            path,
            client,
            engine,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_render() {
        let cli = Cli::try_parse_from([
            "quarto-ejs",
            "render",
            "views/page.ejs",
            "--set",
            "name=tobi",
            "-s",
            "count=3",
            "--base",
            "views",
            "--no-cache",
        ])
        .unwrap();
        let Commands::Render {
            path,
            set,
            no_cache,
            no_compile_debug,
            engine,
            ..
        } = cli.command
        else {
            panic!("expected the render command");
        };
        assert_eq!(path, "views/page.ejs");
        assert_eq!(set, vec!["name=tobi", "count=3"]);
        assert!(no_cache);
        assert!(!no_compile_debug);
        assert_eq!(engine.base.as_deref(), Some("views"));
        assert_eq!(engine.root, PathBuf::from("."));
    }

    #[test]
    fn test_parse_compile_client() {
        let cli = Cli::try_parse_from(["quarto-ejs", "compile", "a.ejs", "--client"]).unwrap();
        assert!(matches!(cli.command, Commands::Compile { client: true, .. }));
    }

    #[test]
    fn test_delimiters_come_in_pairs() {
        assert!(Cli::try_parse_from(["quarto-ejs", "compile", "a.ejs", "--open", "{{"]).is_err());
        assert!(
            Cli::try_parse_from([
                "quarto-ejs",
                "compile",
                "a.ejs",
                "--open",
                "{{",
                "--close",
                "}}"
            ])
            .is_ok()
        );
    }

    #[test]
    fn test_path_is_required() {
        assert!(Cli::try_parse_from(["quarto-ejs", "render"]).is_err());
    }
}
