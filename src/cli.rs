use crate::commands::{self, CommonArgs, IngestCommand};
use anyhow::Result;
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::fs;
use std::io;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "faultline", version)]
#[command(
    about = "Turn streamed log batches into deduplicated error issues",
    long_about = "faultline decodes compressed log batches from a stream transport, groups error lines into issues by fingerprint, and answers with the records that should be redelivered."
)]
#[command(arg_required_else_help = true)]
#[command(after_long_help = "Examples:
  faultline ingest batch.json --workspace acme
  cat batch.json | faultline ingest - --deadline-secs 30
  faultline issues --workspace acme
  faultline inspect --group <GROUP>
  faultline completion zsh > ~/.zsh/completions/_faultline
  faultline man > faultline.1")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone)]
struct Common {
    #[arg(
        long,
        value_name = "PATH",
        help = "Config file (default: .faultline/config.toml)"
    )]
    config: Option<PathBuf>,
    #[arg(long, value_name = "NAME", help = "Workspace that owns the issues")]
    workspace: Option<String>,
    #[arg(
        long,
        value_name = "PATH",
        help = "Path to issue DB (default: $XDG_STATE_HOME/faultline/issues.db)"
    )]
    state_db: Option<PathBuf>,
}

impl From<Common> for CommonArgs {
    fn from(c: Common) -> Self {
        CommonArgs {
            config: c.config,
            workspace: c.workspace,
            state_db: c.state_db,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Ingest one stream batch and print the partial-failure response",
        long_about = "Ingest one stream batch. Records are decoded and extracted in order until the deadline; the JSON response lists only the records that were not attempted."
    )]
    #[command(arg_required_else_help = true)]
    #[command(after_long_help = "Examples:
  faultline ingest batch.json
  faultline ingest - --deadline-secs 30 --log outcomes.ndjson")]
    Ingest {
        #[arg(value_name = "EVENT_FILE", help = "Stream event JSON file, or - for stdin")]
        event_file: PathBuf,
        #[command(flatten)]
        common: Common,
        #[arg(
            long,
            value_name = "SECS",
            help = "Processing budget in seconds before remaining records are returned"
        )]
        deadline_secs: Option<u64>,
        #[arg(long, value_name = "PATH", help = "Write NDJSON record outcomes to file")]
        log: Option<PathBuf>,
    },
    #[command(about = "List issues of a workspace, most recently seen first")]
    Issues {
        #[command(flatten)]
        common: Common,
    },
    #[command(about = "Show one issue and its hourly counts")]
    #[command(arg_required_else_help = true)]
    #[command(after_long_help = "Example:
  faultline inspect --group <GROUP> --workspace acme")]
    Inspect {
        #[arg(long, value_name = "GROUP", help = "Issue group fingerprint")]
        group: String,
        #[command(flatten)]
        common: Common,
    },
    #[command(
        about = "Generate shell completion script",
        long_about = "Generate shell completion script for your shell. Redirect output to your shell completion directory."
    )]
    #[command(arg_required_else_help = true)]
    #[command(after_long_help = "Examples:
  faultline completion bash > ~/.local/share/bash-completion/completions/faultline
  faultline completion zsh > ~/.zsh/completions/_faultline
  faultline completion fish > ~/.config/fish/completions/faultline.fish")]
    Completion {
        #[arg(value_enum, value_name = "SHELL", help = "Target shell")]
        shell: Shell,
    },
    #[command(
        about = "Generate a man page",
        long_about = "Generate a roff man page for faultline."
    )]
    #[command(after_long_help = "Examples:
  faultline man > faultline.1
  faultline man --output docs/faultline.1")]
    Man {
        #[arg(
            long,
            value_name = "PATH",
            help = "Write man page to file (stdout when omitted)"
        )]
        output: Option<PathBuf>,
    },
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Ingest {
            event_file,
            common,
            deadline_secs,
            log,
        } => commands::execute_ingest(IngestCommand {
            event_file,
            common: common.into(),
            deadline_secs,
            log,
        }),
        Commands::Issues { common } => commands::list_issues(common.into()),
        Commands::Inspect { group, common } => commands::inspect_issue(&group, common.into()),
        Commands::Completion { shell } => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            clap_complete::generate(shell, &mut cmd, name, &mut io::stdout());
            Ok(())
        }
        Commands::Man { output } => {
            let man = clap_mangen::Man::new(Cli::command());
            match output {
                Some(path) => {
                    let mut bytes = Vec::new();
                    man.render(&mut bytes)?;
                    fs::write(path, bytes)?;
                }
                None => {
                    man.render(&mut io::stdout())?;
                }
            }
            Ok(())
        }
    }
}
