#![forbid(unsafe_code)]

mod cmd;
mod output;
mod project;

use clap::{CommandFactory, Parser, Subcommand};
use output::OutputMode;
use std::env;
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "td: hauling ticket lifecycle from dispatch to billing export",
    long_about = None
)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Output format: pretty, text or json. Defaults to pretty on a TTY
    /// and text when piped.
    #[arg(long, global = true, value_enum)]
    format: Option<OutputMode>,

    /// Shorthand for `--format json`.
    #[arg(long, global = true, hide = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    fn output_mode(&self) -> OutputMode {
        output::resolve_output_mode(self.format, self.json)
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        next_help_heading = "Setup",
        about = "Initialize a ticketdrop project",
        long_about = "Create .ticketdrop/ with a default config, the ticket database and an export directory.",
        after_help = "EXAMPLES:\n    # Initialize the current directory\n    td init\n\n    # Reset the config to defaults, keeping tickets\n    td init --force"
    )]
    Init(cmd::init::InitArgs),

    #[command(
        next_help_heading = "Dispatch",
        about = "Create a ticket",
        long_about = "Create a PENDING ticket from dispatch fields, or one ticket per row of a CSV file.",
        after_help = "EXAMPLES:\n    # Create and assign in one step\n    td create --customer \"Spur Petroleum Corp\" --from 10-15-052-20W4 --to \"Rimbey Lease\" \\\n        --product \"Crude Oil\" --driver \"Brant Fandrey\" --truck \"Unit 7\" --confirm\n\n    # Create from a CSV file, one result per row\n    td create --batch jobs.csv --json"
    )]
    Create(cmd::create::CreateArgs),

    #[command(
        next_help_heading = "Dispatch",
        about = "Confirm a pending ticket",
        long_about = "Run creation validation and move a PENDING ticket to ASSIGNED.",
        after_help = "EXAMPLES:\n    td confirm 260101001"
    )]
    Confirm(cmd::confirm::ConfirmArgs),

    #[command(
        next_help_heading = "Dispatch",
        about = "Edit a pending ticket",
        long_about = "Change dispatch fields while the ticket is still PENDING.",
        after_help = "EXAMPLES:\n    td edit 260101001 truck=\"Unit 9\" priority=HotShot"
    )]
    Edit(cmd::edit::EditArgs),

    #[command(
        next_help_heading = "Dispatch",
        about = "Amend an assigned ticket",
        long_about = "Correct dispatch fields on an ASSIGNED ticket. The change is re-validated and recorded against the reviewer.",
        after_help = "EXAMPLES:\n    td amend 260101001 --reviewer Rick truck=\"Unit 9\""
    )]
    Amend(cmd::amend::AmendArgs),

    #[command(
        next_help_heading = "Field",
        about = "Record field values",
        long_about = "Record timestamps, volume, hazard checks, signature, notes or photos on an active ticket.",
        after_help = "EXAMPLES:\n    # Arrival at pickup, local time\n    td update 260101001 arrive_origin=\"2026-01-01 08:00\"\n\n    # Hazard checks and signature\n    td update 260101001 hazard.access=yes hazard.ppe_used=yes signature=yes"
    )]
    Update(cmd::update::UpdateArgs),

    #[command(
        next_help_heading = "Field",
        about = "Complete a ticket",
        long_about = "Apply any final values and move the ticket to COMPLETED once completion validation passes.",
        after_help = "EXAMPLES:\n    td complete 260101001 volume=85.5 depart_destination=\"2026-01-01 10:50\""
    )]
    Complete(cmd::complete::CompleteArgs),

    #[command(
        next_help_heading = "Field",
        about = "Offline update queue",
        long_about = "Queue updates captured offline and replay them with last-writer-wins reconciliation.",
        after_help = "EXAMPLES:\n    td queue enqueue 260101001 notes=\"gate locked\" --at 2026-01-01T15:20:00Z\n    td queue drain\n    td queue failed --json"
    )]
    Queue(cmd::queue::QueueArgs),

    #[command(
        next_help_heading = "Read",
        about = "Show one ticket",
        long_about = "Show full details for a ticket, optionally with its audit trail.",
        after_help = "EXAMPLES:\n    td show 260101001 --history"
    )]
    Show(cmd::show::ShowArgs),

    #[command(
        next_help_heading = "Read",
        about = "List tickets",
        long_about = "List tickets by stage, creation date, customer, driver or truck, or those changed since an instant.",
        after_help = "EXAMPLES:\n    td list --stage assigned --driver \"Brant Fandrey\"\n    td list --since 2026-01-01T00:00:00Z --json"
    )]
    List(cmd::list::ListArgs),

    #[command(
        next_help_heading = "Read",
        about = "Check driver or truck availability",
        long_about = "Report whether a driver or truck is on an ASSIGNED or IN_PROGRESS ticket.",
        after_help = "EXAMPLES:\n    td available --driver \"Brant Fandrey\" --truck \"Unit 7\""
    )]
    Available(cmd::available::AvailableArgs),

    #[command(
        next_help_heading = "Read",
        about = "Validate tickets",
        long_about = "Validate one ticket at the stage it is in, every ticket a rule set applies to, or all three rule sets.",
        after_help = "EXAMPLES:\n    td validate 260101001\n    td validate --stage export\n    td validate --report --json"
    )]
    Validate(cmd::validate::ValidateArgs),

    #[command(
        next_help_heading = "Read",
        about = "Show dashboard counts",
        long_about = "Ticket counts per stage and partition, tickets awaiting export and offline queue depth.",
        after_help = "EXAMPLES:\n    td stats --json"
    )]
    Stats(cmd::stats::StatsArgs),

    #[command(
        next_help_heading = "Billing",
        about = "Export completed tickets",
        long_about = "Write completed tickets to a billing CSV and mark them EXPORTED. Tickets failing export validation are skipped with reasons.",
        after_help = "EXAMPLES:\n    # Everything awaiting export\n    td export --all\n\n    # One customer and date range, without marking\n    td export --customer \"Spur Petroleum Corp\" --from 2026-01-01 --to 2026-01-31 --no-mark\n\n    # Re-export a ticket\n    td export --ticket 260101001 --force"
    )]
    Export(cmd::export::ExportArgs),

    #[command(
        next_help_heading = "Setup",
        about = "Generate shell completions",
        after_help = "EXAMPLES:\n    td completions bash > /etc/bash_completion.d/td"
    )]
    Completions(cmd::completions::CompletionsArgs),
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("TICKETDROP_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() {
            "ticketdrop=debug,info"
        } else {
            "ticketdrop=info,warn"
        })
    });

    let format = env::var("TICKETDROP_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();
    let output = cli.output_mode();
    match run(cli, output) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            output::report_unrendered(output, &err);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli, output: OutputMode) -> anyhow::Result<()> {
    if cli.verbose {
        info!("Verbose mode enabled");
    }

    let project_root = env::current_dir()?;

    match cli.command {
        Commands::Init(ref args) => cmd::init::run_init(args, output, &project_root),
        Commands::Create(ref args) => cmd::create::run_create(args, output, &project_root),
        Commands::Confirm(ref args) => cmd::confirm::run_confirm(args, output, &project_root),
        Commands::Edit(ref args) => cmd::edit::run_edit(args, output, &project_root),
        Commands::Amend(ref args) => cmd::amend::run_amend(args, output, &project_root),
        Commands::Update(ref args) => cmd::update::run_update(args, output, &project_root),
        Commands::Complete(ref args) => cmd::complete::run_complete(args, output, &project_root),
        Commands::Queue(ref args) => cmd::queue::run_queue(args, output, &project_root),
        Commands::Show(ref args) => cmd::show::run_show(args, output, &project_root),
        Commands::List(ref args) => cmd::list::run_list(args, output, &project_root),
        Commands::Available(ref args) => cmd::available::run_available(args, output, &project_root),
        Commands::Validate(ref args) => cmd::validate::run_validate(args, output, &project_root),
        Commands::Stats(ref args) => cmd::stats::run_stats(args, output, &project_root),
        Commands::Export(ref args) => cmd::export::run_export(args, output, &project_root),
        Commands::Completions(args) => {
            cmd::completions::run_completions(args.shell, &mut Cli::command())
        }
    }
}
