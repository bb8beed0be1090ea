use arx_roundtrip::cli::{Cli, Command, InspectArgs, ShutdownController};
use arx_roundtrip::level::{self, LevelHeader};
use arx_roundtrip::{Harness, RtResult};
use clap::Parser;

fn main() {
    let cli = Cli::parse();
    arx_roundtrip::logging::init_with_verbosity(cli.verbose);

    if let Err(e) = ShutdownController::install() {
        tracing::warn!("failed to install Ctrl+C handler: {e}");
    }

    if let Err(error) = run(cli.into_command()) {
        if ShutdownController::is_shutting_down() {
            eprintln!("interrupted: {error}");
            std::process::exit(ShutdownController::signal_exit_code());
        }
        eprintln!("error [{}]: {error}", error.error_code());
        std::process::exit(error.exit_code());
    }
}

fn run(command: Command) -> RtResult<()> {
    match command {
        Command::Run(args) => {
            let harness = Harness::new(args.resolve()?);
            let report = harness.run()?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "round trip: {} | arx: {} | log: {}",
                    report.outcome(),
                    if report.validation.loaded {
                        "loaded"
                    } else {
                        "failed"
                    },
                    report.log_path.display()
                );
            }
            Ok(())
        }
        Command::Restore(args) => {
            let harness = Harness::new(args.resolve()?);
            let receipt = harness.restore_only()?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&receipt)?);
            } else {
                println!(
                    "restored {} ({} bytes, sha256 {})",
                    receipt.working_file.display(),
                    receipt.bytes,
                    receipt.sha256
                );
            }
            Ok(())
        }
        Command::Script(args) => {
            let config = args.resolve()?;
            print!("{}", arx_roundtrip::script::render(&config)?);
            Ok(())
        }
        Command::Inspect(args) => inspect(&args),
    }
}

fn inspect(args: &InspectArgs) -> RtResult<()> {
    let value = match &args.against {
        Some(reference) => serde_json::to_value(level::compare(reference, &args.file)?)?,
        None => serde_json::to_value(LevelHeader::read(&args.file)?)?,
    };
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
