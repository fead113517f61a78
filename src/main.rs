use std::process::ExitCode;

use clap::Parser;

use blemidi::{Args, Backend, SystemTerminalClient, default_output_format, run_with_log_level};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let mut stdout = std::io::stdout();

    let run_result = async {
        let log_level = args.log_level();
        let output_format = args
            .output_format()
            .unwrap_or_else(|| default_output_format(&SystemTerminalClient));
        let (command, maybe_fake_args) = args.into_command_and_fake_args();

        run_with_log_level(
            command,
            &mut stdout,
            Backend::from_fake_args(maybe_fake_args),
            log_level,
            output_format,
        )
        .await
    }
    .await;

    match run_result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::from(1)
        }
    }
}
