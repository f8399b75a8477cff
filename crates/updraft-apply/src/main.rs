use std::process::ExitCode;

use clap::Parser;
use updraft_apply::{ApplyArgs, ApplyStatus, logging};

fn main() -> ExitCode {
    let args = match ApplyArgs::try_parse() {
        Ok(args) => args,
        Err(error) => {
            let _ = error.print();
            return if error.use_stderr() {
                ExitCode::from(ApplyStatus::InvalidArguments.exit_code())
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    logging::init_logging(args.log_file.as_deref());
    let result = updraft_apply::run(&args);
    if let Some(error) = &result.error {
        log::error!("Apply finished with {}: {error}", result.status.as_str());
    }
    ExitCode::from(result.exit_code())
}
