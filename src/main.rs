use std::process::ExitCode;

use clap::Parser;

use bandlink::{Args, fake_ble_adapter, real_ble_adapter, run};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let mut stdout = std::io::stdout();

    let run_result = async {
        let options = args.run_options();
        let discovery = args.discovery();
        let (command, maybe_fake_args) = args.into_command_and_fake_args()?;
        let adapter = match maybe_fake_args {
            Some(fake_args) => fake_ble_adapter(fake_args),
            None => real_ble_adapter(&discovery),
        };

        run(command, &mut stdout, adapter, options).await
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
