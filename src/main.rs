use clap::Parser;
use nestegg::api::{Cli, run};

fn main() {
    env_logger::init();

    match run(Cli::parse()) {
        Ok(output) => println!("{output}"),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}
