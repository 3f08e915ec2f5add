use clap::Parser;

fn main() {
    let cli = vodpipectl::Cli::parse();
    vodpipectl::init_tracing(cli.log_json);
    if let Err(err) = vodpipectl::run(cli) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
