use facecap_lib::cli::{self, Args};

fn main() {
    let args: Vec<String> = std::env::args().collect();

    let args = match Args::parse(&args) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(2);
        }
    };

    // Init logging
    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    if let Err(e) = cli::run(args) {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
}
