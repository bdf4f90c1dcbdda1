mod cli;

use anyhow::Result;

fn main() -> Result<()> {
    let app = cli::CLIApp::new();

    let level = if app.verbose() {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    app.run()
}
