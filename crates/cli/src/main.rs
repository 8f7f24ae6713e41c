use anyhow::Result;
use clap::Parser;

use summarizer_cli::Cli;

fn main() -> Result<()> {
    summarizer_observability::init();

    let cli = Cli::parse();
    let stdout = std::io::stdout();
    summarizer_cli::run(cli, &mut stdout.lock())
}
