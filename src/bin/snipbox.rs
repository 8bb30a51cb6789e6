use anyhow::Result;

fn main() -> Result<()> {
    let code = snipbox::cli::run()?;
    std::process::exit(code)
}
