fn main() -> anyhow::Result<()> {
    enforcer::cli::run_cli()
}
