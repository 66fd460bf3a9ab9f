fn main() -> anyhow::Result<()> {
    faultline::cli::run()
}
