fn main() -> anyhow::Result<()> {
    snapask::run()?;
    Ok(())
}
