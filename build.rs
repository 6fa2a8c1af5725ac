fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Exposes GIT_COMMIT_HASH and friends through `built_info`.
    built::write_built_file()?;
    Ok(())
}
