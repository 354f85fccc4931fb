use dotenvy::dotenv;
use eyre::Result;

/// Load `.env` from the working directory, if present. Must run before
/// argument parsing so `FLEET_*` variables from the file reach clap.
pub fn load_env() -> Result<()> {
    dotenv().ok();
    Ok(())
}
