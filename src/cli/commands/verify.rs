use crate::cli::output::Output;
use crate::errors::Result;
use crate::sign::GpgSigner;

pub fn run() -> Result<()> {
    let manager = super::open_manager()?;
    let signer = GpgSigner::new();

    let count = manager.verify(&signer)?;
    Output::success(format!("All {count} change commit(s) verified"));
    Ok(())
}
