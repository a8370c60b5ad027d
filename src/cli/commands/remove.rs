use crate::errors::Result;
use crate::sign::GpgSigner;

pub fn run(change: &str) -> Result<()> {
    let mut manager = super::open_manager()?;
    let signer = GpgSigner::new();

    let result = manager.remove_change(&signer, change)?;
    super::print_sync_result(&result);
    Ok(())
}
