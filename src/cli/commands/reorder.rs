use crate::errors::Result;
use crate::sign::GpgSigner;

pub fn run(change: &str, index: usize) -> Result<()> {
    let mut manager = super::open_manager()?;
    let signer = GpgSigner::new();

    let result = manager.reorder_change(&signer, change, index)?;
    super::print_sync_result(&result);
    Ok(())
}
