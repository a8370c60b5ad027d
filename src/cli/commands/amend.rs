use crate::errors::Result;
use crate::sign::GpgSigner;

pub fn run(change: Option<&str>, message: Option<&str>, staged: bool) -> Result<()> {
    let mut manager = super::open_manager()?;
    let signer = GpgSigner::new();

    let result = manager.amend_change(&signer, change, message, staged)?;
    super::print_sync_result(&result);
    Ok(())
}
