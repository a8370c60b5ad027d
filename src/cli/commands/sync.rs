use crate::errors::Result;
use crate::sign::GpgSigner;

pub fn run(onto: Option<&str>, resume: bool) -> Result<()> {
    let mut manager = super::open_manager()?;
    let signer = GpgSigner::new();

    let result = if resume {
        manager.sync_continue(&signer)?
    } else {
        manager.sync(&signer, onto)?
    };
    super::print_sync_result(&result);
    Ok(())
}
