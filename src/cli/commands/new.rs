use crate::cli::output::Output;
use crate::errors::Result;
use crate::sign::GpgSigner;

pub fn run(message: &str, description: Option<&str>, staged: bool) -> Result<()> {
    let mut manager = super::open_manager()?;
    let signer = GpgSigner::new();

    let change = manager.new_change(&signer, message, description, staged)?;

    Output::success(format!("Created change '{}'", change.title));
    Output::sub_item(format!("Id: {}", &change.id.to_string()[..8]));
    Output::sub_item(format!("Branch: {}", change.branch));
    Output::sub_item(format!("Commit: {}", change.short_hash()));
    Ok(())
}
