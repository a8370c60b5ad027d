use crate::cli::output::Output;
use crate::errors::Result;

pub fn run() -> Result<()> {
    let manager = super::open_manager()?;

    let deleted = manager.cleanup()?;
    if deleted.is_empty() {
        Output::info("No orphaned refs.");
    } else {
        for name in &deleted {
            Output::success(format!("Deleted {name}"));
        }
    }
    Ok(())
}
