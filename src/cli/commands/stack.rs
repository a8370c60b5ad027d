use crate::cli::output::Output;
use crate::cli::StackAction;
use crate::errors::Result;

pub fn run(action: StackAction) -> Result<()> {
    let mut manager = super::open_manager()?;

    match action {
        StackAction::New { name, base } => {
            let stack = manager.create_stack(&name, base)?;
            Output::success(format!("Created stack '{}'", stack.name));
            Output::sub_item(format!("Upstream: {}", stack.upstream));
            Output::sub_item(format!("Base: {}", &stack.base_hash[..8]));
        }
        StackAction::List => {
            let active = manager.active_stack_name().ok();
            let names = manager.stack_names();
            if names.is_empty() {
                Output::info("No stacks. Create one with 'us stack new <name>'.");
                return Ok(());
            }
            for name in names {
                let stack = manager.get_stack(&name)?;
                let marker = if active.as_deref() == Some(name.as_str()) {
                    "*"
                } else {
                    " "
                };
                println!(
                    "{marker} {name} ({} changes, on {})",
                    stack.len(),
                    stack.upstream
                );
            }
        }
        StackAction::Switch { name } => {
            manager.switch_stack(&name)?;
            Output::success(format!("Switched to stack '{name}'"));
        }
        StackAction::Delete { name } => {
            manager.delete_stack(&name)?;
            Output::success(format!("Deleted stack '{name}'"));
        }
    }
    Ok(())
}
