use toolgate_core::config::LoadOptions;

use crate::commands::{block_on, load_config, open_store, CommandResult, Failure};

pub fn run(options: LoadOptions) -> CommandResult {
    let result = load_config(options).and_then(|config| {
        block_on(async {
            open_store(&config).await?;
            Ok::<(), Failure>(())
        })
    });

    match result {
        Ok(()) => CommandResult::success("migrate", "applied pending migrations"),
        Err(failure) => CommandResult::from_failure("migrate", failure),
    }
}
