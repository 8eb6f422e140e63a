mod cucumber;

use ::cucumber::{codegen::LocalBoxFuture, event::ScenarioFinished, gherkin, writer, World};
use futures_util::FutureExt;
use ledger_engine::LedgerDatabase;
use log::*;
use sqlx::{migrate::MigrateDatabase, Sqlite};

use crate::cucumber::{LedgerSystem, LedgerWorld};

fn main() {
    dotenvy::from_filename(".env.test").ok();
    let _ = env_logger::try_init();
    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build().unwrap();
    runtime.block_on(
        LedgerWorld::cucumber()
            .with_writer(writer::Libtest::or_basic())
            .after(|_feature, _rule, scenario, finished, world| after_scenario(scenario, finished, world))
            .run("tests/features"),
    );
    info!("🧪️ Ledger feature run finished");
}

/// Passing scenarios clean up their database file. Failing ones keep it around for inspection.
fn after_scenario<'a>(
    scenario: &'a gherkin::Scenario,
    finished: &'a ScenarioFinished,
    world: Option<&'a mut LedgerWorld>,
) -> LocalBoxFuture<'a, ()> {
    async move {
        let Some(LedgerWorld { system: Some(system) }) = world else {
            debug!("🧪️ \"{}\" never opened a ledger. Nothing to clean up.", scenario.name);
            return;
        };
        match finished {
            ScenarioFinished::StepPassed => remove_ledger(system).await,
            ScenarioFinished::StepFailed(..) | ScenarioFinished::StepSkipped => {
                error!("🧪️ \"{}\" did not pass. Ledger kept at {}", scenario.name, system.db_path);
            },
            other => trace!("🧪️ Ignoring scenario outcome {other:?}"),
        }
    }
    .boxed_local()
}

async fn remove_ledger(system: &mut LedgerSystem) {
    if let Err(e) = system.db.close().await {
        warn!("🧪️ Could not close {}: {e}", system.db_path);
    }
    match Sqlite::drop_database(&system.db_path).await {
        Ok(()) => trace!("🧪️ Removed {}", system.db_path),
        Err(e) => warn!("🧪️ Could not remove {}: {e}", system.db_path),
    }
}
