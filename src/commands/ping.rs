//! Ping command - round trip to the database through a scope.

use sea_orm::{ConnectionTrait, Statement};

use crate::cli::args::PingArgs;
use crate::errors::{DataError, DataResult};
use crate::session::Session;
use crate::transaction::transaction;

/// Execute the ping command
pub async fn execute(args: PingArgs) -> DataResult<()> {
    tracing::info!("Pinging database...");

    let session_id = transaction(|scope| async move {
        select_one(scope.session()).await?;

        if args.nested {
            transaction(|savepoint| async move {
                tracing::debug!(depth = savepoint.depth(), "Inside savepoint");
                select_one(savepoint.session()).await
            })
            .await?;
        }
        Ok::<_, DataError>(scope.session().id())
    })
    .await?;

    tracing::info!(session = %session_id, "Database reachable");
    println!("ok");
    Ok(())
}

async fn select_one(session: &Session) -> DataResult<()> {
    let conn = session.connection().await?;
    let backend = conn.get_database_backend();
    conn.execute(Statement::from_string(backend, "SELECT 1".to_string()))
        .await?;
    Ok(())
}
