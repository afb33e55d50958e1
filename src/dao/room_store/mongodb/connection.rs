use std::time::Duration;

use mongodb::{Client, Database, bson::doc, options::ClientOptions};
use tokio::time::sleep;
use tracing::warn;

use super::error::{MongoDaoError, MongoResult};

const MAX_PING_ATTEMPTS: u32 = 10;
const FIRST_RETRY_DELAY: Duration = Duration::from_millis(250);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Build a client and wait until the database answers a ping.
pub async fn connect_with_retry(
    options: &ClientOptions,
    database_name: &str,
) -> MongoResult<(Client, Database)> {
    let client = Client::with_options(options.clone())
        .map_err(|source| MongoDaoError::ClientConstruction { source })?;
    let database = client.database(database_name);

    let mut attempts = 0;
    let mut delay = FIRST_RETRY_DELAY;
    loop {
        attempts += 1;
        match database.run_command(doc! { "ping": 1 }).await {
            Ok(_) => return Ok((client, database)),
            Err(source) if attempts >= MAX_PING_ATTEMPTS => {
                return Err(MongoDaoError::InitialPing { attempts, source });
            }
            Err(err) => {
                warn!(attempts, error = %err, database = database_name, "MongoDB ping failed; retrying");
                sleep(delay).await;
                delay = (delay * 2).min(MAX_RETRY_DELAY);
            }
        }
    }
}
