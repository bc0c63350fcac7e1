use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::db::{create_pool, DbPool};
use crate::repo::Repository;

#[derive(Clone)]
pub struct ClinicContext {
    pub config: Arc<Config>,
    pub db_pool: Arc<DbPool>,
    pub clock: Arc<dyn Clock>,
}

impl ClinicContext {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let db_pool = create_pool(&config.database).await?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock::new(config.clinic.timezone));
        Ok(ClinicContext {
            config: Arc::new(config),
            db_pool,
            clock,
        })
    }

    pub fn repo(&self) -> Repository {
        Repository::new(self.db_pool.clone())
    }
}
