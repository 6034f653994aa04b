use std::sync::Arc;

use sqlx::PgPool;

use crate::execute::ExecutionHandler;
use crate::notify::NotificationSink;

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub notifier: Arc<dyn NotificationSink>,
    pub executor: Arc<dyn ExecutionHandler>,
}
