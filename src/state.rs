use std::sync::Arc;

use mongodb::Database;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::services::mpesa_service::MpesaService;
use crate::services::sms_service::SmsService;

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub config: Arc<AppConfig>,
    pub mpesa: Option<Arc<MpesaService>>,
    pub sms: Option<Arc<SmsService>>,
    // Root token for background work (payment status watchers); cancelled on
    // shutdown so no poll loop outlives the server.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(db: Database, config: AppConfig) -> Self {
        AppState {
            db,
            config: Arc::new(config),
            mpesa: None,
            sms: None,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_mpesa(mut self, mpesa: Arc<MpesaService>) -> Self {
        self.mpesa = Some(mpesa);
        self
    }

    pub fn with_sms(mut self, sms: Arc<SmsService>) -> Self {
        self.sms = Some(sms);
        self
    }
}
