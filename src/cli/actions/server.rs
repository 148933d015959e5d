use crate::clock::{Clock, SystemClock};
use crate::mail::{HttpMailer, LogMailer, MailSender};
use crate::session::Sessions;
use crate::sigilo::{self, AppState};
use crate::store::{MemoryStore, PgStore, Store};
use crate::tokens::{TokenSecrets, TokenService};
use anyhow::Result;
use secrecy::SecretString;
use std::sync::Arc;
use tracing::info;
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: Option<String>,
    pub online_secret: SecretString,
    pub offline_secret: SecretString,
    pub challenge_secret: SecretString,
    pub system_secret: SecretString,
    pub mail_url: Option<String>,
    pub mail_api_key: Option<SecretString>,
    pub mail_from: String,
}

/// Assemble store, mailer, token service, and orchestrator, then serve.
/// # Errors
/// Returns an error if the store cannot connect or the server fails to start.
pub async fn handle(args: Args) -> Result<()> {
    let store: Arc<dyn Store> = match &args.dsn {
        Some(dsn) => Arc::new(PgStore::connect(dsn).await?),
        None => {
            info!("No DSN provided, using the in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let mailer: Arc<dyn MailSender> = match (&args.mail_url, &args.mail_api_key) {
        (Some(url), Some(api_key)) => Arc::new(HttpMailer::new(
            Url::parse(url)?,
            api_key.clone(),
            args.mail_from.clone(),
        )?),
        _ => {
            info!("No mail endpoint configured, logging outbound mail");
            Arc::new(LogMailer)
        }
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let secrets = TokenSecrets::new(
        args.online_secret,
        args.offline_secret,
        args.challenge_secret,
        args.system_secret,
    );
    let tokens = Arc::new(TokenService::new(&secrets, clock.clone()));
    let sessions = Arc::new(Sessions::new(
        store.clone(),
        mailer,
        tokens,
        clock,
    ));

    sigilo::new(args.port, AppState { sessions, store }).await
}
