use raffle_execution::{LogNotifier, Notifier, NotifyError, WinnerNotice};
use reqwest::Client;
use std::time::Duration;
use tracing::info;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// POSTs each notice as JSON to a mail relay.
#[derive(Clone, Debug)]
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(WEBHOOK_TIMEOUT).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

impl Notifier for WebhookNotifier {
    async fn notify_winner(&self, notice: WinnerNotice) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.url)
            .json(&notice)
            .send()
            .await
            .map_err(|err| NotifyError::Delivery(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Rejected(status.as_u16()));
        }
        info!(email = %notice.email, gift = %notice.gift_name, "winner notified");
        Ok(())
    }
}

/// The notifier selected by configuration.
#[derive(Clone, Debug)]
pub enum ServerNotifier {
    Log(LogNotifier),
    Webhook(WebhookNotifier),
}

impl ServerNotifier {
    pub fn from_url(url: Option<&str>) -> anyhow::Result<Self> {
        match url {
            Some(url) => Ok(Self::Webhook(WebhookNotifier::new(url)?)),
            None => Ok(Self::Log(LogNotifier)),
        }
    }
}

impl Notifier for ServerNotifier {
    async fn notify_winner(&self, notice: WinnerNotice) -> Result<(), NotifyError> {
        match self {
            Self::Log(notifier) => notifier.notify_winner(notice).await,
            Self::Webhook(notifier) => notifier.notify_winner(notice).await,
        }
    }
}
