use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, instrument};

use crate::{
    configuration::NotifySettings,
    error_result::{Error, Result},
};

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct NotifyMessage {
    target: String,
    title: String,
    notes: String,
}

/// fire and forget notifications to the managers' channel
#[derive(Debug)]
pub struct NotifyService {
    http_client: Arc<reqwest::Client>,
    enabled: bool,
    url: String,
    target: String,
}

impl NotifyService {
    pub fn new(settings: &NotifySettings) -> Self {
        Self {
            http_client: Arc::new(reqwest::Client::new()),
            enabled: settings.enabled,
            url: format!("{}/notify", settings.get_service_url()),
            target: settings.target.clone(),
        }
    }

    #[instrument(name = "call notify", skip(self, notes))]
    pub fn call_notify(&self, title: String, notes: String) {
        if !self.enabled {
            info!("notify disabled, dropped: {title}");
            return;
        }
        let http_client = self.http_client.clone();
        let url = self.url.clone();
        let message = NotifyMessage {
            target: self.target.clone(),
            title,
            notes,
        };
        tokio::task::spawn(async move {
            if let Err(e) = post_notify(&http_client, &url, &message).await {
                error!("notify {} failed: {e}", message.title);
            }
        });
    }
}

async fn post_notify(http_client: &reqwest::Client, url: &str, message: &NotifyMessage) -> Result<()> {
    let resp = http_client.post(url).json(message).send().await?;
    if resp.status().as_u16() >= 400 {
        let err = resp.text().await?;
        return Err(Error::HttpResponse(err));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(enabled: bool) -> NotifySettings {
        NotifySettings {
            enabled,
            host: String::from("127.0.0.1"),
            port: 25504,
            target: String::from("backoffice-managers"),
        }
    }

    #[test]
    fn notify_url_and_body() {
        let service = NotifyService::new(&settings(true));
        assert_eq!(service.url, "http://127.0.0.1:25504/notify");
        let body = serde_json::to_value(NotifyMessage {
            target: service.target.clone(),
            title: String::from("t"),
            notes: String::from("n"),
        })
        .unwrap();
        assert_eq!(body["target"], "backoffice-managers");
        assert_eq!(body["title"], "t");
    }

    #[tokio::test]
    async fn disabled_service_sends_nothing() {
        let service = NotifyService::new(&settings(false));
        assert!(!service.enabled);
        // returns without spawning
        service.call_notify(String::from("title"), String::from("notes"));
    }
}
