//! Renders domain events into the Dooray-style webhook payload:
//! `botName`, `text`, and optional `attachments[]` with
//! `title`/`titleLink`/`color`.

use fc_common::WarningEvent;
use fc_health::HealthEvent;
use serde::Serialize;
use tracing::warn;

#[derive(Debug, Serialize)]
pub struct Attachment {
    pub title: String,
    #[serde(rename = "titleLink", skip_serializing_if = "Option::is_none")]
    pub title_link: Option<String>,
    pub color: String,
}

#[derive(Debug, Serialize)]
pub struct WebhookPayload {
    #[serde(rename = "botName")]
    pub bot_name: String,
    pub text: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

const COLOR_ANNOUNCE: &str = "#e53935";
const COLOR_UPDATE: &str = "#fb8c00";
const COLOR_RELEASE: &str = "#43a047";
const COLOR_HEALTH_INCIDENT: &str = "#b71c1c";
const COLOR_HEALTH_RECOVERED: &str = "#2e7d32";

pub struct MessageBuilder {
    pub bot_name: String,
    pub report_base_url: String,
}

impl MessageBuilder {
    pub fn new(bot_name: impl Into<String>, report_base_url: impl Into<String>) -> Self {
        Self {
            bot_name: bot_name.into(),
            report_base_url: report_base_url.into(),
        }
    }

    /// Builds the payload for one warning event. When the report URL
    /// cannot be built, the attachment link is omitted and a
    /// `notification.url_attachment_blocked` event is logged rather
    /// than failing the send.
    pub fn build_warning_message(&self, event: &WarningEvent) -> WebhookPayload {
        let title_link = match event.build_report_url(&self.report_base_url) {
            Ok(link) => link,
            Err(reason) => {
                warn!(
                    event = "notification.url_attachment_blocked",
                    region_code = %event.region_code,
                    reason,
                );
                None
            }
        };

        let color = match event.action_code {
            fc_common::event::ActionCode::Announce => COLOR_ANNOUNCE,
            fc_common::event::ActionCode::Continue | fc_common::event::ActionCode::Update => {
                COLOR_UPDATE
            }
            fc_common::event::ActionCode::Release => COLOR_RELEASE,
        };

        let text = format!(
            "[{}] {} {} {}",
            event.region_name, event.kind_code, event.level_code, action_label(event)
        );

        WebhookPayload {
            bot_name: self.bot_name.clone(),
            text,
            attachments: vec![Attachment {
                title: format!("{} warning detail", event.region_name),
                title_link,
                color: color.to_string(),
            }],
        }
    }

    /// Builds the payload for a health-monitor transition.
    pub fn build_health_message(&self, event: &HealthEvent) -> WebhookPayload {
        let (text, color) = match event {
            HealthEvent::OutageDetected => (
                "Upstream weather API outage detected".to_string(),
                COLOR_HEALTH_INCIDENT,
            ),
            HealthEvent::OutageHeartbeat => (
                "Upstream weather API outage ongoing".to_string(),
                COLOR_HEALTH_INCIDENT,
            ),
            HealthEvent::Recovered { backfill_segments } => (
                format!(
                    "Upstream weather API recovered; {} backfill segment(s) scheduled",
                    backfill_segments
                ),
                COLOR_HEALTH_RECOVERED,
            ),
        };

        WebhookPayload {
            bot_name: self.bot_name.clone(),
            text,
            attachments: vec![Attachment {
                title: "Health status".to_string(),
                title_link: None,
                color: color.to_string(),
            }],
        }
    }
}

fn action_label(event: &WarningEvent) -> &'static str {
    if event.cancel_flag {
        return "cancelled";
    }
    match event.action_code {
        fc_common::event::ActionCode::Announce => "announced",
        fc_common::event::ActionCode::Continue => "continuing",
        fc_common::event::ActionCode::Update => "updated",
        fc_common::event::ActionCode::Release => "released",
    }
}
