use crate::error::SendError;
use crate::plugin::ChannelPlugin;
use crate::{MessagePayload, NotificationChannel, ProviderReceipt};
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::Deserialize;
use serde_json::Value;

/// Async SMTP channel.
pub struct EmailChannel {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
}

impl EmailChannel {
    pub fn new(
        smtp_host: &str,
        smtp_port: u16,
        username: Option<&str>,
        password: Option<&str>,
        from: &str,
    ) -> anyhow::Result<Self> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(smtp_host)?.port(smtp_port);
        if let (Some(user), Some(pass)) = (username, password) {
            builder = builder.credentials(Credentials::new(user.to_string(), pass.to_string()));
        }
        Ok(Self {
            transport: builder.build(),
            from: from.to_string(),
        })
    }
}

fn classify_smtp(e: lettre::transport::smtp::Error) -> SendError {
    let code = e.status().map(|c| c.to_string());
    if e.is_permanent() {
        SendError::Fatal {
            code,
            message: e.to_string(),
        }
    } else {
        // Transient rejections and transport failures both come back here;
        // SMTP throttling surfaces as 4xx transient codes.
        SendError::Retryable {
            code,
            message: e.to_string(),
        }
    }
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    fn channel_name(&self) -> &str {
        "email"
    }

    async fn send(
        &self,
        recipient: &str,
        payload: &MessagePayload,
    ) -> Result<ProviderReceipt, SendError> {
        let from = self.from.parse().map_err(|e| SendError::Fatal {
            code: None,
            message: format!("invalid from address '{}': {e}", self.from),
        })?;
        let to = recipient.parse().map_err(|e| SendError::Fatal {
            code: None,
            message: format!("invalid recipient address '{recipient}': {e}"),
        })?;
        let email = Message::builder()
            .from(from)
            .to(to)
            .subject(&payload.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(payload.body.clone())
            .map_err(|e| SendError::Fatal {
                code: None,
                message: e.to_string(),
            })?;

        let resp = self.transport.send(email).await.map_err(classify_smtp)?;
        let message_id = resp.message().next().map(str::to_owned);
        Ok(ProviderReceipt { message_id })
    }
}

// Plugin

#[derive(Deserialize)]
struct EmailConfig {
    smtp_host: String,
    smtp_port: u16,
    smtp_username: Option<String>,
    smtp_password: Option<String>,
    from: String,
}

pub struct EmailPlugin;

impl ChannelPlugin for EmailPlugin {
    fn name(&self) -> &str {
        "email"
    }

    fn recipient_type(&self) -> &str {
        "email"
    }

    fn validate_config(&self, config: &Value) -> anyhow::Result<()> {
        serde_json::from_value::<EmailConfig>(config.clone())
            .map_err(|e| anyhow::anyhow!("Invalid email config: {e}"))?;
        Ok(())
    }

    fn create_channel(&self, config: &Value) -> anyhow::Result<Box<dyn NotificationChannel>> {
        let cfg: EmailConfig = serde_json::from_value(config.clone())
            .map_err(|e| anyhow::anyhow!("Invalid email config: {e}"))?;
        let channel = EmailChannel::new(
            &cfg.smtp_host,
            cfg.smtp_port,
            cfg.smtp_username.as_deref(),
            cfg.smtp_password.as_deref(),
            &cfg.from,
        )?;
        Ok(Box::new(channel))
    }

    fn redact_config(&self, config: &Value) -> Value {
        let mut redacted = config.clone();
        if let Some(obj) = redacted.as_object_mut() {
            if obj.contains_key("smtp_password") {
                obj.insert(
                    "smtp_password".to_string(),
                    Value::String("***".to_string()),
                );
            }
        }
        redacted
    }
}
