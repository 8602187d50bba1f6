use crate::error::SendError;
use crate::plugin::ChannelPlugin;
use crate::{MessagePayload, NotificationChannel, ProviderReceipt};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

/// JSON SMS gateway channel. One POST per send; the worker owns retries.
pub struct SmsChannel {
    client: reqwest::Client,
    gateway_url: String,
    api_key: String,
}

impl SmsChannel {
    pub fn new(gateway_url: &str, api_key: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            gateway_url: gateway_url.to_string(),
            api_key: api_key.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct GatewayResponse {
    message_id: Option<String>,
    error_code: Option<String>,
    error_message: Option<String>,
}

#[async_trait]
impl NotificationChannel for SmsChannel {
    fn channel_name(&self) -> &str {
        "sms"
    }

    async fn send(
        &self,
        recipient: &str,
        payload: &MessagePayload,
    ) -> Result<ProviderReceipt, SendError> {
        let body = serde_json::json!({
            "to": recipient,
            "text": format!("{}\n{}", payload.subject, payload.body),
        });

        let resp = self
            .client
            .post(&self.gateway_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| SendError::Retryable {
                code: None,
                message: e.to_string(),
            })?;

        let status = resp.status();
        if status.as_u16() == 429 {
            return Err(SendError::RateLimited {
                code: Some("429".to_string()),
            });
        }

        let parsed: GatewayResponse = resp.json().await.unwrap_or(GatewayResponse {
            message_id: None,
            error_code: None,
            error_message: None,
        });

        if status.is_success() {
            return Ok(ProviderReceipt {
                message_id: parsed.message_id,
            });
        }

        let code = parsed
            .error_code
            .unwrap_or_else(|| status.as_u16().to_string());
        let message = parsed
            .error_message
            .unwrap_or_else(|| format!("gateway returned HTTP {status}"));
        if status.is_client_error() {
            Err(SendError::Fatal {
                code: Some(code),
                message,
            })
        } else {
            Err(SendError::Retryable {
                code: Some(code),
                message,
            })
        }
    }
}

// Plugin

#[derive(Deserialize)]
struct SmsConfig {
    gateway_url: String,
    api_key: String,
}

pub struct SmsPlugin;

impl ChannelPlugin for SmsPlugin {
    fn name(&self) -> &str {
        "sms"
    }

    fn recipient_type(&self) -> &str {
        "phone"
    }

    fn validate_config(&self, config: &Value) -> anyhow::Result<()> {
        serde_json::from_value::<SmsConfig>(config.clone())
            .map_err(|e| anyhow::anyhow!("Invalid sms config: {e}"))?;
        Ok(())
    }

    fn create_channel(&self, config: &Value) -> anyhow::Result<Box<dyn NotificationChannel>> {
        let cfg: SmsConfig = serde_json::from_value(config.clone())
            .map_err(|e| anyhow::anyhow!("Invalid sms config: {e}"))?;
        Ok(Box::new(SmsChannel::new(&cfg.gateway_url, &cfg.api_key)))
    }

    fn redact_config(&self, config: &Value) -> Value {
        let mut redacted = config.clone();
        if let Some(obj) = redacted.as_object_mut() {
            if obj.contains_key("api_key") {
                obj.insert("api_key".to_string(), Value::String("***".to_string()));
            }
        }
        redacted
    }
}
