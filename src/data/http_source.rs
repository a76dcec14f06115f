// HTTP quote source backed by a JSON ticker endpoint

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;

use crate::config::SourceConfig;
use crate::data::{PriceSource, SourceError};
use crate::types::Quote;

#[derive(Debug, Deserialize)]
struct TickerPayload {
    symbol: Option<String>,
    name: Option<String>,
    last: f64,
    #[serde(default)]
    high: f64,
    #[serde(default)]
    low: f64,
    #[serde(default)]
    volume: f64,
}

/// Quote adapter over a JSON HTTP ticker endpoint. The configured URL is a
/// template with `{symbol}` substituted per request.
pub struct HttpQuoteSource {
    name: String,
    url_template: String,
    max_errors: u32,
    client: reqwest::Client,
}

impl HttpQuoteSource {
    pub fn new(config: &SourceConfig) -> Self {
        Self {
            name: config.name.clone(),
            url_template: config.url.clone(),
            max_errors: config.max_errors,
            client: reqwest::Client::new(),
        }
    }

    fn url_for(&self, symbol: &str) -> String {
        self.url_template.replace("{symbol}", symbol)
    }
}

#[async_trait]
impl PriceSource for HttpQuoteSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn max_errors(&self) -> u32 {
        self.max_errors
    }

    async fn fetch(&self, symbol: &str) -> Result<Quote, SourceError> {
        let url = self.url_for(symbol);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SourceError::Timeout
                } else {
                    SourceError::Transport(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(SourceError::Transport(format!(
                "HTTP {} from {}",
                response.status(),
                self.name
            )));
        }

        let payload: TickerPayload = response
            .json()
            .await
            .map_err(|e| SourceError::Parse(e.to_string()))?;

        if payload.last <= 0.0 {
            return Err(SourceError::InvalidQuote(payload.last));
        }

        Ok(Quote {
            symbol: payload.symbol.unwrap_or_else(|| symbol.to_string()),
            name: payload.name.unwrap_or_default(),
            last_price: payload.last,
            high: payload.high,
            low: payload.low,
            volume: payload.volume,
            timestamp: Utc::now(),
        })
    }
}
