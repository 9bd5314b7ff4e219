use crate::domain::candle::{Candle, Interval};
use crate::domain::errors::ExchangeError;
use crate::domain::ports::ExchangeAdapter;
use async_trait::async_trait;
use reqwest::Client;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use rust_decimal::Decimal;
use std::time::Duration;
use tracing::{debug, info};

const DEFAULT_BASE_URL: &str = "https://api.binance.com";

/// Binance spot market-data adapter (public klines endpoint only; the
/// engine produces intents, not venue orders, so nothing here is signed).
pub struct BinanceExchange {
    client: ClientWithMiddleware,
    base_url: String,
}

impl BinanceExchange {
    pub fn builder() -> BinanceExchangeBuilder {
        BinanceExchangeBuilder::default()
    }

    /// Decimal places for a symbol's price ticks. The common USDT-pair
    /// filters are seeded statically; anything else renders at full
    /// precision.
    fn price_decimals(symbol: &str) -> u32 {
        match symbol {
            "BTCUSDT" | "ETHUSDT" | "BNBUSDT" | "SOLUSDT" => 2,
            "XRPUSDT" | "ADAUSDT" | "DOGEUSDT" => 4,
            _ => 8,
        }
    }

    fn quantity_decimals(symbol: &str) -> u32 {
        match symbol {
            "BTCUSDT" | "ETHUSDT" => 5,
            "BNBUSDT" | "SOLUSDT" => 3,
            _ => 2,
        }
    }

    fn build_url(&self, symbol: &str, interval: Interval, limit: usize, ending_at: Option<i64>) -> String {
        let mut url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&limit={}",
            self.base_url,
            symbol,
            interval.to_binance_string(),
            limit
        );
        if let Some(end) = ending_at {
            url.push_str(&format!("&endTime={}", end));
        }
        url
    }
}

#[derive(Default)]
pub struct BinanceExchangeBuilder {
    base_url: Option<String>,
    max_retries: Option<u32>,
}

impl BinanceExchangeBuilder {
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn build(self) -> BinanceExchange {
        let retry_policy = ExponentialBackoff::builder()
            .build_with_max_retries(self.max_retries.unwrap_or(3));

        let client = Client::builder()
            .pool_max_idle_per_host(5)
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());

        BinanceExchange {
            client: ClientBuilder::new(client)
                .with(RetryTransientMiddleware::new_with_policy(retry_policy))
                .build(),
            base_url: self.base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }
}

#[async_trait]
impl ExchangeAdapter for BinanceExchange {
    fn name(&self) -> &str {
        "binance"
    }

    async fn get_candles(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
        ending_at: Option<i64>,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let url = self.build_url(symbol, interval, limit, ending_at);
        debug!("BinanceExchange [{}]: GET {}", symbol, url);

        let response = self.client.get(&url).send().await.map_err(|e| {
            ExchangeError::Unavailable {
                reason: format!("klines request failed: {}", e),
            }
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            // Binance reports -1121 for an unknown symbol.
            if body.contains("-1121") || body.contains("Invalid symbol") {
                return Err(ExchangeError::SymbolUnknown {
                    symbol: symbol.to_string(),
                });
            }
            return Err(ExchangeError::Unavailable {
                reason: format!("klines fetch failed ({}): {}", status, body),
            });
        }

        // Kline format: [openTime, open, high, low, close, volume, ...]
        let klines: Vec<serde_json::Value> =
            response.json().await.map_err(|e| ExchangeError::Unavailable {
                reason: format!("failed to parse klines: {}", e),
            })?;

        let candles: Vec<Candle> = klines
            .into_iter()
            .filter_map(|k| {
                let arr = k.as_array()?;
                if arr.len() < 6 {
                    return None;
                }
                Some(Candle {
                    open_time: arr[0].as_i64()?,
                    open: arr[1].as_str()?.parse().ok()?,
                    high: arr[2].as_str()?.parse().ok()?,
                    low: arr[3].as_str()?.parse().ok()?,
                    close: arr[4].as_str()?.parse().ok()?,
                    volume: arr[5].as_str()?.parse().ok()?,
                })
            })
            .collect();

        info!(
            "BinanceExchange [{}]: fetched {} candle(s) at {}",
            symbol,
            candles.len(),
            interval
        );
        Ok(candles)
    }

    fn format_price(&self, symbol: &str, price: Decimal) -> String {
        price.round_dp(Self::price_decimals(symbol)).to_string()
    }

    fn format_quantity(&self, symbol: &str, qty: Decimal) -> String {
        qty.round_dp(Self::quantity_decimals(symbol)).to_string()
    }
}
