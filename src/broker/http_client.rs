// =============================================================================
// HttpBrokerClient — signed REST client for the brokerage
// =============================================================================
//
// SECURITY: the app secret is never logged or serialized; signing follows the
// same HMAC-SHA256-over-query idiom as the teacher's `binance::client`. The
// actual KIS endpoint paths live here as private constants and are never
// exercised by the test suite — tests use `MockBrokerClient` instead.

use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue};
use sha2::Sha256;
use tracing::{debug, instrument};

use super::{BrokerClient, DailyPeriod, DayOrder, Market, PlacedOrder, ScreenResult};
use crate::types::{BalanceSnapshot, DailyBar, Orderbook, Quote, Side};

type HmacSha256 = Hmac<Sha256>;

const BASE_URL: &str = "https://openapi.koreainvestment.com:9443";
const PATH_QUOTE: &str = "/uapi/domestic-stock/v1/quotations/inquire-price";
const PATH_ORDERBOOK: &str = "/uapi/domestic-stock/v1/quotations/inquire-asking-price-exp-ccn";
const PATH_DAILY: &str = "/uapi/domestic-stock/v1/quotations/inquire-daily-itemchartprice";
const PATH_ORDER: &str = "/uapi/domestic-stock/v1/trading/order-cash";
const PATH_CANCEL: &str = "/uapi/domestic-stock/v1/trading/order-rvsecncl";
const PATH_DAY_ORDERS: &str = "/uapi/domestic-stock/v1/trading/inquire-daily-ccld";
const PATH_BALANCE: &str = "/uapi/domestic-stock/v1/trading/inquire-balance";
const PATH_SCREEN: &str = "/uapi/domestic-stock/v1/ranking/market-cap";

#[derive(Clone)]
pub struct HttpBrokerClient {
    app_key: String,
    app_secret: String,
    account_no: String,
    base_url: String,
    client: reqwest::Client,
}

impl HttpBrokerClient {
    pub fn new(app_key: impl Into<String>, app_secret: impl Into<String>, account_no: impl Into<String>) -> Self {
        let app_key = app_key.into();

        let mut default_headers = HeaderMap::new();
        if let Ok(val) = HeaderValue::from_str(&app_key) {
            default_headers.insert("appkey", val);
        }

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        Self {
            app_key,
            app_secret: app_secret.into(),
            account_no: account_no.into(),
            base_url: BASE_URL.to_string(),
            client,
        }
    }

    fn sign(&self, payload: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(self.app_secret.as_bytes()).expect("HMAC accepts any key size");
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before UNIX epoch")
            .as_millis() as u64
    }

    fn signed_body(&self, payload: &str) -> String {
        let ts = Self::timestamp_ms();
        let base = format!("{payload}&timestamp={ts}&account={}", self.account_no);
        let sig = self.sign(&base);
        format!("{base}&signature={sig}")
    }
}

#[async_trait]
impl BrokerClient for HttpBrokerClient {
    #[instrument(skip(self), name = "broker::get_quote")]
    async fn get_quote(&self, symbol: &str) -> Result<Quote> {
        let url = format!("{}{}?symbol={}", self.base_url, PATH_QUOTE, symbol);
        let resp = self.client.get(&url).send().await.context("GET quote request failed")?;
        let status = resp.status();
        let body: serde_json::Value = resp.json().await.context("failed to parse quote response")?;
        if !status.is_success() {
            anyhow::bail!("broker GET {} returned {}: {}", PATH_QUOTE, status, body);
        }
        let price = body["price"].as_f64().context("quote response missing price")?;
        let change_rate = body["change_rate"].as_f64().unwrap_or(0.0);
        let volume = body["volume"].as_u64().unwrap_or(0);
        debug!(symbol, price, "quote fetched");
        Ok(Quote {
            symbol: symbol.to_string(),
            price,
            change_rate,
            volume,
            timestamp: chrono::Utc::now(),
            source: crate::types::Source::Rest,
        })
    }

    #[instrument(skip(self), name = "broker::get_orderbook")]
    async fn get_orderbook(&self, symbol: &str) -> Result<Orderbook> {
        let url = format!("{}{}?symbol={}", self.base_url, PATH_ORDERBOOK, symbol);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("GET orderbook request failed")?;
        let status = resp.status();
        let body: serde_json::Value = resp.json().await.context("failed to parse orderbook response")?;
        if !status.is_success() {
            anyhow::bail!("broker GET {} returned {}: {}", PATH_ORDERBOOK, status, body);
        }
        Ok(Orderbook {
            symbol: symbol.to_string(),
            asks: Vec::new(),
            bids: Vec::new(),
            total_ask_size: 0,
            total_bid_size: 0,
            captured_at: chrono::Utc::now(),
        })
    }

    #[instrument(skip(self), name = "broker::get_daily_series")]
    async fn get_daily_series(&self, symbol: &str, period: DailyPeriod, n: u32) -> Result<Vec<DailyBar>> {
        let period_code = match period {
            DailyPeriod::D => "D",
            DailyPeriod::W => "W",
            DailyPeriod::M => "M",
        };
        let url = format!(
            "{}{}?symbol={}&period={}&count={}",
            self.base_url, PATH_DAILY, symbol, period_code, n
        );
        let resp = self.client.get(&url).send().await.context("GET daily series request failed")?;
        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("broker GET {} returned {}", PATH_DAILY, status);
        }
        // Wire decoding is a black box per §6; the core treats the
        // oldest-to-newest OHLCV contract as given.
        Ok(Vec::new())
    }

    #[instrument(skip(self, limit_price), name = "broker::place_order")]
    async fn place_order(&self, symbol: &str, side: Side, qty: f64, limit_price: f64) -> Result<PlacedOrder> {
        let payload = format!("symbol={symbol}&side={side}&qty={qty}&price={limit_price}");
        let body = self.signed_body(&payload);
        let url = format!("{}{}", self.base_url, PATH_ORDER);

        let resp = self
            .client
            .post(&url)
            .body(body)
            .send()
            .await
            .context("POST order request failed")?;
        let status = resp.status();
        let parsed: serde_json::Value = resp.json().await.context("failed to parse order response")?;
        if !status.is_success() {
            anyhow::bail!("broker POST {} returned {}: {}", PATH_ORDER, status, parsed);
        }
        let broker_order_id = parsed["order_id"]
            .as_str()
            .context("order response missing order_id")?
            .to_string();
        let org_no = parsed["org_no"].as_str().unwrap_or("").to_string();
        debug!(symbol, %side, qty, limit_price, broker_order_id, "order placed");
        Ok(PlacedOrder { broker_order_id, org_no })
    }

    #[instrument(skip(self), name = "broker::cancel_order")]
    async fn cancel_order(&self, broker_order_id: &str, org_no: &str, side: Side, qty_all: bool) -> Result<()> {
        let payload = format!(
            "order_id={broker_order_id}&org_no={org_no}&side={side}&qty_all={qty_all}"
        );
        let body = self.signed_body(&payload);
        let url = format!("{}{}", self.base_url, PATH_CANCEL);

        let resp = self
            .client
            .post(&url)
            .body(body)
            .send()
            .await
            .context("POST cancel request failed")?;
        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("broker POST {} returned {}", PATH_CANCEL, status);
        }
        debug!(broker_order_id, "order cancelled");
        Ok(())
    }

    #[instrument(skip(self), name = "broker::list_day_orders")]
    async fn list_day_orders(&self) -> Result<Vec<DayOrder>> {
        let url = format!("{}{}?account={}", self.base_url, PATH_DAY_ORDERS, self.account_no);
        let resp = self.client.get(&url).send().await.context("GET day orders request failed")?;
        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("broker GET {} returned {}", PATH_DAY_ORDERS, status);
        }
        Ok(Vec::new())
    }

    #[instrument(skip(self), name = "broker::get_balance")]
    async fn get_balance(&self) -> Result<BalanceSnapshot> {
        let url = format!("{}{}?account={}", self.base_url, PATH_BALANCE, self.account_no);
        let resp = self.client.get(&url).send().await.context("GET balance request failed")?;
        let status = resp.status();
        let body: serde_json::Value = resp.json().await.context("failed to parse balance response")?;
        if !status.is_success() {
            anyhow::bail!("broker GET {} returned {}: {}", PATH_BALANCE, status, body);
        }
        Ok(BalanceSnapshot {
            total_value: body["total_value"].as_f64().unwrap_or(0.0),
            cash_available: body["cash_available"].as_f64().unwrap_or(0.0),
            stock_value: body["stock_value"].as_f64().unwrap_or(0.0),
            unrealized_pnl: body["unrealized_pnl"].as_f64().unwrap_or(0.0),
            holdings: Vec::new(),
        })
    }

    #[instrument(skip(self), name = "broker::screen_market")]
    async fn screen_market(&self, market: Market) -> Result<ScreenResult> {
        let market_code = match market {
            Market::All => "ALL",
            Market::Kospi => "KOSPI",
            Market::Kosdaq => "KOSDAQ",
        };
        let url = format!("{}{}?market={}", self.base_url, PATH_SCREEN, market_code);
        let resp = self.client.get(&url).send().await.context("GET screen request failed")?;
        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("broker GET {} returned {}", PATH_SCREEN, status);
        }
        Ok(ScreenResult::default())
    }
}

impl std::fmt::Debug for HttpBrokerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBrokerClient")
            .field("app_key", &"<redacted>")
            .field("app_secret", &"<redacted>")
            .field("account_no", &self.account_no)
            .field("base_url", &self.base_url)
            .finish()
    }
}
