//! Payment-provider adapter
//!
//! Uniform interface over direct billing APIs. The aggregator is
//! provider-agnostic: it talks to [`ProviderAdapter`], and providers are
//! selected by identifier via [`build_provider`].

use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, warn};

use crate::crypto::CryptoError;
use crate::models::RevenueDataPoint;

const STRIPE_API_BASE: &str = "https://api.stripe.com";
const PAGE_SIZE: usize = 100;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("invalid credentials: {0}")]
    Credentials(String),
    #[error("signature verification failed: {0}")]
    SignatureVerification(String),
    #[error("remote endpoint unreachable: {0}")]
    Unreachable(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("unsupported provider: {0}")]
    UnsupportedProvider(String),
}

/// Result of a cheap read-only credential probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialCheck {
    pub valid: bool,
    pub error: Option<String>,
}

/// Point-in-time revenue metrics. ARR is always exactly 12x MRR.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentMetrics {
    pub mrr: f64,
    pub arr: f64,
    pub customer_count: i64,
    pub currency: String,
}

impl CurrentMetrics {
    pub fn from_mrr(mrr: f64, customer_count: i64, currency: impl Into<String>) -> Self {
        Self {
            mrr,
            arr: mrr * 12.0,
            customer_count,
            currency: currency.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interval {
    Daily,
    Monthly,
}

/// Fetch window handed to a source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevenueWindow {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub interval: Interval,
}

impl RevenueWindow {
    /// Trailing window of whole months up to today, monthly buckets.
    pub fn trailing_months(months: u32) -> Self {
        let today = Utc::now().date_naive();
        let mut year = today.year();
        let mut month = today.month() as i32 - months as i32;
        while month <= 0 {
            month += 12;
            year -= 1;
        }
        Self {
            start_date: NaiveDate::from_ymd_opt(year, month as u32, 1).unwrap_or(today),
            end_date: today,
            interval: Interval::Monthly,
        }
    }
}

/// Capability set of a direct payment-provider integration. The aggregator
/// dispatches through this seam only, selected by identifier.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    async fn validate_credentials(&self) -> CredentialCheck;
    async fn fetch_revenue(
        &self,
        window: &RevenueWindow,
    ) -> Result<Vec<RevenueDataPoint>, SourceError>;
    async fn fetch_current_metrics(&self) -> Result<CurrentMetrics, SourceError>;
}

/// Select a provider implementation by identifier.
pub fn build_provider(
    provider: &str,
    api_key: String,
) -> Result<Box<dyn ProviderAdapter>, SourceError> {
    match provider {
        "stripe" => Ok(Box::new(StripeProvider::new(api_key))),
        other => Err(SourceError::UnsupportedProvider(other.to_string())),
    }
}

// ============================================================================
// BUCKETING
// ============================================================================

/// A raw billing event normalized to (timestamp, amount, currency).
#[derive(Debug, Clone)]
pub struct BillingEvent {
    pub occurred_at: DateTime<Utc>,
    pub amount: f64,
    pub currency: String,
}

fn bucket_date(date: NaiveDate, interval: Interval) -> NaiveDate {
    match interval {
        Interval::Daily => date,
        Interval::Monthly => NaiveDate::from_ymd_opt(date.year(), date.month(), 1).unwrap(),
    }
}

/// Aggregate raw billing events into one revenue point per interval bucket.
pub fn bucket_events(events: &[BillingEvent], interval: Interval) -> Vec<RevenueDataPoint> {
    let mut buckets: BTreeMap<NaiveDate, (f64, String)> = BTreeMap::new();
    for event in events {
        let key = bucket_date(event.occurred_at.date_naive(), interval);
        let entry = buckets
            .entry(key)
            .or_insert_with(|| (0.0, event.currency.clone()));
        entry.0 += event.amount;
    }
    buckets
        .into_iter()
        .map(|(date, (revenue, currency))| RevenueDataPoint {
            date: date.to_string(),
            revenue,
            mrr: None,
            arr: None,
            customer_count: None,
            currency,
        })
        .collect()
}

// ============================================================================
// STRIPE
// ============================================================================

#[derive(Debug, Deserialize)]
struct StripeCharge {
    id: String,
    amount: i64,
    currency: String,
    created: i64,
    paid: bool,
    refunded: bool,
}

#[derive(Debug, Deserialize)]
struct StripeList<T> {
    data: Vec<T>,
    has_more: bool,
}

#[derive(Debug, Deserialize)]
struct StripeSubscription {
    id: String,
    customer: String,
    items: StripeList<StripeSubscriptionItem>,
}

#[derive(Debug, Deserialize)]
struct StripeSubscriptionItem {
    quantity: Option<i64>,
    price: StripePrice,
}

#[derive(Debug, Deserialize)]
struct StripePrice {
    unit_amount: Option<i64>,
    currency: String,
    recurring: Option<StripeRecurring>,
}

#[derive(Debug, Deserialize)]
struct StripeRecurring {
    interval: String,
}

pub struct StripeProvider {
    client: reqwest::Client,
    api_key: String,
}

impl StripeProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
        }
    }

    fn build_request(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .get(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Stripe-Version", "2024-06-20")
    }

    async fn fetch_charges(&self, window: &RevenueWindow) -> Result<Vec<BillingEvent>, SourceError> {
        let start = window
            .start_date
            .and_hms_opt(0, 0, 0)
            .unwrap()
            .and_utc()
            .timestamp();
        let end = window
            .end_date
            .and_hms_opt(23, 59, 59)
            .unwrap()
            .and_utc()
            .timestamp();

        let mut events = Vec::new();
        let mut starting_after: Option<String> = None;

        loop {
            let mut url = format!(
                "{}/v1/charges?limit={}&created[gte]={}&created[lte]={}",
                STRIPE_API_BASE, PAGE_SIZE, start, end
            );
            if let Some(cursor) = &starting_after {
                url.push_str(&format!("&starting_after={}", cursor));
            }

            debug!("Fetching charges page: {}", url);
            let response = self.build_request(&url).send().await?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(SourceError::Protocol(format!(
                    "charges request failed with {}: {}",
                    status, body
                )));
            }

            let page: StripeList<StripeCharge> = response.json().await?;
            let count = page.data.len();
            starting_after = page.data.last().map(|c| c.id.clone());

            for charge in page.data {
                if !charge.paid || charge.refunded {
                    continue;
                }
                let Some(occurred_at) = DateTime::from_timestamp(charge.created, 0) else {
                    warn!("Skipping charge {} with invalid timestamp", charge.id);
                    continue;
                };
                events.push(BillingEvent {
                    occurred_at,
                    amount: charge.amount as f64 / 100.0,
                    currency: charge.currency,
                });
            }

            if !page.has_more || count < PAGE_SIZE {
                break;
            }
        }

        Ok(events)
    }

    async fn fetch_subscriptions(&self) -> Result<Vec<StripeSubscription>, SourceError> {
        let mut subscriptions = Vec::new();
        let mut starting_after: Option<String> = None;

        loop {
            let mut url = format!(
                "{}/v1/subscriptions?status=active&limit={}",
                STRIPE_API_BASE, PAGE_SIZE
            );
            if let Some(cursor) = &starting_after {
                url.push_str(&format!("&starting_after={}", cursor));
            }

            let response = self.build_request(&url).send().await?;
            if !response.status().is_success() {
                let status = response.status();
                return Err(SourceError::Protocol(format!(
                    "subscriptions request failed with {}",
                    status
                )));
            }

            let page: StripeList<StripeSubscription> = response.json().await?;
            let count = page.data.len();
            starting_after = page.data.last().map(|s| s.id.clone());
            subscriptions.extend(page.data);

            if !page.has_more || count < PAGE_SIZE {
                break;
            }
        }

        Ok(subscriptions)
    }

    fn metrics_from_subscriptions(subscriptions: &[StripeSubscription]) -> CurrentMetrics {
        let mut mrr = 0.0;
        let mut currency = "usd".to_string();
        let mut customers: Vec<&str> = Vec::new();

        for subscription in subscriptions {
            if !customers.contains(&subscription.customer.as_str()) {
                customers.push(&subscription.customer);
            }
            for item in &subscription.items.data {
                let Some(unit_amount) = item.price.unit_amount else {
                    continue;
                };
                let quantity = item.quantity.unwrap_or(1);
                let monthly = match item.price.recurring.as_ref().map(|r| r.interval.as_str()) {
                    Some("month") => unit_amount as f64 / 100.0,
                    Some("year") => unit_amount as f64 / 100.0 / 12.0,
                    Some("week") => unit_amount as f64 / 100.0 * 52.0 / 12.0,
                    Some("day") => unit_amount as f64 / 100.0 * 365.0 / 12.0,
                    _ => continue,
                };
                mrr += monthly * quantity as f64;
                currency = item.price.currency.clone();
            }
        }

        CurrentMetrics::from_mrr(mrr, customers.len() as i64, currency)
    }
}

#[async_trait]
impl ProviderAdapter for StripeProvider {
    /// Cheap read-only probe: one-item charge listing.
    async fn validate_credentials(&self) -> CredentialCheck {
        let url = format!("{}/v1/charges?limit=1", STRIPE_API_BASE);
        match self.build_request(&url).send().await {
            Ok(response) if response.status().is_success() => CredentialCheck {
                valid: true,
                error: None,
            },
            Ok(response) => CredentialCheck {
                valid: false,
                error: Some(format!("authentication failed: {}", response.status())),
            },
            Err(e) => CredentialCheck {
                valid: false,
                error: Some(e.to_string()),
            },
        }
    }

    /// Pull charges over the window and aggregate per bucket. MRR and
    /// customer count are derivable only for the present, so they are
    /// attached to the most recent bucket.
    async fn fetch_revenue(
        &self,
        window: &RevenueWindow,
    ) -> Result<Vec<RevenueDataPoint>, SourceError> {
        let events = self.fetch_charges(window).await?;
        let mut points = bucket_events(&events, window.interval);

        if let Some(last) = points.last_mut() {
            if let Ok(metrics) = self.fetch_current_metrics().await {
                last.mrr = Some(metrics.mrr);
                last.arr = Some(metrics.arr);
                last.customer_count = Some(metrics.customer_count);
            }
        }

        Ok(points)
    }

    async fn fetch_current_metrics(&self) -> Result<CurrentMetrics, SourceError> {
        let subscriptions = self.fetch_subscriptions().await?;
        Ok(Self::metrics_from_subscriptions(&subscriptions))
    }
}
