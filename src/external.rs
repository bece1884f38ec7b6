use std::{collections::HashMap, fmt};

use reqwest::Client;
use serde::{
    de::{DeserializeOwned, MapAccess, Visitor},
    Deserialize, Deserializer,
};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::ProviderConfig;
use crate::error::RelayError;
use crate::structs::{HistoryPoint, Quote, StockSnapshot, TimeSeries};

const GLOBAL_QUOTE: &str = "GLOBAL_QUOTE";
const TIME_SERIES_INTRADAY: &str = "TIME_SERIES_INTRADAY";
const INTERVAL: &str = "5min";
const OUTPUT_SIZE: &str = "compact";

/// Alpha Vantage client. One instance is shared by every request.
#[derive(Clone)]
pub struct AlphaVantage {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl AlphaVantage {
    pub fn new(config: &ProviderConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(concat!("stock-relay/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
        })
    }

    /// Quote and intraday history for `symbol`, fetched concurrently.
    ///
    /// Fails with [`RelayError::MissingApiKey`] before any network I/O when
    /// no credential is configured. Any failure of either call fails the
    /// whole request.
    pub async fn fetch_stock(&self, symbol: &str) -> Result<StockSnapshot, RelayError> {
        let api_key = self.api_key.as_deref().ok_or(RelayError::MissingApiKey)?;
        let (quote, history) = tokio::try_join!(
            self.fetch_quote(symbol, api_key),
            self.fetch_intraday(symbol, api_key)
        )?;
        Ok(StockSnapshot::new(quote, history))
    }

    async fn fetch_quote(&self, symbol: &str, api_key: &str) -> Result<Quote, RelayError> {
        let body: GlobalQuoteResponse = self
            .query(&[
                ("function", GLOBAL_QUOTE),
                ("symbol", symbol),
                ("apikey", api_key),
            ])
            .await?;
        body.notice.report(GLOBAL_QUOTE, symbol);
        Ok(body.into_quote(symbol))
    }

    async fn fetch_intraday(&self, symbol: &str, api_key: &str) -> Result<TimeSeries, RelayError> {
        let body: IntradayStock = self
            .query(&[
                ("function", TIME_SERIES_INTRADAY),
                ("symbol", symbol),
                ("interval", INTERVAL),
                ("outputsize", OUTPUT_SIZE),
                ("apikey", api_key),
            ])
            .await?;
        body.notice.report(TIME_SERIES_INTRADAY, symbol);
        if let Some(meta) = &body.meta_data {
            debug!(
                symbol = %symbol,
                provider_symbol = ?meta.symbol,
                last_refreshed = ?meta.last_refreshed,
                time_zone = ?meta.time_zone,
                points = body.time_series.len(),
                "intraday series received"
            );
        }
        Ok(body.time_series)
    }

    async fn query<T: DeserializeOwned>(&self, params: &[(&str, &str)]) -> Result<T, RelayError> {
        let response = self.client.get(&self.base_url).query(params).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RelayError::Status(status));
        }
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/*
{
    "Global Quote": {
        "01. symbol": "TCS.NS",
        "02. open": "3490.0000",
        "05. price": "3500.2500",
        "07. latest trading day": "2024-01-01",
        ...
    }
}
*/
#[derive(Deserialize, Debug, Default)]
pub struct GlobalQuoteResponse {
    #[serde(rename = "Global Quote", default)]
    global_quote: Option<GlobalQuote>,
    #[serde(flatten)]
    notice: ProviderNotice,
}

impl GlobalQuoteResponse {
    /// Missing section, missing field and non-numeric price all become 0.
    pub fn into_quote(self, symbol: &str) -> Quote {
        let price = self
            .global_quote
            .and_then(|quote| quote.price)
            .unwrap_or(0.0);
        Quote::new(symbol, price)
    }
}

#[derive(Deserialize, Debug, Default)]
pub struct GlobalQuote {
    #[serde(rename = "05. price", default, deserialize_with = "deserialize_price")]
    price: Option<f64>,
}

/*
{
  "Meta Data": {
    "1. Information": "Intraday (5min) open, high, low, close prices and volume",
    "2. Symbol": "NVDA",
    "3. Last Refreshed": "2024-05-28 19:55:00",
    "4. Interval": "5min",
    "5. Output Size": "Compact",
    "6. Time Zone": "US/Eastern"
  },
  "Time Series (5min)": {
    "2024-05-28 19:55:00": {
      "1. open": "1149.7200",
      "2. high": "1150.0000",
      "3. low": "1148.7300",
      "4. close": "1149.9900",
      "5. volume": "42000"
    },
    ...
*/
#[derive(Deserialize, Debug, Default)]
pub struct IntradayStock {
    #[serde(rename = "Meta Data", default)]
    meta_data: Option<MetaData>,
    #[serde(
        rename = "Time Series (5min)",
        default,
        deserialize_with = "deserialize_time_series"
    )]
    time_series: TimeSeries,
    #[serde(flatten)]
    notice: ProviderNotice,
}

impl IntradayStock {
    pub fn time_series(&self) -> &TimeSeries {
        &self.time_series
    }
}

#[derive(Deserialize, Debug, Default)]
pub struct MetaData {
    #[serde(rename = "2. Symbol", default)]
    symbol: Option<String>,
    #[serde(rename = "3. Last Refreshed", default)]
    last_refreshed: Option<String>,
    #[serde(rename = "6. Time Zone", default)]
    time_zone: Option<String>,
}

#[derive(Deserialize, Debug)]
struct CandleStick {
    #[serde(rename = "4. close", default, deserialize_with = "deserialize_price")]
    close: Option<f64>,
}

/// Advisory text Alpha Vantage sends with a 200 when throttling or when the
/// symbol is unknown.
#[derive(Deserialize, Debug, Default)]
pub struct ProviderNotice {
    #[serde(rename = "Note", default)]
    note: Option<String>,
    #[serde(rename = "Information", default)]
    information: Option<String>,
    #[serde(rename = "Error Message", default)]
    error_message: Option<String>,
}

impl ProviderNotice {
    fn report(&self, function: &str, symbol: &str) {
        for message in [&self.note, &self.information, &self.error_message]
            .into_iter()
            .flatten()
        {
            warn!(function, symbol = %symbol, message = %message, "provider notice");
        }
    }
}

// Prices arrive as strings ("3500.2500"); numbers are tolerated too. Anything
// that isn't a finite number is treated as absent.
fn deserialize_price<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    let price = match value {
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(Value::Number(n)) => n.as_f64(),
        _ => None,
    };
    Ok(price.filter(|p| p.is_finite()))
}

fn deserialize_time_series<'de, D>(deserializer: D) -> Result<TimeSeries, D::Error>
where
    D: Deserializer<'de>,
{
    struct SeriesVisitor;

    impl<'de> Visitor<'de> for SeriesVisitor {
        type Value = TimeSeries;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("map should contain timestamp and candle stick data")
        }

        fn visit_none<E: serde::de::Error>(self) -> Result<Self::Value, E> {
            Ok(TimeSeries::default())
        }

        fn visit_unit<E: serde::de::Error>(self) -> Result<Self::Value, E> {
            Ok(TimeSeries::default())
        }

        fn visit_some<D>(self, deserializer: D) -> Result<Self::Value, D::Error>
        where
            D: Deserializer<'de>,
        {
            deserializer.deserialize_map(SeriesVisitor)
        }

        fn visit_map<M>(self, mut map: M) -> Result<Self::Value, M::Error>
        where
            M: MapAccess<'de>,
        {
            // keyed by timestamp so a repeated key keeps its last sample
            let mut samples: HashMap<String, f64> = HashMap::new();
            while let Some((time, candle_stick)) = map.next_entry::<String, CandleStick>()? {
                samples.insert(time, candle_stick.close.unwrap_or(0.0));
            }
            Ok(samples
                .into_iter()
                .map(|(time, price)| HistoryPoint::new(time, price))
                .collect())
        }
    }

    // null counts as an absent series
    deserializer.deserialize_option(SeriesVisitor)
}

#[test]
pub fn test_intraday_gets_deserialized_properly() {
    let json_str = r#"
    {
        "Meta Data": {
            "1. Information": "Intraday (5min) open, high, low, close prices and volume",
            "2. Symbol": "NVDA",
            "3. Last Refreshed": "2024-05-28 19:55:00",
            "4. Interval": "5min",
            "5. Output Size": "Compact",
            "6. Time Zone": "US/Eastern"
        },
        "Time Series (5min)": {
            "2024-05-28 19:55:00": {
                "1. open": "1149.7200",
                "2. high": "1150.0000",
                "3. low": "1148.7300",
                "4. close": "1149.9900",
                "5. volume": "42000"
            },
            "2024-05-28 19:45:00": {
                "1. open": "1148.9900",
                "2. high": "1149.3300",
                "3. low": "1148.5000",
                "4. close": "1149.1050",
                "5. volume": "15594"
            },
            "2024-05-28 19:50:00": {
                "1. open": "1149.0400",
                "2. high": "1149.9800",
                "3. low": "1149.0100",
                "4. close": "1149.7500",
                "5. volume": "30271"
            }
        }
    }
    "#;
    let intraday_stock: IntradayStock = serde_json::from_str(json_str).unwrap();
    let meta = intraday_stock.meta_data.as_ref().unwrap();
    assert_eq!(meta.symbol.as_deref(), Some("NVDA"));
    let points = intraday_stock.time_series().data();
    assert_eq!(points.len(), 3);
    assert_eq!(points[0], HistoryPoint::new("2024-05-28 19:45:00", 1149.105));
    assert_eq!(points[1], HistoryPoint::new("2024-05-28 19:50:00", 1149.75));
    assert_eq!(points[2], HistoryPoint::new("2024-05-28 19:55:00", 1149.99));
}

#[test]
pub fn test_bad_close_becomes_zero() {
    let json_str = r#"
    {
        "Time Series (5min)": {
            "2024-01-01 09:10:00": { "4. close": "n/a" },
            "2024-01-01 09:15:00": { "1. open": "1.0" }
        }
    }
    "#;
    let intraday_stock: IntradayStock = serde_json::from_str(json_str).unwrap();
    let prices: Vec<f64> = intraday_stock
        .time_series()
        .data()
        .iter()
        .map(|p| p.price)
        .collect();
    assert_eq!(prices, vec![0.0, 0.0]);
}

#[test]
pub fn test_repeated_timestamp_keeps_last_sample() {
    let json_str = r#"
    {
        "Time Series (5min)": {
            "2024-01-01 09:10:00": { "4. close": "1.00" },
            "2024-01-01 09:10:00": { "4. close": "2.00" }
        }
    }
    "#;
    let intraday_stock: IntradayStock = serde_json::from_str(json_str).unwrap();
    assert_eq!(
        intraday_stock.time_series().data(),
        &[HistoryPoint::new("2024-01-01 09:10:00", 2.0)]
    );
}

#[test]
pub fn test_missing_series_is_empty_history() {
    let intraday_stock: IntradayStock =
        serde_json::from_str(r#"{ "Information": "rate limited" }"#).unwrap();
    assert!(intraday_stock.time_series().is_empty());
    assert_eq!(intraday_stock.notice.information.as_deref(), Some("rate limited"));
}

#[test]
pub fn test_null_series_is_empty_history() {
    let intraday_stock: IntradayStock =
        serde_json::from_str(r#"{ "Time Series (5min)": null }"#).unwrap();
    assert!(intraday_stock.time_series().is_empty());
}

#[test]
pub fn test_quote_price_is_parsed() {
    let body: GlobalQuoteResponse = serde_json::from_str(
        r#"{ "Global Quote": { "01. symbol": "TCS.NS", "05. price": "3500.2500" } }"#,
    )
    .unwrap();
    assert_eq!(body.into_quote("TCS.NS"), Quote::new("TCS.NS", 3500.25));
}

#[test]
pub fn test_quote_price_defaults_to_zero() {
    let cases = [
        r#"{}"#,
        r#"{ "Global Quote": null }"#,
        r#"{ "Global Quote": {} }"#,
        r#"{ "Global Quote": { "05. price": "" } }"#,
        r#"{ "Global Quote": { "05. price": "abc" } }"#,
        r#"{ "Global Quote": { "05. price": null } }"#,
        r#"{ "Global Quote": { "05. price": "NaN" } }"#,
    ];
    for case in cases {
        let body: GlobalQuoteResponse = serde_json::from_str(case).unwrap();
        assert_eq!(body.into_quote("X").current_price, 0.0, "case {case}");
    }
}

#[test]
pub fn test_numeric_quote_price_is_accepted() {
    let body: GlobalQuoteResponse =
        serde_json::from_str(r#"{ "Global Quote": { "05. price": 12.5 } }"#).unwrap();
    assert_eq!(body.into_quote("X").current_price, 12.5);
}

#[test]
pub fn test_non_object_body_is_rejected() {
    assert!(serde_json::from_str::<GlobalQuoteResponse>("[1, 2]").is_err());
    assert!(serde_json::from_str::<IntradayStock>(r#"{ "Time Series (5min)": [] }"#).is_err());
}
