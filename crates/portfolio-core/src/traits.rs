use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::{PortfolioError, Result};
use crate::types::{FundamentalsSnapshot, PriceBar, Ticker};

/// A live vendor-agnostic price feed. Implementations must never return a
/// bar dated `>= end` — callers rely on `get_history`'s half-open range, not
/// on trusting the implementation to self-police `as_of`.
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn get_history(
        &self,
        ticker: &Ticker,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PriceBar>>;
}

/// A live vendor-agnostic fundamentals feed.
#[async_trait]
pub trait FundamentalsSource: Send + Sync {
    async fn get_latest(&self, ticker: &Ticker, as_of: NaiveDate) -> Result<FundamentalsSnapshot>;
}

/// Wraps any `PriceSource`/`FundamentalsSource` so the `as_of` contract is
/// enforced once, at the adapter boundary, instead of trusting every call
/// site to pass a correct cutoff through to the vendor client.
///
/// A bar or snapshot dated on or after the bound date is a `TemporalViolation`
/// — fatal, never silently dropped — because it indicates either a vendor bug
/// or a caller that computed the wrong cutoff.
pub struct AsOfBoundSource<S> {
    inner: S,
    as_of: NaiveDate,
}

impl<S> AsOfBoundSource<S> {
    pub fn new(inner: S, as_of: NaiveDate) -> Self {
        Self { inner, as_of }
    }

    pub fn as_of(&self) -> NaiveDate {
        self.as_of
    }
}

#[async_trait]
impl<S: PriceSource> PriceSource for AsOfBoundSource<S> {
    async fn get_history(
        &self,
        ticker: &Ticker,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PriceBar>> {
        if end > self.as_of {
            return Err(PortfolioError::TemporalViolation(format!(
                "requested history end {end} exceeds as_of bound {}",
                self.as_of
            )));
        }
        let bars = self.inner.get_history(ticker, start, end).await?;
        if let Some(bad) = bars.iter().find(|b| b.date >= self.as_of) {
            return Err(PortfolioError::TemporalViolation(format!(
                "source returned bar dated {} for ticker {ticker} at as_of {}",
                bad.date, self.as_of
            )));
        }
        Ok(bars)
    }
}

#[async_trait]
impl<S: FundamentalsSource> FundamentalsSource for AsOfBoundSource<S> {
    async fn get_latest(&self, ticker: &Ticker, as_of: NaiveDate) -> Result<FundamentalsSnapshot> {
        if as_of > self.as_of {
            return Err(PortfolioError::TemporalViolation(format!(
                "requested as_of {as_of} exceeds bound {}",
                self.as_of
            )));
        }
        let snap = self.inner.get_latest(ticker, as_of).await?;
        if snap.publication_date >= as_of {
            return Err(PortfolioError::TemporalViolation(format!(
                "fundamentals publication date {} is not strictly before as_of {as_of} for {ticker}",
                snap.publication_date
            )));
        }
        Ok(snap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FakePriceSource {
        bars: Vec<PriceBar>,
    }

    #[async_trait]
    impl PriceSource for FakePriceSource {
        async fn get_history(
            &self,
            _ticker: &Ticker,
            _start: NaiveDate,
            _end: NaiveDate,
        ) -> Result<Vec<PriceBar>> {
            Ok(self.bars.clone())
        }
    }

    fn bar(date: NaiveDate) -> PriceBar {
        PriceBar {
            date,
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            adj_close: 1.0,
            volume: 0.0,
        }
    }

    #[tokio::test]
    async fn rejects_bar_on_or_after_as_of() {
        let as_of = NaiveDate::from_ymd_opt(2023, 6, 30).unwrap();
        let leak_date = NaiveDate::from_ymd_opt(2023, 7, 1).unwrap();
        let source = AsOfBoundSource::new(
            FakePriceSource {
                bars: vec![bar(leak_date)],
            },
            as_of,
        );
        let start = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
        let result = source.get_history(&Ticker::new("AAPL"), start, as_of).await;
        assert!(matches!(result, Err(PortfolioError::TemporalViolation(_))));
    }

    #[tokio::test]
    async fn accepts_bars_strictly_before_as_of() {
        let as_of = NaiveDate::from_ymd_opt(2023, 6, 30).unwrap();
        let ok_date = NaiveDate::from_ymd_opt(2023, 6, 29).unwrap();
        let source = AsOfBoundSource::new(
            FakePriceSource {
                bars: vec![bar(ok_date)],
            },
            as_of,
        );
        let start = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
        let result = source.get_history(&Ticker::new("AAPL"), start, as_of).await;
        assert!(result.is_ok());
    }
}
