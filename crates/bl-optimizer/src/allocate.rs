//! Converts target weights into an integer share allocation, §4.4 step 5.

use std::collections::BTreeMap;

use portfolio_core::Ticker;

pub struct DiscreteAllocation {
    pub shares: BTreeMap<Ticker, u64>,
    pub invested_capital: f64,
    pub leftover_cash: f64,
}

/// Floors each position to whole shares, then greedily spends the residual
/// cash on whichever held ticker has the largest remaining shortfall between
/// its target dollar weight and its current dollar position, one share at a
/// time, until no affordable ticker still has a positive shortfall.
pub fn discrete_allocate(
    weights: &BTreeMap<Ticker, f64>,
    prices: &BTreeMap<Ticker, f64>,
    capital: f64,
) -> DiscreteAllocation {
    let mut shares: BTreeMap<Ticker, u64> = BTreeMap::new();
    let mut spent = 0.0;

    for (ticker, weight) in weights {
        let price = prices.get(ticker).copied().unwrap_or(0.0);
        if price <= 0.0 || *weight <= 0.0 {
            continue;
        }
        let target_dollars = weight * capital;
        let n = (target_dollars / price).floor().max(0.0) as u64;
        spent += n as f64 * price;
        shares.insert(ticker.clone(), n);
    }

    let mut leftover = capital - spent;
    let min_price = prices
        .values()
        .copied()
        .filter(|p| *p > 0.0)
        .fold(f64::INFINITY, f64::min);

    if min_price.is_finite() {
        loop {
            if leftover < min_price {
                break;
            }
            let mut best: Option<(Ticker, f64)> = None;
            for (ticker, weight) in weights {
                let price = match prices.get(ticker) {
                    Some(p) if *p > 0.0 && *p <= leftover => *p,
                    _ => continue,
                };
                let current_dollars = shares.get(ticker).copied().unwrap_or(0) as f64 * price;
                let shortfall = weight * capital - current_dollars;
                if shortfall > 0.0 {
                    let better = match &best {
                        Some((_, best_shortfall)) => shortfall > *best_shortfall,
                        None => true,
                    };
                    if better {
                        best = Some((ticker.clone(), shortfall));
                    }
                }
            }
            match best {
                Some((ticker, _)) => {
                    let price = prices[&ticker];
                    *shares.entry(ticker).or_insert(0) += 1;
                    leftover -= price;
                    spent += price;
                }
                None => break,
            }
        }
    }

    DiscreteAllocation {
        shares,
        invested_capital: spent,
        leftover_cash: leftover,
    }
}
