/// Static curated ticker lists. Real deployments would refresh these from an
/// index provider; the core only needs a point-in-time stable membership
/// list per named universe, so these are treated as fixed seed data.
pub const SP500_SAMPLE: &[&str] = &[
    "AAPL", "MSFT", "AMZN", "GOOGL", "GOOG", "META", "NVDA", "BRK.B", "TSLA", "UNH", "JNJ", "XOM",
    "JPM", "V", "PG", "MA", "HD", "CVX", "ABBV", "PFE", "MRK", "PEP", "KO", "COST", "AVGO", "WMT",
    "TMO", "MCD", "CSCO", "ACN", "DHR", "ABT", "NKE", "LIN", "ADBE", "CRM", "TXN", "NEE", "PM",
    "VZ", "WFC", "RTX", "UPS", "BMY", "QCOM", "HON", "AMGN", "LOW", "ORCL", "T", "IBM",
];

pub const RUSSELL2000_SAMPLE: &[&str] = &[
    "SMCI", "CVLT", "FIZZ", "EXPO", "ATRC", "PLXS", "CALM", "CRVL", "HLIT", "ENSG", "CSGS", "CWST",
    "SPSC", "MLI", "ROAD", "SSTK", "MATX", "CENTA", "WDFC", "UFPI", "AWR", "NSIT", "LQDT", "HLNE",
    "IBP", "SITE", "GMS", "EPAC", "ASGN", "PRIM",
];

pub const NASDAQ100_SAMPLE: &[&str] = &[
    "AAPL", "MSFT", "AMZN", "GOOGL", "GOOG", "META", "NVDA", "TSLA", "AVGO", "COST", "PEP", "ADBE",
    "CSCO", "CRM", "TXN", "QCOM", "AMGN", "HON", "INTU", "AMD", "SBUX", "BKNG", "GILD", "ADI",
    "MDLZ", "VRTX", "LRCX", "ISRG", "REGN", "PANW",
];

/// Returns the curated ticker list for a named universe. `combined` is the
/// union of `sp500` and `russell2000`, deliberately excluding `nasdaq100` to
/// avoid double-counting the large-cap-tech overlap (spec note: ~59%
/// overlap between nasdaq100 and sp500).
pub fn named_universe(name: &str) -> Option<Vec<&'static str>> {
    match name {
        "sp500" => Some(SP500_SAMPLE.to_vec()),
        "russell2000" => Some(RUSSELL2000_SAMPLE.to_vec()),
        "nasdaq100" => Some(NASDAQ100_SAMPLE.to_vec()),
        "combined" => {
            let mut combined: Vec<&'static str> = SP500_SAMPLE.to_vec();
            for t in RUSSELL2000_SAMPLE {
                if !combined.contains(t) {
                    combined.push(t);
                }
            }
            Some(combined)
        }
        _ => None,
    }
}
