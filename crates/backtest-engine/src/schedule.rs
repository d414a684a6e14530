//! Rebalance date scheduling for the walk-forward loop (§4.6).

use chrono::{Datelike, NaiveDate};

use crate::models::RebalanceFrequency;

/// Generates rebalance dates in `[start, end)`: the first calendar day of
/// every month (monthly) or every third month (quarterly), starting no
/// earlier than `start`. Each date is later used as a strict `as_of` cutoff,
/// so it does not need to itself be a trading day.
pub fn rebalance_dates(
    start: NaiveDate,
    end: NaiveDate,
    frequency: RebalanceFrequency,
) -> Vec<NaiveDate> {
    let step = match frequency {
        RebalanceFrequency::Monthly => 1,
        RebalanceFrequency::Quarterly => 3,
    };

    let mut dates = Vec::new();
    let mut year = start.year();
    let mut month = start.month();

    loop {
        let candidate = NaiveDate::from_ymd_opt(year, month, 1).expect("valid y/m from iteration");
        if candidate >= end {
            break;
        }
        if candidate >= start {
            dates.push(candidate);
        }
        let mut next_month = month as i32 + step;
        let mut next_year = year;
        while next_month > 12 {
            next_month -= 12;
            next_year += 1;
        }
        year = next_year;
        month = next_month as u32;
    }
    dates
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monthly_schedule_over_one_year() {
        let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2021, 1, 1).unwrap();
        let dates = rebalance_dates(start, end, RebalanceFrequency::Monthly);
        assert_eq!(dates.len(), 12);
        assert_eq!(dates[0], start);
        assert_eq!(dates[11], NaiveDate::from_ymd_opt(2020, 12, 1).unwrap());
    }

    #[test]
    fn quarterly_schedule_over_one_year() {
        let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2021, 1, 1).unwrap();
        let dates = rebalance_dates(start, end, RebalanceFrequency::Quarterly);
        assert_eq!(
            dates,
            vec![
                NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2020, 4, 1).unwrap(),
                NaiveDate::from_ymd_opt(2020, 7, 1).unwrap(),
                NaiveDate::from_ymd_opt(2020, 10, 1).unwrap(),
            ]
        );
    }

    #[test]
    fn mid_month_start_aligns_to_first_of_following_month() {
        let start = NaiveDate::from_ymd_opt(2020, 3, 15).unwrap();
        let end = NaiveDate::from_ymd_opt(2020, 6, 1).unwrap();
        let dates = rebalance_dates(start, end, RebalanceFrequency::Monthly);
        assert_eq!(
            dates,
            vec![
                NaiveDate::from_ymd_opt(2020, 4, 1).unwrap(),
                NaiveDate::from_ymd_opt(2020, 5, 1).unwrap(),
            ]
        );
    }
}
