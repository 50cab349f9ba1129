//! Forecast cycle arithmetic and latest-published-cycle resolution.
//!
//! Cycles are produced four times daily but lag real time by a publication
//! delay, so the newest cycle that *should* exist is probed first and the
//! resolver steps backwards until it finds one whose index file is actually
//! on the server.

use std::fmt;

use chrono::{DateTime, Duration, NaiveDate, Timelike, Utc};
use thiserror::Error;
use tracing::{info, warn};

use crate::retry::RetryPolicy;

/// Candidates to try, newest first, before giving up. Covers one full day.
const MAX_PROBE_STEPS: u32 = 4;

/// One model run, identified by calendar day and start hour (00/06/12/18Z).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ForecastCycle {
    pub date: NaiveDate,
    pub hour: u8,
}

impl ForecastCycle {
    /// The newest cycle that should exist once `publication_delay` has passed,
    /// i.e. `now - delay` rounded down to a 6-hour boundary.
    pub fn latest_for(now: DateTime<Utc>, publication_delay: Duration) -> Self {
        let shifted = now - publication_delay;

        Self {
            date: shifted.date_naive(),
            hour: (shifted.hour() / 6 * 6) as u8,
        }
    }

    /// The cycle one run earlier, rolling the calendar date when needed.
    pub fn previous(&self) -> Self {
        if self.hour == 0 {
            Self {
                date: self.date.pred_opt().expect("date before calendar start"),
                hour: 18,
            }
        } else {
            Self {
                date: self.date,
                hour: self.hour - 6,
            }
        }
    }

    pub fn compact_date(&self) -> String {
        self.date.format("%Y%m%d").to_string()
    }
}

impl fmt::Display for ForecastCycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:02}Z", self.date, self.hour)
    }
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no published cycle found within the last {0} cycles")]
    NoCycleAvailable(u32),
    #[error("index endpoint unreachable for all of the last {0} cycles; the service looks down")]
    ServiceUnreachable(u32),
}

enum ProbeStatus {
    Available,
    Absent,
    Unreachable,
}

/// Finds the newest cycle whose index file has actually been published.
pub struct CycleResolver {
    client: reqwest::Client,
    probe_base_url: String,
    retry: RetryPolicy,
}

impl CycleResolver {
    pub fn new(client: reqwest::Client, probe_base_url: String, retry: RetryPolicy) -> Self {
        Self {
            client,
            probe_base_url,
            retry,
        }
    }

    pub async fn resolve(
        &self,
        now: DateTime<Utc>,
        publication_delay: Duration,
    ) -> Result<ForecastCycle, ResolveError> {
        let mut candidate = ForecastCycle::latest_for(now, publication_delay);
        let mut unreachable = 0;

        for _ in 0..MAX_PROBE_STEPS {
            match self.probe(&candidate).await {
                ProbeStatus::Available => {
                    info!("cycle {candidate} is published");
                    return Ok(candidate);
                }
                ProbeStatus::Absent => {
                    info!("cycle {candidate} not published yet, stepping back");
                }
                ProbeStatus::Unreachable => {
                    unreachable += 1;
                    warn!("cycle {candidate} index unreachable, stepping back");
                }
            }
            candidate = candidate.previous();
        }

        if unreachable == MAX_PROBE_STEPS {
            Err(ResolveError::ServiceUnreachable(MAX_PROBE_STEPS))
        } else {
            Err(ResolveError::NoCycleAvailable(MAX_PROBE_STEPS))
        }
    }

    /// One availability check. Network errors are retried, then the cycle
    /// counts as absent so the search can move on.
    async fn probe(&self, cycle: &ForecastCycle) -> ProbeStatus {
        let url = self.index_url(cycle);

        for attempt in self.retry.attempts() {
            match self.client.head(url.as_str()).send().await {
                Ok(response) if response.status().is_success() => return ProbeStatus::Available,
                Ok(response) => {
                    info!("probe {url} answered {}", response.status());
                    return ProbeStatus::Absent;
                }
                Err(err) => {
                    warn!("probe {url} failed on attempt {attempt}: {err}");
                    if !self.retry.is_last(attempt) {
                        tokio::time::sleep(self.retry.delay_after(attempt)).await;
                    }
                }
            }
        }

        ProbeStatus::Unreachable
    }

    fn index_url(&self, cycle: &ForecastCycle) -> String {
        format!(
            "{}/gfs.{}/{:02}/atmos/gfs.t{:02}z.pgrb2.0p25.f000.idx",
            self.probe_base_url,
            cycle.compact_date(),
            cycle.hour,
            cycle.hour
        )
    }
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use chrono::TimeZone;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn cycle(year: i32, month: u32, day: u32, hour: u8) -> ForecastCycle {
        ForecastCycle {
            date: NaiveDate::from_ymd_opt(year, month, day).unwrap(),
            hour,
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::new(1, std::time::Duration::ZERO)
    }

    #[test]
    fn should_round_down_to_cycle_boundary() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 5, 0, 0).unwrap();

        let latest = ForecastCycle::latest_for(now, Duration::hours(4));

        assert_eq!(latest, cycle(2024, 3, 1, 0));
    }

    #[test]
    fn should_roll_date_when_delay_crosses_midnight() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 2, 30, 0).unwrap();

        let latest = ForecastCycle::latest_for(now, Duration::hours(4));

        assert_eq!(latest, cycle(2024, 2, 29, 18));
    }

    #[test]
    fn should_step_back_within_a_day() {
        assert_eq!(cycle(2024, 3, 1, 12).previous(), cycle(2024, 3, 1, 6));
    }

    #[test]
    fn should_step_back_across_month_boundary() {
        // 2024 is a leap year
        assert_eq!(cycle(2024, 3, 1, 0).previous(), cycle(2024, 2, 29, 18));
    }

    #[test]
    fn should_step_back_across_year_boundary() {
        assert_eq!(cycle(2025, 1, 1, 0).previous(), cycle(2024, 12, 31, 18));
    }

    #[test]
    fn should_order_cycles_by_recency() {
        assert!(cycle(2024, 3, 1, 0) > cycle(2024, 2, 29, 18));
        assert!(cycle(2024, 3, 1, 6) > cycle(2024, 3, 1, 0));
    }

    #[tokio::test]
    async fn should_resolve_the_target_cycle_when_published() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/gfs.20240301/00/atmos/gfs.t00z.pgrb2.0p25.f000.idx"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let resolver = CycleResolver::new(reqwest::Client::new(), server.uri(), fast_retry());
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 5, 0, 0).unwrap();

        let resolved = resolver.resolve(now, Duration::hours(4)).await.unwrap();
        assert_eq!(resolved, cycle(2024, 3, 1, 0));
    }

    #[tokio::test]
    async fn should_fall_back_when_target_cycle_is_absent() {
        // Unmatched requests answer 404, so only the older cycle exists.
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/gfs.20240229/18/atmos/gfs.t18z.pgrb2.0p25.f000.idx"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let resolver = CycleResolver::new(reqwest::Client::new(), server.uri(), fast_retry());
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 5, 0, 0).unwrap();

        let resolved = resolver.resolve(now, Duration::hours(4)).await.unwrap();
        assert_eq!(resolved, cycle(2024, 2, 29, 18));
    }

    #[tokio::test]
    async fn should_give_up_after_the_probe_window() {
        let server = MockServer::start().await;

        let resolver = CycleResolver::new(reqwest::Client::new(), server.uri(), fast_retry());
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 5, 0, 0).unwrap();

        let err = resolver.resolve(now, Duration::hours(4)).await.unwrap_err();
        assert!(matches!(err, ResolveError::NoCycleAvailable(_)));
    }

    #[tokio::test]
    async fn should_report_an_outage_distinctly() {
        // Nothing listens here, so every probe fails at the network layer.
        let resolver = CycleResolver::new(
            reqwest::Client::new(),
            "http://127.0.0.1:9".to_string(),
            fast_retry(),
        );
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 5, 0, 0).unwrap();

        let err = resolver.resolve(now, Duration::hours(4)).await.unwrap_err();
        assert!(matches!(err, ResolveError::ServiceUnreachable(_)));
    }
}
