use crate::aggregate::EditEvent;
use crate::errors::AppError;
use crate::token::TokenManager;
use chrono::{Duration, Local, NaiveDate};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use url::Url;

const HISTORY_FIELDS: &str = "Opportunity.Name, StageName, Amount, CreatedDate, CreatedBy.Name";
const UNKNOWN_AUTHOR: &str = "Unknown";
const MAX_WINDOW_DAYS: u32 = 36_525;
const MAX_WINDOW_QUARTERS: u32 = 400;

/// How far back the history query reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryWindow {
    /// Rolling window of the last N days.
    Days(u32),
    /// The last N fiscal quarters, resolved by the CRM.
    Quarters(u32),
}

impl Default for HistoryWindow {
    fn default() -> Self {
        HistoryWindow::Days(90)
    }
}

impl FromStr for HistoryWindow {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (unit, count) = value
            .split_once(':')
            .ok_or_else(|| format!("expected 'days:N' or 'quarters:N', got '{value}'"))?;
        let count: u32 = count
            .trim()
            .parse()
            .map_err(|_| format!("'{count}' is not a positive number"))?;
        if count == 0 {
            return Err("window length must be at least 1".to_string());
        }
        let (window, max) = match unit.trim().to_ascii_lowercase().as_str() {
            "days" => (HistoryWindow::Days(count), MAX_WINDOW_DAYS),
            "quarters" => (HistoryWindow::Quarters(count), MAX_WINDOW_QUARTERS),
            other => return Err(format!("unknown window unit '{other}'")),
        };
        if count > max {
            return Err(format!("window length {count} exceeds the maximum of {max}"));
        }
        Ok(window)
    }
}

impl fmt::Display for HistoryWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HistoryWindow::Days(days) => write!(f, "last {days} days"),
            HistoryWindow::Quarters(1) => f.write_str("last quarter"),
            HistoryWindow::Quarters(quarters) => write!(f, "last {quarters} quarters"),
        }
    }
}

pub fn build_query(window: HistoryWindow, today: NaiveDate) -> String {
    let cutoff = match window {
        HistoryWindow::Days(days) => {
            let start = today
                .checked_sub_signed(Duration::days(i64::from(days)))
                .unwrap_or(NaiveDate::MIN);
            format!("{}T00:00:00Z", start.format("%Y-%m-%d"))
        }
        HistoryWindow::Quarters(quarters) => format!("LAST_N_QUARTERS:{quarters}"),
    };
    format!("select {HISTORY_FIELDS} from OpportunityHistory where CreatedDate > {cutoff} order by CreatedDate")
}

pub fn query_url(instance_url: &Url, api_version: &str, query: &str) -> Url {
    let mut url = instance_url.clone();
    if let Ok(mut segments) = url.path_segments_mut() {
        // trailing empty segment keeps the "/query/" form the REST API documents
        segments.pop_if_empty().extend(["services", "data", api_version, "query", ""]);
    }
    url.query_pairs_mut().append_pair("q", query);
    url
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryResult {
    #[serde(rename = "totalSize", default)]
    pub total_size: u64,
    pub records: Vec<HistoryRecord>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryRecord {
    #[serde(rename = "CreatedDate")]
    pub created_date: String,
    #[serde(rename = "CreatedBy")]
    pub created_by: Option<UserRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserRef {
    #[serde(rename = "Name")]
    pub name: Option<String>,
}

impl HistoryRecord {
    /// Reads the `YYYY-MM-DD` prefix of `CreatedDate`; time and zone are ignored.
    pub fn to_event(&self) -> Option<EditEvent> {
        let day = self.created_date.get(..10)?;
        let date = NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()?;
        let author = self
            .created_by
            .as_ref()
            .and_then(|user| user.name.as_deref())
            .unwrap_or(UNKNOWN_AUTHOR);
        Some(EditEvent::new(date, author))
    }
}

impl QueryResult {
    pub fn events(&self) -> Vec<EditEvent> {
        self.records
            .iter()
            .filter_map(|record| {
                let event = record.to_event();
                if event.is_none() {
                    tracing::warn!(created_date = %record.created_date, "skipping history record with unreadable date");
                }
                event
            })
            .collect()
    }
}

/// Issues the opportunity-history query for `window`.
pub async fn fetch_history(
    tokens: &TokenManager,
    api_version: &str,
    window: HistoryWindow,
    today: NaiveDate,
) -> Result<QueryResult, AppError> {
    let query = build_query(window, today);
    let url = query_url(&tokens.instance_url().await, api_version, &query);
    tracing::info!(%window, "running history query");

    let result: QueryResult = tokens.get(url).await?.parsed()?;
    tracing::info!(records = result.records.len(), total_size = result.total_size, "opportunity edits fetched");
    Ok(result)
}

pub async fn fetch_events(
    tokens: &TokenManager,
    api_version: &str,
    window: HistoryWindow,
) -> Result<Vec<EditEvent>, AppError> {
    let result = fetch_history(tokens, api_version, window, Local::now().date_naive()).await?;
    Ok(result.events())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::OAuthClient;
    use crate::token::TokenState;
    use crate::upstream::testing::ScriptedTransport;
    use axum::http::StatusCode;
    use std::sync::Arc;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn day_window_query_uses_cutoff_date() {
        let query = build_query(HistoryWindow::Days(90), day(2024, 4, 1));
        assert_eq!(
            query,
            "select Opportunity.Name, StageName, Amount, CreatedDate, CreatedBy.Name \
             from OpportunityHistory where CreatedDate > 2024-01-02T00:00:00Z order by CreatedDate"
        );
    }

    #[test]
    fn quarter_window_query_uses_date_literal() {
        let query = build_query(HistoryWindow::Quarters(4), day(2024, 4, 1));
        assert!(query.ends_with("where CreatedDate > LAST_N_QUARTERS:4 order by CreatedDate"));
    }

    #[test]
    fn window_parses_both_variants() {
        assert_eq!("days:30".parse::<HistoryWindow>(), Ok(HistoryWindow::Days(30)));
        assert_eq!("Quarters: 2".parse::<HistoryWindow>(), Ok(HistoryWindow::Quarters(2)));
        assert!("days:0".parse::<HistoryWindow>().is_err());
        assert!("90".parse::<HistoryWindow>().is_err());
    }

    #[test]
    fn oversized_window_is_rejected() {
        assert!("days:4294967295".parse::<HistoryWindow>().is_err());
        assert!("quarters:100000".parse::<HistoryWindow>().is_err());
        assert_eq!("days:36525".parse::<HistoryWindow>(), Ok(HistoryWindow::Days(36_525)));
    }

    #[test]
    fn huge_day_window_does_not_panic() {
        let query = build_query(HistoryWindow::Days(u32::MAX), day(2024, 4, 1));
        assert!(query.contains("where CreatedDate > "));
    }

    #[test]
    fn query_url_escapes_soql() {
        let instance = Url::parse("https://na1.example.com").unwrap();
        let url = query_url(&instance, "v20.0", "select Id from X where A > 1");
        assert_eq!(url.path(), "/services/data/v20.0/query/");
        assert_eq!(url.query(), Some("q=select+Id+from+X+where+A+%3E+1"));
    }

    #[test]
    fn records_become_events() {
        let json = r#"{
            "totalSize": 3,
            "done": true,
            "records": [
                {"CreatedDate": "2024-01-03T10:15:00.000+0000", "CreatedBy": {"Name": "Bob"}},
                {"CreatedDate": "2024-01-01", "CreatedBy": null},
                {"CreatedDate": "garbage", "CreatedBy": {"Name": "Eve"}}
            ]
        }"#;
        let result: QueryResult = serde_json::from_str(json).unwrap();
        assert_eq!(
            result.events(),
            vec![
                EditEvent::new(day(2024, 1, 3), "Bob"),
                EditEvent::new(day(2024, 1, 1), "Unknown"),
            ]
        );
    }

    #[tokio::test]
    async fn fetch_goes_through_the_token_manager() {
        let transport = Arc::new(ScriptedTransport::new([(
            StatusCode::OK,
            r#"{"totalSize":1,"records":[{"CreatedDate":"2024-01-01","CreatedBy":{"Name":"Alice"}}]}"#,
        )]));
        let oauth = OAuthClient::new("cid", "secret", Url::parse("https://login.example.com").unwrap());
        let tokens = TokenManager::new(
            transport.clone(),
            Arc::new(oauth),
            TokenState {
                access_token: "at".to_string(),
                refresh_token: None,
                instance_url: Url::parse("https://na1.example.com").unwrap(),
            },
        );

        let result = fetch_history(&tokens, "v20.0", HistoryWindow::Quarters(4), day(2024, 1, 5))
            .await
            .unwrap();
        assert_eq!(result.events().len(), 1);

        let calls = transport.calls();
        assert_eq!(calls[0].url.host_str(), Some("na1.example.com"));
        assert_eq!(calls[0].authorization.as_deref(), Some("OAuth at"));
    }

    #[tokio::test]
    async fn server_error_propagates() {
        let transport = Arc::new(ScriptedTransport::new([(StatusCode::INTERNAL_SERVER_ERROR, "oops")]));
        let oauth = OAuthClient::new("cid", "secret", Url::parse("https://login.example.com").unwrap());
        let tokens = TokenManager::new(
            transport,
            Arc::new(oauth),
            TokenState {
                access_token: "at".to_string(),
                refresh_token: Some("rt".to_string()),
                instance_url: Url::parse("https://na1.example.com").unwrap(),
            },
        );

        let err = fetch_history(&tokens, "v20.0", HistoryWindow::Days(90), day(2024, 1, 5))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Upstream { status: StatusCode::INTERNAL_SERVER_ERROR, .. }));
    }
}
