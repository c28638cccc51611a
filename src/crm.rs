use crate::errors::AppError;
use crate::token::TokenManager;
use axum::http::Method;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

const OBJECT_TYPE: &str = "Opportunity";

/// Editable fields of the opportunity form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpportunityFields {
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "Industry", default)]
    pub industry: String,
    #[serde(rename = "TickerSymbol", default)]
    pub ticker_symbol: String,
}

/// An opportunity as returned by the sobjects endpoint; fields stay untyped.
pub type Record = Map<String, Value>;

#[derive(Debug, Deserialize)]
struct CreateResult {
    id: String,
}

pub fn object_url(instance_url: &Url, api_version: &str, id: Option<&str>) -> Result<Url, AppError> {
    if let Some(id) = id {
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(AppError::bad_request("invalid record id"));
        }
    }
    let mut url = instance_url.clone();
    if let Ok(mut segments) = url.path_segments_mut() {
        segments
            .pop_if_empty()
            .extend(["services", "data", api_version, "sobjects", OBJECT_TYPE]);
        segments.push(id.unwrap_or(""));
    }
    Ok(url)
}

pub async fn read(tokens: &TokenManager, api_version: &str, id: &str) -> Result<Record, AppError> {
    let url = object_url(&tokens.instance_url().await, api_version, Some(id))?;
    tokens.get(url).await?.parsed()
}

/// Returns the id of the created record.
pub async fn create(tokens: &TokenManager, api_version: &str, fields: &OpportunityFields) -> Result<String, AppError> {
    let url = object_url(&tokens.instance_url().await, api_version, None)?;
    let body = serde_json::to_value(fields).map_err(AppError::internal)?;
    let created: CreateResult = tokens.send_json(Method::POST, url, body).await?.parsed()?;
    tracing::info!(id = %created.id, "opportunity created");
    Ok(created.id)
}

pub async fn update(
    tokens: &TokenManager,
    api_version: &str,
    id: &str,
    fields: &OpportunityFields,
) -> Result<(), AppError> {
    let url = object_url(&tokens.instance_url().await, api_version, Some(id))?;
    let body = serde_json::to_value(fields).map_err(AppError::internal)?;
    tokens.send_json(Method::PATCH, url, body).await?.error_for_status()?;
    tracing::info!(%id, "opportunity updated");
    Ok(())
}

pub async fn delete(tokens: &TokenManager, api_version: &str, id: &str) -> Result<(), AppError> {
    let url = object_url(&tokens.instance_url().await, api_version, Some(id))?;
    tokens.delete(url).await?.error_for_status()?;
    tracing::info!(%id, "opportunity deleted");
    Ok(())
}

/// Copies the editable fields out of a fetched record.
pub fn fields_of(record: &Record) -> OpportunityFields {
    let text = |key: &str| {
        record
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    OpportunityFields {
        name: text("Name"),
        industry: text("Industry"),
        ticker_symbol: text("TickerSymbol"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::OAuthClient;
    use crate::token::TokenState;
    use crate::upstream::RequestBody;
    use crate::upstream::testing::ScriptedTransport;
    use axum::http::StatusCode;
    use std::sync::Arc;

    fn manager(transport: Arc<ScriptedTransport>) -> TokenManager {
        let oauth = OAuthClient::new("cid", "secret", Url::parse("https://login.example.com").unwrap());
        TokenManager::new(
            transport,
            Arc::new(oauth),
            TokenState {
                access_token: "at".to_string(),
                refresh_token: None,
                instance_url: Url::parse("https://na1.example.com").unwrap(),
            },
        )
    }

    fn fields() -> OpportunityFields {
        OpportunityFields {
            name: "Big deal".to_string(),
            industry: "Energy".to_string(),
            ticker_symbol: "BD".to_string(),
        }
    }

    #[test]
    fn object_url_with_and_without_id() {
        let instance = Url::parse("https://na1.example.com").unwrap();
        let collection = object_url(&instance, "v20.0", None).unwrap();
        assert_eq!(collection.path(), "/services/data/v20.0/sobjects/Opportunity/");
        let single = object_url(&instance, "v20.0", Some("006A0000001")).unwrap();
        assert_eq!(single.path(), "/services/data/v20.0/sobjects/Opportunity/006A0000001");
    }

    #[test]
    fn object_url_rejects_path_tricks() {
        let instance = Url::parse("https://na1.example.com").unwrap();
        assert!(object_url(&instance, "v20.0", Some("../query")).is_err());
        assert!(object_url(&instance, "v20.0", Some("")).is_err());
    }

    #[tokio::test]
    async fn create_posts_json_and_returns_id() {
        let transport = Arc::new(ScriptedTransport::new([(
            StatusCode::CREATED,
            r#"{"id":"006NEW","success":true,"errors":[]}"#,
        )]));
        let id = create(&manager(transport.clone()), "v20.0", &fields()).await.unwrap();
        assert_eq!(id, "006NEW");

        let calls = transport.calls();
        assert_eq!(calls[0].method, Method::POST);
        assert_eq!(
            calls[0].body,
            Some(RequestBody::Json(serde_json::json!({
                "Name": "Big deal",
                "Industry": "Energy",
                "TickerSymbol": "BD"
            })))
        );
    }

    #[tokio::test]
    async fn update_uses_patch_and_accepts_no_content() {
        let transport = Arc::new(ScriptedTransport::new([(StatusCode::NO_CONTENT, "")]));
        update(&manager(transport.clone()), "v20.0", "006A", &fields()).await.unwrap();
        assert_eq!(transport.calls()[0].method, Method::PATCH);
    }

    #[tokio::test]
    async fn failed_delete_is_an_error() {
        let transport = Arc::new(ScriptedTransport::new([(
            StatusCode::NOT_FOUND,
            r#"[{"errorCode":"NOT_FOUND"}]"#,
        )]));
        let err = delete(&manager(transport), "v20.0", "006A").await.unwrap_err();
        assert!(matches!(err, AppError::Upstream { status: StatusCode::NOT_FOUND, .. }));
    }

    #[test]
    fn fields_are_copied_from_record() {
        let record: Record = serde_json::from_str(r#"{"Id":"006A","Name":"Deal","Industry":null}"#).unwrap();
        let fields = fields_of(&record);
        assert_eq!(fields.name, "Deal");
        assert_eq!(fields.industry, "");
        assert_eq!(fields.ticker_symbol, "");
    }
}
