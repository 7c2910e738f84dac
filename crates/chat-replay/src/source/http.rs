//! Chat records served by the archive web app.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use super::{ChatSource, DEFAULT_PAGE_SIZE, RawRecord, RecordPage};
use crate::error::{ReplayError, Result};

#[derive(Debug, Deserialize)]
struct ReplayResponse {
    data: Vec<RawRecord>,
}

/// Pages through `GET {base}/live_chat_replay/{video_id}`.
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: Client,
    endpoint: Url,
    page_size: usize,
}

impl HttpSource {
    pub fn new(client: Client, base: &Url, video_id: &str) -> Result<Self> {
        let mut endpoint = base.clone();
        endpoint
            .path_segments_mut()
            .map_err(|_| ReplayError::config(format!("Cannot use {base} as a base URL")))?
            .pop_if_empty()
            .extend(["live_chat_replay", video_id]);
        Ok(Self {
            client,
            endpoint,
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    /// Page size the server applies; a shorter page ends the direction.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn get(&self, query: &[(&str, String)]) -> Result<Vec<RawRecord>> {
        debug!("GET {} {:?}", self.endpoint, query);
        let response = self
            .client
            .get(self.endpoint.clone())
            .query(query)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ReplayError::source(format!(
                "{} returned {}",
                self.endpoint, status
            )));
        }
        let mut records = response.json::<ReplayResponse>().await?.data;
        records.sort_by_key(|r| r.sequence);
        Ok(records)
    }
}

#[async_trait]
impl ChatSource for HttpSource {
    async fn fetch_after(&self, sequence: Option<u64>) -> Result<RecordPage> {
        match sequence.filter(|sequence| *sequence > 0) {
            Some(sequence) => {
                let records = self
                    .get(&[("lastSequence", sequence.to_string())])
                    .await?;
                let exhausted = records.len() < self.page_size;
                Ok(RecordPage::new(records, exhausted))
            }
            None => {
                // Without a cursor the server answers with the opening window
                // only, so its size says nothing about the rest of the archive.
                let records = self.get(&[]).await?;
                let exhausted = records.is_empty();
                Ok(RecordPage::new(records, exhausted))
            }
        }
    }

    async fn fetch_before(&self, sequence: u64) -> Result<RecordPage> {
        let records = self
            .get(&[("beforeSequence", sequence.to_string())])
            .await?;
        let exhausted = records.len() < self.page_size;
        Ok(RecordPage::new(records, exhausted))
    }

    async fn fetch_around(&self, time_ms: i64) -> Result<RecordPage> {
        let records = self.get(&[("currentTime", time_ms.to_string())]).await?;
        // A time window says nothing about what follows it.
        Ok(RecordPage::new(records, false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn source(server: &MockServer) -> HttpSource {
        let base = Url::parse(&format!("{}/api/", server.uri())).unwrap();
        HttpSource::new(Client::new(), &base, "vid123")
            .unwrap()
            .with_page_size(2)
    }

    #[test]
    fn test_endpoint() {
        let base = Url::parse("http://localhost:8000/api").unwrap();
        let source = HttpSource::new(Client::new(), &base, "abc").unwrap();
        assert_eq!(
            source.endpoint().as_str(),
            "http://localhost:8000/api/live_chat_replay/abc"
        );
    }

    #[tokio::test]
    async fn test_fetch_after() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/live_chat_replay/vid123"))
            .and(query_param("lastSequence", "10"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"seq": 12, "data": {}}, {"seq": 11, "data": {}}]
            })))
            .mount(&server)
            .await;

        let page = source(&server).await.fetch_after(Some(10)).await.unwrap();
        assert_eq!(page.first_sequence(), Some(11));
        assert_eq!(page.last_sequence(), Some(12));
        assert!(!page.exhausted);
    }

    #[tokio::test]
    async fn test_opening_page_is_not_exhausted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/live_chat_replay/vid123"))
            .and(query_param("lastSequence", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"seq": 2, "data": {}}, {"seq": 3, "data": {}}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/live_chat_replay/vid123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"seq": 1, "data": {}}]
            })))
            .mount(&server)
            .await;

        let source = source(&server).await;
        let page = source.fetch_after(None).await.unwrap();
        assert_eq!(page.last_sequence(), Some(1));
        assert!(!page.exhausted);
        let page = source.fetch_after(Some(0)).await.unwrap();
        assert!(!page.exhausted);

        // paging continues from the opening window
        let page = source.fetch_after(page.last_sequence()).await.unwrap();
        assert_eq!(page.first_sequence(), Some(2));
        assert_eq!(page.last_sequence(), Some(3));
    }

    #[tokio::test]
    async fn test_empty_opening_page_is_exhausted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
            .mount(&server)
            .await;

        let page = source(&server).await.fetch_after(None).await.unwrap();
        assert!(page.is_empty());
        assert!(page.exhausted);
    }

    #[tokio::test]
    async fn test_short_page_is_exhausted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("beforeSequence", "3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"seq": 2, "data": {"x": 1}}]
            })))
            .mount(&server)
            .await;

        let page = source(&server).await.fetch_before(3).await.unwrap();
        assert_eq!(page.records.len(), 1);
        assert!(page.exhausted);
    }

    #[tokio::test]
    async fn test_http_failure_is_source_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = source(&server).await.fetch_around(90_000).await.unwrap_err();
        assert!(matches!(err, ReplayError::Source(_)));
        assert!(!err.is_ingestion_fault());
    }
}
