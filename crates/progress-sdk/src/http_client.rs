//! 远端进度接口
//!
//! `ProgressRemote` 是同步队列与服务端之间的唯一接缝：
//! - `send_progress`：单条幂等 upsert（`POST {base}/progress`）
//! - `send_on_teardown`：页面/进程退出时的批量写入（`POST {base}/progress/batch`）
//! - `fetch_completed_chapters`：拉取服务端已完成章节，用于与本地状态合并
//!
//! 默认实现 `ProgressHttpClient` 基于 reqwest（rustls）。

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info};

use crate::error::{ProgressSDKError, Result};
use crate::storage::queue::ProgressPayload;
use crate::version;

/// HTTP 客户端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpClientConfig {
    /// 进度 API 基础地址（如 https://api.example.com/api）
    pub base_url: String,
    /// 连接超时（秒）
    pub connect_timeout_secs: Option<u64>,
    /// 请求超时（秒）
    pub request_timeout_secs: Option<u64>,
    /// 可选的 Bearer token
    pub auth_token: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000/api".to_string(),
            connect_timeout_secs: Some(10),
            request_timeout_secs: Some(30),
            auth_token: None,
        }
    }
}

/// 远端进度存储
#[async_trait]
pub trait ProgressRemote: Send + Sync + std::fmt::Debug {
    /// 写入一条进度，成功即视为确认
    async fn send_progress(&self, payload: &ProgressPayload) -> Result<()>;

    /// 退出前的批量写入
    ///
    /// 默认逐条调用 `send_progress`，遇到第一个错误即返回。
    async fn send_on_teardown(&self, batch: &[ProgressPayload]) -> Result<()> {
        for payload in batch {
            self.send_progress(payload).await?;
        }
        Ok(())
    }

    /// 拉取某课程服务端已完成的章节 ID（统一为字符串）
    async fn fetch_completed_chapters(&self, course_id: &str, user_id: &str) -> Result<Vec<String>>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompletedChaptersResponse {
    #[serde(default)]
    completed_chapter_ids: Vec<serde_json::Value>,
}

/// 服务端返回的 ID 可能是字符串也可能是数字
fn normalize_chapter_ids(values: Vec<serde_json::Value>) -> Vec<String> {
    values
        .into_iter()
        .filter_map(|value| match value {
            serde_json::Value::String(s) => Some(s),
            serde_json::Value::Number(n) => Some(n.to_string()),
            other => {
                debug!("忽略无法识别的章节 ID: {}", other);
                None
            }
        })
        .collect()
}

/// 基于 reqwest 的进度客户端
#[derive(Debug, Clone)]
pub struct ProgressHttpClient {
    client: Client,
    base_url: Url,
    auth_token: Option<String>,
}

impl ProgressHttpClient {
    /// 创建新的 HTTP 客户端
    pub fn new(config: &HttpClientConfig) -> Result<Self> {
        let mut builder = Client::builder().user_agent(version::user_agent());

        if let Some(timeout) = config.connect_timeout_secs {
            builder = builder.connect_timeout(Duration::from_secs(timeout));
        }

        if let Some(timeout) = config.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(timeout));
        }

        let client = builder
            .build()
            .map_err(|e| ProgressSDKError::Config(format!("创建 HTTP 客户端失败: {}", e)))?;

        let base_url = Url::parse(config.base_url.trim_end_matches('/'))
            .map_err(|e| ProgressSDKError::Config(format!("无效的 base_url {}: {}", config.base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(ProgressSDKError::Config(format!(
                "base_url 不能作为基础地址: {}",
                config.base_url
            )));
        }

        info!("✅ 进度 HTTP 客户端已创建 (base_url: {})", base_url);

        Ok(Self {
            client,
            base_url,
            auth_token: config.auth_token.clone(),
        })
    }

    /// 在基础地址后追加路径段（自动转义）
    pub fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ProgressSDKError::Config("base_url 不能作为基础地址".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.auth_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn check_status(response: reqwest::Response, action: &str) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "无法读取错误信息".to_string());
        error!("❌ {}失败，HTTP 状态码: {}, 错误: {}", action, status, error_text);
        Err(ProgressSDKError::Http {
            status: status.as_u16(),
            message: error_text,
        })
    }
}

#[async_trait]
impl ProgressRemote for ProgressHttpClient {
    async fn send_progress(&self, payload: &ProgressPayload) -> Result<()> {
        let url = self.endpoint(&["progress"])?;
        debug!(
            "📤 写入进度: {}/{}/{} {:.2}%",
            payload.course_id, payload.chapter_id, payload.video_id, payload.progress
        );
        let response = self
            .request(reqwest::Method::POST, url)
            .json(payload)
            .send()
            .await?;
        Self::check_status(response, "写入进度").await?;
        Ok(())
    }

    async fn send_on_teardown(&self, batch: &[ProgressPayload]) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let url = self.endpoint(&["progress", "batch"])?;
        info!("📤 退出前批量写入 {} 条进度", batch.len());
        let response = self
            .request(reqwest::Method::POST, url)
            .json(batch)
            .send()
            .await?;
        Self::check_status(response, "批量写入进度").await?;
        Ok(())
    }

    async fn fetch_completed_chapters(&self, course_id: &str, user_id: &str) -> Result<Vec<String>> {
        let mut url = self.endpoint(&["progress", course_id, "completed"])?;
        url.query_pairs_mut().append_pair("userId", user_id);
        info!("🔗 拉取已完成章节: course={}", course_id);

        let response = self.request(reqwest::Method::GET, url).send().await?;
        let response = Self::check_status(response, "拉取已完成章节").await?;
        let body: CompletedChaptersResponse = response
            .json()
            .await
            .map_err(|e| ProgressSDKError::Serialization(format!("解析已完成章节响应失败: {}", e)))?;

        Ok(normalize_chapter_ids(body.completed_chapter_ids))
    }
}


#[cfg(test)]
pub use test_helpers::RecordingRemote;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::queue::SyncFailureReason;

    #[test]
    fn test_endpoint_building() {
        let client = ProgressHttpClient::new(&HttpClientConfig {
            base_url: "https://api.example.com/api/".to_string(),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(
            client.endpoint(&["progress"]).unwrap().as_str(),
            "https://api.example.com/api/progress"
        );
        assert_eq!(
            client.endpoint(&["progress", "rust 101", "completed"]).unwrap().as_str(),
            "https://api.example.com/api/progress/rust%20101/completed"
        );
    }

    #[tokio::test]
    async fn test_refused_connection_is_not_connected() {
        let client = ProgressHttpClient::new(&HttpClientConfig {
            base_url: "http://127.0.0.1:1/api".to_string(),
            ..Default::default()
        })
        .unwrap();
        let payload = ProgressPayload {
            course_id: "rust-101".into(),
            chapter_id: "ch-1".into(),
            video_id: "v1".into(),
            progress: 10.0,
            played_seconds: 60.0,
            duration: 600.0,
            completed: false,
            user_id: "u1".into(),
        };

        let err = client.send_progress(&payload).await.unwrap_err();
        assert!(matches!(err, ProgressSDKError::NotConnected), "{:?}", err);
        assert!(err.is_transient());
        assert_eq!(
            SyncFailureReason::from(&err),
            SyncFailureReason::NetworkUnavailable
        );
    }

    #[test]
    fn test_invalid_base_url() {
        let result = ProgressHttpClient::new(&HttpClientConfig {
            base_url: "not a url".to_string(),
            ..Default::default()
        });
        assert!(matches!(result, Err(ProgressSDKError::Config(_))));
    }

    #[test]
    fn test_completed_ids_accept_strings_and_numbers() {
        let body: CompletedChaptersResponse =
            serde_json::from_str(r#"{"completedChapterIds": ["ch-1", 2, 30, null]}"#).unwrap();
        assert_eq!(
            normalize_chapter_ids(body.completed_chapter_ids),
            vec!["ch-1".to_string(), "2".to_string(), "30".to_string()]
        );

        let empty: CompletedChaptersResponse = serde_json::from_str("{}").unwrap();
        assert!(empty.completed_chapter_ids.is_empty());
    }

    #[tokio::test]
    async fn test_default_teardown_sends_sequentially() {
        #[derive(Debug, Default)]
        struct Counting(parking_lot::Mutex<Vec<String>>);

        #[async_trait]
        impl ProgressRemote for Counting {
            async fn send_progress(&self, payload: &ProgressPayload) -> Result<()> {
                self.0.lock().push(payload.video_id.clone());
                Ok(())
            }

            async fn fetch_completed_chapters(&self, _: &str, _: &str) -> Result<Vec<String>> {
                Ok(Vec::new())
            }
        }

        let remote = Counting::default();
        let payload = |video: &str| ProgressPayload {
            course_id: "c".into(),
            chapter_id: "ch".into(),
            video_id: video.into(),
            progress: 50.0,
            played_seconds: 30.0,
            duration: 60.0,
            completed: false,
            user_id: "u".into(),
        };
        remote
            .send_on_teardown(&[payload("v1"), payload("v2")])
            .await
            .unwrap();
        assert_eq!(*remote.0.lock(), vec!["v1".to_string(), "v2".to_string()]);
    }
}
