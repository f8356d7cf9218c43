use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::models::{
    ChatReply, ChatRequest, LearningMode, Memo, NewPlan, Plan, PlanItem, PlanItemUpdate,
    SessionStatus, Settings, UploadReceipt,
};

// ── Backend seam ──────────────────────────────────────────────────────────────

/// Everything the study desk asks of the remote backend.
///
/// `Client` speaks HTTP; tests substitute an in-memory implementation.
/// Every failure (transport or non-2xx) is a plain `anyhow::Error`; callers
/// never branch on the kind.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn create_session(&self) -> Result<SessionStatus>;
    async fn session_status(&self, session_id: &str) -> Result<SessionStatus>;
    async fn upload_image(
        &self,
        session_id: &str,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<UploadReceipt>;

    async fn send_chat(&self, request: &ChatRequest) -> Result<ChatReply>;

    async fn list_plans(&self) -> Result<Vec<Plan>>;
    async fn get_plan(&self, plan_id: i64) -> Result<Plan>;
    async fn create_plan(&self, plan: &NewPlan) -> Result<Plan>;
    async fn update_plan_item(
        &self,
        plan_id: i64,
        item_id: i64,
        update: &PlanItemUpdate,
    ) -> Result<PlanItem>;
    async fn delete_plan(&self, plan_id: i64) -> Result<()>;

    async fn list_memos(&self) -> Result<Vec<Memo>>;
    async fn create_memo(&self, content: &str) -> Result<Memo>;
    async fn delete_memo(&self, memo_id: i64) -> Result<()>;

    async fn get_settings(&self) -> Result<Settings>;
    async fn update_settings(&self, mode: LearningMode) -> Result<Settings>;
}

// ── Client ────────────────────────────────────────────────────────────────────

pub struct Client {
    http: reqwest::Client,
    pub endpoint: String,
}

impl Client {
    pub fn new(endpoint: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint.trim_end_matches('/'), path)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path);
        debug!(%url, "GET");
        let resp = self.http.get(&url).send().await?;
        decode(resp).await
    }

    async fn send_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let url = self.url(path);
        debug!(%url, %method, "request");
        let resp = self
            .http
            .request(method, &url)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;
        decode(resp).await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let url = self.url(path);
        debug!(%url, "DELETE");
        let resp = self.http.delete(&url).send().await?;
        check(resp).await?;
        Ok(())
    }
}

/// Turn a non-2xx response into an error carrying the status and body text.
async fn check(resp: reqwest::Response) -> Result<reqwest::Response> {
    if !resp.status().is_success() {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        return Err(anyhow!("API error {}: {}", status, text));
    }
    Ok(resp)
}

async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    let resp = check(resp).await?;
    let url = resp.url().to_string();
    resp.json::<T>()
        .await
        .with_context(|| format!("Failed to parse response from {url}"))
}

#[async_trait]
impl Backend for Client {
    async fn create_session(&self) -> Result<SessionStatus> {
        self.get_json("/upload/session/new").await
    }

    async fn session_status(&self, session_id: &str) -> Result<SessionStatus> {
        self.get_json(&format!("/upload/session/{session_id}/status"))
            .await
    }

    async fn upload_image(
        &self,
        session_id: &str,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<UploadReceipt> {
        let url = self.url(&format!("/upload/upload/{session_id}"));
        debug!(%url, size = bytes.len(), "POST multipart");
        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name.to_string());
        let form = reqwest::multipart::Form::new().part("file", part);
        let resp = self.http.post(&url).multipart(form).send().await?;
        decode(resp).await
    }

    async fn send_chat(&self, request: &ChatRequest) -> Result<ChatReply> {
        self.send_json(reqwest::Method::POST, "/chat/", request).await
    }

    async fn list_plans(&self) -> Result<Vec<Plan>> {
        self.get_json("/plans/").await
    }

    async fn get_plan(&self, plan_id: i64) -> Result<Plan> {
        self.get_json(&format!("/plans/{plan_id}")).await
    }

    async fn create_plan(&self, plan: &NewPlan) -> Result<Plan> {
        self.send_json(reqwest::Method::POST, "/plans/", plan).await
    }

    async fn update_plan_item(
        &self,
        plan_id: i64,
        item_id: i64,
        update: &PlanItemUpdate,
    ) -> Result<PlanItem> {
        self.send_json(
            reqwest::Method::PUT,
            &format!("/plans/{plan_id}/items/{item_id}"),
            update,
        )
        .await
    }

    async fn delete_plan(&self, plan_id: i64) -> Result<()> {
        self.delete(&format!("/plans/{plan_id}")).await
    }

    async fn list_memos(&self) -> Result<Vec<Memo>> {
        self.get_json("/memos/").await
    }

    async fn create_memo(&self, content: &str) -> Result<Memo> {
        self.send_json(
            reqwest::Method::POST,
            "/memos/",
            &serde_json::json!({ "content": content }),
        )
        .await
    }

    async fn delete_memo(&self, memo_id: i64) -> Result<()> {
        self.delete(&format!("/memos/{memo_id}")).await
    }

    async fn get_settings(&self) -> Result<Settings> {
        self.get_json("/settings/").await
    }

    async fn update_settings(&self, mode: LearningMode) -> Result<Settings> {
        self.send_json(
            reqwest::Method::PUT,
            "/settings/",
            &Settings { learning_mode: mode },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinHandle;

    /// Read one HTTP/1.1 request: headers plus a sized or chunked body.
    async fn read_request(sock: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = sock.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
                continue;
            };
            let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
            if head.contains("transfer-encoding: chunked") {
                if buf.ends_with(b"0\r\n\r\n") {
                    break;
                }
                continue;
            }
            let body_len = head
                .lines()
                .filter_map(|l| l.split_once(':'))
                .find(|(k, _)| k.trim().eq_ignore_ascii_case("content-length"))
                .and_then(|(_, v)| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + body_len {
                break;
            }
        }
        String::from_utf8_lossy(&buf).to_string()
    }

    /// Serve exactly one request with `status` and `body`; the task yields
    /// the raw request text.
    async fn serve_once(status: &'static str, body: &'static str) -> (Client, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let request = read_request(&mut sock).await;
            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            sock.write_all(response.as_bytes()).await.unwrap();
            let _ = sock.shutdown().await;
            request
        });
        (Client::new(format!("http://{addr}/api")), task)
    }

    fn request_body(raw: &str) -> &str {
        raw.split_once("\r\n\r\n").map(|(_, b)| b).unwrap_or("")
    }

    #[tokio::test]
    async fn test_non_2xx_becomes_api_error_with_body() {
        let (client, server) = serve_once("500 Internal Server Error", "boom").await;
        let err = client.get_plan(3).await.unwrap_err();
        assert_eq!(err.to_string(), "API error 500 Internal Server Error: boom");
        assert!(server.await.unwrap().starts_with("GET /api/plans/3 HTTP/1.1"));
    }

    #[tokio::test]
    async fn test_delete_not_found_is_an_error() {
        let (client, server) = serve_once("404 Not Found", r#"{"detail":"Memo not found"}"#).await;
        let err = client.delete_memo(9).await.unwrap_err();
        assert!(err.to_string().starts_with("API error 404 Not Found"));
        assert!(err.to_string().contains("Memo not found"));
        assert!(server.await.unwrap().starts_with("DELETE /api/memos/9 HTTP/1.1"));
    }

    #[tokio::test]
    async fn test_success_with_bad_body_is_a_parse_error() {
        let (client, server) = serve_once("200 OK", r#"{"unexpected": true}"#).await;
        let err = client.list_plans().await.unwrap_err();
        assert!(err.to_string().contains("Failed to parse response"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_chat_request_and_reply_shapes() {
        let (client, server) = serve_once(
            "200 OK",
            r#"{"response":"Good start","understanding_score":70,"extracted_result":null}"#,
        )
        .await;
        let request = ChatRequest {
            message: "I finished the worksheet".to_string(),
            session_id: Some("sess-1".to_string()),
            image_url: None,
            current_mission_id: Some(5),
        };
        let reply = client.send_chat(&request).await.unwrap();
        assert_eq!(reply.response, "Good start");
        assert_eq!(reply.understanding_score, Some(70));
        assert_eq!(reply.extracted_result, None);

        let raw = server.await.unwrap();
        assert!(raw.starts_with("POST /api/chat/ HTTP/1.1"));
        let sent: serde_json::Value = serde_json::from_str(request_body(&raw)).unwrap();
        assert_eq!(
            sent,
            serde_json::json!({
                "message": "I finished the worksheet",
                "session_id": "sess-1",
                "current_mission_id": 5
            })
        );
    }

    #[tokio::test]
    async fn test_settings_update_body() {
        let (client, server) = serve_once("200 OK", r#"{"id":1,"learning_mode":"exam"}"#).await;
        let settings = client.update_settings(LearningMode::Exam).await.unwrap();
        assert_eq!(settings.learning_mode, LearningMode::Exam);
        let raw = server.await.unwrap();
        assert!(raw.starts_with("PUT /api/settings/ HTTP/1.1"));
        let sent: serde_json::Value = serde_json::from_str(request_body(&raw)).unwrap();
        assert_eq!(sent, serde_json::json!({"learning_mode": "exam"}));
    }

    #[tokio::test]
    async fn test_upload_sends_multipart_file_field() {
        let (client, server) = serve_once(
            "200 OK",
            r#"{"status":"success","file_path":"uploads/sess-1.jpg"}"#,
        )
        .await;
        let receipt = client
            .upload_image("sess-1", "photo.jpg", b"JPEGDATA".to_vec())
            .await
            .unwrap();
        assert_eq!(receipt.file_path.as_deref(), Some("uploads/sess-1.jpg"));

        let raw = server.await.unwrap();
        assert!(raw.starts_with("POST /api/upload/upload/sess-1 HTTP/1.1"));
        assert!(raw.to_ascii_lowercase().contains("content-type: multipart/form-data; boundary="));
        assert!(raw.contains(r#"name="file""#));
        assert!(raw.contains(r#"filename="photo.jpg""#));
        assert!(raw.contains("JPEGDATA"));
    }

    #[test]
    fn test_url_joins_without_double_slash() {
        let client = Client::new("http://localhost:8000/api/".to_string());
        assert_eq!(
            client.url("/plans/"),
            "http://localhost:8000/api/plans/"
        );
        let client = Client::new("http://localhost:8000/api".to_string());
        assert_eq!(
            client.url("/upload/session/abc/status"),
            "http://localhost:8000/api/upload/session/abc/status"
        );
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_an_error() {
        // Port 9 (discard) on localhost is not an HTTP server in test environments
        let client = Client::new("http://127.0.0.1:9/api".to_string());
        assert!(client.list_plans().await.is_err());
    }
}
