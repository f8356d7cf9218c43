/// In-memory `Backend` used by the unit tests.
///
/// Mirrors the REST backend closely enough for the client-side logic: plans
/// come back in insertion order, ids are sequential, and each mutation can be
/// made to fail on demand.
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use chrono::NaiveDateTime;

use crate::client::Backend;
use crate::models::{
    ChatReply, ChatRequest, LearningMode, Memo, NewPlan, Plan, PlanItem, PlanItemUpdate,
    SessionStatus, Settings, UploadReceipt,
};

#[derive(Default)]
struct State {
    next_id: i64,
    sessions: HashMap<String, SessionStatus>,
    plans: Vec<Plan>,
    memos: Vec<Memo>,
    settings: Settings,
    replies: VecDeque<ChatReply>,
    chat_log: Vec<ChatRequest>,
    uploads: Vec<(String, String, usize)>,
}

#[derive(Default)]
pub struct FakeBackend {
    state: Mutex<State>,
    pub status_calls: AtomicUsize,
    pub fail_sessions: AtomicBool,
    pub fail_status: AtomicBool,
    pub fail_chat: AtomicBool,
    pub fail_updates: AtomicBool,
    pub fail_create_plan: AtomicBool,
    pub fail_upload: AtomicBool,
    pub fail_memo_list: AtomicBool,
}

pub fn ts() -> NaiveDateTime {
    chrono::DateTime::from_timestamp(1_714_557_600, 0)
        .map(|dt| dt.naive_utc())
        .unwrap_or_default()
}

pub fn item(id: i64, plan_id: i64, content: &str, done: bool, score: i64) -> PlanItem {
    PlanItem {
        id,
        plan_id,
        content: content.to_string(),
        priority: 2,
        is_completed: done,
        understanding_score: score,
        last_result: None,
    }
}

pub fn plan(id: i64, title: &str, items: Vec<PlanItem>) -> Plan {
    Plan {
        id,
        title: title.to_string(),
        target: None,
        created_at: ts(),
        items,
    }
}

impl FakeBackend {
    pub fn new() -> Self {
        let fake = Self::default();
        fake.lock().next_id = 100;
        fake
    }

    pub fn with_plans(plans: Vec<Plan>) -> Self {
        let fake = Self::new();
        fake.lock().plans = plans;
        fake
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    fn next_id(&self) -> i64 {
        let mut st = self.lock();
        st.next_id += 1;
        st.next_id
    }

    pub fn queue_reply(&self, reply: ChatReply) {
        self.lock().replies.push_back(reply);
    }

    pub fn chat_log(&self) -> Vec<ChatRequest> {
        self.lock().chat_log.clone()
    }

    pub fn plans(&self) -> Vec<Plan> {
        self.lock().plans.clone()
    }

    pub fn memo_count(&self) -> usize {
        self.lock().memos.len()
    }

    pub fn uploads(&self) -> Vec<(String, String, usize)> {
        self.lock().uploads.clone()
    }

    pub fn mode(&self) -> LearningMode {
        self.lock().settings.learning_mode
    }

    pub fn set_score(&self, item_id: i64, score: i64) {
        let mut st = self.lock();
        for plan in &mut st.plans {
            if let Some(item) = plan.item_mut(item_id) {
                item.understanding_score = score;
            }
        }
    }

    /// Simulate the phone finishing its upload.
    pub fn attach_image(&self, session_id: &str, path: &str) {
        if let Some(s) = self.lock().sessions.get_mut(session_id) {
            s.has_image = true;
            s.image_path = Some(path.to_string());
        }
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn create_session(&self) -> Result<SessionStatus> {
        if self.fail_sessions.load(Ordering::SeqCst) {
            bail!("API error 500 Internal Server Error: session store down");
        }
        let id = format!("sess-{}", self.next_id());
        let status = SessionStatus {
            session_id: id.clone(),
            has_image: false,
            image_path: None,
        };
        self.lock().sessions.insert(id, status.clone());
        Ok(status)
    }

    async fn session_status(&self, session_id: &str) -> Result<SessionStatus> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_status.load(Ordering::SeqCst) {
            bail!("connection reset");
        }
        self.lock()
            .sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| anyhow!("API error 404 Not Found: Session not found"))
    }

    async fn upload_image(
        &self,
        session_id: &str,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<UploadReceipt> {
        if self.fail_upload.load(Ordering::SeqCst) {
            bail!("API error 500 Internal Server Error: disk full");
        }
        let path = format!("uploads/{session_id}-{file_name}");
        {
            let mut st = self.lock();
            let Some(session) = st.sessions.get_mut(session_id) else {
                bail!("API error 404 Not Found: Session not found");
            };
            session.has_image = true;
            session.image_path = Some(path.clone());
            st.uploads
                .push((session_id.to_string(), file_name.to_string(), bytes.len()));
        }
        Ok(UploadReceipt {
            status: "success".to_string(),
            file_path: Some(path),
        })
    }

    async fn send_chat(&self, request: &ChatRequest) -> Result<ChatReply> {
        self.lock().chat_log.push(request.clone());
        if self.fail_chat.load(Ordering::SeqCst) {
            bail!("API error 500 Internal Server Error: Gemini API Error");
        }
        let queued = self.lock().replies.pop_front();
        Ok(queued.unwrap_or_else(|| ChatReply {
            response: format!("echo: {}", request.message),
            understanding_score: None,
            extracted_result: None,
        }))
    }

    async fn list_plans(&self) -> Result<Vec<Plan>> {
        Ok(self.plans())
    }

    async fn get_plan(&self, plan_id: i64) -> Result<Plan> {
        self.lock()
            .plans
            .iter()
            .find(|p| p.id == plan_id)
            .cloned()
            .ok_or_else(|| anyhow!("API error 404 Not Found: Plan not found"))
    }

    async fn create_plan(&self, new: &NewPlan) -> Result<Plan> {
        if self.fail_create_plan.load(Ordering::SeqCst) {
            bail!("API error 422 Unprocessable Entity");
        }
        let plan_id = self.next_id();
        let mut items = Vec::new();
        for it in &new.items {
            let id = self.next_id();
            items.push(PlanItem {
                id,
                plan_id,
                content: it.content.clone(),
                priority: it.priority,
                is_completed: it.is_completed,
                understanding_score: 0,
                last_result: None,
            });
        }
        let created = Plan {
            id: plan_id,
            title: new.title.clone(),
            target: new.target.clone(),
            created_at: ts(),
            items,
        };
        self.lock().plans.push(created.clone());
        Ok(created)
    }

    async fn update_plan_item(
        &self,
        plan_id: i64,
        item_id: i64,
        update: &PlanItemUpdate,
    ) -> Result<PlanItem> {
        if self.fail_updates.load(Ordering::SeqCst) {
            bail!("API error 503 Service Unavailable");
        }
        let mut st = self.lock();
        let item = st
            .plans
            .iter_mut()
            .find(|p| p.id == plan_id)
            .and_then(|p| p.item_mut(item_id))
            .ok_or_else(|| anyhow!("API error 404 Not Found: Plan Item not found"))?;
        item.is_completed = update.is_completed;
        Ok(item.clone())
    }

    async fn delete_plan(&self, plan_id: i64) -> Result<()> {
        let mut st = self.lock();
        let before = st.plans.len();
        st.plans.retain(|p| p.id != plan_id);
        if st.plans.len() == before {
            bail!("API error 404 Not Found: Plan not found");
        }
        Ok(())
    }

    async fn list_memos(&self) -> Result<Vec<Memo>> {
        if self.fail_memo_list.load(Ordering::SeqCst) {
            bail!("API error 502 Bad Gateway");
        }
        // Newest first, as the backend orders by created_at desc
        let mut memos = self.lock().memos.clone();
        memos.reverse();
        Ok(memos)
    }

    async fn create_memo(&self, content: &str) -> Result<Memo> {
        let memo = Memo {
            id: self.next_id(),
            content: content.to_string(),
            created_at: ts(),
        };
        self.lock().memos.push(memo.clone());
        Ok(memo)
    }

    async fn delete_memo(&self, memo_id: i64) -> Result<()> {
        let mut st = self.lock();
        let before = st.memos.len();
        st.memos.retain(|m| m.id != memo_id);
        if st.memos.len() == before {
            bail!("API error 404 Not Found: Memo not found");
        }
        Ok(())
    }

    async fn get_settings(&self) -> Result<Settings> {
        Ok(self.lock().settings.clone())
    }

    async fn update_settings(&self, mode: LearningMode) -> Result<Settings> {
        let mut st = self.lock();
        st.settings.learning_mode = mode;
        Ok(st.settings.clone())
    }
}
