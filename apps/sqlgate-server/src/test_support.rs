use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::llm::{ChatRequest, LlmClient, LlmError};

/// In-process `LlmClient` that replays queued replies in order and records
/// every request it receives. An exhausted queue reports `Unavailable`.
#[derive(Default)]
pub(crate) struct ScriptedLlm {
    replies: Mutex<VecDeque<Result<String, LlmError>>>,
    seen: Mutex<Vec<ChatRequest>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replying<I, S>(replies: I) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let llm = Self::new();
        for r in replies {
            llm.push_ok(r);
        }
        Arc::new(llm)
    }

    pub fn unavailable() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn push_ok(&self, reply: impl Into<String>) {
        self.replies.lock().unwrap().push_back(Ok(reply.into()));
    }

    pub fn push_err(&self, err: LlmError) {
        self.replies.lock().unwrap().push_back(Err(err));
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl LlmClient for ScriptedLlm {
    fn provider(&self) -> &str {
        "openai"
    }

    async fn complete(&self, req: ChatRequest) -> Result<String, LlmError> {
        self.seen.lock().unwrap().push(req);
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::Unavailable("script exhausted".into())))
    }
}

/// Creates `shop.db` with `orders(id int, total numeric(10,2))` and three rows.
pub(crate) fn orders_db(dir: &Path) -> String {
    let path = dir.join("shop.db");
    let conn = rusqlite::Connection::open(&path).unwrap();
    conn.execute_batch(
        "CREATE TABLE orders (id int PRIMARY KEY, total numeric(10,2));
         INSERT INTO orders VALUES (1, 10.5), (2, 20), (3, 7.25);",
    )
    .unwrap();
    format!("sqlite:///{}", path.display())
}

pub(crate) struct Fixture {
    pub _dir: tempfile::TempDir,
    pub kernel: sqlgate_kernel::Kernel,
    pub orchestrator: crate::orchestrator::Orchestrator,
}

/// Orchestrator over a fresh state dir with connection 1 pointing at
/// [`orders_db`]. Prompt translation is off so scripted replies map
/// one-to-one onto generation and normalization calls.
pub(crate) fn fixture(llm: Arc<ScriptedLlm>, mut settings: sqlgate_core::Settings) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let kernel = sqlgate_kernel::Kernel::open(&dir.path().join("state")).unwrap();
    kernel
        .upsert_connection(&sqlgate_protocol::ConnectionDescriptor {
            id: 1,
            name: "shop".into(),
            connection_string: orders_db(dir.path()),
        })
        .unwrap();
    settings.llm.translate_prompts = false;
    let orchestrator = crate::bootstrap::orchestrator(&settings, kernel.clone(), llm);
    Fixture {
        _dir: dir,
        kernel,
        orchestrator,
    }
}

/// Audit writes are detached; poll until `n` records are visible.
pub(crate) async fn wait_for_history(
    kernel: &sqlgate_kernel::Kernel,
    n: usize,
) -> Vec<sqlgate_protocol::HistoryRecord> {
    for _ in 0..100 {
        let items = kernel.list_history(100).unwrap();
        if items.len() >= n {
            return items;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    panic!("history never reached {n} records");
}
