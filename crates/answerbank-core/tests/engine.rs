//! End-to-end behavior of the answering pipeline with mock providers.

use answerbank_core::engine::IMAGE_PLACEHOLDER;
use answerbank_core::{
    AnswerCache, AnswerEngine, AnswerProvider, EngineSettings, EngineState, ProviderError,
    ProviderResult, QuestionInfo, QuestionType,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// Returns a fixed reply and records what it was asked.
struct MockProvider {
    reply: Reply,
    freeform: bool,
    calls: Arc<AtomicU32>,
    inits: Arc<AtomicU32>,
    seen_titles: Arc<Mutex<Vec<String>>>,
}

#[derive(Clone)]
enum Reply {
    Answer(&'static str),
    Nothing,
    Quota,
    Network,
    FailInit,
}

impl MockProvider {
    fn new(reply: Reply) -> Self {
        Self {
            reply,
            freeform: false,
            calls: Arc::new(AtomicU32::new(0)),
            inits: Arc::new(AtomicU32::new(0)),
            seen_titles: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn freeform(mut self) -> Self {
        self.freeform = true;
        self
    }
}

#[async_trait]
impl AnswerProvider for MockProvider {
    fn name(&self) -> &str {
        "Mock"
    }

    fn is_freeform(&self) -> bool {
        self.freeform
    }

    async fn initialize(&self) -> ProviderResult<()> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        match self.reply {
            Reply::FailInit => Err(ProviderError::response("Mock", "no tokens")),
            _ => Ok(()),
        }
    }

    async fn query(&self, question: &QuestionInfo) -> ProviderResult<Option<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen_titles.lock().unwrap().push(question.title.clone());
        match self.reply {
            Reply::Answer(a) => Ok(Some(a.to_string())),
            Reply::Nothing | Reply::FailInit => Ok(None),
            Reply::Quota => Err(ProviderError::QuotaExhausted {
                provider: "Mock".into(),
                message: "all tokens used".into(),
            }),
            Reply::Network => Err(ProviderError::Http {
                provider: "Mock".into(),
                message: "connection refused".into(),
                status_code: None,
            }),
        }
    }
}

struct Fixture {
    engine: AnswerEngine,
    calls: Arc<AtomicU32>,
    inits: Arc<AtomicU32>,
    seen_titles: Arc<Mutex<Vec<String>>>,
    _dir: tempfile::TempDir,
}

fn fixture(provider: MockProvider) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let cache = AnswerCache::open(dir.path().join("cache.json"));
    let calls = provider.calls.clone();
    let inits = provider.inits.clone();
    let seen_titles = provider.seen_titles.clone();
    Fixture {
        engine: AnswerEngine::with_provider(Box::new(provider), cache),
        calls,
        inits,
        seen_titles,
        _dir: dir,
    }
}

#[tokio::test]
async fn test_answer_is_cached_and_second_query_skips_provider() {
    let f = fixture(MockProvider::new(Reply::Answer(" 北京 ")));
    let mut q = QuestionInfo::new("12中国的首都是（2.0分）", QuestionType::Completion);

    assert_eq!(f.engine.query(&mut q).await.as_deref(), Some("北京"));
    assert_eq!(q.title, "中国的首都是");
    assert_eq!(f.engine.state(), EngineState::Initialized);

    let mut again = QuestionInfo::new("3中国的首都是(2分)", QuestionType::Completion);
    assert_eq!(f.engine.query(&mut again).await.as_deref(), Some("北京"));
    assert_eq!(f.calls.load(Ordering::SeqCst), 1);
    assert_eq!(f.inits.load(Ordering::SeqCst), 1);
    assert_eq!(
        f.engine.cache().unwrap().get("中国的首都是").as_deref(),
        Some("北京")
    );
}

#[tokio::test]
async fn test_incompatible_bank_answer_is_discarded() {
    let f = fixture(MockProvider::new(Reply::Answer("A\nB")));
    let mut q = QuestionInfo::new("单选题", QuestionType::Single);
    assert_eq!(f.engine.query(&mut q).await, None);
    assert!(f.engine.cache().unwrap().get("单选题").is_none());

    let f = fixture(MockProvider::new(Reply::Answer("B")));
    let mut q = QuestionInfo::new("地球是平的", QuestionType::Judgement);
    assert_eq!(f.engine.query(&mut q).await, None);
}

#[tokio::test]
async fn test_freeform_answer_skips_type_check() {
    let f = fixture(MockProvider::new(Reply::Answer("A\nB")).freeform());
    let mut q = QuestionInfo::new("单选题", QuestionType::Single);
    assert_eq!(f.engine.query(&mut q).await.as_deref(), Some("A\nB"));
    assert_eq!(f.engine.cache().unwrap().get("单选题").as_deref(), Some("A\nB"));
}

#[tokio::test]
async fn test_image_tag_never_reaches_provider() {
    let f = fixture(MockProvider::new(Reply::Answer("2")));
    let mut q = QuestionInfo::new(
        r#"计算<img src="https://p.ananas.chaoxing.com/star3/1.png">的值"#,
        QuestionType::Completion,
    );
    f.engine.query(&mut q).await;
    let seen = f.seen_titles.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert!(!seen[0].contains("<img"));
    assert!(seen[0].contains(IMAGE_PLACEHOLDER));
}

#[tokio::test]
async fn test_miss_and_transport_error_are_absent() {
    let f = fixture(MockProvider::new(Reply::Nothing));
    let mut q = QuestionInfo::new("q", QuestionType::Completion);
    assert_eq!(f.engine.query(&mut q).await, None);

    let f = fixture(MockProvider::new(Reply::Network));
    let mut q = QuestionInfo::new("q", QuestionType::Completion);
    assert_eq!(f.engine.query(&mut q).await, None);
    assert_eq!(f.engine.state(), EngineState::Initialized);
}

#[tokio::test]
async fn test_quota_exhaustion_disables_engine() {
    let f = fixture(MockProvider::new(Reply::Quota));
    let mut q = QuestionInfo::new("q1", QuestionType::Completion);
    assert_eq!(f.engine.query(&mut q).await, None);
    assert_eq!(f.engine.state(), EngineState::Disabled);

    let mut q = QuestionInfo::new("q2", QuestionType::Completion);
    assert_eq!(f.engine.query(&mut q).await, None);
    assert_eq!(f.calls.load(Ordering::SeqCst), 1);
    // Titles are left alone once disabled.
    assert_eq!(q.title, "q2");
}

#[tokio::test]
async fn test_failed_setup_disables_without_queries() {
    let f = fixture(MockProvider::new(Reply::FailInit));
    f.engine.initialize().await;
    assert_eq!(f.engine.state(), EngineState::Disabled);

    let mut q = QuestionInfo::new("q", QuestionType::Completion);
    assert_eq!(f.engine.query(&mut q).await, None);
    assert_eq!(f.calls.load(Ordering::SeqCst), 0);
    assert!(!f.engine.resolve_judgement("正确"));
}

#[tokio::test]
async fn test_concurrent_queries_share_one_setup() {
    let f = fixture(MockProvider::new(Reply::Answer("A")));
    let engine = Arc::new(f.engine);
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let engine = engine.clone();
            tokio::spawn(async move {
                let mut q = QuestionInfo::new(format!("题目{i}"), QuestionType::Single);
                engine.query(&mut q).await
            })
        })
        .collect();
    for h in handles {
        assert_eq!(h.await.unwrap().as_deref(), Some("A"));
    }
    assert_eq!(f.inits.load(Ordering::SeqCst), 1);
    assert_eq!(engine.cache().unwrap().len(), 8);
}

#[tokio::test]
async fn test_settings_drive_submit_and_judgement() {
    let f = fixture(MockProvider::new(Reply::Nothing));
    let engine = f.engine.with_settings(EngineSettings {
        submit: true,
        ..EngineSettings::default()
    });
    assert!(engine.submit_enabled());
    assert_eq!(engine.submit_flag(), "");
    assert_eq!(engine.cover_rate(), 0.8);
    assert!(engine.resolve_judgement("对"));
    assert!(!engine.resolve_judgement("错误"));
}
