//! The `answerbank answer` command.

use answerbank_core::{AnswerEngine, Config, EngineState, QuestionInfo, QuestionType};
use anyhow::Context;
use clap::Args;
use futures_util::StreamExt;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Arguments for the `answer` command.
#[derive(Args, Debug)]
pub struct AnswerArgs {
    /// Question title
    #[arg(short, long, conflicts_with = "input", required_unless_present = "input")]
    pub title: Option<String>,

    /// Question type: single, multiple, completion, judgement, shortanswer
    #[arg(long = "type", default_value = "unknown")]
    pub kind: String,

    /// Choice text, repeat for each option (e.g. -o "A. CPU" -o "B. 内存")
    #[arg(short, long = "option")]
    pub options: Vec<String>,

    /// Platform question id echoed in the output
    #[arg(long, default_value = "")]
    pub id: String,

    /// JSONL file with one question record per line
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Questions resolved concurrently
    #[arg(short, long, default_value = "1")]
    pub parallel: usize,
}

/// One output line.
#[derive(Debug, Serialize)]
struct AnswerRecord {
    id: String,
    title: String,
    answer: Option<String>,
    submit: bool,
}

/// Execute the answer command.
pub async fn execute(args: AnswerArgs, config: &Config) -> anyhow::Result<()> {
    let questions = match &args.input {
        Some(path) => read_questions(&super::expand_path(path))?,
        None => vec![question_from_flags(&args)?],
    };

    let engine = AnswerEngine::from_config(config)?;
    if engine.state() == EngineState::Disabled {
        tracing::warn!("Answering is disabled; check the [tiku] section of your config");
    }
    engine.initialize().await;

    let total = questions.len();
    let engine = &engine;
    let mut answered = 0usize;
    let mut results = futures_util::stream::iter(questions)
        .map(|mut question| async move {
            let answer = engine.query(&mut question).await;
            AnswerRecord {
                id: question.id,
                title: question.title,
                answer,
                submit: engine.submit_enabled(),
            }
        })
        .buffered(args.parallel.max(1));

    while let Some(record) = results.next().await {
        if record.answer.is_some() {
            answered += 1;
        }
        println!("{}", serde_json::to_string(&record)?);
    }

    tracing::info!("Answered {answered}/{total} questions");
    Ok(())
}

fn question_from_flags(args: &AnswerArgs) -> anyhow::Result<QuestionInfo> {
    let title = args
        .title
        .clone()
        .context("--title is required without --input")?;
    let kind: QuestionType = args.kind.parse().unwrap_or_default();
    let mut question = QuestionInfo::new(title, kind).with_options(args.options.clone());
    question.id = args.id.clone();
    Ok(question)
}

/// Parse a JSONL file; blank lines are skipped.
fn read_questions(path: &Path) -> anyhow::Result<Vec<QuestionInfo>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("{}:{}: invalid question record", path.display(), n + 1))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(title: &str) -> AnswerArgs {
        AnswerArgs {
            title: Some(title.to_string()),
            kind: "single".into(),
            options: vec!["A. CPU".into(), "B. 内存".into()],
            id: "q-1".into(),
            input: None,
            parallel: 1,
        }
    }

    #[test]
    fn test_question_from_flags() {
        let q = question_from_flags(&args("计算机的核心部件是")).unwrap();
        assert_eq!(q.kind, QuestionType::Single);
        assert_eq!(q.options.len(), 2);
        assert_eq!(q.id, "q-1");
    }

    #[test]
    fn test_read_questions_reports_bad_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("q.jsonl");
        std::fs::write(
            &path,
            "{\"id\": \"1\", \"title\": \"a\", \"type\": \"single\", \"options\": [\"A. x\"]}\n\n{\"title\": \"b\"}\n",
        )
        .unwrap();
        let questions = read_questions(&path).unwrap();
        assert_eq!(questions.len(), 2);
        assert_eq!(questions[1].kind, QuestionType::Unknown);

        std::fs::write(&path, "{\"title\": \"a\"}\nnot json\n").unwrap();
        let err = read_questions(&path).unwrap_err();
        assert!(format!("{err:#}").contains(":2:"));
    }

    #[tokio::test]
    async fn test_disabled_engine_still_prints() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.general.cache_path = dir.path().join("cache.json");
        execute(args("1+1=?"), &config).await.unwrap();
    }
}
