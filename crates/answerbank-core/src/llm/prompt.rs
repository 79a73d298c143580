//! Prompt construction for chat-completion answerers.

use crate::types::{QuestionInfo, QuestionType};
use serde::Serialize;

/// One chat message in OpenAI wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

/// Wording of the system instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptStyle {
    /// Forbids explanations, reasoning and markdown explicitly.
    Strict,
    /// Shorter variant.
    Compact,
}

/// System instruction for a question type, demanding `{"Answer": [...]}`.
pub fn system_prompt(kind: QuestionType, style: PromptStyle) -> &'static str {
    match style {
        PromptStyle::Strict => match kind {
            QuestionType::Single => {
                "单选题答题。直接输出JSON，禁止解释、思考过程或Markdown。\n\
                 格式：{\"Answer\": [\"B\"]}  （B为正确选项字母，仅填A/B/C/D之一）"
            }
            QuestionType::Multiple => {
                "多选题答题。直接输出JSON，禁止解释、思考过程或Markdown。\n\
                 格式：{\"Answer\": [\"A\", \"C\"]}  （填所有正确选项字母）"
            }
            QuestionType::Completion => {
                "填空题答题。直接输出JSON，禁止解释、思考过程或Markdown。\n\
                 格式：{\"Answer\": [\"答案1\", \"答案2\"]}  （按空格顺序填写答案）"
            }
            QuestionType::Judgement => {
                "判断题答题。直接输出JSON，禁止解释、思考过程或Markdown。\n\
                 格式：{\"Answer\": [\"正确\"]} 或 {\"Answer\": [\"错误\"]}"
            }
            _ => {
                "答题助手。直接输出JSON，禁止解释、思考过程或Markdown。\n\
                 格式：{\"Answer\": [\"答案\"]}"
            }
        },
        PromptStyle::Compact => match kind {
            QuestionType::Single => {
                "单选题。直接输出JSON，禁止解释或Markdown。格式：{\"Answer\": [\"B\"]}（仅填选项字母）"
            }
            QuestionType::Multiple => {
                "多选题。直接输出JSON，禁止解释或Markdown。格式：{\"Answer\": [\"A\", \"C\"]}（填所有正确选项字母）"
            }
            QuestionType::Completion => {
                "填空题。直接输出JSON，禁止解释或Markdown。格式：{\"Answer\": [\"答案\"]}"
            }
            QuestionType::Judgement => {
                "判断题。直接输出JSON，禁止解释或Markdown。格式：{\"Answer\": [\"正确\"]} 或 {\"Answer\": [\"错误\"]}"
            }
            _ => "直接输出JSON答案，禁止解释或Markdown。格式：{\"Answer\": [\"答案\"]}",
        },
    }
}

/// User message: the title, then the label-stripped options one per line.
pub fn user_message(question: &QuestionInfo) -> String {
    let mut content = format!("题目：{}", question.title).trim().to_string();
    let options = question.cleaned_options();
    if !options.is_empty() {
        content.push_str("\n选项：");
        content.push_str(&options.join("\n"));
    }
    content
}

/// System + user messages for one question.
pub fn build_messages(question: &QuestionInfo, style: PromptStyle) -> Vec<ChatMessage> {
    vec![
        ChatMessage {
            role: "system",
            content: system_prompt(question.kind, style).to_string(),
        },
        ChatMessage {
            role: "user",
            content: user_message(question),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_with_options() {
        let q = QuestionInfo::new("计算机中负责运算的部件是", QuestionType::Single)
            .with_options(["A. 运算器", "B、控制器\nC 存储器"]);
        assert_eq!(
            user_message(&q),
            "题目：计算机中负责运算的部件是\n选项：运算器\n控制器\n存储器"
        );
    }

    #[test]
    fn test_user_message_without_options() {
        let q = QuestionInfo::new("  地球是圆的  ", QuestionType::Judgement);
        assert_eq!(user_message(&q), "题目：  地球是圆的");
    }

    #[test]
    fn test_prompts_demand_answer_json() {
        for kind in [
            QuestionType::Single,
            QuestionType::Multiple,
            QuestionType::Completion,
            QuestionType::Judgement,
            QuestionType::ShortAnswer,
            QuestionType::Unknown,
        ] {
            for style in [PromptStyle::Strict, PromptStyle::Compact] {
                assert!(system_prompt(kind, style).contains("{\"Answer\": ["));
            }
        }
    }

    #[test]
    fn test_build_messages_roles() {
        let q = QuestionInfo::new("1+1=?", QuestionType::Completion);
        let messages = build_messages(&q, PromptStyle::Compact);
        assert_eq!(messages[0].role, "system");
        assert!(messages[0].content.starts_with("填空题"));
        assert_eq!(messages[1].role, "user");
    }
}
