//! Centralised prompt texts.
//!
//! The dream template and its fixed "none" lines live here so they can be
//! audited and tuned in one place. A template loaded from
//! `METACOG_DREAM_PROMPT_FILE` replaces [`DREAM_PROMPT`] but is rendered by
//! the same function.

use crate::db::{FeedbackEntry, InsightEntry, MemoryRecord};

pub const DREAM_SYSTEM: &str = "あなたは自分の記憶を整理し、学びを抽出するAIです。";

pub const NO_FEEDBACK: &str = "(ユーザーからの修正指示なし)";
pub const NO_INSIGHTS: &str = "(前回の気づきなし)";
pub const NO_MEMORIES: &str = "(保存された記憶なし)";

pub const PH_FEEDBACK: &str = "{user_feedback}";
pub const PH_INSIGHTS: &str = "{previous_insights}";
pub const PH_MEMORIES: &str = "{saved_memories}";

pub const DREAM_PROMPT: &str = r#"あなたは自分の記憶を整理し、学びを抽出する。以下の情報を読み、気づきをまとめよ。

## 1. ユーザーからの修正指示（最重要）
{user_feedback}

## 2. 前回の夢見で得た気づき
{previous_insights}

## 3. 保存された気づき・自発メモリ
{saved_memories}

---

## 出力指示
上記を統合し、以下の3カテゴリに分けて気づきを出力せよ。各カテゴリ1-3項目。
前回の気づきが今も有効なら引き継ぎ、新しい経験で更新・統合せよ。不要になった気づきは捨てよ。

### A. 修正すべき行動パターン
ユーザー指摘や自分の振り返りから、繰り返している誤りや改善点。
具体的に「何を」「どう変えるか」を書け。

### B. 強化すべき良い傾向
うまくいったこと、継続すべきアプローチ。

### C. 新しい理解
複数の経験を統合して見えた、より深い気づきや構造的理解。

【形式】番号付きリストで出力。
例:
A1. [具体的な修正点]
A2. [具体的な修正点]
B1. [強化すべき点]
C1. [新しい理解]
"#;

fn section<T>(items: &[T], empty: &str, line: impl Fn(&T) -> String) -> String {
    if items.is_empty() {
        return empty.to_string();
    }
    items.iter().map(line).collect::<Vec<_>>().join("\n")
}

pub fn feedback_section(feedback: &[FeedbackEntry]) -> String {
    section(feedback, NO_FEEDBACK, |f| format!("- {}", f.feedback))
}

pub fn insights_section(insights: &[InsightEntry]) -> String {
    section(insights, NO_INSIGHTS, |i| match &i.category {
        Some(tag) => format!("- [{tag}] {}", i.content),
        None => format!("- {}", i.content),
    })
}

pub fn memories_section(memories: &[MemoryRecord]) -> String {
    section(memories, NO_MEMORIES, |m| format!("- [{}] {}", m.category, m.content))
}

/// Fill the three named placeholders. Sections are substituted in one pass
/// so text inside a memory that happens to look like a placeholder is left
/// alone.
pub fn render_dream_prompt(
    template: &str,
    feedback: &[FeedbackEntry],
    insights: &[InsightEntry],
    memories: &[MemoryRecord],
) -> String {
    let sections = [
        (PH_FEEDBACK, feedback_section(feedback)),
        (PH_INSIGHTS, insights_section(insights)),
        (PH_MEMORIES, memories_section(memories)),
    ];

    let mut out = String::with_capacity(template.len() + 1024);
    let mut rest = template;
    loop {
        let next = sections
            .iter()
            .filter_map(|(ph, body)| rest.find(ph).map(|pos| (pos, *ph, body)))
            .min_by_key(|(pos, _, _)| *pos);
        match next {
            Some((pos, ph, body)) => {
                out.push_str(&rest[..pos]);
                out.push_str(body);
                rest = &rest[pos + ph.len()..];
            }
            None => {
                out.push_str(rest);
                break;
            }
        }
    }
    out
}

/// A usable template must mention every placeholder.
pub fn template_is_complete(template: &str) -> bool {
    [PH_FEEDBACK, PH_INSIGHTS, PH_MEMORIES].iter().all(|ph| template.contains(ph))
}
