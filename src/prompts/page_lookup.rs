//! Page-count lookup prompts for Swedish book metadata.
//!
//! The user prompt restates the exact JSON shape expected back. The model does
//! not always honour it, which is what [`crate::recovery`] deals with.

use crate::books::BookQuery;
use serde::{Deserialize, Serialize};

/// System prompt: task, response language and value formatting rules
pub const SYSTEM_PROMPT: &str = r#"Du är en expert på att hitta information om svenska böcker.
För varje bok, sök grundligt efter information om sidantal och andra detaljer.
VIKTIGT: Formattera alla värden som korrekta JSON-värden, använd "N/A" för saknade värden."#;

/// User prompt template for one batch
/// Placeholders: {book_list}
pub const USER_PROMPT_TEMPLATE: &str = r#"Sök efter dessa böcker och rapportera sidantal och källinformation:

{book_list}

För varje bok, ange:
1. Exakt sidantal om det finns
2. ISBN om det hittas
3. Förlag och utgivningsår
4. Källan till informationen

VIKTIGT:
- Använd "N/A" (inom citattecken) för saknade värden
- Alla strängar måste vara inom citattecken
- Numeriska värden ska INTE vara inom citattecken

Formattera svaret som JSON:
[
    {
        "title": "titel",
        "pages": sidantal_eller_NA,
        "note": "förlag, ISBN, och källinformation",
        "url": "url_till_källan"
    }
]"#;

/// Chat message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

/// One message of the two-message instruction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// Render books as `- {title} ({year})`, one per line
pub fn format_book_list(books: &[BookQuery]) -> String {
    books
        .iter()
        .map(|b| format!("- {} ({})", b.title, b.year))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Build user prompt with the batch's book list
pub fn build_user_prompt(books: &[BookQuery]) -> String {
    USER_PROMPT_TEMPLATE.replace("{book_list}", &format_book_list(books))
}

/// Build the system + user messages for one batch
pub fn build_messages(books: &[BookQuery]) -> Vec<ChatMessage> {
    vec![
        ChatMessage {
            role: Role::System,
            content: SYSTEM_PROMPT.to_string(),
        },
        ChatMessage {
            role: Role::User,
            content: build_user_prompt(books),
        },
    ]
}
