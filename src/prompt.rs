//! Combined prompt construction.

/// Separator placed between the scene instruction and the user's text.
pub const PROMPT_SEPARATOR: &str = "。";

/// Combines a scene instruction with an optional user instruction.
///
/// Blank user text (empty or whitespace only) yields the template unchanged.
/// Otherwise the user text is appended verbatim, untrimmed, after
/// [`PROMPT_SEPARATOR`].
pub fn build_prompt(template: &str, user_text: &str) -> String {
    if user_text.trim().is_empty() {
        template.to_string()
    } else {
        format!("{template}{PROMPT_SEPARATOR}{user_text}")
    }
}
