//! Prompts for the two enrichment completion calls.
//!
//! Kept in one place so tests can assert on what is sent to the model.

/// System instruction for the summarization call.
pub const SUMMARY_SYSTEM_PROMPT: &str = "You are a helpful assistant that summarizes articles.";

/// System instruction for the metadata extraction call.
pub const METADATA_SYSTEM_PROMPT: &str =
    "You are an assistant that extracts metadata and generates keywords for articles.";

/// User message for the summarization call.
pub fn summary_user_prompt(text: &str) -> String {
    format!("Please summarize the following article:\n\n{}", text)
}

/// User message for the metadata extraction call. The response is expected
/// as one `Label: value` line per field (see [`crate::metadata`]).
pub fn metadata_user_prompt(file_name: &str, text: &str) -> String {
    format!(
        "Extract the following metadata from the article text and file name:\n\
         - Title\n\
         - Author\n\
         - Publication Date\n\
         - Keywords (comma-separated)\n\
         - Publication Name (like Economist, MIT Technology Review)\n\n\
         File Name: {}\n\
         Article Text: {}",
        file_name, text
    )
}
