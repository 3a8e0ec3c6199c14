use super::{mailbox::MailClient, request::RequestOptions, segment};
use crate::error::Result;
use once_cell::sync::Lazy;
use serde_json::Value;
use std::collections::HashMap;

/// Friendly names accepted for Graph's well-known folders, lower-cased.
static WELL_KNOWN_FOLDERS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("inbox", "inbox"),
        ("drafts", "drafts"),
        ("sent", "sentitems"),
        ("sent items", "sentitems"),
        ("sentitems", "sentitems"),
        ("deleted", "deleteditems"),
        ("deleted items", "deleteditems"),
        ("deleteditems", "deleteditems"),
        ("trash", "deleteditems"),
        ("junk", "junkemail"),
        ("junk email", "junkemail"),
        ("junkemail", "junkemail"),
        ("spam", "junkemail"),
        ("archive", "archive"),
        ("outbox", "outbox"),
        ("clutter", "clutter"),
        ("conversation history", "conversationhistory"),
        ("conversationhistory", "conversationhistory"),
        ("recoverable items", "recoverableitemsdeletions"),
        ("recoverableitemsdeletions", "recoverableitemsdeletions"),
        ("search folders", "searchfolders"),
        ("searchfolders", "searchfolders"),
        ("msgfolderroot", "msgfolderroot"),
        ("root", "msgfolderroot"),
    ])
});

/// Maps a friendly folder name to its well-known Graph alias.
/// Unknown names (typically opaque folder ids) are returned unchanged.
pub fn resolve_folder_name(name: &str) -> String {
    let trimmed = name.trim();
    WELL_KNOWN_FOLDERS
        .get(trimmed.to_lowercase().as_str())
        .map(|alias| alias.to_string())
        .unwrap_or_else(|| trimmed.to_string())
}

impl MailClient {
    /// Top-level mail folders of a mailbox, all pages.
    pub fn list_folders(&self, user_id: &str) -> Result<Vec<Value>> {
        let path = format!("/users/{}/mailFolders", segment(user_id, "user id")?);
        self.executor().get_all_pages(&path, RequestOptions::default())
    }

    pub fn list_child_folders(&self, user_id: &str, folder: &str) -> Result<Vec<Value>> {
        let path = format!(
            "/users/{}/mailFolders/{}/childFolders",
            segment(user_id, "user id")?,
            segment(&resolve_folder_name(folder), "folder")?
        );
        self.executor().get_all_pages(&path, RequestOptions::default())
    }

    pub fn get_folder(&self, user_id: &str, folder: &str) -> Result<Value> {
        let path = format!(
            "/users/{}/mailFolders/{}",
            segment(user_id, "user id")?,
            segment(&resolve_folder_name(folder), "folder")?
        );
        self.executor().get(&path, &RequestOptions::default())
    }
}
