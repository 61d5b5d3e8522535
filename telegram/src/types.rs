//! The slice of the Bot API object model this transport reads. Unknown
//! fields are ignored.

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    #[serde(default)]
    pub error_code: Option<i64>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub result: Option<T>,
}

#[derive(Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Deserialize)]
pub struct Message {
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_updates_with_and_without_text() {
        let raw = r#"{
            "ok": true,
            "result": [
                {"update_id": 5, "message": {"message_id": 1, "chat": {"id": 42, "type": "private"}, "text": "hi"}},
                {"update_id": 6, "edited_message": {"message_id": 1, "chat": {"id": 42}}},
                {"update_id": 7, "message": {"message_id": 2, "chat": {"id": 42}, "photo": []}}
            ]
        }"#;
        let resp: ApiResponse<Vec<Update>> = serde_json::from_str(raw).expect("parse");
        let updates = resp.result.expect("result");
        assert_eq!(updates.len(), 3);
        assert_eq!(
            updates[0].message.as_ref().and_then(|m| m.text.as_deref()),
            Some("hi")
        );
        assert!(updates[1].message.is_none());
        assert!(updates[2].message.as_ref().is_some_and(|m| m.text.is_none()));
    }

    #[test]
    fn parses_error_responses() {
        let raw = r#"{"ok": false, "error_code": 409, "description": "Conflict: terminated by other getUpdates request"}"#;
        let resp: ApiResponse<Vec<Update>> = serde_json::from_str(raw).expect("parse");
        assert!(!resp.ok);
        assert_eq!(resp.error_code, Some(409));
        assert!(resp.result.is_none());
    }
}
