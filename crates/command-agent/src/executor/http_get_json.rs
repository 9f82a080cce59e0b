//! HTTP_GET_JSON executor (spec.md §4.7.2).
//!
//! Step 7 precedes the return: the snapshot is written to the journal
//! *before* the result is handed back to the caller, which is what makes
//! a crash between "fetch done" and "reported to server" safe to replay -
//! recovery will see a non-null `http_snapshot` and skip the GET entirely.

use serde_json::{json, Value};

use crate::executor::{ExecutorContext, ExecutorError, HTTP_BODY_CHAR_LIMIT};
use crate::journal::JournalStage;

pub async fn execute(
    payload: &Value,
    ctx: &mut ExecutorContext<'_>,
) -> Result<Value, ExecutorError> {
    // Replay guard: a non-null snapshot means a previous attempt already
    // did the I/O, possibly in a process that then crashed before
    // reporting. No GET is reissued.
    if let Some(snapshot) = ctx.journal().http_snapshot.clone() {
        return Ok(snapshot);
    }

    let url = payload
        .get("url")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ExecutorError::Failed("payload.url missing".to_string()))?
        .to_string();

    ctx.advance_stage(JournalStage::InProgress)
        .await
        .map_err(|err| ExecutorError::Failed(err.to_string()))?;

    let result = fetch(&ctx.http_client, &url).await;

    ctx.save_http_snapshot(result.clone())
        .await
        .map_err(|err| ExecutorError::Failed(err.to_string()))?;

    Ok(result)
}

async fn fetch(client: &reqwest::Client, url: &str) -> Value {
    let response = match client.get(url).send().await {
        Ok(response) => response,
        Err(err) if err.is_timeout() => {
            return http_result(0, None, false, 0, Some("Request timeout".to_string()))
        }
        Err(err) => return http_result(0, None, false, 0, Some(err.to_string())),
    };

    let status = response.status().as_u16() as i64;
    if (300..400).contains(&status) {
        return http_result(
            status,
            None,
            false,
            0,
            Some("Redirects not followed".to_string()),
        );
    }

    let text = match response.text().await {
        Ok(text) => text,
        Err(err) if err.is_timeout() => {
            return http_result(0, None, false, 0, Some("Request timeout".to_string()))
        }
        Err(err) => return http_result(0, None, false, 0, Some(err.to_string())),
    };

    let char_count = text.chars().count();
    let (body_text, truncated, bytes_returned) = if char_count > HTTP_BODY_CHAR_LIMIT {
        let truncated_text: String = text.chars().take(HTTP_BODY_CHAR_LIMIT).collect();
        (truncated_text, true, HTTP_BODY_CHAR_LIMIT as i64)
    } else {
        (text, false, char_count as i64)
    };

    let body = match serde_json::from_str::<Value>(&body_text) {
        Ok(parsed) => parsed,
        Err(_) => Value::String(body_text),
    };

    http_result(status, Some(body), truncated, bytes_returned, None)
}

fn http_result(
    status: i64,
    body: Option<Value>,
    truncated: bool,
    bytes_returned: i64,
    error: Option<String>,
) -> Value {
    json!({
        "status": status,
        "body": body,
        "truncated": truncated,
        "bytesReturned": bytes_returned,
        "error": error,
    })
}
