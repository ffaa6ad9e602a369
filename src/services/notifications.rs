use serde_json::{json, Value};
use sqlx::PgPool;

/// Queue a notification outbox row and, when a downstream webhook is
/// configured, push it best-effort. Delivery mechanics live outside the
/// core; failures here are logged, never surfaced to the caller.
pub async fn queue_notification(
    pool: &PgPool,
    http_client: &reqwest::Client,
    notify_webhook_url: Option<&str>,
    kind: &str,
    title: &str,
    body: &str,
    metadata: Value,
) {
    let result = sqlx::query(
        "INSERT INTO notifications (kind, title, body, metadata, status)
         VALUES ($1, $2, $3, $4, 'queued')",
    )
    .bind(kind)
    .bind(title)
    .bind(body)
    .bind(&metadata)
    .execute(pool)
    .await;

    if let Err(error) = result {
        tracing::warn!(kind, error = %error, "Failed to queue notification");
    }

    let Some(url) = notify_webhook_url.filter(|value| !value.trim().is_empty()) else {
        return;
    };

    let payload = json!({
        "kind": kind,
        "title": title,
        "body": body,
        "metadata": metadata,
    });

    match http_client.post(url).json(&payload).send().await {
        Ok(response) if !response.status().is_success() => {
            tracing::warn!(kind, status = %response.status(), "Notification webhook rejected event");
        }
        Ok(_) => {}
        Err(error) => {
            tracing::warn!(kind, error = %error, "Notification webhook dispatch failed");
        }
    }
}
