use serde_json::{Value, json};

use super::ReviewQuery;

/// Shown with every sample page so it is never mistaken for live data.
pub const SAMPLE_NOTICE: &str =
    "Upstream review service is unavailable; showing built-in sample reviews, not live predictions.";

const SAMPLE_PAGE_SIZE: u32 = 15;

fn sample_reviews() -> Vec<Value> {
    vec![
        json!({
            "id": "66b6d3fcf8a1b2d3e4f56789",
            "text": "There was a collision near the central station this morning.",
            "metadata": { "source": "faiss", "processed_at": "2025-08-09T14:20:00Z" },
            "prediction": { "label": "INCIDENT", "confidence": 0.9998 },
            "predicted_at": "2025-08-10T14:30:12Z"
        }),
        json!({
            "id": "66b6d4aaf8a1b2d3e4f5678a",
            "text": "Explosion reported in the industrial area late last night.",
            "metadata": { "source": "faiss" },
            "prediction": { "label": "INCIDENT", "confidence": 0.9874 },
            "predicted_at": "2025-08-09T23:45:07Z"
        }),
    ]
}

/// Placeholder review page shaped like an upstream response and flagged as sample data.
pub fn sample_page(query: &ReviewQuery) -> Value {
    let page = query.page.unwrap_or(1).max(1);
    let items: Vec<Value> = sample_reviews()
        .into_iter()
        .filter(|review| match query.label.as_deref() {
            Some(label) if !label.is_empty() => review["prediction"]["label"] == label,
            _ => true,
        })
        .collect();
    let total = items.len();
    json!({
        "data": items.clone(),
        "items": items,
        "meta": {
            "total": total,
            "page": page,
            "page_size": SAMPLE_PAGE_SIZE,
            "has_next": false,
            "has_prev": page > 1
        },
        "data_source": "sample",
        "notice": SAMPLE_NOTICE
    })
}
