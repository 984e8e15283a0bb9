use std::time::Duration;

/// Client for the external embedding service. The model is an opaque
/// collaborator: one POST in, one fixed-length vector out. Any failure
/// (unset URL, timeout, bad shape) turns the vector tier off for this
/// process; it is never an error.
pub struct EmbeddingClient {
    url: String,
    http: reqwest::Client,
}

const REQUEST_TIMEOUT_MS: u64 = 2_000;

impl EmbeddingClient {
    /// `LAMINARK_EMBED_URL` env, else `embedding.json` config, else none.
    pub fn from_env() -> Option<Self> {
        let url = std::env::var("LAMINARK_EMBED_URL").ok().or_else(|| {
            crate::models::read_json_config("embedding.json")
                .and_then(|v| v["url"].as_str().map(|s| s.to_string()))
        })?;
        if url.is_empty() {
            return None;
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(REQUEST_TIMEOUT_MS))
            .build()
            .ok()?;
        Some(Self { url, http })
    }

    /// Embed one text. Contract: `POST {"text": ...}` -> `{"embedding": [f32]}`.
    pub async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        let resp = self
            .http
            .post(&self.url)
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await
            .ok()?;
        if !resp.status().is_success() {
            crate::models::debug_log(&format!("embedding service returned {}", resp.status()));
            return None;
        }
        let body: serde_json::Value = resp.json().await.ok()?;
        let vec: Vec<f32> = body["embedding"]
            .as_array()?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        if vec.is_empty() {
            None
        } else {
            Some(vec)
        }
    }
}

/// Cosine distance in [0, 2]. Zero-magnitude vectors are maximally distant.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 1.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += (*x as f64) * (*y as f64);
        norm_a += (*x as f64) * (*x as f64);
        norm_b += (*y as f64) * (*y as f64);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    (1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())) as f32
}

/// Vectors are stored as little-endian f32 blobs.
pub fn to_blob(vec: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(vec.len() * 4);
    for v in vec {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

pub fn from_blob(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}
