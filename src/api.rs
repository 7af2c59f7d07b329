//! Data collaborator client: GraphQL reads for chapters and verses, the
//! multipart upload+evaluate mutation, and reference-audio downloads.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::segments::WordSegment;

/// Chapter record as served by the collaborator. Immutable for the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Surah {
    pub id: String,
    pub number: u16,
    /// Arabic name
    pub ar: String,
    /// English name
    pub en: String,
    pub ayat_count: u16,
}

/// Verse record. `segments` holds one `[start_ms, end_ms]` window per
/// whitespace-delimited word of `text`; a count mismatch means the verse
/// has no usable timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ayah {
    pub id: String,
    pub number: u16,
    pub text: String,
    #[serde(default)]
    pub segments: Vec<WordSegment>,
    #[serde(default)]
    pub transliteration: Option<String>,
    #[serde(default)]
    pub meaning: Option<String>,
}

/// Server-computed per-word scoring of one recitation attempt. Scoped to
/// the verse the attempt was recorded on; stale the moment the displayed
/// verse changes or a new recording starts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    pub verse_id: String,
    pub ratios: Vec<f32>,
    pub mispronounced_positions: Vec<Vec<u32>>,
    /// First evaluated word index (inclusive)
    pub start_index: u32,
    /// One past the last evaluated word index
    pub end_index: u32,
}

/// Wire shape of the evaluate mutation result. The verse id is not echoed
/// back; the caller rebinds it from the request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EvaluationWire {
    ratios: Vec<f32>,
    #[serde(default)]
    mispronounced_positions: Vec<Vec<u32>>,
    start_index: u32,
    end_index: u32,
}

const GET_SURAHS: &str = "query GetSurahs { sorat { id ar en ayatCount number } }";

const GET_AYAT: &str = "query GetAyat($soraId: ID!) { \
    ayat(soraId: $soraId) { id text segments number transliteration meaning } }";

const GET_AYAH: &str = "query GetAyah($number: Int!, $soraNumber: Int!) { \
    aya(number: $number, soraNumber: $soraNumber) { id text segments number transliteration meaning } }";

const EVALUATE: &str = "mutation Evaluate($file: Upload!, $ayaId: ID!) { \
    evaluate(file: $file, ayaId: $ayaId) { ratios mispronouncedPositions startIndex endIndex } }";

pub struct QuranClient {
    http: reqwest::Client,
    graphql_url: String,
}

impl QuranClient {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            graphql_url: config.graphql_url.clone(),
        }
    }

    /// One GraphQL POST. A response carrying `errors` or lacking `data`
    /// counts as a failure, mirroring the collaborator's fetch helper.
    async fn graphql(
        &self,
        query: &str,
        variables: serde_json::Value,
    ) -> Result<serde_json::Value, EngineError> {
        let response = self
            .http
            .post(&self.graphql_url)
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await
            .map_err(|e| EngineError::DataFetch(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(EngineError::DataFetch(format!(
                "server returned {}",
                response.status()
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| EngineError::DataFetch(format!("invalid response body: {e}")))?;

        if let Some(errors) = body.get("errors").and_then(|e| e.as_array()) {
            if let Some(first) = errors.first() {
                let message = first
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("unknown GraphQL error");
                return Err(EngineError::DataFetch(message.to_string()));
            }
        }

        body.get("data")
            .cloned()
            .ok_or_else(|| EngineError::DataFetch("response missing data".to_string()))
    }

    /// All 114 chapters, sorted by chapter number.
    pub async fn fetch_surahs(&self) -> Result<Vec<Surah>, EngineError> {
        let data = self.graphql(GET_SURAHS, json!({})).await?;
        let mut surahs: Vec<Surah> = serde_json::from_value(data["sorat"].clone())
            .map_err(|e| EngineError::DataFetch(format!("bad chapter list: {e}")))?;
        surahs.sort_by_key(|s| s.number);
        Ok(surahs)
    }

    /// All verses of one chapter. The collaborator returns them unsorted;
    /// they are sorted by verse number here, before anyone can observe them.
    pub async fn fetch_ayat(&self, surah: u16) -> Result<Vec<Ayah>, EngineError> {
        let data = self
            .graphql(GET_AYAT, json!({ "soraId": surah.to_string() }))
            .await?;
        let mut ayat: Vec<Ayah> = serde_json::from_value(data["ayat"].clone())
            .map_err(|e| EngineError::DataFetch(format!("bad verse list: {e}")))?;
        ayat.sort_by_key(|a| a.number);
        Ok(ayat)
    }

    /// One verse by chapter and verse number.
    pub async fn fetch_ayah(&self, surah: u16, ayah: u16) -> Result<Ayah, EngineError> {
        let data = self
            .graphql(GET_AYAH, json!({ "number": ayah, "soraNumber": surah }))
            .await?;
        serde_json::from_value(data["aya"].clone())
            .map_err(|e| EngineError::DataFetch(format!("bad verse record: {e}")))
    }

    /// Submit one recorded attempt for scoring: a single multipart POST
    /// carrying the JSON operation descriptor (`operations`), the
    /// upload-field mapping (`map`), and the WAV payload under the mapped
    /// part name. Exactly one such request is in flight per attempt.
    pub async fn evaluate(&self, wav: Vec<u8>, verse_id: &str) -> Result<Evaluation, EngineError> {
        let operations = json!({
            "query": EVALUATE,
            "variables": { "file": null, "ayaId": verse_id },
        });
        let map = json!({ "0": ["variables.file"] });

        let form = reqwest::multipart::Form::new()
            .text("operations", operations.to_string())
            .text("map", map.to_string())
            .part(
                "0",
                reqwest::multipart::Part::bytes(wav)
                    .file_name("recitation.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| EngineError::EvaluationUpload(format!("bad payload: {e}")))?,
            );

        let response = self
            .http
            .post(&self.graphql_url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| EngineError::EvaluationUpload(format!("upload failed: {e}")))?;

        if !response.status().is_success() {
            return Err(EngineError::EvaluationUpload(format!(
                "server returned {}",
                response.status()
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| EngineError::EvaluationUpload(format!("invalid response body: {e}")))?;

        if let Some(errors) = body.get("errors").and_then(|e| e.as_array()) {
            if let Some(first) = errors.first() {
                let message = first
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("unknown GraphQL error");
                return Err(EngineError::EvaluationUpload(message.to_string()));
            }
        }

        let wire: EvaluationWire = serde_json::from_value(body["data"]["evaluate"].clone())
            .map_err(|e| EngineError::EvaluationUpload(format!("unexpected result shape: {e}")))?;

        Ok(Evaluation {
            verse_id: verse_id.to_string(),
            ratios: wire.ratios,
            mispronounced_positions: wire.mispronounced_positions,
            start_index: wire.start_index,
            end_index: wire.end_index,
        })
    }

    /// Download reference audio bytes for one verse, streamed into memory.
    pub async fn download_audio(&self, url: &str) -> Result<Vec<u8>, EngineError> {
        use futures_util::StreamExt;

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| EngineError::PlaybackLoad(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(EngineError::PlaybackLoad(format!(
                "server returned {}",
                response.status()
            )));
        }

        let mut bytes = Vec::with_capacity(response.content_length().unwrap_or(0) as usize);
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| EngineError::PlaybackLoad(format!("stream error: {e}")))?;
            bytes.extend_from_slice(&chunk);
        }
        Ok(bytes)
    }
}
